// Pricing Engine
//
// Quotes a booking as an itemised breakdown in integer cents: the service base
// price plus duration overage, weekend, peak-hour and emergency surcharges and
// an optional promotion, converted into the requested currency.
//
// Every percentage amount is taken from the base and rounded to the cent on
// its own (half away from zero). Conversion rounds each line independently.

pub mod promotions;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc, Weekday};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::scheduling::deadline::CallTimeout;
use crate::scheduling::error::{SchedulingError, SchedulingResult};
use crate::scheduling::metrics::{OperationType, PerformanceMetrics};
use crate::scheduling::settings::{PricingSettings, SettingsProvider};
use crate::scheduling::types::PriceComponentCode;
use crate::store::SchedulingStore;

pub use promotions::{
    NoPromotions, PgPromotionResolver, Promotion, PromotionContext, PromotionResolver,
    StaticPromotions,
};

/// Global fallback when neither the tenant nor the caller names a currency
pub const DEFAULT_CURRENCY: &str = "USD";

/// One line of a price breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceComponent {
    pub code: PriceComponentCode,
    pub label: String,
    /// Signed; discounts are negative
    pub amount_cents: i64,
}

impl PriceComponent {
    pub fn new(code: PriceComponentCode, amount_cents: i64) -> Self {
        Self {
            code,
            label: code.default_label().to_string(),
            amount_cents,
        }
    }
}

/// Itemised quote
///
/// `total_cents == subtotal_cents + Σ components.amount_cents` and
/// `total_cents >= 0` always hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub currency: String,
    pub base_cents: i64,
    pub components: Vec<PriceComponent>,
    pub subtotal_cents: i64,
    pub total_cents: i64,
    /// Rate applied to every line
    pub exchange_rate: Decimal,
    /// False when no rate was used, including the missing-rate fallback
    pub conversion_applied: bool,
}

impl PriceBreakdown {
    /// Breakdown for a missing or inactive service
    pub fn zero(currency: &str) -> Self {
        Self {
            currency: currency.to_string(),
            base_cents: 0,
            components: Vec::new(),
            subtotal_cents: 0,
            total_cents: 0,
            exchange_rate: Decimal::ONE,
            conversion_applied: false,
        }
    }

    /// A quote can only be booked when it charges something
    pub fn is_usable(&self) -> bool {
        self.total_cents > 0
    }

    pub fn component(&self, code: PriceComponentCode) -> Option<&PriceComponent> {
        self.components.iter().find(|c| c.code == code)
    }
}

/// Caller-controlled pricing options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingOptions {
    pub promo_code: Option<String>,
    pub emergency: bool,
    /// Applied only when `emergency` is set
    pub emergency_percent: Decimal,
    /// Defaults to the base currency
    pub target_currency: Option<String>,
}

/// Pricing request
#[derive(Debug, Clone)]
pub struct PriceRequest {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    /// Defaults to the service's standard duration
    pub duration_minutes: Option<i32>,
    pub options: PricingOptions,
}

/// Round to whole cents, half away from zero
pub fn to_cents(amount: Decimal) -> i64 {
    let rounded = amount.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    rounded.to_i64().unwrap_or(if rounded.is_sign_negative() {
        i64::MIN
    } else {
        i64::MAX
    })
}

/// `percent` % of `cents`, rounded to the cent
pub fn percent_of(cents: i64, percent: Decimal) -> i64 {
    to_cents(Decimal::from(cents) * percent / Decimal::from(100))
}

/// Inputs of the currency-independent part of a quote
#[derive(Debug, Clone)]
pub struct QuoteInput<'a> {
    pub base_price: Decimal,
    pub standard_duration_minutes: i32,
    pub duration_minutes: i32,
    /// Scheduled instant in the tenant's offset
    pub local_time: DateTime<FixedOffset>,
    pub pricing: &'a PricingSettings,
    /// `Some` when an emergency surcharge was requested
    pub emergency_percent: Option<Decimal>,
}

/// Base cents and the DURATION, WEEKEND, PEAK and EMERGENCY lines, in order
pub fn surcharges(input: &QuoteInput<'_>) -> (i64, Vec<PriceComponent>) {
    let base_cents = to_cents(input.base_price * Decimal::from(100));
    let mut components = Vec::new();

    let standard = input.standard_duration_minutes;
    if standard > 0 && input.duration_minutes > standard {
        let extra = input.duration_minutes - standard;
        let amount =
            to_cents(Decimal::from(base_cents) * Decimal::from(extra) / Decimal::from(standard));
        if amount > 0 {
            components.push(PriceComponent::new(PriceComponentCode::Duration, amount));
        }
    }

    if matches!(input.local_time.weekday(), Weekday::Sat | Weekday::Sun) {
        let amount = percent_of(base_cents, input.pricing.weekend_surcharge_percent);
        if amount > 0 {
            components.push(PriceComponent::new(PriceComponentCode::Weekend, amount));
        }
    }

    let hour = input.local_time.hour();
    if input.pricing.peak_hours.iter().any(|range| range.contains(hour)) {
        let amount = percent_of(base_cents, input.pricing.peak_surcharge_percent);
        if amount > 0 {
            components.push(PriceComponent::new(PriceComponentCode::Peak, amount));
        }
    }

    if let Some(percent) = input.emergency_percent {
        let amount = percent_of(base_cents, percent);
        if amount > 0 {
            components.push(PriceComponent::new(PriceComponentCode::Emergency, amount));
        }
    }

    (base_cents, components)
}

/// Append a promotion, limiting a discount to what the quote charges so far
pub fn apply_promotion(base_cents: i64, components: &mut Vec<PriceComponent>, promo: Option<PriceComponent>) {
    let Some(mut promo) = promo else {
        return;
    };

    let running: i64 = base_cents + components.iter().map(|c| c.amount_cents).sum::<i64>();
    if promo.amount_cents < 0 && running + promo.amount_cents < 0 {
        promo.amount_cents = -running.max(0);
    }
    if promo.amount_cents != 0 {
        components.push(promo);
    }
}

/// Convert every line at `rate` and total the breakdown
///
/// Independent rounding can push a fully discounted quote one cent below
/// zero; the promotion line absorbs the difference.
pub fn convert(
    currency: &str,
    base_cents: i64,
    components: Vec<PriceComponent>,
    rate: Decimal,
    conversion_applied: bool,
) -> PriceBreakdown {
    let scale = |cents: i64| to_cents(Decimal::from(cents) * rate);

    let subtotal_cents = scale(base_cents);
    let mut components: Vec<PriceComponent> = components
        .into_iter()
        .map(|c| PriceComponent {
            amount_cents: scale(c.amount_cents),
            ..c
        })
        .collect();

    let mut total_cents = subtotal_cents + components.iter().map(|c| c.amount_cents).sum::<i64>();
    if total_cents < 0 {
        if let Some(promo) = components
            .iter_mut()
            .find(|c| c.code == PriceComponentCode::Promo)
        {
            promo.amount_cents -= total_cents;
            total_cents = 0;
        }
    }

    PriceBreakdown {
        currency: currency.to_string(),
        base_cents: subtotal_cents,
        components,
        subtotal_cents,
        total_cents,
        exchange_rate: rate,
        conversion_applied,
    }
}

fn normalize_currency(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Pricing Engine
///
/// Deterministic for identical inputs and an unchanged exchange-rate table.
pub struct PricingEngine {
    store: Arc<dyn SchedulingStore>,
    settings: Arc<dyn SettingsProvider>,
    promotions: Arc<dyn PromotionResolver>,
    default_currency: String,
    timeout: CallTimeout,
    metrics: PerformanceMetrics,
}

impl PricingEngine {
    /// Create a new PricingEngine quoting in the global default currency
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        settings: Arc<dyn SettingsProvider>,
        promotions: Arc<dyn PromotionResolver>,
        timeout: CallTimeout,
        metrics: PerformanceMetrics,
    ) -> Self {
        Self {
            store,
            settings,
            promotions,
            default_currency: DEFAULT_CURRENCY.to_string(),
            timeout,
            metrics,
        }
    }

    /// Override the fallback currency for tenants without a base currency
    pub fn with_default_currency(mut self, currency: &str) -> Self {
        self.default_currency = normalize_currency(currency);
        self
    }

    /// Quote a booking
    ///
    /// Missing and inactive services yield a zero breakdown; callers must
    /// check `is_usable` before booking on the quote.
    pub async fn calculate_price(&self, request: &PriceRequest) -> SchedulingResult<PriceBreakdown> {
        let _timer = self.metrics.start(OperationType::Pricing);
        let options = &request.options;

        if options.emergency_percent < Decimal::ZERO {
            return Err(SchedulingError::Validation(
                "Emergency surcharge percent cannot be negative".to_string(),
            ));
        }
        if matches!(request.duration_minutes, Some(minutes) if minutes <= 0) {
            return Err(SchedulingError::Validation(
                "Booking duration must be positive".to_string(),
            ));
        }

        let service = self
            .timeout
            .run("find_service", self.store.find_service(request.tenant_id, request.service_id))
            .await?;

        // The owning tenant's settings apply even when the caller is unscoped
        let settings_tenant = service.as_ref().map(|s| s.tenant_id).or(request.tenant_id);
        let settings = self.settings.tenant_settings(settings_tenant).await?;
        let base_currency = normalize_currency(settings.currency_or(&self.default_currency));
        let target_currency = options
            .target_currency
            .as_deref()
            .map(normalize_currency)
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| base_currency.clone());

        let service = match service {
            Some(service) if service.is_bookable() => service,
            _ => {
                tracing::debug!("Service {} is missing or inactive; zero quote", request.service_id);
                return Ok(PriceBreakdown::zero(&target_currency));
            }
        };

        let input = QuoteInput {
            base_price: service.base_price,
            standard_duration_minutes: service.standard_duration_minutes,
            duration_minutes: request
                .duration_minutes
                .unwrap_or(service.standard_duration_minutes),
            local_time: request.scheduled_at.with_timezone(&settings.offset()),
            pricing: &settings.pricing,
            emergency_percent: options.emergency.then_some(options.emergency_percent),
        };
        let (base_cents, mut components) = surcharges(&input);

        let promo = match options.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => {
                let context = PromotionContext {
                    tenant_id: Some(service.tenant_id),
                    service_id: service.id,
                    base_cents,
                    scheduled_at: request.scheduled_at,
                };
                let promo = self
                    .timeout
                    .run("resolve_promotion", self.promotions.resolve(code, &context))
                    .await?;
                if promo.is_none() {
                    tracing::debug!("Promotion code '{}' did not apply", code);
                }
                promo
            }
            None => None,
        };
        apply_promotion(base_cents, &mut components, promo);

        let (rate, conversion_applied) = self.exchange_rate(&base_currency, &target_currency).await?;
        let breakdown = convert(&target_currency, base_cents, components, rate, conversion_applied);

        tracing::debug!(
            "Quoted service {}: {} {} ({} components)",
            service.id,
            breakdown.total_cents,
            breakdown.currency,
            breakdown.components.len()
        );
        Ok(breakdown)
    }

    /// Effective rate for `base → target`; a missing rate falls back to 1
    async fn exchange_rate(&self, base: &str, target: &str) -> SchedulingResult<(Decimal, bool)> {
        if base == target {
            return Ok((Decimal::ONE, false));
        }

        let rate = self
            .timeout
            .run("latest_exchange_rate", self.store.latest_exchange_rate(base, target))
            .await?;

        match rate {
            Some(rate) if rate.rate > Decimal::ZERO => Ok((rate.rate, true)),
            _ => {
                tracing::warn!(
                    "No usable exchange rate {} -> {}; quoting at rate 1 without conversion",
                    base,
                    target
                );
                Ok((Decimal::ONE, false))
            }
        }
    }
}
