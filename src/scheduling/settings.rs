// Tenant Settings
//
// Loads per-tenant scheduling configuration (auto-assignment, request status
// after assignment, currency, UTC offset, surcharges) from the record store,
// caches the raw document in the key-value cache, and resolves it into typed
// settings with documented defaults.

use async_trait::async_trait;
use chrono::{FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::models::RequestStatus;
use crate::scheduling::deadline::CallTimeout;
use crate::scheduling::error::{SchedulingError, SchedulingResult};
use crate::scheduling::metrics::PerformanceMetrics;
use crate::scheduling::types::AssignmentStrategy;
use crate::store::{KeyValueCache, SchedulingStore};

/// Default time-to-live of a cached settings document
pub const DEFAULT_SETTINGS_TTL: Duration = Duration::from_secs(60);

/// Largest accepted UTC offset, in minutes
const MAX_UTC_OFFSET_MINUTES: i32 = 14 * 60;

/// Half-open range of local hours `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start && hour < self.end
    }
}

/// Surcharge configuration used by the pricing engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingSettings {
    pub weekend_surcharge_percent: Decimal,
    pub peak_surcharge_percent: Decimal,
    pub peak_hours: Vec<HourRange>,
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            weekend_surcharge_percent: Decimal::from(15),
            peak_surcharge_percent: Decimal::from(10),
            peak_hours: vec![HourRange::new(10, 12), HourRange::new(15, 17)],
        }
    }
}

/// Resolved scheduling settings of one tenant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub auto_assign: bool,
    pub auto_assign_strategy: AssignmentStrategy,
    /// Either `Assigned` or `InProgress`
    pub default_request_status: RequestStatus,
    /// `None` means the global default currency
    pub base_currency: Option<String>,
    pub utc_offset_minutes: i32,
    pub pricing: PricingSettings,
}

impl Default for TenantSettings {
    fn default() -> Self {
        Self {
            auto_assign: false,
            auto_assign_strategy: AssignmentStrategy::LoadBased,
            default_request_status: RequestStatus::Assigned,
            base_currency: None,
            utc_offset_minutes: 0,
            pricing: PricingSettings::default(),
        }
    }
}

impl TenantSettings {
    /// Offset that defines the tenant's local calendar day
    pub fn offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }

    /// Tenant base currency, or `default` when none is configured
    pub fn currency_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.base_currency.as_deref().unwrap_or(default)
    }

    /// Build settings from a stored document, applying defaults and validation
    pub fn from_document(document: &serde_json::Value) -> SchedulingResult<Self> {
        let raw: RawTenantSettings = serde_json::from_value(document.clone())
            .map_err(|e| SchedulingError::InvalidConfiguration(e.to_string()))?;
        raw.resolve()
    }
}

/// Settings document as stored; every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawTenantSettings {
    auto_assign: Option<bool>,
    auto_assign_strategy: Option<String>,
    default_request_status: Option<String>,
    base_currency: Option<String>,
    utc_offset_minutes: Option<i32>,
    weekend_surcharge_percent: Option<Decimal>,
    peak_surcharge_percent: Option<Decimal>,
    peak_hours: Option<Vec<[u32; 2]>>,
}

impl RawTenantSettings {
    fn resolve(self) -> SchedulingResult<TenantSettings> {
        let defaults = TenantSettings::default();

        let auto_assign_strategy = match self.auto_assign_strategy.as_deref() {
            None => defaults.auto_assign_strategy,
            Some(value) => AssignmentStrategy::from_str(value).unwrap_or_else(|_| {
                tracing::warn!("Unknown auto_assign_strategy '{}', using load_based", value);
                AssignmentStrategy::LoadBased
            }),
        };

        let default_request_status = match self.default_request_status.as_deref() {
            None => defaults.default_request_status,
            Some(value) => match RequestStatus::from_str(value) {
                Ok(status @ (RequestStatus::Assigned | RequestStatus::InProgress)) => status,
                _ => {
                    tracing::warn!(
                        "default_request_status '{}' is not assigned or in_progress, using assigned",
                        value
                    );
                    RequestStatus::Assigned
                }
            },
        };

        let utc_offset_minutes = self.utc_offset_minutes.unwrap_or(defaults.utc_offset_minutes);
        validate_utc_offset(utc_offset_minutes)?;

        let weekend_surcharge_percent = self
            .weekend_surcharge_percent
            .unwrap_or(defaults.pricing.weekend_surcharge_percent);
        validate_percent("weekend_surcharge_percent", weekend_surcharge_percent)?;

        let peak_surcharge_percent = self
            .peak_surcharge_percent
            .unwrap_or(defaults.pricing.peak_surcharge_percent);
        validate_percent("peak_surcharge_percent", peak_surcharge_percent)?;

        let peak_hours = match self.peak_hours {
            None => defaults.pricing.peak_hours,
            Some(ranges) => ranges
                .into_iter()
                .map(|[start, end]| validate_hour_range(HourRange::new(start, end)))
                .collect::<SchedulingResult<Vec<_>>>()?,
        };

        let base_currency = self
            .base_currency
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty());

        Ok(TenantSettings {
            auto_assign: self.auto_assign.unwrap_or(defaults.auto_assign),
            auto_assign_strategy,
            default_request_status,
            base_currency,
            utc_offset_minutes,
            pricing: PricingSettings {
                weekend_surcharge_percent,
                peak_surcharge_percent,
                peak_hours,
            },
        })
    }
}

fn validate_percent(field: &str, value: Decimal) -> SchedulingResult<()> {
    if value < Decimal::ZERO || value > Decimal::from(100) {
        return Err(SchedulingError::InvalidConfiguration(format!(
            "{} must be between 0 and 100, got {}",
            field, value
        )));
    }
    Ok(())
}

fn validate_hour_range(range: HourRange) -> SchedulingResult<HourRange> {
    if range.end > 24 || range.start >= range.end {
        return Err(SchedulingError::InvalidConfiguration(format!(
            "Invalid peak hour range [{}, {}): expected 0 <= start < end <= 24",
            range.start, range.end
        )));
    }
    Ok(range)
}

fn validate_utc_offset(minutes: i32) -> SchedulingResult<()> {
    if minutes.abs() > MAX_UTC_OFFSET_MINUTES {
        return Err(SchedulingError::InvalidConfiguration(format!(
            "utc_offset_minutes must be within ±{}, got {}",
            MAX_UTC_OFFSET_MINUTES, minutes
        )));
    }
    Ok(())
}

/// Source of tenant settings
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    /// Settings for `tenant_id`; `None` yields the defaults
    async fn tenant_settings(&self, tenant_id: Option<Uuid>) -> SchedulingResult<TenantSettings>;
}

/// Fixed settings for every tenant
#[derive(Debug, Clone, Default)]
pub struct StaticSettings {
    settings: TenantSettings,
}

impl StaticSettings {
    pub fn new(settings: TenantSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn tenant_settings(&self, _: Option<Uuid>) -> SchedulingResult<TenantSettings> {
        Ok(self.settings.clone())
    }
}

/// Settings read from the record store and cached as raw documents
///
/// Cache failures never fail a lookup; the store is the source of truth.
pub struct StoreSettingsProvider {
    store: Arc<dyn SchedulingStore>,
    cache: Arc<dyn KeyValueCache>,
    cache_ttl: Duration,
    timeout: CallTimeout,
    metrics: Option<PerformanceMetrics>,
}

impl StoreSettingsProvider {
    pub fn new(store: Arc<dyn SchedulingStore>, cache: Arc<dyn KeyValueCache>) -> Self {
        Self {
            store,
            cache,
            cache_ttl: DEFAULT_SETTINGS_TTL,
            timeout: CallTimeout::default(),
            metrics: None,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_timeout(mut self, timeout: CallTimeout) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: PerformanceMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn cache_key(tenant_id: Uuid) -> String {
        format!("settings:{}", tenant_id)
    }

    /// Drop the cached document so the next lookup reads the store
    pub async fn invalidate(&self, tenant_id: Uuid) {
        let key = Self::cache_key(tenant_id);
        if let Err(e) = self.timeout.run("cache_delete", self.cache.delete(&key)).await {
            tracing::warn!("Failed to invalidate settings for tenant {}: {}", tenant_id, e);
        }
    }

    async fn cached_document(&self, key: &str) -> Option<serde_json::Value> {
        match self.timeout.run("cache_get", self.cache.get(key)).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(document) => Some(document),
                Err(e) => {
                    tracing::warn!("Discarding unreadable cached settings {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Settings cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn load_document(&self, tenant_id: Uuid) -> SchedulingResult<serde_json::Value> {
        let document = self
            .timeout
            .run("tenant_settings", self.store.tenant_settings(tenant_id))
            .await?
            .unwrap_or_else(|| serde_json::json!({}));

        let key = Self::cache_key(tenant_id);
        let raw = document.to_string();
        if let Err(e) = self
            .timeout
            .run("cache_set", self.cache.set(&key, &raw, self.cache_ttl))
            .await
        {
            tracing::warn!("Settings cache write failed for {}: {}", key, e);
        }

        tracing::debug!("Loaded settings for tenant {}", tenant_id);
        Ok(document)
    }
}

#[async_trait]
impl SettingsProvider for StoreSettingsProvider {
    async fn tenant_settings(&self, tenant_id: Option<Uuid>) -> SchedulingResult<TenantSettings> {
        let Some(tenant_id) = tenant_id else {
            return Ok(TenantSettings::default());
        };

        let key = Self::cache_key(tenant_id);
        let document = match self.cached_document(&key).await {
            Some(document) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_hit();
                }
                document
            }
            None => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_cache_miss();
                }
                self.load_document(tenant_id).await?
            }
        };

        TenantSettings::from_document(&document)
    }
}
