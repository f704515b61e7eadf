// Promotion resolution
//
// A promotion code resolves to at most one signed PROMO component. Unknown,
// inactive, expired or out-of-scope codes resolve to nothing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{percent_of, to_cents, PriceComponent};
use crate::scheduling::types::{DiscountType, PriceComponentCode};
use crate::store::{in_tenant_scope, StoreResult};

/// What a promotion is being resolved against
#[derive(Debug, Clone, Copy)]
pub struct PromotionContext {
    pub tenant_id: Option<Uuid>,
    pub service_id: Uuid,
    /// Base price in cents of the base currency
    pub base_cents: i64,
    pub scheduled_at: DateTime<Utc>,
}

/// Promotion row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Promotion {
    pub code: String,
    pub tenant_id: Uuid,
    /// `None` applies to every service of the tenant
    pub service_id: Option<Uuid>,
    pub discount_type: DiscountType,
    pub discount_value: Decimal,
    pub is_active: bool,
    pub valid_from: DateTime<Utc>,
    pub valid_until: Option<DateTime<Utc>>,
}

impl Promotion {
    /// Whether the promotion can be used for `context`
    pub fn applies_to(&self, context: &PromotionContext) -> bool {
        self.is_active
            && in_tenant_scope(context.tenant_id, self.tenant_id)
            && self.service_id.map_or(true, |id| id == context.service_id)
            && context.scheduled_at >= self.valid_from
            && self.valid_until.map_or(true, |until| context.scheduled_at < until)
    }

    /// Negative PROMO component; `None` for non-positive discounts
    pub fn discount(&self, base_cents: i64) -> Option<PriceComponent> {
        if self.discount_value <= Decimal::ZERO {
            return None;
        }

        let amount = match self.discount_type {
            DiscountType::Percentage => {
                percent_of(base_cents, self.discount_value.min(Decimal::from(100)))
            }
            DiscountType::FixedAmount => to_cents(self.discount_value * Decimal::from(100)),
        };

        (amount > 0).then(|| PriceComponent {
            code: PriceComponentCode::Promo,
            label: format!("Promotion {}", self.code.to_uppercase()),
            amount_cents: -amount,
        })
    }
}

/// Resolves promotion codes into price components
#[async_trait]
pub trait PromotionResolver: Send + Sync {
    async fn resolve(&self, code: &str, context: &PromotionContext) -> StoreResult<Option<PriceComponent>>;
}

/// Resolver that knows no codes
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPromotions;

#[async_trait]
impl PromotionResolver for NoPromotions {
    async fn resolve(&self, _: &str, _: &PromotionContext) -> StoreResult<Option<PriceComponent>> {
        Ok(None)
    }
}

/// Fixed in-process promotion list
#[derive(Debug, Clone, Default)]
pub struct StaticPromotions {
    promotions: Vec<Promotion>,
}

impl StaticPromotions {
    pub fn new(promotions: Vec<Promotion>) -> Self {
        Self { promotions }
    }
}

#[async_trait]
impl PromotionResolver for StaticPromotions {
    async fn resolve(&self, code: &str, context: &PromotionContext) -> StoreResult<Option<PriceComponent>> {
        Ok(self
            .promotions
            .iter()
            .filter(|p| p.code.eq_ignore_ascii_case(code.trim()))
            .find(|p| p.applies_to(context))
            .and_then(|p| p.discount(context.base_cents)))
    }
}

/// Promotions read from the `promotions` table
#[derive(Debug, Clone)]
pub struct PgPromotionResolver {
    pool: PgPool,
}

impl PgPromotionResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PromotionResolver for PgPromotionResolver {
    async fn resolve(&self, code: &str, context: &PromotionContext) -> StoreResult<Option<PriceComponent>> {
        let candidates = sqlx::query_as::<_, Promotion>(
            r#"
            SELECT code, tenant_id, service_id, discount_type, discount_value,
                   is_active, valid_from, valid_until
            FROM promotions
            WHERE upper(code) = upper($1)
              AND ($2::uuid IS NULL OR tenant_id = $2)
              AND is_active = true
            ORDER BY valid_from DESC
            "#,
        )
        .bind(code.trim())
        .bind(context.tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(candidates
            .iter()
            .find(|p| p.applies_to(context))
            .and_then(|p| p.discount(context.base_cents)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use rust_decimal_macros::dec;

    fn context() -> PromotionContext {
        PromotionContext {
            tenant_id: Some(Uuid::from_u128(1)),
            service_id: Uuid::from_u128(10),
            base_cents: 10000,
            scheduled_at: Utc.with_ymd_and_hms(2024, 3, 11, 10, 0, 0).unwrap(),
        }
    }

    fn promotion(discount_type: DiscountType, value: Decimal) -> Promotion {
        Promotion {
            code: "SPRING".to_string(),
            tenant_id: Uuid::from_u128(1),
            service_id: None,
            discount_type,
            discount_value: value,
            is_active: true,
            valid_from: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            valid_until: None,
        }
    }

    #[test]
    fn test_percentage_discount() {
        let component = promotion(DiscountType::Percentage, dec!(10)).discount(10000).unwrap();
        assert_eq!(component.code, PriceComponentCode::Promo);
        assert_eq!(component.amount_cents, -1000);
        assert_eq!(component.label, "Promotion SPRING");
    }

    #[test]
    fn test_fixed_discount_in_major_units() {
        let component = promotion(DiscountType::FixedAmount, dec!(5.005)).discount(10000).unwrap();
        assert_eq!(component.amount_cents, -501);
        assert!(promotion(DiscountType::FixedAmount, dec!(0)).discount(10000).is_none());
    }

    #[test]
    fn test_applicability_window_and_scope() {
        let ctx = context();
        assert!(promotion(DiscountType::Percentage, dec!(10)).applies_to(&ctx));

        let expired = Promotion {
            valid_until: Some(ctx.scheduled_at - Duration::days(1)),
            ..promotion(DiscountType::Percentage, dec!(10))
        };
        assert!(!expired.applies_to(&ctx));

        let other_service = Promotion {
            service_id: Some(Uuid::from_u128(99)),
            ..promotion(DiscountType::Percentage, dec!(10))
        };
        assert!(!other_service.applies_to(&ctx));

        let other_tenant = Promotion {
            tenant_id: Uuid::from_u128(2),
            ..promotion(DiscountType::Percentage, dec!(10))
        };
        assert!(!other_tenant.applies_to(&ctx));
    }

    #[tokio::test]
    async fn test_static_resolver_matches_codes_case_insensitively() {
        let resolver = StaticPromotions::new(vec![promotion(DiscountType::Percentage, dec!(20))]);

        let component = resolver.resolve("spring", &context()).await.unwrap();
        assert_eq!(component.map(|c| c.amount_cents), Some(-2000));

        assert!(resolver.resolve("UNKNOWN", &context()).await.unwrap().is_none());
        assert!(NoPromotions.resolve("SPRING", &context()).await.unwrap().is_none());
    }
}
