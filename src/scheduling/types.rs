// Domain type definitions for the scheduling core
// Shared enums used across the availability, conflict, pricing and assignment engines

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable reason attached to a detected booking conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictReason {
    /// Service missing, inactive, or not accepting bookings
    ServiceInactive,

    /// Proposed window intersects a buffer-expanded existing booking
    Overlap,

    /// Service already holds its maximum bookings for that day
    DailyCap,

    /// Reserved for business-hours enforcement; never produced by the detector today
    OutsideBusinessHours,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::ServiceInactive => "SERVICE_INACTIVE",
            ConflictReason::Overlap => "OVERLAP",
            ConflictReason::DailyCap => "DAILY_CAP",
            ConflictReason::OutsideBusinessHours => "OUTSIDE_BUSINESS_HOURS",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strategy used to pick a team member for an incoming request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStrategy {
    /// Least active workload, ties broken by ascending id
    LoadBased,

    /// Prefer members whose specialties contain the service category
    SkillBased,

    /// Cycle through the pool in id order
    RoundRobin,
}

impl Default for AssignmentStrategy {
    fn default() -> Self {
        AssignmentStrategy::LoadBased
    }
}

impl fmt::Display for AssignmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignmentStrategy::LoadBased => write!(f, "load_based"),
            AssignmentStrategy::SkillBased => write!(f, "skill_based"),
            AssignmentStrategy::RoundRobin => write!(f, "round_robin"),
        }
    }
}

impl std::str::FromStr for AssignmentStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "load_based" => Ok(AssignmentStrategy::LoadBased),
            "skill_based" => Ok(AssignmentStrategy::SkillBased),
            "round_robin" => Ok(AssignmentStrategy::RoundRobin),
            _ => Err(format!("Invalid assignment strategy: {}", s)),
        }
    }
}

/// Code of a line in a price breakdown, in display order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceComponentCode {
    Duration,
    Weekend,
    Peak,
    Emergency,
    Promo,
}

impl PriceComponentCode {
    pub fn default_label(&self) -> &'static str {
        match self {
            PriceComponentCode::Duration => "Extended duration",
            PriceComponentCode::Weekend => "Weekend surcharge",
            PriceComponentCode::Peak => "Peak hour surcharge",
            PriceComponentCode::Emergency => "Emergency surcharge",
            PriceComponentCode::Promo => "Promotion",
        }
    }
}

impl fmt::Display for PriceComponentCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceComponentCode::Duration => write!(f, "DURATION"),
            PriceComponentCode::Weekend => write!(f, "WEEKEND"),
            PriceComponentCode::Peak => write!(f, "PEAK"),
            PriceComponentCode::Emergency => write!(f, "EMERGENCY"),
            PriceComponentCode::Promo => write!(f, "PROMO"),
        }
    }
}

/// Type of discount carried by a promotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    /// Discount is a percentage of the base price (e.g., 10 = 10% off)
    Percentage,

    /// Discount is a fixed amount in major currency units (e.g., 5.00 = $5 off)
    FixedAmount,
}

impl fmt::Display for DiscountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscountType::Percentage => write!(f, "percentage"),
            DiscountType::FixedAmount => write!(f, "fixed_amount"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_conflict_reason_wire_format() {
        assert_eq!(serde_json::to_string(&ConflictReason::DailyCap).unwrap(), "\"DAILY_CAP\"");
        assert_eq!(
            serde_json::to_string(&ConflictReason::ServiceInactive).unwrap(),
            "\"SERVICE_INACTIVE\""
        );
        assert_eq!(ConflictReason::Overlap.to_string(), "OVERLAP");
    }

    #[test]
    fn test_assignment_strategy_parsing() {
        assert_eq!(
            AssignmentStrategy::from_str("round_robin").unwrap(),
            AssignmentStrategy::RoundRobin
        );
        assert!(AssignmentStrategy::from_str("random").is_err());
        assert_eq!(AssignmentStrategy::default(), AssignmentStrategy::LoadBased);
    }

    #[test]
    fn test_price_component_codes_order() {
        let mut codes = vec![
            PriceComponentCode::Promo,
            PriceComponentCode::Weekend,
            PriceComponentCode::Duration,
            PriceComponentCode::Emergency,
            PriceComponentCode::Peak,
        ];
        codes.sort();

        assert_eq!(
            codes,
            vec![
                PriceComponentCode::Duration,
                PriceComponentCode::Weekend,
                PriceComponentCode::Peak,
                PriceComponentCode::Emergency,
                PriceComponentCode::Promo,
            ]
        );
    }

    #[test]
    fn test_discount_type_deserialization() {
        let discount: DiscountType = serde_json::from_str("\"fixed_amount\"").unwrap();
        assert_eq!(discount, DiscountType::FixedAmount);
        assert_eq!(DiscountType::Percentage.to_string(), "percentage");
    }
}
