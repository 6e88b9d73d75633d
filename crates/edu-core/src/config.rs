//! # Settlement Configuration
//!
//! Every tunable of the settlement engine in one serde tree:
//!
//! ```yaml
//! revenue:
//!   share_ratio: "0.7"
//!   grace_period: exclude      # or include
//!   pricing:
//!     monthly: "1000"
//!     yearly: "10000"
//! points:
//!   min_watch_ratio: 0.3
//!   weights:
//!     media_play: "0.2"
//!     download: "3"
//!     live_attendance: "5"
//! ```
//!
//! Resolution order: built-in defaults, then the YAML file (any subset of
//! fields), then `EDU_*` environment overrides, then [`SettlementConfig::validate`].
//!
//! | Variable | Field |
//! |----------|-------|
//! | `EDU_SHARE_RATIO` | `revenue.share_ratio` |
//! | `EDU_GRACE_PERIOD` | `revenue.grace_period` (`include`/`exclude`) |
//! | `EDU_MONTHLY_PRICE` | `revenue.pricing.monthly` |
//! | `EDU_YEARLY_PRICE` | `revenue.pricing.yearly` |
//! | `EDU_MIN_WATCH_RATIO` | `points.min_watch_ratio` |
//! | `EDU_WEIGHT_MEDIA_PLAY` | `points.weights.media_play` |
//! | `EDU_WEIGHT_DOWNLOAD` | `points.weights.download` |
//! | `EDU_WEIGHT_LIVE_ATTENDANCE` | `points.weights.live_attendance` |

use std::path::Path;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::money::MONEY_SCALE;

/// Whether subscriptions in their post-expiry grace period generate revenue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GracePeriodPolicy {
    /// Grace-period subscriptions are not revenue-generating.
    #[default]
    Exclude,
    /// Grace-period subscriptions prorate like active ones.
    Include,
}

impl FromStr for GracePeriodPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exclude" | "false" | "0" => Ok(Self::Exclude),
            "include" | "true" | "1" => Ok(Self::Include),
            _ => Err(()),
        }
    }
}

/// Catalog prices used when a subscription record carries no price of its
/// own. Unset means "no fallback": such a record is a data integrity error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanPricing {
    /// Price of a monthly plan.
    pub monthly: Option<Decimal>,
    /// Price of a yearly plan.
    pub yearly: Option<Decimal>,
}

/// Revenue-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevenueConfig {
    /// Fraction of total revenue distributed to educators.
    pub share_ratio: Decimal,
    /// Grace-period handling.
    pub grace_period: GracePeriodPolicy,
    /// Fallback catalog prices.
    pub pricing: PlanPricing,
}

impl Default for RevenueConfig {
    fn default() -> Self {
        Self {
            share_ratio: Decimal::new(7, 1),
            grace_period: GracePeriodPolicy::Exclude,
            pricing: PlanPricing::default(),
        }
    }
}

/// Points awarded per qualifying engagement event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointWeights {
    /// A media play at or above the watch-ratio threshold.
    pub media_play: Decimal,
    /// A resource download.
    pub download: Decimal,
    /// Attendance at a live session.
    pub live_attendance: Decimal,
}

impl Default for PointWeights {
    fn default() -> Self {
        Self {
            media_play: Decimal::new(2, 1),
            download: Decimal::new(3, 0),
            live_attendance: Decimal::new(5, 0),
        }
    }
}

/// Points-side configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PointsConfig {
    /// Per-signal weights.
    pub weights: PointWeights,
    /// Minimum watch ratio for a media play to qualify. Binary threshold.
    pub min_watch_ratio: f64,
}

impl Default for PointsConfig {
    fn default() -> Self {
        Self {
            weights: PointWeights::default(),
            min_watch_ratio: 0.30,
        }
    }
}

/// Complete settlement configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Revenue-side settings.
    pub revenue: RevenueConfig,
    /// Points-side settings.
    pub points: PointsConfig,
}

impl SettlementConfig {
    /// Parse from YAML. Missing fields take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Read and parse a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Resolve the full configuration: defaults, optional file, process
    /// environment, validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_yaml_file(p)?,
            None => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `EDU_*` overrides from an arbitrary lookup (the process
    /// environment in production, a map in tests).
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value.trim().parse().map_err(|_| ConfigError::InvalidOverride {
                var: var.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("EDU_SHARE_RATIO") {
            self.revenue.share_ratio = parse("EDU_SHARE_RATIO", v)?;
        }
        if let Some(v) = lookup("EDU_GRACE_PERIOD") {
            self.revenue.grace_period = parse("EDU_GRACE_PERIOD", v)?;
        }
        if let Some(v) = lookup("EDU_MONTHLY_PRICE") {
            self.revenue.pricing.monthly = Some(parse("EDU_MONTHLY_PRICE", v)?);
        }
        if let Some(v) = lookup("EDU_YEARLY_PRICE") {
            self.revenue.pricing.yearly = Some(parse("EDU_YEARLY_PRICE", v)?);
        }
        if let Some(v) = lookup("EDU_MIN_WATCH_RATIO") {
            self.points.min_watch_ratio = parse("EDU_MIN_WATCH_RATIO", v)?;
        }
        if let Some(v) = lookup("EDU_WEIGHT_MEDIA_PLAY") {
            self.points.weights.media_play = parse("EDU_WEIGHT_MEDIA_PLAY", v)?;
        }
        if let Some(v) = lookup("EDU_WEIGHT_DOWNLOAD") {
            self.points.weights.download = parse("EDU_WEIGHT_DOWNLOAD", v)?;
        }
        if let Some(v) = lookup("EDU_WEIGHT_LIVE_ATTENDANCE") {
            self.points.weights.live_attendance = parse("EDU_WEIGHT_LIVE_ATTENDANCE", v)?;
        }
        Ok(())
    }

    /// Check every field is within its permitted range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let share = self.revenue.share_ratio;
        if share < Decimal::ZERO || share > Decimal::ONE {
            return Err(ConfigError::OutOfRange {
                field: "revenue.share_ratio",
                reason: format!("must be within [0, 1], got {share}"),
            });
        }
        for (field, price) in [
            ("revenue.pricing.monthly", self.revenue.pricing.monthly),
            ("revenue.pricing.yearly", self.revenue.pricing.yearly),
        ] {
            if let Some(p) = price {
                if p < Decimal::ZERO {
                    return Err(ConfigError::OutOfRange {
                        field,
                        reason: format!("must not be negative, got {p}"),
                    });
                }
            }
        }
        let ratio = self.points.min_watch_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(ConfigError::OutOfRange {
                field: "points.min_watch_ratio",
                reason: format!("must be within [0, 1], got {ratio}"),
            });
        }
        let weights = &self.points.weights;
        for (field, weight) in [
            ("points.weights.media_play", weights.media_play),
            ("points.weights.download", weights.download),
            ("points.weights.live_attendance", weights.live_attendance),
        ] {
            if weight < Decimal::ZERO {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: format!("must not be negative, got {weight}"),
                });
            }
            // Point totals are reported to the cent; a finer weight would make
            // the rounded grand total drift from the sum of rounded rows.
            if weight.normalize().scale() > MONEY_SCALE {
                return Err(ConfigError::OutOfRange {
                    field,
                    reason: format!("must have at most {MONEY_SCALE} decimal places, got {weight}"),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_platform_constants() {
        let c = SettlementConfig::default();
        assert_eq!(c.revenue.share_ratio, dec!(0.7));
        assert_eq!(c.revenue.grace_period, GracePeriodPolicy::Exclude);
        assert_eq!(c.points.weights.media_play, dec!(0.2));
        assert_eq!(c.points.weights.download, dec!(3));
        assert_eq!(c.points.weights.live_attendance, dec!(5));
        assert!((c.points.min_watch_ratio - 0.30).abs() < f64::EPSILON);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = r#"
revenue:
  share_ratio: "0.6"
points:
  weights:
    download: "4"
"#;
        let c = SettlementConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(c.revenue.share_ratio, dec!(0.6));
        assert_eq!(c.points.weights.download, dec!(4));
        assert_eq!(c.points.weights.live_attendance, dec!(5));
        assert_eq!(c.revenue.pricing, PlanPricing::default());
    }

    #[test]
    fn empty_yaml_is_default() {
        assert_eq!(SettlementConfig::from_yaml_str("").unwrap(), SettlementConfig::default());
    }

    #[test]
    fn yaml_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settlement.yaml");
        std::fs::write(
            &path,
            "revenue:\n  grace_period: include\n  pricing:\n    monthly: \"1000\"\n",
        )
        .unwrap();
        let c = SettlementConfig::from_yaml_file(&path).unwrap();
        assert_eq!(c.revenue.grace_period, GracePeriodPolicy::Include);
        assert_eq!(c.revenue.pricing.monthly, Some(dec!(1000)));
        assert_eq!(c.revenue.pricing.yearly, None);
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = SettlementConfig::from_yaml_file(Path::new("/nonexistent/edu.yaml"));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("EDU_SHARE_RATIO", "0.5"),
            ("EDU_GRACE_PERIOD", "include"),
            ("EDU_MONTHLY_PRICE", "1200"),
            ("EDU_MIN_WATCH_RATIO", "0.5"),
            ("EDU_WEIGHT_LIVE_ATTENDANCE", "8"),
        ]
        .into_iter()
        .collect();
        let mut c = SettlementConfig::default();
        c.apply_overrides(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(c.revenue.share_ratio, dec!(0.5));
        assert_eq!(c.revenue.grace_period, GracePeriodPolicy::Include);
        assert_eq!(c.revenue.pricing.monthly, Some(dec!(1200)));
        assert!((c.points.min_watch_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.points.weights.live_attendance, dec!(8));
        assert_eq!(c.points.weights.download, dec!(3));
    }

    #[test]
    fn malformed_override_rejected() {
        let mut c = SettlementConfig::default();
        let err = c.apply_overrides(|k| (k == "EDU_SHARE_RATIO").then(|| "lots".to_string()));
        assert!(matches!(err, Err(ConfigError::InvalidOverride { .. })));
    }

    #[test]
    fn validate_rejects_out_of_range() {
        let mut c = SettlementConfig::default();
        c.revenue.share_ratio = dec!(1.5);
        assert!(c.validate().is_err());

        let mut c = SettlementConfig::default();
        c.points.min_watch_ratio = -0.1;
        assert!(c.validate().is_err());

        let mut c = SettlementConfig::default();
        c.points.weights.download = dec!(-1);
        assert!(c.validate().is_err());

        let mut c = SettlementConfig::default();
        c.revenue.pricing.yearly = Some(dec!(-10));
        assert!(c.validate().is_err());
    }

    #[test]
    fn validate_rejects_weights_finer_than_a_cent() {
        let mut c = SettlementConfig::default();
        c.points.weights.media_play = dec!(0.125);
        match c.validate() {
            Err(ConfigError::OutOfRange { field, .. }) => {
                assert_eq!(field, "points.weights.media_play")
            }
            other => panic!("expected OutOfRange, got {other:?}"),
        }

        // Trailing zeros are not extra precision.
        let mut c = SettlementConfig::default();
        c.points.weights.media_play = dec!(0.150);
        assert!(c.validate().is_ok());
    }
}
