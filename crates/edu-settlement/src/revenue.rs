//! # Revenue Calculator
//!
//! Day-level proration of subscription prices into a calendar month.
//!
//! For each revenue-generating subscription overlapping the month:
//!
//! ```text
//! activeDays   = min(expiry, monthEnd) - max(start, monthStart) + 1
//! contribution = monthlyRate * activeDays / daysInMonth
//! ```
//!
//! `monthlyRate` is the plan price, or one twelfth of it for yearly plans.
//! Contributions keep full precision; only the month total is rounded.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use edu_core::{round_money, Month, RevenueConfig, SubscriptionId, UserId};

use crate::error::{Phase, SettlementError};
use crate::ports::SubscriptionReader;
use crate::records::Subscription;

const MONTHS_PER_YEAR: u32 = 12;

/// One subscription's share of a month's revenue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionContribution {
    /// Subscription.
    pub subscription_id: SubscriptionId,
    /// Subscriber.
    pub user_id: UserId,
    /// Covered days inside the month.
    pub active_days: u32,
    /// Days in the month.
    pub days_in_month: u32,
    /// Monthly-equivalent price.
    pub monthly_rate: Decimal,
    /// Unrounded contribution.
    pub contribution: Decimal,
}

/// Revenue of one month.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyRevenue {
    /// Month.
    pub month: Month,
    /// Sum of contributions, rounded to the cent.
    pub total_revenue: Decimal,
    /// Distinct subscribing users.
    pub subscriber_count: u64,
    /// Per-subscription detail, in subscription id order.
    pub breakdown: Vec<SubscriptionContribution>,
}

/// Prorate `monthly_rate` over the days `sub` covers in `month`.
pub fn prorate(sub: &Subscription, month: Month, monthly_rate: Decimal) -> Decimal {
    let active = sub.active_days(month);
    if active == 0 {
        return Decimal::ZERO;
    }
    monthly_rate * Decimal::from(active) / Decimal::from(month.days())
}

/// Computes monthly and distributable revenue from subscription records.
pub struct RevenueCalculator {
    subscriptions: Arc<dyn SubscriptionReader>,
    config: RevenueConfig,
}

impl RevenueCalculator {
    /// Calculator over a subscription source.
    pub fn new(subscriptions: Arc<dyn SubscriptionReader>, config: RevenueConfig) -> Self {
        Self {
            subscriptions,
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RevenueConfig {
        &self.config
    }

    /// Total prorated revenue and distinct subscribers for `month`.
    ///
    /// # Errors
    ///
    /// `DataIntegrity` if a counted subscription has no resolvable price, a
    /// negative price, or an expiry not after its start. `TransientStore` if
    /// the read fails.
    pub async fn compute_monthly_revenue(
        &self,
        month: Month,
    ) -> Result<MonthlyRevenue, SettlementError> {
        let subscriptions = self
            .subscriptions
            .subscriptions_overlapping(month)
            .await
            .map_err(|e| SettlementError::from_store(e, Some(month), Phase::Revenue))?;

        let mut breakdown = Vec::new();
        let mut subscribers = BTreeSet::new();
        let mut total = Decimal::ZERO;

        for sub in &subscriptions {
            if !sub.overlaps(month) {
                continue;
            }
            if !sub.status.is_revenue_generating(self.config.grace_period) {
                debug!(%month, subscription = %sub.id, status = %sub.status, "not revenue-generating");
                continue;
            }
            let monthly_rate = self.monthly_rate(sub, month)?;
            let contribution = prorate(sub, month, monthly_rate);
            total += contribution;
            subscribers.insert(sub.user_id);
            breakdown.push(SubscriptionContribution {
                subscription_id: sub.id,
                user_id: sub.user_id,
                active_days: sub.active_days(month),
                days_in_month: month.days(),
                monthly_rate,
                contribution,
            });
        }
        breakdown.sort_by(|a, b| a.subscription_id.cmp(&b.subscription_id));

        Ok(MonthlyRevenue {
            month,
            total_revenue: round_money(total),
            subscriber_count: subscribers.len() as u64,
            breakdown,
        })
    }

    /// Educator share: `round(total * share_ratio, 2)`.
    pub fn compute_distributable_revenue(&self, total_revenue: Decimal) -> Decimal {
        round_money(total_revenue * self.config.share_ratio)
    }

    fn monthly_rate(&self, sub: &Subscription, month: Month) -> Result<Decimal, SettlementError> {
        let integrity = |reason: String| SettlementError::DataIntegrity {
            month,
            phase: Phase::Revenue,
            reason,
        };

        if sub.expiry_date <= sub.start_date {
            return Err(integrity(format!(
                "subscription {} expires {} on or before its start {}",
                sub.id, sub.expiry_date, sub.start_date
            )));
        }

        let catalog = if sub.is_yearly {
            self.config.pricing.yearly
        } else {
            self.config.pricing.monthly
        };
        let price = match (sub.plan_price, catalog) {
            (Some(price), _) => price,
            (None, Some(price)) => {
                warn!(%month, subscription = %sub.id, %price, "plan price missing, using catalog price");
                price
            }
            (None, None) => {
                return Err(integrity(format!(
                    "subscription {} has no plan price and no catalog price is configured",
                    sub.id
                )))
            }
        };
        if price < Decimal::ZERO {
            return Err(integrity(format!(
                "subscription {} has negative price {price}",
                sub.id
            )));
        }

        Ok(if sub.is_yearly {
            price / Decimal::from(MONTHS_PER_YEAR)
        } else {
            price
        })
    }
}
