//! Alert rules.
//!
//! Pure functions from a product (and, for abnormal reduction, its recent sale
//! history) to an optional [`AlertDraft`]. Deduplication against open alerts
//! and persistence happen in the engine, not here.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use stockguard_core::{DomainError, DomainResult};

use crate::alert::{AlertDraft, AlertType, Severity};
use crate::movement::{Direction, MovementType, StockMovement};
use crate::product::Product;

/// Tunables for the alert scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    /// Early-warning lookahead for near-expiry alerts, in days.
    pub near_expiry_days: i64,
    /// Tighter window that upgrades a near-expiry alert to urgent.
    pub urgent_expiry_days: i64,
    /// Last-window sales above `multiplier × mean daily sales` are abnormal.
    pub abnormal_multiplier: i64,
    pub recent_window_hours: i64,
    pub baseline_days: i64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            near_expiry_days: 30,
            urgent_expiry_days: 7,
            abnormal_multiplier: 3,
            recent_window_hours: 24,
            baseline_days: 7,
        }
    }
}

impl AlertThresholds {
    pub fn validate(&self) -> DomainResult<()> {
        if self.near_expiry_days < 0 || self.urgent_expiry_days < 0 {
            return Err(DomainError::validation("expiry windows cannot be negative"));
        }
        if self.urgent_expiry_days > self.near_expiry_days {
            return Err(DomainError::validation(
                "urgent expiry window cannot exceed the near-expiry window",
            ));
        }
        if self.abnormal_multiplier <= 0 {
            return Err(DomainError::validation("abnormal multiplier must be positive"));
        }
        if self.recent_window_hours <= 0 || self.baseline_days <= 0 {
            return Err(DomainError::validation("sales windows must be positive"));
        }
        Ok(())
    }

    /// Same thresholds with a different near-expiry lookahead. The urgent
    /// window shrinks with it when it would otherwise exceed the lookahead.
    pub fn with_near_expiry_days(&self, days: i64) -> Self {
        Self {
            near_expiry_days: days,
            urgent_expiry_days: self.urgent_expiry_days.min(days),
            ..self.clone()
        }
    }

    pub fn recent_window(&self) -> Duration {
        Duration::hours(self.recent_window_hours)
    }

    pub fn baseline_window(&self) -> Duration {
        Duration::days(self.baseline_days)
    }
}

/// Net units sold in the recent and baseline windows.
///
/// The baseline window contains the recent one. Sale reversals count against
/// sales; a window never sells a negative amount.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct SalesWindow {
    pub recent: i64,
    pub baseline: i64,
}

impl SalesWindow {
    pub fn from_movements(
        movements: &[StockMovement],
        now: DateTime<Utc>,
        thresholds: &AlertThresholds,
    ) -> Self {
        let recent_since = now - thresholds.recent_window();
        let baseline_since = now - thresholds.baseline_window();

        let mut recent = 0i64;
        let mut baseline = 0i64;
        for m in movements
            .iter()
            .filter(|m| m.movement_type == MovementType::Sale && m.created_at <= now)
        {
            let sold = match m.direction {
                Direction::Decrease => m.quantity,
                Direction::Increase => -m.quantity,
            };
            if m.created_at >= baseline_since {
                baseline += sold;
            }
            if m.created_at >= recent_since {
                recent += sold;
            }
        }

        Self {
            recent: recent.max(0),
            baseline: baseline.max(0),
        }
    }

    /// Mean units sold per day over the baseline window.
    pub fn mean_daily(&self, thresholds: &AlertThresholds) -> f64 {
        self.baseline as f64 / thresholds.baseline_days as f64
    }
}

pub fn low_stock(product: &Product) -> Option<AlertDraft> {
    if !product.is_active || !product.is_low_stock() {
        return None;
    }

    let severity = if product.is_critically_low() {
        Severity::High
    } else {
        Severity::Medium
    };
    let unit = product.unit_symbol.as_deref().unwrap_or("");

    Some(AlertDraft {
        product_id: product.id,
        alert_type: AlertType::LowStock,
        severity,
        title: format!("Low Stock Alert: {}", product.name),
        message: format!(
            "Low stock, possible missing items for {}. Current stock: {} {}",
            product.name,
            product.quantity(),
            unit
        )
        .trim_end()
        .to_string(),
        current_stock: product.quantity(),
        previous_stock: None,
        threshold: Some(product.reorder_level),
    })
}

/// `recent × baseline_days > multiplier × baseline` is the integer form of
/// `recent > multiplier × mean_daily`.
pub fn abnormal_reduction(
    product: &Product,
    sales: SalesWindow,
    thresholds: &AlertThresholds,
) -> Option<AlertDraft> {
    if sales.recent <= 0 || sales.baseline <= 0 {
        return None;
    }
    let lhs = sales.recent.saturating_mul(thresholds.baseline_days);
    let rhs = sales.baseline.saturating_mul(thresholds.abnormal_multiplier);
    if lhs <= rhs {
        return None;
    }

    Some(AlertDraft {
        product_id: product.id,
        alert_type: AlertType::AbnormalReduction,
        severity: Severity::High,
        title: format!("Abnormal Stock Reduction: {}", product.name),
        message: format!(
            "Product {} reducing abnormally. Today's sales: {}, Average daily sales: {:.2}",
            product.name,
            sales.recent,
            sales.mean_daily(thresholds)
        ),
        current_stock: product.quantity(),
        previous_stock: Some(product.quantity() + sales.recent),
        threshold: None,
    })
}

pub fn expired(product: &Product, today: NaiveDate) -> Option<AlertDraft> {
    if !product.is_active || !product.is_expired(today) {
        return None;
    }
    let expiry = product.expiry_date?;

    Some(AlertDraft {
        product_id: product.id,
        alert_type: AlertType::Expired,
        severity: Severity::High,
        title: format!("Expired Product: {}", product.name),
        message: format!(
            "Product {} has expired. Expiry date: {}",
            product.name, expiry
        ),
        current_stock: product.quantity(),
        previous_stock: None,
        threshold: None,
    })
}

/// Near-expiry and urgent share one alert type; the urgent window is checked
/// first so the tighter condition wins.
pub fn near_expiry(
    product: &Product,
    today: NaiveDate,
    thresholds: &AlertThresholds,
) -> Option<AlertDraft> {
    if !product.is_active {
        return None;
    }
    let expiry = product.expiry_date?;
    let days = product.days_until_expiry(today)?;
    if days < 0 || days > thresholds.near_expiry_days {
        return None;
    }

    let (severity, title, message) = if days <= thresholds.urgent_expiry_days {
        (
            Severity::High,
            format!("Urgent: Product Expiring Soon: {}", product.name),
            format!(
                "Urgent: the product {} will expire in {} days. Expiry date: {}. Please take immediate action.",
                product.name, days, expiry
            ),
        )
    } else {
        (
            Severity::Medium,
            format!("Product Nearing Expiry: {}", product.name),
            format!(
                "The product {} will expire in {} days. Expiry date: {}",
                product.name, days, expiry
            ),
        )
    };

    Some(AlertDraft {
        product_id: product.id,
        alert_type: AlertType::NearExpiry,
        severity,
        title,
        message,
        current_stock: product.quantity(),
        previous_stock: None,
        threshold: Some(thresholds.near_expiry_days),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::{MovementRequest, StockChange};
    use stockguard_core::TenantId;

    fn product(quantity: i64, reorder_level: i64) -> Product {
        Product::new(TenantId::new(), "Bread", "BRD-1", quantity, reorder_level)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 5, d).unwrap()
    }

    #[test]
    fn low_stock_severity() {
        let medium = low_stock(&product(15, 20)).unwrap();
        assert_eq!(medium.severity, Severity::Medium);
        assert_eq!(medium.threshold, Some(20));
        assert_eq!(medium.title, "Low Stock Alert: Bread");

        assert_eq!(low_stock(&product(5, 20)).unwrap().severity, Severity::High);
        assert!(low_stock(&product(21, 20)).is_none());
        assert!(low_stock(&product(1, 20).inactive()).is_none());
    }

    /// Sales history ending at `now`: `today` units in the last hours, the rest
    /// spread one day apart over the previous six days.
    fn history(p: &mut Product, now: DateTime<Utc>, earlier: &[i64], today: i64) -> Vec<StockMovement> {
        let mut out: Vec<StockMovement> = Vec::new();
        let mut entries: Vec<(DateTime<Utc>, i64)> = earlier
            .iter()
            .enumerate()
            .map(|(i, q)| (now - Duration::days(6 - i as i64) - Duration::hours(1), *q))
            .collect();
        entries.push((now - Duration::hours(2), today));

        for (at, qty) in entries {
            let m = MovementRequest::new(p.id, StockChange::Sale, qty)
                .at(at)
                .plan(p.tenant_id, p, out.last())
                .unwrap();
            p.apply(&m).unwrap();
            out.push(m);
        }
        out
    }

    #[test]
    fn abnormal_reduction_against_weekly_mean() {
        let t = AlertThresholds::default();
        let now = Utc::now();

        // Week total 35 (mean 5/day), 16 of it in the last 24h.
        let mut spike = product(500, 0);
        let movements = history(&mut spike, now, &[4, 3, 3, 3, 3, 3], 16);
        let sales = SalesWindow::from_movements(&movements, now, &t);
        assert_eq!(sales, SalesWindow { recent: 16, baseline: 35 });
        let draft = abnormal_reduction(&spike, sales, &t).unwrap();
        assert_eq!(draft.severity, Severity::High);
        assert_eq!(draft.previous_stock, Some(spike.quantity() + 16));

        // Week total 35, 14 of it recent: 14 <= 15, no alert.
        let mut steady = product(500, 0);
        let movements = history(&mut steady, now, &[4, 4, 3, 3, 4, 3], 14);
        let sales = SalesWindow::from_movements(&movements, now, &t);
        assert_eq!(sales.baseline, 35);
        assert!(abnormal_reduction(&steady, sales, &t).is_none());
    }

    #[test]
    fn reversals_net_against_sales() {
        let t = AlertThresholds::default();
        let now = Utc::now();
        let mut p = product(100, 0);
        let sale = MovementRequest::new(p.id, StockChange::Sale, 10)
            .at(now - Duration::hours(3))
            .plan(p.tenant_id, &p, None)
            .unwrap();
        p.apply(&sale).unwrap();
        let reversal = MovementRequest::new(p.id, StockChange::SaleReversal, 10)
            .at(now - Duration::hours(1))
            .plan(p.tenant_id, &p, Some(&sale))
            .unwrap();

        let sales = SalesWindow::from_movements(&[sale, reversal], now, &t);
        assert_eq!(sales, SalesWindow::default());
        assert!(abnormal_reduction(&p, sales, &t).is_none());
    }

    #[test]
    fn expired_is_strictly_before_today() {
        let p = product(3, 0).with_expiry(day(9));
        let draft = expired(&p, day(10)).unwrap();
        assert_eq!(draft.severity, Severity::High);
        assert!(expired(&p, day(9)).is_none());
        assert!(expired(&product(3, 0), day(10)).is_none());
    }

    #[test]
    fn near_expiry_windows() {
        let t = AlertThresholds::default();
        let today = day(1);

        let expiring_today = product(3, 0).with_expiry(today);
        let d = near_expiry(&expiring_today, today, &t).unwrap();
        assert_eq!(d.severity, Severity::High);
        assert!(d.title.starts_with("Urgent:"));

        let week = product(3, 0).with_expiry(today + Duration::days(7));
        assert_eq!(near_expiry(&week, today, &t).unwrap().severity, Severity::High);

        let later = product(3, 0).with_expiry(today + Duration::days(20));
        let d = near_expiry(&later, today, &t).unwrap();
        assert_eq!(d.severity, Severity::Medium);
        assert!(!d.title.starts_with("Urgent:"));

        let edge = product(3, 0).with_expiry(today + Duration::days(30));
        assert!(near_expiry(&edge, today, &t).is_some());
        let beyond = product(3, 0).with_expiry(today + Duration::days(31));
        assert!(near_expiry(&beyond, today, &t).is_none());

        let gone = product(3, 0).with_expiry(today - Duration::days(1));
        assert!(near_expiry(&gone, today, &t).is_none());
    }

    #[test]
    fn shorter_lookahead_narrows_the_urgent_window() {
        let t = AlertThresholds::default().with_near_expiry_days(5);
        assert_eq!((t.near_expiry_days, t.urgent_expiry_days), (5, 5));
        assert!(t.validate().is_ok());

        let today = day(1);
        let in_ten = product(3, 0).with_expiry(today + Duration::days(10));
        assert!(near_expiry(&in_ten, today, &t).is_none());
        let wide = AlertThresholds::default().with_near_expiry_days(60);
        assert_eq!(wide.urgent_expiry_days, 7);
        assert!(near_expiry(&in_ten, today, &wide).is_some());
    }

    #[test]
    fn thresholds_validate() {
        assert!(AlertThresholds::default().validate().is_ok());
        let bad = AlertThresholds {
            urgent_expiry_days: 40,
            ..AlertThresholds::default()
        };
        assert!(bad.validate().is_err());
    }
}
