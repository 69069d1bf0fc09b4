use std::sync::atomic::{AtomicU64, Ordering};

use quorum_core::config::BudgetConfig;
use quorum_core::error::{QuorumError, Result};

const MICROS_PER_USD: f64 = 1_000_000.0;

/// Convert a USD amount to whole micro-dollars (negative amounts clamp to zero).
pub fn usd_to_micros(usd: f64) -> u64 {
    if usd.is_finite() && usd > 0.0 {
        (usd * MICROS_PER_USD).round() as u64
    } else {
        0
    }
}

pub fn micros_to_usd(micros: u64) -> f64 {
    micros as f64 / MICROS_PER_USD
}

/// One budgeted resource.
///
/// `committed` counts settled spend plus outstanding reservations and is the
/// value checked against the limit. `spent` only ever grows.
#[derive(Debug)]
struct Meter {
    name: &'static str,
    limit: Option<u64>,
    committed: AtomicU64,
    spent: AtomicU64,
}

impl Meter {
    fn new(name: &'static str, limit: Option<u64>) -> Self {
        Self {
            name,
            limit,
            committed: AtomicU64::new(0),
            spent: AtomicU64::new(0),
        }
    }

    /// Check-then-increment in one compare-and-swap loop.
    fn try_reserve(&self, amount: u64) -> Result<()> {
        let Some(limit) = self.limit else {
            self.committed.fetch_add(amount, Ordering::AcqRel);
            return Ok(());
        };
        let mut current = self.committed.load(Ordering::Acquire);
        loop {
            let attempted = current.saturating_add(amount);
            if current >= limit || attempted > limit {
                return Err(QuorumError::BudgetExceeded {
                    resource: self.name.to_string(),
                    attempted,
                    limit,
                });
            }
            match self.committed.compare_exchange_weak(
                current,
                attempted,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    fn release(&self, amount: u64) {
        let _ = self
            .committed
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(amount))
            });
    }

    fn settle(&self, reserved: u64, actual: u64) {
        self.committed.fetch_add(actual, Ordering::AcqRel);
        self.release(reserved);
        self.spent.fetch_add(actual, Ordering::AcqRel);
    }

    fn spent(&self) -> u64 {
        self.spent.load(Ordering::Acquire)
    }

    fn remaining(&self) -> Option<u64> {
        self.limit
            .map(|limit| limit.saturating_sub(self.committed.load(Ordering::Acquire)))
    }
}

/// Amounts held against the budget for one in-flight invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reservation {
    pub tokens: u64,
    pub cost_micros: u64,
}

/// Run-scoped token and cost ceilings, shared by every concurrent invocation in a run.
#[derive(Debug)]
pub struct BudgetTracker {
    tokens: Meter,
    cost: Meter,
}

impl BudgetTracker {
    pub fn new(max_tokens: Option<u64>, max_cost_usd: Option<f64>) -> Self {
        Self {
            tokens: Meter::new("tokens", max_tokens),
            cost: Meter::new("cost_micros", max_cost_usd.map(usd_to_micros)),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    pub fn from_config(config: &BudgetConfig) -> Self {
        Self::new(config.max_tokens, config.max_cost_usd)
    }

    pub fn is_limited(&self) -> bool {
        self.tokens.limit.is_some() || self.cost.limit.is_some()
    }

    /// Reserve estimated spend before invoking. Fails without reserving anything
    /// if either resource would exceed its limit.
    pub fn try_reserve(&self, tokens: u64, cost_usd: f64) -> Result<Reservation> {
        let cost_micros = usd_to_micros(cost_usd);
        self.tokens.try_reserve(tokens)?;
        if let Err(e) = self.cost.try_reserve(cost_micros) {
            self.tokens.release(tokens);
            return Err(e);
        }
        Ok(Reservation {
            tokens,
            cost_micros,
        })
    }

    /// Replace a reservation with the actual spend.
    pub fn settle(&self, reservation: Reservation, actual_tokens: u64, actual_cost_usd: f64) {
        self.tokens.settle(reservation.tokens, actual_tokens);
        self.cost
            .settle(reservation.cost_micros, usd_to_micros(actual_cost_usd));
    }

    /// Drop a reservation whose call never completed.
    pub fn release(&self, reservation: Reservation) {
        self.tokens.release(reservation.tokens);
        self.cost.release(reservation.cost_micros);
    }

    pub fn spent_tokens(&self) -> u64 {
        self.tokens.spent()
    }

    pub fn spent_usd(&self) -> f64 {
        micros_to_usd(self.cost.spent())
    }

    pub fn remaining_tokens(&self) -> Option<u64> {
        self.tokens.remaining()
    }

    pub fn remaining_usd(&self) -> Option<f64> {
        self.cost.remaining().map(micros_to_usd)
    }
}

impl Default for BudgetTracker {
    fn default() -> Self {
        Self::unlimited()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn unlimited_always_reserves() {
        let budget = BudgetTracker::unlimited();
        let r = budget.try_reserve(1_000_000, 1_000.0).unwrap();
        budget.settle(r, 10, 0.5);
        assert_eq!(budget.spent_tokens(), 10);
        assert!((budget.spent_usd() - 0.5).abs() < 1e-9);
        assert_eq!(budget.remaining_tokens(), None);
    }

    #[test]
    fn rejects_once_spent_reaches_limit() {
        let budget = BudgetTracker::new(Some(100), None);
        let r = budget.try_reserve(0, 0.0).unwrap();
        budget.settle(r, 100, 0.0);
        let err = budget.try_reserve(0, 0.0).unwrap_err();
        assert!(matches!(err, QuorumError::BudgetExceeded { .. }));
    }

    #[test]
    fn estimate_larger_than_remaining_is_rejected() {
        let budget = BudgetTracker::new(None, Some(0.01));
        assert!(budget.try_reserve(0, 0.02).is_err());
        assert!(budget.try_reserve(0, 0.005).is_ok());
    }

    #[test]
    fn failed_cost_reservation_releases_tokens() {
        let budget = BudgetTracker::new(Some(1_000), Some(0.001));
        assert!(budget.try_reserve(500, 1.0).is_err());
        assert_eq!(budget.remaining_tokens(), Some(1_000));
    }

    #[test]
    fn release_returns_headroom() {
        let budget = BudgetTracker::new(Some(100), None);
        let r = budget.try_reserve(80, 0.0).unwrap();
        assert_eq!(budget.remaining_tokens(), Some(20));
        assert!(budget.try_reserve(30, 0.0).is_err());
        budget.release(r);
        assert_eq!(budget.remaining_tokens(), Some(100));
        assert_eq!(budget.spent_tokens(), 0);
    }

    #[test]
    fn concurrent_reservations_never_overcommit() {
        let budget = Arc::new(BudgetTracker::new(Some(1_000), None));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    let mut granted = 0u64;
                    for _ in 0..100 {
                        if budget.try_reserve(7, 0.0).is_ok() {
                            granted += 7;
                        }
                    }
                    granted
                })
            })
            .collect();
        let total: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total <= 1_000, "overcommitted: {total}");
        assert_eq!(budget.remaining_tokens(), Some(1_000 - total));
    }
}
