//! Adaptive network-quality estimator
//!
//! Classifies every completed round trip against a per-network latency
//! expectation table and keeps a three-state verdict consumed by the timeout
//! arithmetic: `Excellent` unlocks short dynamic first-package timeouts,
//! `Bad` and `Evaluating` fall back to the size-derived formula.
//!
//! The verdict deliberately reacts asymmetrically: reaching `Excellent`
//! needs a long streak of on-expectation outcomes including a recent
//! non-trivial payload, while a single miss drops it back to `Evaluating`.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::EstimatorConfig;
use crate::types::NetworkKind;

// ----------------------------------------------------------------------------
// Classification
// ----------------------------------------------------------------------------

/// Payload-size bucket selecting the expectation-table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SizeBucket {
    /// < 3 KiB
    Small,
    /// <= 10 KiB
    Medium,
    /// <= 30 KiB
    Large,
    /// > 30 KiB
    Huge,
}

impl SizeBucket {
    pub fn for_len(len: u64) -> Self {
        if len < 3 * 1024 {
            SizeBucket::Small
        } else if len <= 10 * 1024 {
            SizeBucket::Medium
        } else if len <= 30 * 1024 {
            SizeBucket::Large
        } else {
            SizeBucket::Huge
        }
    }

    fn column(self) -> usize {
        match self {
            SizeBucket::Small => 0,
            SizeBucket::Medium => 1,
            SizeBucket::Large => 2,
            SizeBucket::Huge => 3,
        }
    }
}

/// Estimator verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum QualityStatus {
    Evaluating,
    Excellent,
    Bad,
}

/// Per-sample classification, internal to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    /// Completed within the expectation for its bucket
    Meet(SizeBucket),
    /// Completed, but slower than expected
    Normal,
    Failed,
}

// ----------------------------------------------------------------------------
// Estimator
// ----------------------------------------------------------------------------

/// Rolling round-trip quality classifier. Owned by the scheduler; reset on
/// every network-type change.
#[derive(Debug)]
pub struct NetQualityEstimator {
    config: EstimatorConfig,
    status: QualityStatus,
    /// Consecutive on-expectation outcomes, tracked while Evaluating
    good_streak: u32,
    /// Last on-expectation outcome for a Medium-or-larger payload
    last_big_good: Option<Instant>,
    /// Ring of recent completed/failed flags; true = not failed
    window: Vec<bool>,
    pos: usize,
    /// When the ring was last refilled; None forces a refill on next sample
    window_refilled: Option<Instant>,
}

impl NetQualityEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        let slots = config.window_slots;
        Self {
            config,
            status: QualityStatus::Evaluating,
            good_streak: 0,
            last_big_good: None,
            window: vec![true; slots],
            pos: 0,
            window_refilled: None,
        }
    }

    pub fn status(&self) -> QualityStatus {
        self.status
    }

    /// Discard all history, e.g. because the network type changed and past
    /// samples no longer describe the current link.
    pub fn reset_status(&mut self) {
        self.status = QualityStatus::Evaluating;
        self.good_streak = 0;
        self.last_big_good = None;
        self.window.fill(true);
        self.pos = 0;
        self.window_refilled = None;
    }

    /// Record a completed round trip of `payload_len` bytes that took
    /// `cost`. Zero cost is treated as a failure report.
    pub fn record(&mut self, payload_len: u64, cost: Duration, kind: NetworkKind) {
        self.record_at(payload_len, cost, kind, Instant::now());
    }

    /// Record a failed round trip (timeout or connection loss).
    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    pub fn record_at(&mut self, payload_len: u64, cost: Duration, kind: NetworkKind, now: Instant) {
        let outcome = if cost.is_zero() {
            Outcome::Failed
        } else {
            self.classify(payload_len, cost, kind)
        };
        self.advance(outcome, now);
    }

    pub fn record_failure_at(&mut self, now: Instant) {
        self.advance(Outcome::Failed, now);
    }

    fn classify(&self, payload_len: u64, cost: Duration, kind: NetworkKind) -> Outcome {
        let table = if kind.is_wifi() {
            &self.config.wifi_expect_ms
        } else {
            &self.config.mobile_expect_ms
        };
        let bucket = SizeBucket::for_len(payload_len);
        if cost.as_millis() as u64 <= table[bucket.column()] {
            Outcome::Meet(bucket)
        } else {
            Outcome::Normal
        }
    }

    fn good_count(&self) -> u32 {
        self.window.iter().filter(|good| **good).count() as u32
    }

    fn advance(&mut self, outcome: Outcome, now: Instant) {
        // Stale windows refill before the new sample lands: pessimistically
        // when already Bad, optimistically otherwise.
        let stale = match self.window_refilled {
            None => true,
            Some(at) => now.duration_since(at) > self.config.idle_reset,
        };
        if stale {
            self.window_refilled = Some(now);
            self.pos = 0;
            self.window.fill(self.status != QualityStatus::Bad);
        }

        let slot = self.pos;
        self.pos = (self.pos + 1) % self.window.len();

        match outcome {
            Outcome::Meet(bucket) => {
                if self.status == QualityStatus::Evaluating {
                    self.good_streak += 1;
                    if bucket >= SizeBucket::Medium {
                        self.last_big_good = Some(now);
                    }
                }
                self.window[slot] = true;
            }
            Outcome::Normal => {
                // Below expectation: ends the streak, but the round trip did
                // complete, so the window still counts it as non-failed.
                self.good_streak = 0;
                self.last_big_good = None;
                self.window[slot] = true;
            }
            Outcome::Failed => {
                self.good_streak = 0;
                self.last_big_good = None;
                self.window[slot] = false;
            }
        }

        let before = self.status;
        match self.status {
            QualityStatus::Evaluating => {
                let big_recent = self
                    .last_big_good
                    .is_some_and(|at| now.duration_since(at) <= self.config.big_pkg_window);
                if self.good_streak >= self.config.excellent_streak && big_recent {
                    self.status = QualityStatus::Excellent;
                } else if self.good_count() <= self.config.good_floor {
                    self.status = QualityStatus::Bad;
                    self.window_refilled = None;
                }
            }
            QualityStatus::Excellent => {
                if !matches!(outcome, Outcome::Meet(_)) {
                    self.status = QualityStatus::Evaluating;
                }
            }
            QualityStatus::Bad => {
                if self.good_count() > self.config.good_floor {
                    self.status = QualityStatus::Evaluating;
                    self.window_refilled = None;
                }
            }
        }

        if before != self.status {
            debug!(
                from = ?before,
                to = ?self.status,
                streak = self.good_streak,
                good_count = self.good_count(),
                "network quality status changed"
            );
        }
    }
}

impl Default for NetQualityEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meet_small(est: &mut NetQualityEstimator, now: Instant) {
        est.record_at(100, Duration::from_millis(100), NetworkKind::Wifi, now);
    }

    fn meet_large(est: &mut NetQualityEstimator, now: Instant) {
        est.record_at(20 * 1024, Duration::from_millis(3000), NetworkKind::Wifi, now);
    }

    #[test]
    fn buckets_split_at_documented_boundaries() {
        assert_eq!(SizeBucket::for_len(0), SizeBucket::Small);
        assert_eq!(SizeBucket::for_len(3 * 1024 - 1), SizeBucket::Small);
        assert_eq!(SizeBucket::for_len(3 * 1024), SizeBucket::Medium);
        assert_eq!(SizeBucket::for_len(10 * 1024), SizeBucket::Medium);
        assert_eq!(SizeBucket::for_len(10 * 1024 + 1), SizeBucket::Large);
        assert_eq!(SizeBucket::for_len(30 * 1024), SizeBucket::Large);
        assert_eq!(SizeBucket::for_len(30 * 1024 + 1), SizeBucket::Huge);
    }

    #[test]
    fn ten_good_with_recent_large_payload_is_excellent() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        meet_large(&mut est, now);
        for _ in 0..9 {
            meet_small(&mut est, now);
        }
        assert_eq!(est.status(), QualityStatus::Excellent);
    }

    #[test]
    fn ten_good_without_large_payload_stays_evaluating() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        for _ in 0..10 {
            meet_small(&mut est, now);
        }
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn stale_large_payload_success_does_not_count() {
        let mut est = NetQualityEstimator::default();
        let start = Instant::now();
        meet_large(&mut est, start);
        // the streak completes just past the five-minute recency window
        let late = start + Duration::from_secs(5 * 60 + 1);
        for _ in 0..9 {
            meet_small(&mut est, late);
        }
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn excellent_drops_on_first_below_expectation() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        meet_large(&mut est, now);
        for _ in 0..9 {
            meet_small(&mut est, now);
        }
        assert_eq!(est.status(), QualityStatus::Excellent);

        // completed but far over the small-package expectation
        est.record_at(100, Duration::from_secs(30), NetworkKind::Wifi, now);
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn good_floor_boundary_at_six_and_seven() {
        // Window starts all-good; each failure clears one slot. Bad is
        // entered exactly when the good count reaches the floor (6), i.e.
        // on the fourth failure of a ten-slot window.
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        for _ in 0..3 {
            est.record_failure_at(now);
        }
        // good count 7 > 6: still evaluating
        assert_eq!(est.status(), QualityStatus::Evaluating);

        est.record_failure_at(now);
        // good count 6 <= 6: bad
        assert_eq!(est.status(), QualityStatus::Bad);
    }

    #[test]
    fn bad_recovers_once_good_count_clears_the_floor() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        for _ in 0..4 {
            est.record_failure_at(now);
        }
        assert_eq!(est.status(), QualityStatus::Bad);

        // entering Bad forces a pessimistic refill (all-bad), so recovery
        // needs seven non-failed outcomes
        for _ in 0..6 {
            meet_small(&mut est, now);
        }
        assert_eq!(est.status(), QualityStatus::Bad);
        meet_small(&mut est, now);
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn idle_window_refills_optimistically_when_not_bad() {
        let mut est = NetQualityEstimator::default();
        let start = Instant::now();
        for _ in 0..3 {
            est.record_failure_at(start);
        }
        assert_eq!(est.status(), QualityStatus::Evaluating);

        // after the idle gap the three failures are forgotten; one more
        // failure no longer reaches the floor
        let late = start + Duration::from_secs(6 * 60);
        est.record_failure_at(late);
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn reset_status_returns_to_evaluating() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        for _ in 0..4 {
            est.record_failure_at(now);
        }
        assert_eq!(est.status(), QualityStatus::Bad);

        est.reset_status();
        assert_eq!(est.status(), QualityStatus::Evaluating);
    }

    #[test]
    fn zero_cost_counts_as_failure() {
        let mut est = NetQualityEstimator::default();
        let now = Instant::now();
        for _ in 0..4 {
            est.record_at(100, Duration::ZERO, NetworkKind::Wifi, now);
        }
        assert_eq!(est.status(), QualityStatus::Bad);
    }
}
