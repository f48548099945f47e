//! Per-(target, via) adaptive probe sampler.
//!
//! Every probe of a `(target, via)` pair reports success or failure into a
//! [`PingRecord`], which keeps decaying averages of the outcome rate and of
//! the HTL / dawn-HTL values used. The record then picks the parameters for
//! the *next* probe of the same pair:
//!
//! - HTL starts at the node ceiling and is slowly restricted once the pair
//!   looks reliable (success rate above 80%), widened again on trouble.
//! - The random prefix starts at 2 hops and widens only as failures
//!   accumulate, but never beyond half the path: at least half the hops
//!   stay deterministic.

use std::time::Instant;

use veilnet_common::BootstrappingDecayingAverage;

use crate::constants::{COMFORT_LEVEL, MIN_HTL, SAMPLE_HORIZON};

/// Success-rate threshold above which the sampler tries a lower HTL.
const RESTRICT_MARK: f64 = 0.8;

/// Adaptive sample state for one directional `(target, via)` pair.
///
/// Directional means the pair "a reached through b" evolves independently
/// of "b reached through a".
#[derive(Debug, Clone)]
pub struct PingRecord {
    last_try: Option<Instant>,
    last_success: Option<Instant>,
    /// Lowest hop counter any successful pong ever reported; monotonically
    /// non-increasing.
    shortest_success: Option<i32>,
    /// Decaying success rate over 0.0 / 1.0 outcome samples.
    average: BootstrappingDecayingAverage,
    /// HTL values of successful / failed probes.
    s_htl: BootstrappingDecayingAverage,
    f_htl: BootstrappingDecayingAverage,
    /// Random-hop counts (`htl - dawn_htl`) of successful / failed probes.
    s_dawn: BootstrappingDecayingAverage,
    f_dawn: BootstrappingDecayingAverage,
    max_htl: i16,
}

impl PingRecord {
    pub fn new(max_htl: i16) -> Self {
        let ceiling = f64::from(max_htl);
        Self {
            last_try: None,
            last_success: None,
            shortest_success: None,
            average: BootstrappingDecayingAverage::new(0.0, 0.0, 1.0, SAMPLE_HORIZON),
            s_htl: BootstrappingDecayingAverage::new(ceiling, 0.0, ceiling, SAMPLE_HORIZON),
            f_htl: BootstrappingDecayingAverage::new(ceiling, 0.0, ceiling, SAMPLE_HORIZON),
            s_dawn: BootstrappingDecayingAverage::new(0.0, 0.0, ceiling, SAMPLE_HORIZON),
            f_dawn: BootstrappingDecayingAverage::new(0.0, 0.0, ceiling, SAMPLE_HORIZON),
            max_htl,
        }
    }

    /// Reports a successful probe that used `htl` and `dawn_htl`, whose
    /// pong carried hop counter `counter`.
    pub fn success(&mut self, counter: i32, htl: i16, dawn_htl: i16) {
        let now = Instant::now();
        self.last_try = Some(now);
        self.last_success = Some(now);
        self.average.report(1.0);
        if self.shortest_success.map_or(true, |s| counter < s) {
            self.shortest_success = Some(counter);
        }
        let random_hops = htl - dawn_htl;
        self.s_htl.report(f64::from(htl));
        self.s_dawn.report(f64::from(random_hops));
    }

    /// Reports a failed probe (timeout, disconnect, or loop rejection).
    pub fn failure(&mut self, _counter: i32, htl: i16, dawn_htl: i16) {
        self.last_try = Some(Instant::now());
        self.average.report(0.0);
        let random_hops = htl - dawn_htl;
        self.f_htl.report(f64::from(htl));
        self.f_dawn.report(f64::from(random_hops));
    }

    /// HTL to use for the next probe of this pair.
    ///
    /// Starts at the ceiling; once enough successes are recorded, steps
    /// below the successful average while the pair stays reliable, steps
    /// above it otherwise. Always within `[MIN_HTL, max_htl]`.
    #[must_use]
    pub fn next_htl(&self) -> i16 {
        if self.s_htl.count() < COMFORT_LEVEL {
            return self.max_htl;
        }
        let v = self.s_htl.current_value();
        let htl = if self.average.current_value() > RESTRICT_MARK {
            // Looking good, try a lower htl.
            (v - 0.5).floor() as i16
        } else {
            // Not so good, try a higher htl.
            (v + 0.5).floor() as i16
        };
        htl.clamp(MIN_HTL, self.max_htl)
    }

    /// Dawn HTL to use with a probe of budget `htl`.
    ///
    /// Starts with 2 random hops and widens only as failures accumulate.
    /// The random prefix is capped at `htl/2 - 1`, so at least half the
    /// hops remain deterministic.
    #[must_use]
    pub fn next_dawn_htl(&self, htl: i16) -> i16 {
        let max_random = htl / 2 - 1;
        let mut random_hops = if self.f_dawn.count() < COMFORT_LEVEL {
            2
        } else if self.s_dawn.count() < COMFORT_LEVEL {
            // Enough failures, no successes to speak of.
            (self.f_dawn.current_value() + 0.5).floor() as i16
        } else {
            // Weighted differently from next_htl so the two can stabilize
            // against each other.
            (0.25 * self.f_dawn.current_value() + 0.75 * self.s_dawn.current_value()).floor() as i16
        };
        if random_hops > max_random {
            random_hops = max_random;
        }
        htl - random_hops
    }

    /// Decayed success rate in `[0.0, 1.0]`.
    #[must_use]
    pub fn average(&self) -> f64 {
        self.average.current_value()
    }

    /// Number of successful probe samples.
    #[must_use]
    pub fn success_count(&self) -> u64 {
        self.s_htl.count()
    }

    /// Number of failed probe samples.
    #[must_use]
    pub fn failure_count(&self) -> u64 {
        self.f_htl.count()
    }

    /// Lowest hop counter a successful pong ever reported.
    #[must_use]
    pub fn shortest_success(&self) -> Option<i32> {
        self.shortest_success
    }

    /// When this pair was last probed.
    #[must_use]
    pub fn last_try(&self) -> Option<Instant> {
        self.last_try
    }

    /// When this pair last succeeded. Never later than `last_try`.
    #[must_use]
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_HTL: i16 = 10;

    fn record() -> PingRecord {
        PingRecord::new(MAX_HTL)
    }

    // ── NEXT HTL ────────────────────────────────────────────────────────

    #[test]
    fn test_next_htl_is_ceiling_before_comfort() {
        let mut rec = record();
        for _ in 0..(COMFORT_LEVEL - 1) {
            rec.success(1, 7, 5);
        }
        assert_eq!(rec.next_htl(), MAX_HTL);
    }

    #[test]
    fn test_next_htl_restricts_when_reliable() {
        let mut rec = record();
        for _ in 0..COMFORT_LEVEL {
            rec.success(1, 8, 6);
        }
        // All successes at htl 8 with a perfect average: try below 8.
        assert!(rec.average() > 0.8);
        assert!(rec.next_htl() < 8);
        assert!(rec.next_htl() >= MIN_HTL);
    }

    #[test]
    fn test_next_htl_widens_when_unreliable() {
        let mut rec = record();
        for _ in 0..COMFORT_LEVEL {
            rec.success(1, 5, 3);
        }
        for _ in 0..60 {
            rec.failure(1, 5, 3);
        }
        assert!(rec.average() <= 0.8);
        assert!(rec.next_htl() >= 5);
    }

    #[test]
    fn test_next_htl_bounds_hold_for_any_history() {
        // HTL bounds must hold across wildly mixed histories.
        let mut rec = record();
        for i in 0..200 {
            if i % 3 == 0 {
                rec.failure(1, (i % 10 + 1) as i16, 1);
            } else {
                rec.success(1, (i % 10 + 1) as i16, 1);
            }
            let htl = rec.next_htl();
            assert!(htl >= MIN_HTL, "htl {htl} below floor");
            assert!(htl <= MAX_HTL, "htl {htl} above ceiling");
        }
    }

    #[test]
    fn test_next_htl_never_below_floor() {
        let mut rec = record();
        for _ in 0..100 {
            rec.success(1, MIN_HTL, MIN_HTL - 2);
        }
        assert_eq!(rec.next_htl(), MIN_HTL);
    }

    // ── NEXT DAWN HTL ───────────────────────────────────────────────────

    #[test]
    fn test_dawn_default_is_two_random_hops() {
        let rec = record();
        assert_eq!(rec.next_dawn_htl(10), 8);
    }

    #[test]
    fn test_dawn_random_prefix_capped_at_half_path() {
        let mut rec = record();
        // Pile up failures with wide random prefixes to push the diff up.
        for _ in 0..100 {
            rec.failure(1, 10, 1);
        }
        for htl in [4i16, 6, 8, 10] {
            let dawn = rec.next_dawn_htl(htl);
            assert!(htl - dawn <= htl / 2 - 1, "htl {htl} dawn {dawn}");
        }
    }

    #[test]
    fn test_dawn_follows_failure_average_without_successes() {
        let mut rec = record();
        for _ in 0..COMFORT_LEVEL {
            rec.failure(1, 10, 7); // 3 random hops per failure
        }
        // diff = round(3.0) = 3, capped at 10/2-1 = 4.
        assert_eq!(rec.next_dawn_htl(10), 7);
    }

    #[test]
    fn test_dawn_blends_success_and_failure_averages() {
        let mut rec = record();
        for _ in 0..COMFORT_LEVEL {
            rec.failure(1, 10, 6); // 4 random hops
        }
        for _ in 0..COMFORT_LEVEL {
            rec.success(1, 10, 8); // 2 random hops
        }
        // 0.25*4 + 0.75*2 = 2.5, truncated to 2.
        assert_eq!(rec.next_dawn_htl(10), 8);
    }

    // ── SAMPLE BOOKKEEPING ──────────────────────────────────────────────

    #[test]
    fn test_shortest_success_is_monotone() {
        let mut rec = record();
        rec.success(5, 8, 6);
        assert_eq!(rec.shortest_success(), Some(5));
        rec.success(9, 8, 6);
        assert_eq!(rec.shortest_success(), Some(5));
        rec.success(2, 8, 6);
        assert_eq!(rec.shortest_success(), Some(2));
    }

    #[test]
    fn test_last_success_not_after_last_try() {
        let mut rec = record();
        rec.success(1, 8, 6);
        rec.failure(1, 8, 6);
        let (t, s) = (rec.last_try().unwrap(), rec.last_success().unwrap());
        assert!(s <= t);
    }

    #[test]
    fn test_counts_split_by_outcome() {
        let mut rec = record();
        rec.success(1, 8, 6);
        rec.success(1, 8, 6);
        rec.failure(1, 8, 6);
        assert_eq!(rec.success_count(), 2);
        assert_eq!(rec.failure_count(), 1);
    }

    #[test]
    fn test_average_moves_with_outcomes() {
        let mut rec = record();
        rec.success(1, 8, 6);
        assert_eq!(rec.average(), 1.0);
        rec.failure(1, 8, 6);
        assert!(rec.average() < 1.0);
    }
}
