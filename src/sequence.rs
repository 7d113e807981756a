use serde::Deserialize;

/// How a sequence number lower than or equal to the last one is accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RegressionPolicy {
    /// Accumulate the negative delta as-is. Keeps the plain
    /// `expected += seq - last` arithmetic, so a producer restart can pull
    /// the lost count below the true loss.
    #[default]
    Signed,
    /// Treat the reading as the start of a new run: no gap, one more expected.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceStatus {
    /// First reading ever seen from the source
    First,
    InOrder,
    /// Sequence jumped ahead, this many numbers are missing
    Gap(u64),
    /// Same sequence number as the previous reading
    Duplicate,
    /// Sequence moved backwards by this much
    Regressed(u64),
}

/// Outcome of observing one sequence number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapReport {
    pub status: SequenceStatus,
    /// Amount added to the accumulated gap count by this observation
    pub gap: i64,
}

impl GapReport {
    pub fn is_gap(&self) -> bool {
        matches!(self.status, SequenceStatus::Gap(_))
    }
}

/// Per-source sequence state. Only the last sequence number is remembered,
/// so memory stays constant but history older than one reading is lost.
///
/// `gaps == expected - received` holds after every observation.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    policy: RegressionPolicy,
    last_sequence: Option<u32>,
    total_received: u64,
    total_expected: i64,
    gaps: i64,
    duplicates: u64,
    regressions: u64,
}

impl SequenceTracker {
    pub fn new(policy: RegressionPolicy) -> Self {
        Self {
            policy,
            last_sequence: None,
            total_received: 0,
            total_expected: 0,
            gaps: 0,
            duplicates: 0,
            regressions: 0,
        }
    }

    pub fn observe(&mut self, sequence: u32) -> GapReport {
        self.total_received += 1;

        let Some(last) = self.last_sequence.replace(sequence) else {
            self.total_expected += 1;
            return GapReport {
                status: SequenceStatus::First,
                gap: 0,
            };
        };

        let delta = i64::from(sequence) - i64::from(last);
        let status = match delta {
            1 => SequenceStatus::InOrder,
            d if d > 1 => SequenceStatus::Gap((d - 1) as u64),
            0 => SequenceStatus::Duplicate,
            d => SequenceStatus::Regressed(d.unsigned_abs()),
        };

        match status {
            SequenceStatus::Duplicate => self.duplicates += 1,
            SequenceStatus::Regressed(_) => self.regressions += 1,
            _ => {}
        }

        let (expected_delta, gap) = match (status, self.policy) {
            (SequenceStatus::Duplicate | SequenceStatus::Regressed(_), RegressionPolicy::Reset) => (1, 0),
            _ => (delta, delta - 1),
        };
        self.total_expected += expected_delta;
        self.gaps += gap;

        GapReport { status, gap }
    }

    pub fn last_sequence(&self) -> Option<u32> {
        self.last_sequence
    }

    pub fn total_received(&self) -> u64 {
        self.total_received
    }

    pub fn total_expected(&self) -> i64 {
        self.total_expected
    }

    pub fn gaps(&self) -> i64 {
        self.gaps
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    pub fn regressions(&self) -> u64 {
        self.regressions
    }

    /// `100 * gaps / expected`, or 0 before anything is expected
    pub fn loss_rate(&self) -> f64 {
        loss_percentage(self.gaps, self.total_expected)
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new(RegressionPolicy::default())
    }
}

pub fn loss_percentage(gaps: i64, expected: i64) -> f64 {
    if expected > 0 {
        gaps as f64 * 100.0 / expected as f64
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_invariant(tracker: &SequenceTracker) {
        assert_eq!(
            tracker.gaps(),
            tracker.total_expected() - tracker.total_received() as i64
        );
    }

    #[test]
    fn test_contiguous_sequences_have_no_loss() {
        let mut tracker = SequenceTracker::default();
        assert_eq!(tracker.observe(0).status, SequenceStatus::First);
        for seq in 1..100 {
            let report = tracker.observe(seq);
            assert_eq!(report.status, SequenceStatus::InOrder);
            assert_eq!(report.gap, 0);
        }
        assert_eq!(tracker.gaps(), 0);
        assert_eq!(tracker.loss_rate(), 0.0);
        assert_eq!(tracker.total_expected(), 100);
        assert_invariant(&tracker);
    }

    #[test]
    fn test_first_reading_may_start_anywhere() {
        let mut tracker = SequenceTracker::default();
        tracker.observe(500);
        tracker.observe(501);
        assert_eq!(tracker.total_expected(), 2);
        assert_eq!(tracker.gaps(), 0);
    }

    #[test]
    fn test_single_gap() {
        for gap_size in [1u32, 2, 7, 40] {
            let mut tracker = SequenceTracker::default();
            for seq in 0..10 {
                tracker.observe(seq);
            }
            let report = tracker.observe(9 + gap_size + 1);
            assert_eq!(report.status, SequenceStatus::Gap(u64::from(gap_size)));
            assert!(report.is_gap());
            for seq in 11 + gap_size..20 + gap_size {
                tracker.observe(seq);
            }
            assert_eq!(tracker.gaps(), i64::from(gap_size));
            assert_eq!(
                tracker.total_expected() - tracker.total_received() as i64,
                i64::from(gap_size)
            );
        }
    }

    #[test]
    fn test_skipped_sequence_loss_rate() {
        let mut tracker = SequenceTracker::default();
        tracker.observe(0);
        tracker.observe(1);
        assert_eq!(tracker.observe(3).status, SequenceStatus::Gap(1));

        // The first reading counts as both expected and received, so the
        // span 0..=3 expects four readings and three arrived.
        assert_eq!(tracker.gaps(), 1);
        assert_eq!(tracker.total_expected(), 4);
        assert_eq!(tracker.total_received(), 3);
        assert_relative_eq!(tracker.loss_rate(), 25.0, epsilon = 1e-9);
        assert_invariant(&tracker);
    }

    #[test]
    fn test_signed_regression_reduces_gap_count() {
        let mut tracker = SequenceTracker::new(RegressionPolicy::Signed);
        tracker.observe(0);
        tracker.observe(5); // 4 missing
        let report = tracker.observe(2);
        assert_eq!(report.status, SequenceStatus::Regressed(3));
        assert_eq!(report.gap, -4);
        assert_eq!(tracker.gaps(), 0);
        assert_eq!(tracker.total_expected(), 3);
        assert_eq!(tracker.last_sequence(), Some(2));
        assert_eq!(tracker.regressions(), 1);
        assert_invariant(&tracker);
    }

    #[test]
    fn test_reset_regression_keeps_gap_count() {
        let mut tracker = SequenceTracker::new(RegressionPolicy::Reset);
        tracker.observe(0);
        tracker.observe(5);
        let report = tracker.observe(0);
        assert_eq!(report.status, SequenceStatus::Regressed(5));
        assert_eq!(report.gap, 0);
        assert_eq!(tracker.gaps(), 4);
        assert_eq!(tracker.total_expected(), 7);
        tracker.observe(1);
        assert_eq!(tracker.gaps(), 4);
        assert_invariant(&tracker);
    }

    #[test]
    fn test_duplicates() {
        let mut signed = SequenceTracker::new(RegressionPolicy::Signed);
        signed.observe(3);
        assert_eq!(signed.observe(3).status, SequenceStatus::Duplicate);
        assert_eq!(signed.gaps(), -1);
        assert_eq!(signed.duplicates(), 1);
        assert_invariant(&signed);

        let mut reset = SequenceTracker::new(RegressionPolicy::Reset);
        reset.observe(3);
        reset.observe(3);
        assert_eq!(reset.gaps(), 0);
        assert_eq!(reset.total_expected(), 2);
        assert_invariant(&reset);
    }

    #[test]
    fn test_loss_percentage_without_expectations() {
        assert_eq!(loss_percentage(0, 0), 0.0);
        assert_eq!(loss_percentage(-3, -1), 0.0);
        assert_eq!(loss_percentage(1, 4), 25.0);
    }
}
