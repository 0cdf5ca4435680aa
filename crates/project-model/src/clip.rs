//! Trim range selection.

use serde::{Deserialize, Serialize};

/// Smallest allowed distance between trim start and trim end, in seconds.
pub const MIN_GAP_SECS: f64 = 0.1;

/// The `[start, end]` subinterval of the source selected for export.
///
/// Invariant: `0 <= start < end <= duration` and `end - start >= MIN_GAP_SECS`
/// (or the whole source when it is shorter than the gap). Every mutation
/// clamps instead of failing, mirroring range-slider behavior.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipRange {
    start: f64,
    end: f64,
    duration: f64,
}

impl ClipRange {
    /// Full-length range for a source of the given duration.
    ///
    /// Non-finite or negative durations are treated as zero.
    pub fn for_duration(duration: f64) -> Self {
        let duration = if duration.is_finite() {
            duration.max(0.0)
        } else {
            0.0
        };
        Self {
            start: 0.0,
            end: duration,
            duration,
        }
    }

    /// Range with explicit bounds, clamped the same way user edits are.
    pub fn with_bounds(duration: f64, start: f64, end: f64) -> Self {
        let mut range = Self::for_duration(duration);
        range.set_start(start);
        range.set_end(end);
        range
    }

    pub fn start(&self) -> f64 {
        self.start
    }

    pub fn end(&self) -> f64 {
        self.end
    }

    /// Duration of the source this range belongs to.
    pub fn source_duration(&self) -> f64 {
        self.duration
    }

    /// Length of the selected window.
    pub fn len_secs(&self) -> f64 {
        self.end - self.start
    }

    /// Effective minimum gap for this source.
    pub fn min_gap(&self) -> f64 {
        MIN_GAP_SECS.min(self.duration)
    }

    /// Move the start handle. Clamped to `[0, end - gap]`.
    pub fn set_start(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.start = value.min(self.end - self.min_gap()).max(0.0);
    }

    /// Move the end handle. Clamped to `[start + gap, duration]`.
    pub fn set_end(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.end = value.max(self.start + self.min_gap()).min(self.duration);
    }
}

/// Format seconds as `m:ss` for display.
///
/// Fractions are truncated; non-finite input renders as `0:00`.
pub fn format_timestamp(secs: f64) -> String {
    if !secs.is_finite() {
        return "0:00".to_string();
    }
    let sign = if secs < 0.0 { "-" } else { "" };
    let whole = secs.abs().floor() as u64;
    format!("{sign}{}:{:02}", whole / 60, whole % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn assert_invariants(range: &ClipRange) {
        let gap = range.min_gap();
        assert!(range.start() >= 0.0, "start {} < 0", range.start());
        assert!(
            range.end() <= range.source_duration() + 1e-9,
            "end {} > duration {}",
            range.end(),
            range.source_duration()
        );
        assert!(
            range.len_secs() >= gap - 1e-9,
            "gap {} < {}",
            range.len_secs(),
            gap
        );
    }

    #[test]
    fn test_defaults_to_full_source() {
        let range = ClipRange::for_duration(10.0);
        assert_eq!(range.start(), 0.0);
        assert_eq!(range.end(), 10.0);
    }

    #[test]
    fn test_start_cannot_cross_end() {
        let mut range = ClipRange::for_duration(10.0);
        range.set_end(5.0);
        range.set_start(7.0);
        assert!((range.start() - 4.9).abs() < 1e-9);
        assert_eq!(range.end(), 5.0);
    }

    #[test]
    fn test_end_respects_min_gap() {
        let mut range = ClipRange::for_duration(10.0);
        range.set_start(2.0);
        range.set_end(2.05);
        assert!((range.end() - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_with_bounds_keeps_start_and_widens_end() {
        let range = ClipRange::with_bounds(10.0, 2.0, 2.05);
        assert_eq!(range.start(), 2.0);
        assert!((range.end() - 2.1).abs() < 1e-9);
    }

    #[test]
    fn test_end_clamped_to_duration() {
        let mut range = ClipRange::for_duration(10.0);
        range.set_end(42.0);
        assert_eq!(range.end(), 10.0);
    }

    #[test]
    fn test_non_finite_edits_are_ignored() {
        let mut range = ClipRange::with_bounds(10.0, 1.0, 4.0);
        range.set_start(f64::NAN);
        range.set_end(f64::INFINITY);
        assert_eq!(range.start(), 1.0);
        assert_eq!(range.end(), 4.0);
    }

    #[test]
    fn test_source_shorter_than_gap() {
        let mut range = ClipRange::for_duration(0.05);
        range.set_start(0.04);
        assert_eq!(range.start(), 0.0);
        assert_eq!(range.end(), 0.05);
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "0:00");
        assert_eq!(format_timestamp(5.9), "0:05");
        assert_eq!(format_timestamp(125.0), "2:05");
        assert_eq!(format_timestamp(-61.0), "-1:01");
        assert_eq!(format_timestamp(f64::NAN), "0:00");
    }

    #[derive(Debug, Clone)]
    enum Edit {
        Start(f64),
        End(f64),
    }

    fn edit_strategy() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (-20.0f64..140.0).prop_map(Edit::Start),
            (-20.0f64..140.0).prop_map(Edit::End),
        ]
    }

    proptest! {
        #[test]
        fn prop_every_edit_preserves_invariants(
            duration in 0.2f64..120.0,
            edits in proptest::collection::vec(edit_strategy(), 1..40),
        ) {
            let mut range = ClipRange::for_duration(duration);
            for edit in edits {
                match edit {
                    Edit::Start(v) => range.set_start(v),
                    Edit::End(v) => range.set_end(v),
                }
                assert_invariants(&range);
            }
        }
    }
}
