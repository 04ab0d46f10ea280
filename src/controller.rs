//! Cross-run sampling step adaptation.
//!
//! The quality verdict comes from a previous reconstruction, so the step is adjusted
//! once, before sampling starts. Good quality coarsens sampling, poor quality densifies
//! it, always within the configured bounds.

use serde::{Deserialize, Serialize};

pub const DEFAULT_STEP: u32 = 20;
pub const DEFAULT_STEP_DELTA: u32 = 10;
pub const MIN_STEP: u32 = 10;
pub const MAX_STEP: u32 = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepPolicy {
    pub delta: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for StepPolicy {
    fn default() -> Self {
        Self {
            delta: DEFAULT_STEP_DELTA,
            min: MIN_STEP,
            max: MAX_STEP,
        }
    }
}

impl StepPolicy {
    pub fn next(&self, current: u32, quality_is_good: bool) -> u32 {
        next_step(current, quality_is_good, self.delta, self.min, self.max)
    }

    pub fn contains(&self, step: u32) -> bool {
        (self.min..=self.max).contains(&step)
    }
}

/// Next sampling step given the previous one and the prior run's quality verdict.
///
/// Result is always within `[min, max]`, whatever `current` and `delta` are. Reversed
/// bounds are treated as `[max, min]`.
pub fn next_step(current: u32, quality_is_good: bool, delta: u32, min: u32, max: u32) -> u32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    let moved = if quality_is_good {
        current.saturating_add(delta)
    } else {
        current.saturating_sub(delta)
    };
    moved.clamp(lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_quality_coarsens() {
        assert_eq!(next_step(20, true, 10, 10, 50), 30);
        assert_eq!(next_step(45, true, 10, 10, 50), 50);
        assert_eq!(next_step(50, true, 10, 10, 50), 50);
    }

    #[test]
    fn reversed_bounds_do_not_panic() {
        assert_eq!(next_step(20, true, 10, 50, 10), 30);
        assert_eq!(next_step(45, true, 10, 50, 10), 50);
        assert_eq!(next_step(10, false, 10, 50, 10), 10);
    }

    #[test]
    fn poor_quality_densifies() {
        assert_eq!(next_step(30, false, 10, 10, 50), 20);
        assert_eq!(next_step(15, false, 10, 10, 50), 10);
        assert_eq!(next_step(10, false, 10, 10, 50), 10);
    }

    #[test]
    fn result_always_within_bounds() {
        for current in [0u32, 1, 9, 10, 25, 50, 51, 1000, u32::MAX] {
            for delta in [0u32, 1, 10, 40, 100, u32::MAX] {
                for good in [true, false] {
                    let step = next_step(current, good, delta, MIN_STEP, MAX_STEP);
                    assert!(
                        (MIN_STEP..=MAX_STEP).contains(&step),
                        "current={current} delta={delta} good={good} -> {step}"
                    );
                }
            }
        }
    }

    #[test]
    fn larger_delta_moves_at_least_as_far() {
        for current in MIN_STEP..=MAX_STEP {
            let mut last_up = current;
            let mut last_down = current;
            for delta in 0..=60 {
                let up = next_step(current, true, delta, MIN_STEP, MAX_STEP);
                let down = next_step(current, false, delta, MIN_STEP, MAX_STEP);
                assert!(up >= last_up && down <= last_down);
                last_up = up;
                last_down = down;
            }
        }
    }

    #[test]
    fn policy_defaults() {
        let policy = StepPolicy::default();
        assert_eq!(policy.next(DEFAULT_STEP, true), 30);
        assert_eq!(policy.next(DEFAULT_STEP, false), 10);
        assert!(policy.contains(DEFAULT_STEP));
        assert!(!policy.contains(5));
    }
}
