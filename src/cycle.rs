//! End-of-cycle detection (spec.md §4.10): cycle boundaries are inferred
//! from the fractional-second value each sentence carries rather than
//! configured per device, so this adapts to both fixed- and drifting-
//! cycle devices after one complete cycle of lock-in.

use crate::fix::ChangeMask;
use crate::session::CycleState;

/// Cycle boundaries are recognized once the latched fractional time moves
/// by more than this much between sentences (spec.md §4.10).
const CYCLE_START_THRESHOLD_S: f64 = 0.010;

/// Feed one sentence's fractional-second time into the cycle detector
/// (spec.md §4.10's `register_fractional_time`, folded together with the
/// dispatch-time comparison it feeds). `tag` is the 3-character sentence
/// tag (e.g. `GGA`); `frac_time` is that sentence's fractional-second
/// field. Returns `CLEAR` if this sentence starts a new cycle and/or
/// `REPORT` if this sentence's tag is a known cycle-ender.
pub fn step(cycle: &mut CycleState, tag: [u8; 3], frac_time: f64) -> ChangeMask {
    let mut mask = ChangeMask::empty();

    if cycle.cycle_enders.contains(&tag) {
        mask |= ChangeMask::REPORT;
    }

    cycle.last_frac_time = cycle.this_frac_time;
    cycle.this_frac_time = Some(frac_time);
    cycle.latch_frac_time = true;

    if let (Some(this), Some(last)) = (cycle.this_frac_time, cycle.last_frac_time) {
        if (this - last).abs() > CYCLE_START_THRESHOLD_S {
            mask |= ChangeMask::CLEAR;
            if let Some(prev_ender) = cycle.current_ender {
                if !cycle.cycle_enders.contains(&prev_ender) {
                    cycle.cycle_enders.push(prev_ender);
                }
            }
        }
    }

    cycle.current_ender = Some(tag);
    mask
}

/// Sentences flagged cycle-continue in the driver table (spec.md §4.10:
/// "e.g. DBT") carry no fractional time of their own but still move the
/// current cycle-ender forward to themselves.
pub fn mark_continue(cycle: &mut CycleState, tag: [u8; 3]) {
    cycle.current_ender = Some(tag);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sentence_establishes_the_ender_without_reporting() {
        let mut cycle = CycleState::default();
        let mask = step(&mut cycle, *b"GGA", 123.0);
        assert!(mask.is_empty());
        assert_eq!(cycle.current_ender, Some(*b"GGA"));
    }

    #[test]
    fn large_time_jump_starts_a_new_cycle_and_remembers_the_ender() {
        let mut cycle = CycleState::default();
        step(&mut cycle, *b"GGA", 123.0);
        let mask = step(&mut cycle, *b"RMC", 124.0);
        assert!(mask.contains(ChangeMask::CLEAR));
        assert!(cycle.cycle_enders.contains(&*b"GGA"));
    }

    #[test]
    fn small_time_drift_does_not_start_a_new_cycle() {
        let mut cycle = CycleState::default();
        step(&mut cycle, *b"GGA", 123.000);
        let mask = step(&mut cycle, *b"GLL", 123.001);
        assert!(!mask.contains(ChangeMask::CLEAR));
    }

    #[test]
    fn known_ender_reports_once_locked_in() {
        let mut cycle = CycleState::default();
        step(&mut cycle, *b"GGA", 123.0);
        step(&mut cycle, *b"RMC", 124.0); // GGA becomes a known ender
        let mask = step(&mut cycle, *b"GGA", 124.0); // back around
        assert!(mask.contains(ChangeMask::REPORT));
    }
}
