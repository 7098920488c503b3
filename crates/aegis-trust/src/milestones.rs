//! Milestone detection
//!
//! Given a category's thresholds and a score transition, emit every
//! milestone the transition crosses. One update that falls through both the
//! demotion threshold and the floor produces both `tier_demotion` and
//! `blocked`.

use aegis_common::MilestoneKind;

/// Threshold set for one category
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub promotion: f64,
    pub demotion: f64,
    pub floor: f64,
}

/// Detect all milestones crossed by a score moving from `old` to `new`
pub fn detect_crossings(t: Thresholds, old: f64, new: f64) -> Vec<MilestoneKind> {
    let mut out = Vec::new();
    if new > old {
        if old < t.promotion && new >= t.promotion {
            out.push(MilestoneKind::TierPromotion);
        }
    } else if new < old {
        if old >= t.demotion && new < t.demotion {
            out.push(MilestoneKind::TierDemotion);
        }
        if old >= t.floor && new < t.floor {
            out.push(MilestoneKind::Blocked);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        promotion: 0.80,
        demotion: 0.70,
        floor: 0.30,
    };

    #[test]
    fn promotion_crossing_detected() {
        assert_eq!(
            detect_crossings(T, 0.79, 0.81),
            vec![MilestoneKind::TierPromotion]
        );
        // landing exactly on the threshold counts as promoted
        assert_eq!(
            detect_crossings(T, 0.79, 0.80),
            vec![MilestoneKind::TierPromotion]
        );
    }

    #[test]
    fn demotion_crossing_detected() {
        assert_eq!(
            detect_crossings(T, 0.70, 0.69),
            vec![MilestoneKind::TierDemotion]
        );
    }

    #[test]
    fn single_drop_can_cross_both() {
        let crossed = detect_crossings(T, 0.75, 0.25);
        assert_eq!(
            crossed,
            vec![MilestoneKind::TierDemotion, MilestoneKind::Blocked]
        );
    }

    #[test]
    fn movement_within_band_emits_nothing() {
        assert!(detect_crossings(T, 0.75, 0.74).is_empty());
        assert!(detect_crossings(T, 0.85, 0.90).is_empty());
        assert!(detect_crossings(T, 0.5, 0.5).is_empty());
    }

    #[test]
    fn starting_below_threshold_does_not_re_emit() {
        // already demoted; further decay is not a new demotion
        assert!(detect_crossings(T, 0.65, 0.60).is_empty());
    }
}
