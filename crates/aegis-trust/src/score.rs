//! EWMA trust score update rule

use aegis_common::{OutcomeKind, RiskTier};

/// Apply one outcome to a score with an explicit learning rate.
/// `alpha == 0` makes the score immutable (the T4 hardcap).
pub fn update_with_alpha(alpha: f64, old: f64, outcome: OutcomeKind) -> f64 {
    let target = match outcome.score_target() {
        Some(t) => t,
        None => return old,
    };
    (alpha * target + (1.0 - alpha) * old).clamp(0.0, 1.0)
}

/// Apply one outcome using the tier's default learning rate
pub fn update(tier: RiskTier, old: f64, outcome: OutcomeKind) -> f64 {
    update_with_alpha(tier.ewma_alpha(), old, outcome)
}
