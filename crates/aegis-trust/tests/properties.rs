//! Property tests for the classifier and the score updater

use proptest::prelude::*;
use serde_json::json;

use aegis_common::{OutcomeKind, RiskTier};
use aegis_trust::{classify, score};

fn arb_tool_name() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("Read".to_string()),
        Just("Write".to_string()),
        Just("Edit".to_string()),
        Just("exec".to_string()),
        Just("Grep".to_string()),
        "[a-zA-Z_]{1,16}",
    ]
}

fn arb_params() -> impl Strategy<Value = serde_json::Value> {
    prop_oneof![
        Just(json!({})),
        Just(json!(null)),
        "[ -~]{0,80}".prop_map(|s| json!({ "command": s })),
        "[ -~]{0,80}".prop_map(|s| json!({ "path": s })),
        ("[ -~]{0,40}", "[ -~]{0,40}")
            .prop_map(|(p, c)| json!({ "path": p, "content": c })),
    ]
}

fn arb_outcome() -> impl Strategy<Value = OutcomeKind> {
    prop_oneof![
        Just(OutcomeKind::Pass),
        Just(OutcomeKind::CorrectedMinor),
        Just(OutcomeKind::CorrectedSignificant),
        Just(OutcomeKind::ToolErrorExternal),
    ]
}

proptest! {
    /// classify returns a tier in 1..=4, a non-empty category, and is
    /// deterministic across invocations
    #[test]
    fn classify_total_and_deterministic(tool in arb_tool_name(), params in arb_params()) {
        let a = classify(&tool, &params);
        let b = classify(&tool, &params);
        prop_assert_eq!(&a, &b);
        prop_assert!((1..=4).contains(&a.tier.as_i64()));
        prop_assert!(!a.category.is_empty());
    }

    /// Any input containing a financial keyword anywhere classifies T4
    #[test]
    fn financial_keywords_force_t4(
        prefix in "[a-z ]{0,30}",
        suffix in "[a-z ]{0,30}",
        keyword in prop_oneof![
            Just("augur trade"),
            Just("crypto transfer"),
            Just("stripe charge"),
        ],
    ) {
        let command = format!("{} {} {}", prefix, keyword, suffix);
        let c = classify("exec", &json!({ "command": command }));
        prop_assert_eq!(c.tier, RiskTier::T4Financial);
    }

    /// A fresh T4 score is unchanged by any outcome sequence
    #[test]
    fn t4_score_immutable(outcomes in prop::collection::vec(arb_outcome(), 0..50)) {
        let initial = RiskTier::T4Financial.initial_score();
        let mut current = initial;
        for outcome in outcomes {
            current = score::update(RiskTier::T4Financial, current, outcome);
        }
        prop_assert_eq!(current, initial);
    }

    /// T1–T3 scores stay in [0, 1] after every step
    #[test]
    fn scores_stay_in_unit_interval(
        tier in prop_oneof![
            Just(RiskTier::T1Read),
            Just(RiskTier::T2Write),
            Just(RiskTier::T3Infra),
        ],
        outcomes in prop::collection::vec(arb_outcome(), 1..80),
    ) {
        let mut current = tier.initial_score();
        for outcome in outcomes {
            current = score::update(tier, current, outcome);
            prop_assert!((0.0..=1.0).contains(&current));
        }
    }

    /// Unknown tools never classify below T2 or above T3
    #[test]
    fn fallback_is_bounded(tool in "[a-z]{3,12}", params in arb_params()) {
        // skip names that collide with known tools or financial params
        prop_assume!(!["read", "write", "edit", "exec", "grep", "glob", "list", "ls",
                       "search", "shell", "bash", "execute", "systemctl"]
            .contains(&tool.as_str()));
        let c = classify(&tool, &params);
        if c.tier == RiskTier::T4Financial {
            // only reachable through the keyword scan, which is intended
            let text = params.to_string();
            prop_assert!(
                text.contains("augur") || text.contains("crypto") || text.contains("stripe")
                    || text.contains("transfer") || text.contains("wire")
                    || text.contains("send") || text.contains("withdraw")
            );
        } else {
            prop_assert!(c.tier >= RiskTier::T2Write);
            prop_assert!(c.tier <= RiskTier::T3Infra);
        }
    }
}
