//! Failure classifier
//!
//! Deterministic, rule-ordered pattern matcher from `(kind, failure_desc)`
//! to `(root_cause, propagation targets)`. Rules are evaluated top-down,
//! most specific first; anything unmatched falls through to `unknown` and
//! is routed to the synapse relay only.

use once_cell::sync::Lazy;
use regex::Regex;

use aegis_common::FailureKind;

use crate::types::PropagationTarget;

struct Rule {
    /// When set, the rule only applies to this failure kind
    kind: Option<FailureKind>,
    pattern: Regex,
    root_cause: &'static str,
    targets: &'static [PropagationTarget],
}

use PropagationTarget::{Atom, HookPattern, RegressionTest, SopPatch, SynapseRelay};

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        Rule {
            kind: None,
            pattern: Regex::new(r"(?i)ENOENT|No such file or directory|no such file").unwrap(),
            root_cause: "wrong_path",
            targets: &[HookPattern, Atom, SopPatch],
        },
        Rule {
            kind: None,
            pattern: Regex::new(r"(?i)permission denied|EACCES|operation not permitted").unwrap(),
            root_cause: "permissions",
            targets: &[SopPatch, Atom],
        },
        Rule {
            kind: None,
            pattern: Regex::new(r"(?i)command not found|not recognized as an internal").unwrap(),
            root_cause: "missing_binary",
            targets: &[SopPatch, HookPattern, Atom],
        },
        Rule {
            kind: None,
            pattern: Regex::new(r"TS\d{4}|is not assignable to|Property '.+' does not exist")
                .unwrap(),
            root_cause: "type_error",
            targets: &[RegressionTest, Atom],
        },
        Rule {
            kind: None,
            pattern: Regex::new(r"(?i)ETIMEDOUT|timed out|deadline exceeded").unwrap(),
            root_cause: "timeout",
            targets: &[HookPattern, Atom],
        },
        Rule {
            kind: None,
            pattern: Regex::new(r"(?i)ECONNREFUSED|connection refused").unwrap(),
            root_cause: "connection_refused",
            targets: &[HookPattern, Atom],
        },
        Rule {
            kind: Some(FailureKind::Correction),
            pattern: Regex::new(r"(?i)\boutdated\b|\bstale\b|\bno longer\b").unwrap(),
            root_cause: "stale_knowledge",
            targets: &[SopPatch, Atom],
        },
        // any surviving correction is an approach problem
        Rule {
            kind: Some(FailureKind::Correction),
            pattern: Regex::new(r".").unwrap(),
            root_cause: "incorrect_approach",
            targets: &[SopPatch, Atom],
        },
        Rule {
            kind: Some(FailureKind::SopViolation),
            pattern: Regex::new(r".").unwrap(),
            root_cause: "sop_violation",
            targets: &[SopPatch, HookPattern, Atom],
        },
        Rule {
            kind: Some(FailureKind::TrustDemotion),
            pattern: Regex::new(r".").unwrap(),
            root_cause: "trust_boundary_crossed",
            targets: &[SopPatch, Atom, SynapseRelay],
        },
        Rule {
            kind: Some(FailureKind::PipelineFailure),
            pattern: Regex::new(r".").unwrap(),
            root_cause: "pipeline_failure",
            targets: &[Atom, SynapseRelay],
        },
    ]
});

/// Classify one failure. Total: always returns a root cause and at least
/// one target.
pub fn classify(kind: FailureKind, failure_desc: &str) -> (String, Vec<PropagationTarget>) {
    for rule in RULES.iter() {
        if let Some(rule_kind) = rule.kind {
            if rule_kind != kind {
                continue;
            }
        }
        if rule.pattern.is_match(failure_desc) {
            return (rule.root_cause.to_string(), rule.targets.to_vec());
        }
    }
    ("unknown".to_string(), vec![SynapseRelay])
}
