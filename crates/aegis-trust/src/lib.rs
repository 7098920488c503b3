//! Trust gate and earned autonomy
//!
//! Classifies every agent tool invocation into a risk tier and category,
//! gates it against a continuously-updated trust score, and feeds observed
//! outcomes back through an EWMA updater that promotes or demotes
//! categories across thresholds.

pub mod classifier;
pub mod gate;
pub mod milestones;
pub mod overrides;
pub mod score;
pub mod types;

pub use aegis_common::scrub::{scrub, scrub_params};
pub use classifier::{category_catalogue, classify, Classification};
pub use gate::{CategoryTrustReport, Resolution, TrustGate};
pub use milestones::{detect_crossings, Thresholds};
pub use overrides::OverrideManager;
pub use types::{Decision, OverrideKind, OverrideRow, TrustScoreRow};
