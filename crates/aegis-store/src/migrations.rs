//! Schema migrations
//!
//! Every statement is idempotent (`IF NOT EXISTS` / `OR IGNORE`), so
//! running the migration twice yields identical schema and seed rows.

/// DDL statements applied in order at startup
pub(crate) const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS trust_scores (
        category            TEXT PRIMARY KEY,
        risk_tier           INTEGER NOT NULL CHECK (risk_tier BETWEEN 1 AND 4),
        current_score       REAL NOT NULL CHECK (current_score >= 0.0 AND current_score <= 1.0),
        ewma_alpha          REAL NOT NULL CHECK (ewma_alpha >= 0.0 AND ewma_alpha <= 1.0),
        initial_score       REAL NOT NULL,
        promotion_threshold REAL NOT NULL,
        demotion_threshold  REAL NOT NULL,
        floor               REAL NOT NULL,
        updated_at          TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS decision_log (
        decision_id             TEXT PRIMARY KEY,
        session_id              TEXT NOT NULL,
        tool_name               TEXT NOT NULL,
        tool_params_hash        TEXT NOT NULL,
        tool_params_summary     TEXT NOT NULL,
        risk_tier               INTEGER NOT NULL CHECK (risk_tier BETWEEN 1 AND 4),
        category                TEXT NOT NULL,
        gate_decision           TEXT NOT NULL CHECK (gate_decision IN ('pass', 'pause', 'block')),
        trust_score_at_decision REAL NOT NULL CHECK (trust_score_at_decision >= 0.0 AND trust_score_at_decision <= 1.0),
        override_active         INTEGER NOT NULL DEFAULT 0,
        reason                  TEXT,
        timestamp               TEXT NOT NULL,
        outcome                 TEXT NOT NULL DEFAULT 'pending'
            CHECK (outcome IN ('pending', 'pass', 'corrected_minor', 'corrected_significant', 'tool_error_external'))
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_decision_log_session
        ON decision_log (session_id, timestamp)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_outcomes (
        decision_id TEXT PRIMARY KEY REFERENCES decision_log (decision_id),
        expires_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trust_overrides (
        override_id          TEXT PRIMARY KEY,
        category             TEXT NOT NULL,
        override_type        TEXT NOT NULL CHECK (override_type IN ('granted', 'revoked')),
        reason               TEXT NOT NULL,
        granted_by           TEXT NOT NULL,
        granted_from_session TEXT NOT NULL,
        expires_at           TEXT,
        active               INTEGER NOT NULL DEFAULT 1,
        created_at           TEXT NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_trust_overrides_active
        ON trust_overrides (category, active)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS trust_milestones (
        milestone_id   TEXT PRIMARY KEY,
        category       TEXT NOT NULL,
        milestone_type TEXT NOT NULL CHECK (milestone_type IN
            ('first_auto_approve', 'tier_promotion', 'tier_demotion',
             'blocked', 'override_granted', 'override_revoked')),
        old_score      REAL NOT NULL,
        new_score      REAL NOT NULL,
        trigger        TEXT NOT NULL,
        timestamp      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS incidents (
        id               TEXT PRIMARY KEY,
        anomaly_type     TEXT NOT NULL,
        target_id        TEXT NOT NULL,
        severity         TEXT NOT NULL CHECK (severity IN ('low', 'medium', 'high', 'critical')),
        state            TEXT NOT NULL CHECK (state IN
            ('detected', 'diagnosing', 'remediating', 'verifying',
             'escalated', 'resolved', 'self_resolved', 'dismissed')),
        runbook_id       TEXT,
        detected_at      TEXT NOT NULL,
        state_changed_at TEXT NOT NULL,
        resolved_at      TEXT,
        escalation_tier  INTEGER CHECK (escalation_tier BETWEEN 0 AND 3),
        escalated_at     TEXT,
        dismiss_until    TEXT,
        audit_trail      TEXT NOT NULL DEFAULT '[]',
        details          TEXT NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_incidents_dedup
        ON incidents (anomaly_type, target_id, state)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS runbooks (
        id                     TEXT PRIMARY KEY,
        label                  TEXT NOT NULL,
        applies_to             TEXT NOT NULL,
        mode                   TEXT NOT NULL CHECK (mode IN ('dry_run', 'auto_execute')),
        confidence             REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
        dry_run_count          INTEGER NOT NULL DEFAULT 0,
        last_executed_at       TEXT,
        last_succeeded_at      TEXT,
        auto_approve_whitelist INTEGER NOT NULL DEFAULT 0,
        created_at             TEXT NOT NULL,
        approved_at            TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS failure_events (
        id                 TEXT PRIMARY KEY,
        detected_at        TEXT NOT NULL,
        type               TEXT NOT NULL CHECK (type IN
            ('TOOL_ERR', 'CORRECT', 'SOP_VIOL', 'TRUST_DEM', 'PIPE_FAIL')),
        tier               INTEGER NOT NULL CHECK (tier BETWEEN 1 AND 3),
        source             TEXT NOT NULL,
        context            TEXT NOT NULL DEFAULT '{}',
        failure_desc       TEXT NOT NULL,
        raw_input          TEXT,
        root_cause         TEXT NOT NULL DEFAULT 'unknown',
        propagation_status TEXT NOT NULL DEFAULT 'pending'
            CHECK (propagation_status IN ('pending', 'propagated', 'committed', 'failed')),
        recurrence_count   INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_failure_events_cause
        ON failure_events (root_cause, detected_at)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS propagation_records (
        id         TEXT PRIMARY KEY,
        failure_id TEXT NOT NULL REFERENCES failure_events (id),
        target     TEXT NOT NULL CHECK (target IN
            ('sop_patch', 'hook_pattern', 'regression_test', 'atom', 'synapse_relay')),
        success    INTEGER NOT NULL,
        detail     TEXT NOT NULL DEFAULT '',
        timestamp  TEXT NOT NULL,
        UNIQUE (failure_id, target)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS regression_tests (
        id          TEXT PRIMARY KEY,
        failure_id  TEXT NOT NULL REFERENCES failure_events (id),
        description TEXT NOT NULL,
        test_file   TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS hook_patterns (
        id         TEXT PRIMARY KEY,
        root_cause TEXT NOT NULL,
        pattern    TEXT NOT NULL,
        failure_id TEXT NOT NULL REFERENCES failure_events (id),
        created_at TEXT NOT NULL,
        UNIQUE (pattern)
    )
    "#,
];
