//! Override manager
//!
//! Manual policy patches per category. Overrides may only originate from an
//! interactive session: anything matching a pipeline/subagent/isolated
//! pattern is refused before any side effect happens.

use sqlx::Row;
use tracing::{info, warn};

use aegis_common::utils::{new_id, parse_short_duration};
use aegis_common::{BusEvent, Error, EventBus, GateConfig, Result, SharedClock};
use aegis_store::Store;

use crate::types::{insert_milestone_row, OverrideKind, OverrideRow};

pub struct OverrideManager {
    store: Store,
    bus: EventBus,
    clock: SharedClock,
    config: GateConfig,
}

impl OverrideManager {
    pub fn new(store: Store, bus: EventBus, clock: SharedClock, config: GateConfig) -> Self {
        OverrideManager {
            store,
            bus,
            clock,
            config,
        }
    }

    /// True when the session id does not match any non-interactive pattern
    pub fn is_interactive(&self, session_id: &str) -> bool {
        !self.config.non_interactive_prefixes.iter().any(|prefix| {
            session_id == prefix || session_id.starts_with(&format!("{}-", prefix))
        })
    }

    /// Grant or revoke an override for a category. Deactivates any prior
    /// override for the category in the same transaction.
    pub async fn set_override(
        &self,
        category: &str,
        kind: OverrideKind,
        reason: &str,
        granted_by: &str,
        session_id: &str,
        duration: Option<&str>,
    ) -> Result<OverrideRow> {
        if !self.is_interactive(session_id) {
            return Err(Error::Validation(format!(
                "overrides may only be set from an interactive session, not {:?}",
                session_id
            )));
        }

        let now = self.clock.now();
        let expires_at = match duration {
            Some(d) => Some(now + parse_short_duration(d)?),
            None => None,
        };

        let row = OverrideRow {
            override_id: new_id("ovr"),
            category: category.to_string(),
            override_type: kind,
            reason: reason.to_string(),
            granted_by: granted_by.to_string(),
            granted_from_session: session_id.to_string(),
            expires_at,
            active: true,
            created_at: now,
        };

        let score: f64 = sqlx::query("SELECT current_score FROM trust_scores WHERE category = ?")
            .bind(category)
            .fetch_optional(self.store.pool())
            .await?
            .map(|r| r.get("current_score"))
            .unwrap_or(0.0);

        let mut tx = self.store.begin().await?;
        sqlx::query("UPDATE trust_overrides SET active = 0 WHERE category = ? AND active = 1")
            .bind(category)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO trust_overrides
                (override_id, category, override_type, reason, granted_by,
                 granted_from_session, expires_at, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(&row.override_id)
        .bind(&row.category)
        .bind(row.override_type.as_str())
        .bind(&row.reason)
        .bind(&row.granted_by)
        .bind(&row.granted_from_session)
        .bind(row.expires_at)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;
        insert_milestone_row(&mut tx, category, kind.milestone(), score, score, reason, now)
            .await?;
        tx.commit().await?;

        info!(
            category,
            kind = kind.as_str(),
            granted_by,
            "trust override set"
        );
        self.bus.publish(BusEvent::MilestoneEmitted {
            category: category.to_string(),
            milestone: kind.milestone(),
            old_score: score,
            new_score: score,
        });

        Ok(row)
    }

    /// The active, non-expired override for a category, if any. An expired
    /// override is deactivated lazily on read.
    pub async fn active_override(&self, category: &str) -> Result<Option<OverrideRow>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM trust_overrides
            WHERE category = ? AND active = 1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(category)
        .fetch_optional(self.store.pool())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let current = OverrideRow::from_row(&row)?;

        if let Some(expires_at) = current.expires_at {
            if expires_at <= self.clock.now() {
                warn!(category, "override expired, deactivating");
                sqlx::query("UPDATE trust_overrides SET active = 0 WHERE override_id = ?")
                    .bind(&current.override_id)
                    .execute(self.store.pool())
                    .await?;
                return Ok(None);
            }
        }
        Ok(Some(current))
    }
}
