//! Embedded SQL store for the Aegis safety core
//!
//! The store is the only shared mutable state in the system. Every mutation
//! runs in a transaction with rollback on error; components receive a typed
//! `Store` handle at construction and issue their own queries against it.
//! Migration failure or corruption at startup is fatal by design.

mod migrations;

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::{debug, info};

use aegis_common::{Error, Result, RiskTier, StoreConfig};

/// A category to seed into `trust_scores` with its tier defaults
#[derive(Debug, Clone)]
pub struct TrustSeed {
    pub category: String,
    pub tier: RiskTier,
}

/// Handle to the embedded relational store
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the database at the configured path and
    /// apply migrations.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        let path = config.path.to_string_lossy();
        info!("opening store at {}", path);

        let store = if path == ":memory:" {
            Self::open_in_memory().await?
        } else {
            let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))
                .map_err(|e| Error::Storage(format!("invalid store path {}: {}", path, e)))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
                .foreign_keys(true);

            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect_with(options)
                .await?;
            Store { pool }
        };

        store.migrate().await?;
        Ok(store)
    }

    /// Ephemeral in-memory store, primarily for tests. A single pooled
    /// connection keeps the database alive for the pool's lifetime.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Storage(format!("in-memory open failed: {}", e)))?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Store { pool })
    }

    /// Apply schema migrations. Idempotent: every statement is guarded.
    pub async fn migrate(&self) -> Result<()> {
        for statement in migrations::SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("store schema up to date");
        Ok(())
    }

    /// Seed `trust_scores` rows for the category catalogue. Existing rows
    /// are left untouched, so re-seeding is idempotent.
    pub async fn seed_trust_scores(&self, seeds: &[TrustSeed], now: DateTime<Utc>) -> Result<()> {
        let mut tx = self.begin().await?;
        for seed in seeds {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO trust_scores
                    (category, risk_tier, current_score, ewma_alpha, initial_score,
                     promotion_threshold, demotion_threshold, floor, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&seed.category)
            .bind(seed.tier.as_i64())
            .bind(seed.tier.initial_score())
            .bind(seed.tier.ewma_alpha())
            .bind(seed.tier.initial_score())
            .bind(seed.tier.promotion_threshold())
            .bind(seed.tier.demotion_threshold())
            .bind(seed.tier.floor())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("seeded {} trust categories", seeds.len());
        Ok(())
    }

    /// Begin an explicit transaction
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Raw pool access for component queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing outstanding work
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::Row;

    fn seeds() -> Vec<TrustSeed> {
        vec![
            TrustSeed {
                category: "read_file".into(),
                tier: RiskTier::T1Read,
            },
            TrustSeed {
                category: "write_file".into(),
                tier: RiskTier::T2Write,
            },
            TrustSeed {
                category: "financial_augur".into(),
                tier: RiskTier::T4Financial,
            },
        ]
    }

    #[tokio::test]
    async fn migration_is_idempotent() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();

        store.seed_trust_scores(&seeds(), Utc::now()).await.unwrap();
        store.seed_trust_scores(&seeds(), Utc::now()).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM trust_scores")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let n: i64 = row.get("n");
        assert_eq!(n, 3);
    }

    #[tokio::test]
    async fn seed_rows_carry_tier_defaults() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.seed_trust_scores(&seeds(), Utc::now()).await.unwrap();

        let row = sqlx::query("SELECT current_score, ewma_alpha FROM trust_scores WHERE category = 'financial_augur'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let score: f64 = row.get("current_score");
        let alpha: f64 = row.get("ewma_alpha");
        assert_eq!(score, 0.0);
        assert_eq!(alpha, 0.0);
    }

    #[tokio::test]
    async fn score_range_constraint_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();

        let result = sqlx::query(
            r#"
            INSERT INTO trust_scores
                (category, risk_tier, current_score, ewma_alpha, initial_score,
                 promotion_threshold, demotion_threshold, floor, updated_at)
            VALUES ('bogus', 1, 1.5, 0.1, 0.75, 0.7, 0.6, 0.25, '2026-01-01T00:00:00Z')
            "#,
        )
        .execute(store.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn reseeding_does_not_reset_scores() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        store.seed_trust_scores(&seeds(), Utc::now()).await.unwrap();

        sqlx::query("UPDATE trust_scores SET current_score = 0.9 WHERE category = 'read_file'")
            .execute(store.pool())
            .await
            .unwrap();

        store.seed_trust_scores(&seeds(), Utc::now()).await.unwrap();

        let row = sqlx::query("SELECT current_score FROM trust_scores WHERE category = 'read_file'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        let score: f64 = row.get("current_score");
        assert_eq!(score, 0.9);
    }
}
