//! Learning metrics emitter
//!
//! Computes an on-demand report over the failure and propagation tables.
//! Metrics with no data come back as `None` and render as `N/A`.

use sqlx::Row;

use aegis_common::Result;
use aegis_store::Store;

/// On-demand learning pipeline report
#[derive(Debug, Clone)]
pub struct MetricsReport {
    /// Average milliseconds from detection to last propagation record
    pub avg_propagation_ms: Option<f64>,
    /// Percentage of failures fully propagated (or committed)
    pub propagation_completeness_pct: Option<f64>,
    /// Percentage of failures that are recurrences
    pub recurrence_rate_pct: Option<f64>,
    /// Failure totals per kind
    pub totals_by_kind: Vec<(String, i64)>,
}

fn fmt_opt(value: Option<f64>, unit: &str) -> String {
    match value {
        Some(v) => format!("{:.1}{}", v, unit),
        None => "N/A".to_string(),
    }
}

impl MetricsReport {
    /// Render for operator consumption; absent metrics show `N/A`
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "avg time to propagate: {}\n",
            fmt_opt(self.avg_propagation_ms, "ms")
        ));
        out.push_str(&format!(
            "propagation completeness: {}\n",
            fmt_opt(self.propagation_completeness_pct, "%")
        ));
        out.push_str(&format!(
            "recurrence rate: {}\n",
            fmt_opt(self.recurrence_rate_pct, "%")
        ));
        if self.totals_by_kind.is_empty() {
            out.push_str("totals: N/A\n");
        } else {
            out.push_str("totals:\n");
            for (kind, count) in &self.totals_by_kind {
                out.push_str(&format!("  {}: {}\n", kind, count));
            }
        }
        out
    }
}

pub struct LearningMetrics {
    store: Store,
}

impl LearningMetrics {
    pub fn new(store: Store) -> Self {
        LearningMetrics { store }
    }

    pub async fn report(&self) -> Result<MetricsReport> {
        let avg_propagation_ms: Option<f64> = sqlx::query_scalar(
            r#"
            SELECT AVG(delta_ms) FROM (
                SELECT (julianday(MAX(p.timestamp)) - julianday(f.detected_at)) * 86400000.0
                    AS delta_ms
                FROM failure_events f
                JOIN propagation_records p ON p.failure_id = f.id
                GROUP BY f.id
            )
            "#,
        )
        .fetch_one(self.store.pool())
        .await?;

        let total_failures: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM failure_events")
            .fetch_one(self.store.pool())
            .await?;

        let (propagation_completeness_pct, recurrence_rate_pct) = if total_failures == 0 {
            (None, None)
        } else {
            let complete: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM failure_events \
                 WHERE propagation_status IN ('propagated', 'committed')",
            )
            .fetch_one(self.store.pool())
            .await?;
            let recurred: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM failure_events WHERE recurrence_count > 0",
            )
            .fetch_one(self.store.pool())
            .await?;
            (
                Some(complete as f64 * 100.0 / total_failures as f64),
                Some(recurred as f64 * 100.0 / total_failures as f64),
            )
        };

        let totals_by_kind = sqlx::query(
            "SELECT type, COUNT(*) AS n FROM failure_events GROUP BY type ORDER BY type",
        )
        .fetch_all(self.store.pool())
        .await?
        .iter()
        .map(|row| (row.get::<String, _>("type"), row.get::<i64, _>("n")))
        .collect();

        Ok(MetricsReport {
            avg_propagation_ms,
            propagation_completeness_pct,
            recurrence_rate_pct,
            totals_by_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn empty_store_reports_all_nulls() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let report = LearningMetrics::new(store).report().await.unwrap();

        assert!(report.avg_propagation_ms.is_none());
        assert!(report.propagation_completeness_pct.is_none());
        assert!(report.recurrence_rate_pct.is_none());
        assert!(report.totals_by_kind.is_empty());

        let rendered = report.render();
        assert!(rendered.contains("avg time to propagate: N/A"));
        assert!(rendered.contains("propagation completeness: N/A"));
        assert!(rendered.contains("recurrence rate: N/A"));
        assert!(rendered.contains("totals: N/A"));
    }

    #[tokio::test]
    async fn populated_store_reports_rates() {
        let store = Store::open_in_memory().await.unwrap();
        store.migrate().await.unwrap();
        let now = Utc::now();

        for (id, status, recurrence) in [
            ("flr-1", "propagated", 0i64),
            ("flr-2", "failed", 1),
        ] {
            sqlx::query(
                r#"
                INSERT INTO failure_events
                    (id, detected_at, type, tier, source, context, failure_desc,
                     root_cause, propagation_status, recurrence_count)
                VALUES (?, ?, 'TOOL_ERR', 2, 'tool:exec', '{}', 'desc',
                        'wrong_path', ?, ?)
                "#,
            )
            .bind(id)
            .bind(now)
            .bind(status)
            .bind(recurrence)
            .execute(store.pool())
            .await
            .unwrap();
        }
        sqlx::query(
            "INSERT INTO propagation_records (id, failure_id, target, success, detail, timestamp) \
             VALUES ('prp-1', 'flr-1', 'atom', 1, '', ?)",
        )
        .bind(now + chrono::Duration::milliseconds(500))
        .execute(store.pool())
        .await
        .unwrap();

        let report = LearningMetrics::new(store).report().await.unwrap();
        assert_eq!(report.propagation_completeness_pct, Some(50.0));
        assert_eq!(report.recurrence_rate_pct, Some(50.0));
        let avg = report.avg_propagation_ms.unwrap();
        assert!(avg > 0.0 && avg < 2_000.0, "avg {}", avg);
        assert_eq!(report.totals_by_kind, vec![("TOOL_ERR".to_string(), 2)]);
    }
}
