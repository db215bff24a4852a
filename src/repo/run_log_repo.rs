use crate::domain::run_log::{RunCounts, RunKind, RunLog, RunStatus};
use anyhow::{bail, Result};
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct RunLogRepo {
    pub pool: PgPool,
}

impl RunLogRepo {
    pub async fn insert(&self, run: &RunLog) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO run_logs (id, kind, status, details, started_at)
            VALUES ($1,$2,$3,$4,$5)
            "#,
        )
        .bind(run.id)
        .bind(run.kind.as_str())
        .bind(run.status.as_str())
        .bind(&run.details)
        .bind(run.started_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Writes the final state once; a finalized run is never touched again.
    pub async fn finalize(&self, run: &RunLog) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE run_logs
            SET status=$2, checked=$3, updated=$4, failed=$5, skipped=$6,
                duration_ms=$7, details=$8, error_message=$9, finished_at=$10
            WHERE id=$1 AND status='running'
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.counts.checked)
        .bind(run.counts.updated)
        .bind(run.counts.failed)
        .bind(run.counts.skipped)
        .bind(run.duration_ms)
        .bind(&run.details)
        .bind(&run.error_message)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await?;

        if res.rows_affected() != 1 {
            bail!("run log {} is missing or already finalized", run.id);
        }
        Ok(())
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<RunLog>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, status, checked, updated, failed, skipped, duration_ms,
                   details, error_message, started_at, finished_at
            FROM run_logs
            ORDER BY started_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let kind: String = r.get("kind");
                let status: String = r.get("status");
                RunLog {
                    id: r.get("id"),
                    kind: RunKind::parse(&kind),
                    status: RunStatus::parse(&status),
                    counts: RunCounts {
                        checked: r.get("checked"),
                        updated: r.get("updated"),
                        failed: r.get("failed"),
                        skipped: r.get("skipped"),
                    },
                    duration_ms: r.get("duration_ms"),
                    details: r.get("details"),
                    error_message: r.get("error_message"),
                    started_at: r.get("started_at"),
                    finished_at: r.get("finished_at"),
                }
            })
            .collect())
    }
}
