use crate::domain::alert::{Alert, AlertSeverity, AlertStatus};
use anyhow::Result;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct AlertsRepo {
    pub pool: PgPool,
}

impl AlertsRepo {
    pub async fn insert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, alert_type, severity, title, message, details, status, run_log_id, created_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            "#,
        )
        .bind(alert.id)
        .bind(&alert.alert_type)
        .bind(alert.severity.as_str())
        .bind(&alert.title)
        .bind(&alert.message)
        .bind(&alert.details)
        .bind(alert.status.as_str())
        .bind(alert.run_log_id)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list(&self, status: Option<AlertStatus>) -> Result<Vec<Alert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, alert_type, severity, title, message, details, status, run_log_id, created_at
            FROM alerts
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT 200
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let severity: String = r.get("severity");
                let status: String = r.get("status");
                Alert {
                    id: r.get("id"),
                    alert_type: r.get("alert_type"),
                    severity: AlertSeverity::parse(&severity),
                    title: r.get("title"),
                    message: r.get("message"),
                    details: r.get("details"),
                    status: AlertStatus::parse(&status).unwrap_or(AlertStatus::Active),
                    run_log_id: r.get("run_log_id"),
                    created_at: r.get("created_at"),
                }
            })
            .collect())
    }
}
