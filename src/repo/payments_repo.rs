use crate::domain::payment::{Payment, PaymentMetadata, PaymentStatus};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

#[derive(Clone)]
pub struct PaymentsRepo {
    pub pool: PgPool,
}

const PAYMENT_COLUMNS: &str =
    "id, owner_id, amount_minor, currency, status, payment_type, metadata, created_at, completed_at";

fn map_payment(r: PgRow) -> Result<Payment> {
    let status: String = r.get("status");
    Ok(Payment {
        id: r.get("id"),
        owner_id: r.get("owner_id"),
        amount_minor: r.get("amount_minor"),
        currency: r.get("currency"),
        status: PaymentStatus::parse(&status).ok_or_else(|| anyhow!("unknown payment status {status}"))?,
        payment_type: r.get("payment_type"),
        metadata: PaymentMetadata::from_json(r.get("metadata")),
        created_at: r.get("created_at"),
        completed_at: r.get("completed_at"),
    })
}

impl PaymentsRepo {
    pub async fn pending_since(&self, since: DateTime<Utc>, limit: i64) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE status = 'pending' AND created_at >= $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(since)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_payment).collect()
    }

    pub async fn pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC
            "#
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_payment).collect()
    }

    pub async fn created_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<Payment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {PAYMENT_COLUMNS}
            FROM payments
            WHERE created_at >= $1 AND created_at <= $2
            ORDER BY created_at ASC
            "#
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(map_payment).collect()
    }

    pub async fn get(&self, payment_id: &str) -> Result<Option<Payment>> {
        let row = sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"))
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(map_payment).transpose()
    }

    /// Row-locking compare-and-set; runs inside the caller's transaction.
    pub async fn compare_and_set_status(
        conn: &mut PgConnection,
        payment_id: &str,
        from: PaymentStatus,
        to: PaymentStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE payments
            SET status = $3, completed_at = $4, updated_at = now()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(payment_id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(completed_at)
        .execute(conn)
        .await?;

        Ok(res.rows_affected() == 1)
    }
}
