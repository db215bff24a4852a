use crate::domain::entitlement::{Entitlement, Pass, PassType, Registration, RegistrationStatus};
use crate::domain::payment::PaymentStatus;
use crate::repo::ledger_store::GrantWrite;
use anyhow::Result;
use sqlx::{PgConnection, PgPool, Row};

/// Registrations and passes. Both tables carry `UNIQUE (payment_id)`, which is
/// what makes a grant idempotent under concurrent runs.
#[derive(Clone)]
pub struct EntitlementsRepo {
    pub pool: PgPool,
}

impl EntitlementsRepo {
    /// Grants `entitlement` if its payment is completed and has none yet.
    pub async fn insert_if_absent(&self, entitlement: &Entitlement) -> Result<GrantWrite> {
        let mut tx = self.pool.begin().await?;

        // Serialises grants and status changes for the same payment.
        let status: Option<String> = sqlx::query("SELECT status FROM payments WHERE id = $1 FOR UPDATE")
            .bind(entitlement.payment_id())
            .fetch_optional(tx.as_mut())
            .await?
            .map(|r| r.get("status"));

        if status.as_deref() != Some(PaymentStatus::Completed.as_str()) {
            tx.rollback().await?;
            return Ok(GrantWrite::PaymentNotCompleted);
        }

        let created = Self::insert_locked(&mut *tx, entitlement).await?;
        tx.commit().await?;
        Ok(if created {
            GrantWrite::Created
        } else {
            GrantWrite::AlreadyGranted
        })
    }

    /// Inserts unless the payment already has an entitlement in either table.
    /// The caller must hold the payment row lock.
    pub async fn insert_locked(conn: &mut PgConnection, entitlement: &Entitlement) -> Result<bool> {
        let existing: i64 = sqlx::query(
            r#"
            SELECT (SELECT count(*) FROM registrations WHERE payment_id = $1)
                 + (SELECT count(*) FROM passes WHERE payment_id = $1) AS n
            "#,
        )
        .bind(entitlement.payment_id())
        .fetch_one(&mut *conn)
        .await?
        .get("n");

        if existing > 0 {
            return Ok(false);
        }

        let res = match entitlement {
            Entitlement::Registration(r) => {
                sqlx::query(
                    r#"
                    INSERT INTO registrations (id, payment_id, owner_id, event_id, ticket_type, quantity, status, created_at)
                    VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                    ON CONFLICT (payment_id) DO NOTHING
                    "#,
                )
                .bind(r.id)
                .bind(&r.payment_id)
                .bind(&r.owner_id)
                .bind(&r.event_id)
                .bind(&r.ticket_type)
                .bind(r.quantity)
                .bind(r.status.as_str())
                .bind(r.created_at)
                .execute(&mut *conn)
                .await?
            }
            Entitlement::Pass(p) => {
                sqlx::query(
                    r#"
                    INSERT INTO passes (id, payment_id, owner_id, pass_type_id, total_entries, remaining_entries, expires_at, created_at)
                    VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
                    ON CONFLICT (payment_id) DO NOTHING
                    "#,
                )
                .bind(p.id)
                .bind(&p.payment_id)
                .bind(&p.owner_id)
                .bind(&p.pass_type_id)
                .bind(p.total_entries)
                .bind(p.remaining_entries)
                .bind(p.expires_at)
                .bind(p.created_at)
                .execute(&mut *conn)
                .await?
            }
        };

        Ok(res.rows_affected() == 1)
    }

    pub async fn for_payment(&self, payment_id: &str) -> Result<Vec<Entitlement>> {
        let registrations = sqlx::query(
            r#"
            SELECT id, payment_id, owner_id, event_id, ticket_type, quantity, status, created_at
            FROM registrations WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        let passes = sqlx::query(
            r#"
            SELECT id, payment_id, owner_id, pass_type_id, total_entries, remaining_entries, expires_at, created_at
            FROM passes WHERE payment_id = $1
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out: Vec<Entitlement> = registrations
            .into_iter()
            .map(|r| {
                let status: String = r.get("status");
                Entitlement::Registration(Registration {
                    id: r.get("id"),
                    payment_id: r.get("payment_id"),
                    owner_id: r.get("owner_id"),
                    event_id: r.get("event_id"),
                    ticket_type: r.get("ticket_type"),
                    quantity: r.get("quantity"),
                    status: RegistrationStatus::parse(&status),
                    created_at: r.get("created_at"),
                })
            })
            .collect();

        out.extend(passes.into_iter().map(|r| {
            Entitlement::Pass(Pass {
                id: r.get("id"),
                payment_id: r.get("payment_id"),
                owner_id: r.get("owner_id"),
                pass_type_id: r.get("pass_type_id"),
                total_entries: r.get("total_entries"),
                remaining_entries: r.get("remaining_entries"),
                expires_at: r.get("expires_at"),
                created_at: r.get("created_at"),
            })
        }));

        Ok(out)
    }

    pub async fn delete_locked(conn: &mut PgConnection, payment_id: &str) -> Result<u64> {
        let registrations = sqlx::query("DELETE FROM registrations WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        let passes = sqlx::query("DELETE FROM passes WHERE payment_id = $1")
            .bind(payment_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(registrations + passes)
    }

    pub async fn pass_type(&self, pass_type_id: &str) -> Result<Option<PassType>> {
        let row = sqlx::query("SELECT id, name, total_entries, validity_days FROM pass_types WHERE id = $1")
            .bind(pass_type_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| PassType {
            id: r.get("id"),
            name: r.get("name"),
            total_entries: r.get("total_entries"),
            validity_days: r.get("validity_days"),
        }))
    }
}
