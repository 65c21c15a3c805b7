use crate::errors::{AppError, ResultExt};
use crate::models::{Lead, LeadDraft, Page, PageRequest};
use crate::store::{email_taken, lead_not_found, transaction_closed, LeadStore, LeadTransaction};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

const LEAD_COLUMNS: &str =
    "id, email, first_name, last_name, allow_send_emails, created_at, updated_at";

/// PostgreSQL-backed lead storage
#[derive(Debug, Clone)]
pub struct LeadStorage {
    pool: PgPool,
}

impl LeadStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// The `leads_email_lower_key` index catches concurrent inserts that slipped
/// past the existence check.
fn map_unique_violation(err: sqlx::Error) -> AppError {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => email_taken(),
        _ => AppError::DatabaseError(err),
    }
}

#[async_trait]
impl LeadStore for LeadStorage {
    async fn find(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!("SELECT {} FROM leads WHERE id = $1", LEAD_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to load lead {}", id))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, AppError> {
        sqlx::query_as::<_, Lead>(&format!(
            "SELECT {} FROM leads WHERE LOWER(email) = LOWER($1) LIMIT 1",
            LEAD_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to look up lead by email")
    }

    async fn list(&self, request: PageRequest) -> Result<Page<Lead>, AppError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM leads")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count leads")?;

        let items = sqlx::query_as::<_, Lead>(&format!(
            "SELECT {} FROM leads ORDER BY created_at ASC, id ASC LIMIT $1 OFFSET $2",
            LEAD_COLUMNS
        ))
        .bind(i64::from(request.limit))
        .bind(i64::try_from(request.offset()).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .context("Failed to list leads")?;

        Ok(Page {
            items,
            total: u64::try_from(total).unwrap_or_default(),
        })
    }

    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, AppError> {
        let tx = self.pool.begin().await.context("Failed to open transaction")?;
        Ok(Box::new(PgLeadTransaction { tx: Some(tx) }))
    }
}

/// One PostgreSQL transaction. Rows it writes stay invisible to other
/// connections, and the unique index holds every email it touches, until it
/// commits or rolls back. sqlx rolls it back if it is dropped while open.
pub struct PgLeadTransaction {
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgLeadTransaction {
    fn conn(&mut self) -> Result<&mut Transaction<'static, Postgres>, AppError> {
        self.tx.as_mut().ok_or_else(transaction_closed)
    }
}

#[async_trait]
impl LeadTransaction for PgLeadTransaction {
    async fn create(&mut self, draft: &LeadDraft) -> Result<Lead, AppError> {
        let tx = self.conn()?;
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM leads WHERE LOWER(email) = LOWER($1) LIMIT 1",
        )
        .bind(draft.email())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to look up lead by email")?;
        if existing.is_some() {
            return Err(email_taken());
        }

        let lead = sqlx::query_as::<_, Lead>(&format!(
            "INSERT INTO leads (id, email, first_name, last_name, allow_send_emails, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
             RETURNING {}",
            LEAD_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(draft.email())
        .bind(draft.first_name())
        .bind(draft.last_name())
        .bind(draft.allow_send_emails())
        .fetch_one(&mut **tx)
        .await
        .map_err(map_unique_violation)?;

        tracing::debug!("Inserted lead {}", lead.id);
        Ok(lead)
    }

    async fn update(&mut self, id: Uuid, draft: &LeadDraft) -> Result<Lead, AppError> {
        let tx = self.conn()?;
        let lead = sqlx::query_as::<_, Lead>(&format!(
            "UPDATE leads
             SET email = $2, first_name = $3, last_name = $4, allow_send_emails = $5, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            LEAD_COLUMNS
        ))
        .bind(id)
        .bind(draft.email())
        .bind(draft.first_name())
        .bind(draft.last_name())
        .bind(draft.allow_send_emails())
        .fetch_optional(&mut **tx)
        .await
        .map_err(map_unique_violation)?
        .ok_or_else(lead_not_found)?;

        tracing::debug!("Updated lead {}", lead.id);
        Ok(lead)
    }

    async fn delete(&mut self, id: Uuid) -> Result<Lead, AppError> {
        let tx = self.conn()?;
        let lead = sqlx::query_as::<_, Lead>(&format!(
            "DELETE FROM leads WHERE id = $1 RETURNING {}",
            LEAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .with_context(|| format!("Failed to delete lead {}", id))?
        .ok_or_else(lead_not_found)?;

        tracing::debug!("Deleted lead {}", lead.id);
        Ok(lead)
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        let tx = self.tx.take().ok_or_else(transaction_closed)?;
        tx.commit().await.context("Failed to commit transaction")
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        let tx = self.tx.take().ok_or_else(transaction_closed)?;
        tx.rollback().await.context("Failed to roll back transaction")
    }
}
