//! Lead persistence.
//!
//! [`LeadStore`] is the seam between the lead sagas and whatever holds the
//! records. Reads go straight to the store; writes go through a
//! [`LeadTransaction`] that other callers cannot observe until it commits.
//! [`crate::db_storage::LeadStorage`] is the PostgreSQL implementation;
//! [`MemoryLeadStore`] keeps everything in process.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{same_email, Lead, LeadDraft, Page, PageRequest};

pub const EMAIL_TAKEN: &str = "The email has already been taken.";
pub const LEAD_NOT_FOUND: &str = "The lead does not exist.";

pub fn email_taken() -> AppError {
    AppError::invalid_field("email", EMAIL_TAKEN)
}

pub fn lead_not_found() -> AppError {
    AppError::NotFound(LEAD_NOT_FOUND.to_string())
}

#[async_trait]
pub trait LeadStore: Send + Sync {
    /// Looks a lead up by id. Absence is not an error.
    async fn find(&self, id: Uuid) -> Result<Option<Lead>, AppError>;

    /// Looks a lead up by email, ignoring case.
    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, AppError>;

    /// Returns one page of leads in creation order.
    async fn list(&self, request: PageRequest) -> Result<Page<Lead>, AppError>;

    /// Opens a transaction for a batch of writes.
    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, AppError>;

    /// Creates a lead in its own transaction.
    async fn create(&self, draft: &LeadDraft) -> Result<Lead, AppError> {
        let mut tx = self.begin().await?;
        let lead = tx.create(draft).await?;
        tx.commit().await?;
        Ok(lead)
    }

    /// Updates a lead in its own transaction.
    async fn update(&self, id: Uuid, draft: &LeadDraft) -> Result<Lead, AppError> {
        let mut tx = self.begin().await?;
        let lead = tx.update(id, draft).await?;
        tx.commit().await?;
        Ok(lead)
    }

    /// Deletes a lead in its own transaction.
    async fn delete(&self, id: Uuid) -> Result<Lead, AppError> {
        let mut tx = self.begin().await?;
        let lead = tx.delete(id).await?;
        tx.commit().await?;
        Ok(lead)
    }
}

/// Writes that become visible together on [`LeadTransaction::commit`] or not
/// at all. Dropping an open transaction discards it.
///
/// While a transaction is open, every email it touches stays reserved: the
/// old address of an updated or deleted lead and the new address it writes.
#[async_trait]
pub trait LeadTransaction: Send {
    /// Persists a new lead. Fails with a validation error when the email is taken.
    async fn create(&mut self, draft: &LeadDraft) -> Result<Lead, AppError>;

    /// Overwrites every field of an existing lead and bumps `updated_at`.
    async fn update(&mut self, id: Uuid, draft: &LeadDraft) -> Result<Lead, AppError>;

    /// Removes a lead and returns what it looked like.
    async fn delete(&mut self, id: Uuid) -> Result<Lead, AppError>;

    async fn commit(&mut self) -> Result<(), AppError>;

    async fn rollback(&mut self) -> Result<(), AppError>;
}

pub(crate) fn transaction_closed() -> AppError {
    AppError::InternalError("Lead transaction already finished".to_string())
}

type OrderKey = (DateTime<Utc>, Uuid);

fn order_key(lead: &Lead) -> OrderKey {
    (lead.created_at, lead.id)
}

/// Lower-cased email -> transaction holding it.
type Claims = HashMap<String, Uuid>;

fn lock_claims(claims: &Mutex<Claims>) -> MutexGuard<'_, Claims> {
    claims.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store ordered by `(created_at, id)`, the same order
/// [`crate::db_storage::LeadStorage`] lists in.
#[derive(Debug, Clone, Default)]
pub struct MemoryLeadStore {
    leads: Arc<RwLock<BTreeMap<OrderKey, Lead>>>,
    claims: Arc<Mutex<Claims>>,
}

impl MemoryLeadStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.leads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.leads.read().await.is_empty()
    }
}

#[async_trait]
impl LeadStore for MemoryLeadStore {
    async fn find(&self, id: Uuid) -> Result<Option<Lead>, AppError> {
        Ok(self.leads.read().await.values().find(|l| l.id == id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Lead>, AppError> {
        Ok(self
            .leads
            .read()
            .await
            .values()
            .find(|l| same_email(&l.email, email))
            .cloned())
    }

    async fn list(&self, request: PageRequest) -> Result<Page<Lead>, AppError> {
        let leads = self.leads.read().await;
        let offset = usize::try_from(request.offset()).unwrap_or(usize::MAX);
        Ok(Page {
            items: leads
                .values()
                .skip(offset)
                .take(request.limit as usize)
                .cloned()
                .collect(),
            total: leads.len() as u64,
        })
    }

    async fn begin(&self) -> Result<Box<dyn LeadTransaction>, AppError> {
        Ok(Box::new(MemoryTransaction {
            id: Uuid::new_v4(),
            leads: self.leads.clone(),
            claims: self.claims.clone(),
            staged: BTreeMap::new(),
            open: true,
        }))
    }
}

/// Staged writes over a [`MemoryLeadStore`]. `None` marks a deletion.
struct MemoryTransaction {
    id: Uuid,
    leads: Arc<RwLock<BTreeMap<OrderKey, Lead>>>,
    claims: Arc<Mutex<Claims>>,
    staged: BTreeMap<Uuid, Option<Lead>>,
    open: bool,
}

impl MemoryTransaction {
    fn ensure_open(&self) -> Result<(), AppError> {
        if self.open {
            Ok(())
        } else {
            Err(transaction_closed())
        }
    }

    /// The lead as this transaction sees it.
    fn current(&self, committed: &BTreeMap<OrderKey, Lead>, id: Uuid) -> Option<Lead> {
        match self.staged.get(&id) {
            Some(change) => change.clone(),
            None => committed.values().find(|l| l.id == id).cloned(),
        }
    }

    fn email_in_use(
        &self,
        committed: &BTreeMap<OrderKey, Lead>,
        claims: &Claims,
        email: &str,
        owner: Option<Uuid>,
    ) -> bool {
        let held_elsewhere = claims
            .get(&email.to_lowercase())
            .is_some_and(|tx| *tx != self.id);
        let committed_hit = committed
            .values()
            .filter(|l| !self.staged.contains_key(&l.id))
            .any(|l| Some(l.id) != owner && same_email(&l.email, email));
        let staged_hit = self
            .staged
            .values()
            .flatten()
            .any(|l| Some(l.id) != owner && same_email(&l.email, email));

        held_elsewhere || committed_hit || staged_hit
    }

    /// Reserves `email` for this transaction, failing if anyone else has it.
    fn claim(
        &self,
        committed: &BTreeMap<OrderKey, Lead>,
        email: &str,
        owner: Option<Uuid>,
    ) -> Result<(), AppError> {
        let mut claims = lock_claims(&self.claims);
        if self.email_in_use(committed, &claims, email, owner) {
            return Err(email_taken());
        }
        claims.insert(email.to_lowercase(), self.id);
        Ok(())
    }

    fn release_claims(&self) {
        lock_claims(&self.claims).retain(|_, tx| *tx != self.id);
    }
}

#[async_trait]
impl LeadTransaction for MemoryTransaction {
    async fn create(&mut self, draft: &LeadDraft) -> Result<Lead, AppError> {
        self.ensure_open()?;
        let committed = self.leads.read().await;
        self.claim(&committed, draft.email(), None)?;
        drop(committed);

        let now = Utc::now();
        let lead = Lead {
            id: Uuid::new_v4(),
            email: draft.email().to_string(),
            first_name: draft.first_name().to_string(),
            last_name: draft.last_name().to_string(),
            allow_send_emails: draft.allow_send_emails(),
            created_at: now,
            updated_at: now,
        };
        self.staged.insert(lead.id, Some(lead.clone()));
        Ok(lead)
    }

    async fn update(&mut self, id: Uuid, draft: &LeadDraft) -> Result<Lead, AppError> {
        self.ensure_open()?;
        let committed = self.leads.read().await;
        let mut lead = self.current(&committed, id).ok_or_else(lead_not_found)?;
        self.claim(&committed, draft.email(), Some(id))?;
        drop(committed);

        lead.email = draft.email().to_string();
        lead.first_name = draft.first_name().to_string();
        lead.last_name = draft.last_name().to_string();
        lead.allow_send_emails = draft.allow_send_emails();
        lead.updated_at = Utc::now();
        self.staged.insert(id, Some(lead.clone()));
        Ok(lead)
    }

    async fn delete(&mut self, id: Uuid) -> Result<Lead, AppError> {
        self.ensure_open()?;
        let lead = {
            let committed = self.leads.read().await;
            self.current(&committed, id).ok_or_else(lead_not_found)?
        };
        self.staged.insert(id, None);
        Ok(lead)
    }

    async fn commit(&mut self) -> Result<(), AppError> {
        self.ensure_open()?;
        let mut leads = self.leads.write().await;
        for (id, change) in std::mem::take(&mut self.staged) {
            leads.retain(|_, l| l.id != id);
            if let Some(lead) = change {
                leads.insert(order_key(&lead), lead);
            }
        }
        // Still under the write lock, so nobody sees the addresses free
        // before the new rows are in place.
        self.release_claims();
        self.open = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), AppError> {
        self.ensure_open()?;
        self.staged.clear();
        self.release_claims();
        self.open = false;
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.open {
            self.release_claims();
        }
    }
}
