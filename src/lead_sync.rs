//! Keeps local leads and mailing-list members in step.
//!
//! Every mutating operation is a short saga: change the store, then call the
//! provider. Local changes go through a [`UnitOfWork`], a store transaction
//! that commits only once the provider calls have succeeded and is rolled back
//! otherwise. Until then nobody else sees the changes or can take the emails
//! they touch. Provider calls are never undone, so a failure after an
//! unsubscribe can leave the remote side without a member for the lead.
//! Exactly-once sync would need an outbox; there is none.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::mailchimp_models::{Member, MergeFields};
use crate::models::{same_email, Lead, LeadDraft, Page, PageRequest};
use crate::store::{email_taken, lead_not_found, LeadStore, LeadTransaction};

/// Provider side of the sync: the operations the sagas need from a mailing list.
#[async_trait]
pub trait MailingListSync: Send + Sync {
    async fn subscribe(&self, email: &str, fields: &MergeFields) -> Result<Member, AppError>;

    async fn unsubscribe(&self, email: &str) -> Result<(), AppError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadOperation {
    Create,
    Update,
    Delete,
}

impl LeadOperation {
    /// The only detail a caller gets when the saga fails.
    pub fn failure_message(&self) -> &'static str {
        match self {
            LeadOperation::Create => {
                "An error occurred while creating the lead or subscribing the member to Mailchimp."
            }
            LeadOperation::Update => {
                "An error occurred while updating the lead or updating the member at Mailchimp."
            }
            LeadOperation::Delete => {
                "An error occurred while deleting the lead or deleting the member from Mailchimp."
            }
        }
    }
}

impl fmt::Display for LeadOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeadOperation::Create => "lead create",
            LeadOperation::Update => "lead update",
            LeadOperation::Delete => "lead delete",
        };
        f.write_str(name)
    }
}

/// Store mutations made by one saga, held in a single store transaction.
pub struct UnitOfWork {
    tx: Box<dyn LeadTransaction>,
    changes: usize,
}

impl UnitOfWork {
    pub async fn begin(store: &dyn LeadStore) -> Result<Self, AppError> {
        Ok(Self {
            tx: store.begin().await?,
            changes: 0,
        })
    }

    pub async fn create(&mut self, draft: &LeadDraft) -> Result<Lead, AppError> {
        let lead = self.tx.create(draft).await?;
        self.changes += 1;
        Ok(lead)
    }

    pub async fn update(&mut self, id: Uuid, draft: &LeadDraft) -> Result<Lead, AppError> {
        let lead = self.tx.update(id, draft).await?;
        self.changes += 1;
        Ok(lead)
    }

    pub async fn delete(&mut self, id: Uuid) -> Result<Lead, AppError> {
        let lead = self.tx.delete(id).await?;
        self.changes += 1;
        Ok(lead)
    }

    /// Number of mutations waiting for commit.
    pub fn pending(&self) -> usize {
        self.changes
    }

    pub async fn commit(mut self) -> Result<(), AppError> {
        self.tx.commit().await?;
        tracing::debug!("Committed unit of work ({} mutations)", self.changes);
        Ok(())
    }

    /// Discards every mutation. A failed rollback is logged; the error that
    /// caused it is the one reported to the caller.
    pub async fn rollback(mut self) {
        match self.tx.rollback().await {
            Ok(()) => tracing::warn!("Rolled back {} lead change(s)", self.changes),
            Err(e) => tracing::error!("Failed to roll back unit of work: {}", e),
        }
    }
}

/// Runs the create/update/delete sagas over a lead store and a mailing list.
#[derive(Clone)]
pub struct LeadSyncService {
    store: Arc<dyn LeadStore>,
    mailing_list: Arc<dyn MailingListSync>,
}

impl LeadSyncService {
    pub fn new(store: Arc<dyn LeadStore>, mailing_list: Arc<dyn MailingListSync>) -> Self {
        Self {
            store,
            mailing_list,
        }
    }

    /// Settles a saga: commit on success, roll back otherwise. Validation and
    /// not-found errors keep their meaning; anything else becomes a generic
    /// failure of `operation`.
    async fn settle<T>(
        operation: LeadOperation,
        uow: UnitOfWork,
        outcome: Result<T, AppError>,
    ) -> Result<T, AppError> {
        match outcome {
            Ok(value) => match uow.commit().await {
                Ok(()) => Ok(value),
                Err(e) => Err(Self::failure(operation, e)),
            },
            Err(e) => {
                tracing::error!("{} failed, rolling back: {}", operation, e);
                uow.rollback().await;
                Err(Self::failure(operation, e))
            }
        }
    }

    fn failure(operation: LeadOperation, error: AppError) -> AppError {
        if error.is_caller_facing() {
            error
        } else {
            AppError::OperationFailed {
                operation,
                source: Box::new(error),
            }
        }
    }

    async fn open(&self, operation: LeadOperation) -> Result<UnitOfWork, AppError> {
        UnitOfWork::begin(self.store.as_ref())
            .await
            .map_err(|e| Self::failure(operation, e))
    }

    async fn ensure_email_free(&self, email: &str, owner: Option<Uuid>) -> Result<(), AppError> {
        match self.store.find_by_email(email).await? {
            Some(existing) if Some(existing.id) != owner => Err(email_taken()),
            _ => Ok(()),
        }
    }

    pub async fn create_lead(&self, draft: LeadDraft) -> Result<Lead, AppError> {
        self.ensure_email_free(draft.email(), None).await?;

        let mut uow = self.open(LeadOperation::Create).await?;
        let outcome = async {
            let lead = uow.create(&draft).await?;
            self.mailing_list
                .subscribe(&lead.email, &MergeFields::from(&lead))
                .await?;
            Ok::<_, AppError>(lead)
        }
        .await;

        let lead = Self::settle(LeadOperation::Create, uow, outcome).await?;
        tracing::info!("✓ Lead {} created and subscribed", lead.id);
        Ok(lead)
    }

    pub async fn update_lead(&self, id: Uuid, draft: LeadDraft) -> Result<Lead, AppError> {
        let prior = self.store.find(id).await?.ok_or_else(lead_not_found)?;
        if !same_email(&prior.email, draft.email()) {
            self.ensure_email_free(draft.email(), Some(prior.id)).await?;
        }

        let mut uow = self.open(LeadOperation::Update).await?;
        let outcome = async {
            self.mailing_list.unsubscribe(&prior.email).await?;
            let lead = uow.update(prior.id, &draft).await?;
            self.mailing_list
                .subscribe(&lead.email, &MergeFields::from(&lead))
                .await?;
            Ok::<_, AppError>(lead)
        }
        .await;

        let lead = Self::settle(LeadOperation::Update, uow, outcome).await?;
        tracing::info!("✓ Lead {} updated and resubscribed", lead.id);
        Ok(lead)
    }

    pub async fn delete_lead(&self, id: Uuid) -> Result<Lead, AppError> {
        let existing = self.store.find(id).await?.ok_or_else(lead_not_found)?;

        let mut uow = self.open(LeadOperation::Delete).await?;
        let outcome = async {
            let lead = uow.delete(existing.id).await?;
            self.mailing_list.unsubscribe(&lead.email).await?;
            Ok::<_, AppError>(lead)
        }
        .await;

        let lead = Self::settle(LeadOperation::Delete, uow, outcome).await?;
        tracing::info!("✓ Lead {} deleted and unsubscribed", lead.id);
        Ok(lead)
    }

    pub async fn list_leads(&self, request: PageRequest) -> Result<Page<Lead>, AppError> {
        self.store.list(request).await
    }
}
