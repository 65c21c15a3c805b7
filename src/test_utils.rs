//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::AppError;
use crate::lead_sync::MailingListSync;
use crate::mailchimp_client::subscriber_hash;
use crate::mailchimp_models::{Member, MemberStatus, MergeFields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCall {
    Subscribe { email: String, fields: MergeFields },
    Unsubscribe(String),
}

impl SyncCall {
    pub fn subscribe(email: &str, first_name: &str, last_name: &str) -> Self {
        SyncCall::Subscribe {
            email: email.to_string(),
            fields: MergeFields::new(first_name, last_name),
        }
    }

    pub fn unsubscribe(email: &str) -> Self {
        SyncCall::Unsubscribe(email.to_string())
    }
}

#[derive(Debug, Default)]
struct Switches {
    fail_subscribe: bool,
    fail_unsubscribe: bool,
}

/// In-memory mailing list that records every call it receives.
///
/// Failing calls are recorded too, so tests can assert on attempts.
#[derive(Debug, Default)]
pub struct RecordingMailingList {
    calls: RwLock<Vec<SyncCall>>,
    switches: RwLock<Switches>,
}

impl RecordingMailingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn calls(&self) -> Vec<SyncCall> {
        self.calls.read().await.clone()
    }

    pub async fn fail_subscribe(&self, fail: bool) {
        self.switches.write().await.fail_subscribe = fail;
    }

    pub async fn fail_unsubscribe(&self, fail: bool) {
        self.switches.write().await.fail_unsubscribe = fail;
    }
}

#[async_trait]
impl MailingListSync for RecordingMailingList {
    async fn subscribe(&self, email: &str, fields: &MergeFields) -> Result<Member, AppError> {
        self.calls.write().await.push(SyncCall::Subscribe {
            email: email.to_string(),
            fields: fields.clone(),
        });

        if self.switches.read().await.fail_subscribe {
            return Err(AppError::ExternalApiError(
                "Mailchimp subscribe returned 500 Internal Server Error".to_string(),
            ));
        }

        Ok(Member {
            id: subscriber_hash(email),
            email_address: email.to_string(),
            status: MemberStatus::Subscribed,
            list_id: Some("test-list".to_string()),
            merge_fields: Some(fields.clone()),
        })
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), AppError> {
        self.calls
            .write()
            .await
            .push(SyncCall::unsubscribe(email));

        if self.switches.read().await.fail_unsubscribe {
            return Err(AppError::ExternalApiError(
                "Mailchimp unsubscribe returned 404 Not Found".to_string(),
            ));
        }
        Ok(())
    }
}
