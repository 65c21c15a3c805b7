//! Mailchimp Marketing API v3 payloads.
//!
//! Only the fields this service reads or writes are modelled; everything else
//! the API returns is ignored on deserialization.

use crate::config::ListSettings;
use crate::models::Lead;
use serde::{Deserialize, Serialize};

/// Number of lists requested per page when walking `GET /lists`.
pub const LIST_PAGE_SIZE: usize = 1000;

/// An audience (mailing list) as returned by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailingList {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_reminder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<ListContact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign_defaults: Option<CampaignDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<ListStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListContact {
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub address1: String,
    #[serde(default)]
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignDefaults {
    #[serde(default)]
    pub from_name: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListStats {
    #[serde(default)]
    pub member_count: u64,
}

/// Body of `POST /lists`.
#[derive(Debug, Clone, Serialize)]
pub struct NewMailingList {
    pub name: String,
    pub permission_reminder: String,
    pub email_type_option: bool,
    pub contact: ListContact,
    pub campaign_defaults: CampaignDefaults,
}

impl From<&ListSettings> for NewMailingList {
    fn from(settings: &ListSettings) -> Self {
        Self {
            name: settings.name.clone(),
            permission_reminder: settings.permission_reminder.clone(),
            email_type_option: true,
            contact: ListContact {
                company: settings.company.clone(),
                address1: settings.address.clone(),
                city: settings.city.clone(),
                state: settings.state.clone(),
                zip: settings.zip.clone(),
                country: settings.country.clone(),
            },
            campaign_defaults: CampaignDefaults {
                from_name: settings.from_name.clone(),
                from_email: settings.from_email.clone(),
                subject: settings.subject.clone(),
                language: settings.language.clone(),
            },
        }
    }
}

/// One page of `GET /lists`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListPage {
    #[serde(default)]
    pub lists: Vec<MailingList>,
    #[serde(default)]
    pub total_items: usize,
}

/// Merge fields sent with every member upsert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFields {
    #[serde(rename = "FNAME", default)]
    pub first_name: String,
    #[serde(rename = "LNAME", default)]
    pub last_name: String,
}

impl MergeFields {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }
}

impl From<&Lead> for MergeFields {
    fn from(lead: &Lead) -> Self {
        MergeFields::new(&lead.first_name, &lead.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Subscribed,
    Unsubscribed,
    Cleaned,
    Pending,
    Transactional,
    Archived,
    #[serde(other)]
    Unknown,
}

/// Body of `PUT /lists/{list_id}/members/{subscriber_hash}`.
#[derive(Debug, Clone, Serialize)]
pub struct MemberUpsert<'a> {
    pub email_address: &'a str,
    pub status_if_new: MemberStatus,
    pub status: MemberStatus,
    pub merge_fields: &'a MergeFields,
}

/// A list member as returned by the provider.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Member {
    pub id: String,
    pub email_address: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub list_id: Option<String>,
    #[serde(default)]
    pub merge_fields: Option<MergeFields>,
}
