use crate::errors::{AppError, FieldErrors};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::sync::LazyLock;
use uuid::Uuid;

// ============ Database Models ============

/// A captured contact and whether they agreed to receive emails.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    /// Unique identifier, assigned by the store.
    pub id: Uuid,
    /// Email address, unique across all leads (case-insensitive).
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Consent flag.
    pub allow_send_emails: bool,
    /// Timestamp of creation.
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update.
    pub updated_at: DateTime<Utc>,
}

// ============ Request Models ============

/// Body of `POST /leads` and `PUT /leads/:id`.
///
/// Every field is optional at the wire level so that missing fields are
/// reported per field instead of as a deserialization failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadPayload {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub allow_send_emails: Option<bool>,
}

/// Lead fields that passed validation. Only built by [`LeadPayload::validate`]
/// or [`LeadDraft::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct LeadDraft {
    email: String,
    first_name: String,
    last_name: String,
    allow_send_emails: bool,
}

const MAX_NAME_LEN: usize = 255;
const MAX_EMAIL_LEN: usize = 254;

static EMAIL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    // local@domain.tld, at least one dot in the domain
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
    )
    .expect("email regex is valid")
});

/// Checks that an address is shaped like `local@domain.tld`.
pub fn is_valid_email(email: &str) -> bool {
    email.len() <= MAX_EMAIL_LEN && EMAIL_REGEX.is_match(email)
}

fn required_text(
    errors: &mut FieldErrors,
    field: &str,
    label: &str,
    value: Option<String>,
) -> Option<String> {
    let value = value.map(|v| v.trim().to_string()).unwrap_or_default();
    if value.is_empty() {
        errors.insert(field.to_string(), format!("The {} field is required.", label));
        return None;
    }
    if value.chars().count() > MAX_NAME_LEN {
        errors.insert(
            field.to_string(),
            format!(
                "The {} field must not be greater than {} characters.",
                label, MAX_NAME_LEN
            ),
        );
        return None;
    }
    Some(value)
}

impl LeadPayload {
    /// Validates every field and collects all failures at once.
    pub fn validate(self) -> Result<LeadDraft, AppError> {
        let mut errors = FieldErrors::new();

        let email = match self.email.map(|e| e.trim().to_string()) {
            None => {
                errors.insert("email".to_string(), "The email field is required.".to_string());
                None
            }
            Some(e) if e.is_empty() => {
                errors.insert("email".to_string(), "The email field is required.".to_string());
                None
            }
            Some(e) if !is_valid_email(&e) => {
                errors.insert(
                    "email".to_string(),
                    "The email field must be a valid email address.".to_string(),
                );
                None
            }
            Some(e) => Some(e),
        };

        let first_name = required_text(&mut errors, "firstName", "first name", self.first_name);
        let last_name = required_text(&mut errors, "lastName", "last name", self.last_name);

        if self.allow_send_emails.is_none() {
            errors.insert(
                "allowSendEmails".to_string(),
                "The allow send emails field is required.".to_string(),
            );
        }

        match (email, first_name, last_name, self.allow_send_emails) {
            (Some(email), Some(first_name), Some(last_name), Some(allow_send_emails))
                if errors.is_empty() =>
            {
                Ok(LeadDraft {
                    email,
                    first_name,
                    last_name,
                    allow_send_emails,
                })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

impl LeadDraft {
    /// Validates the given fields into a draft.
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        allow_send_emails: bool,
    ) -> Result<Self, AppError> {
        LeadPayload {
            email: Some(email.into()),
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
            allow_send_emails: Some(allow_send_emails),
        }
        .validate()
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn allow_send_emails(&self) -> bool {
        self.allow_send_emails
    }
}

/// Case-insensitive email comparison, matching how the provider keys members.
pub fn same_email(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

// ============ Pagination ============

/// Query string of the lead index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// A normalised page request: `page >= 1`, `1 <= limit <= MAX_LIMIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit
                .unwrap_or(Self::DEFAULT_LIMIT)
                .clamp(1, Self::MAX_LIMIT),
        }
    }

    /// Number of rows skipped before this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn total_pages(&self, total: u64) -> u64 {
        total.div_ceil(u64::from(self.limit))
    }
}

impl From<ListParams> for PageRequest {
    fn from(params: ListParams) -> Self {
        PageRequest::new(params.page, params.limit)
    }
}

/// One page of results plus the size of the whole collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

// ============ Response Models ============

/// Body of `GET /`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadIndex {
    pub leads: Vec<Lead>,
    pub total: u64,
    pub total_pages: u64,
    pub page: u32,
    pub limit: u32,
}

impl LeadIndex {
    pub fn new(request: PageRequest, page: Page<Lead>) -> Self {
        Self {
            total_pages: request.total_pages(page.total),
            total: page.total,
            leads: page.items,
            page: request.page,
            limit: request.limit,
        }
    }
}

/// Body returned by the mutating lead endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadResponse {
    pub message: String,
    pub lead: Lead,
}
