use crate::config::{ListSettings, MailchimpConfig};
use crate::errors::AppError;
use crate::lead_sync::MailingListSync;
use crate::list_cache::ListCache;
use crate::mailchimp_models::{
    ListPage, MailingList, Member, MemberStatus, MemberUpsert, MergeFields, NewMailingList,
    LIST_PAGE_SIZE,
};
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use md5::{Digest, Md5};
use reqwest::{RequestBuilder, Response};
use std::time::Duration;

/// Delay applied between consecutive list pages to stay under the provider's rate limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    delay: Duration,
}

impl Pacing {
    pub const fn fixed(delay: Duration) -> Self {
        Self { delay }
    }

    pub const fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(500))
    }
}

/// Member key used by the provider: hex MD5 of the lower-cased address.
pub fn subscriber_hash(email: &str) -> String {
    hex::encode(Md5::digest(email.to_lowercase().as_bytes()))
}

enum ListCursor {
    Start,
    At(usize),
    Done,
}

/// Client for the Mailchimp Marketing API.
///
/// Owns the single target list this service writes to: it is looked up by
/// name, created when missing, and cached in the injected [`ListCache`].
#[derive(Clone)]
pub struct MailchimpClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    list: ListSettings,
    cache: ListCache,
    pacing: Pacing,
}

impl MailchimpClient {
    /// Creates a new `MailchimpClient`.
    ///
    /// # Arguments
    ///
    /// * `config` - Credentials, base URL and target list settings.
    /// * `cache` - Slot holding the resolved target list.
    pub fn new(config: &MailchimpConfig, cache: ListCache) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create Mailchimp client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            list: config.list.clone(),
            cache,
            pacing: Pacing::fixed(config.page_delay),
        })
    }

    /// Replaces the pacing policy used between list pages.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn cache(&self) -> &ListCache {
        &self.cache
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth("anystring", Some(&self.api_key))
    }

    async fn send(&self, request: RequestBuilder, action: &str) -> Result<Response, AppError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("Mailchimp {} failed: {}", action, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "Mailchimp {} returned {}: {}",
                action, status, error_text
            )));
        }

        Ok(response)
    }

    async fn fetch_list_page(&self, offset: usize) -> Result<ListPage, AppError> {
        let url = format!("{}/lists", self.base_url);
        tracing::debug!("Fetching Mailchimp lists at offset {}", offset);

        let request = self.client.get(&url).query(&[
            ("count", LIST_PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
        ]);
        let response = self.send(request, "list lookup").await?;

        response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Mailchimp lists: {}", e))
        })
    }

    /// Walks every list on the account, one page at a time.
    ///
    /// Pages are only fetched as the stream is polled, so a consumer that stops
    /// early never requests the remaining pages. Each call starts again from
    /// the first page.
    pub fn lists(&self) -> impl Stream<Item = Result<MailingList, AppError>> + Send + '_ {
        stream::try_unfold(ListCursor::Start, move |cursor| async move {
            let offset = match cursor {
                ListCursor::Done => return Ok(None),
                ListCursor::Start => 0,
                ListCursor::At(offset) => {
                    self.pacing.pause().await;
                    offset
                }
            };

            let page = self.fetch_list_page(offset).await?;
            let fetched = page.lists.len();
            let next_offset = offset + fetched;
            let next = if fetched == 0 || fetched < LIST_PAGE_SIZE || next_offset >= page.total_items
            {
                ListCursor::Done
            } else {
                ListCursor::At(next_offset)
            };

            Ok::<_, AppError>(Some((
                stream::iter(page.lists.into_iter().map(Ok::<_, AppError>)),
                next,
            )))
        })
        .try_flatten()
    }

    /// Collects every list on the account.
    pub async fn all_lists(&self) -> Result<Vec<MailingList>, AppError> {
        self.lists().try_collect().await
    }

    async fn find_list_by_name(&self, name: &str) -> Result<Option<MailingList>, AppError> {
        let mut lists = std::pin::pin!(self.lists());
        while let Some(list) = lists.try_next().await? {
            if list.name == name {
                return Ok(Some(list));
            }
        }
        Ok(None)
    }

    async fn create_list(&self) -> Result<MailingList, AppError> {
        let url = format!("{}/lists", self.base_url);
        tracing::info!("Creating Mailchimp list '{}'", self.list.name);

        let request = self.client.post(&url).json(&NewMailingList::from(&self.list));
        let response = self.send(request, "list creation").await?;

        let list: MailingList = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse created Mailchimp list: {}", e))
        })?;

        tracing::info!("✓ Mailchimp list created: {} ({})", list.name, list.id);
        Ok(list)
    }

    async fn find_or_create_list(&self) -> Result<MailingList, AppError> {
        if let Some(list) = self.find_list_by_name(&self.list.name).await? {
            tracing::info!("Found Mailchimp list '{}' ({})", list.name, list.id);
            return Ok(list);
        }
        self.create_list().await
    }

    /// Returns the target list, looking it up or creating it on a cache miss.
    pub async fn resolve_list(&self) -> Result<MailingList, AppError> {
        if let Some(list) = self.cache.get().await {
            return Ok(list);
        }

        tracing::debug!("Mailchimp list not cached under '{}'", self.cache.key());
        self.cache
            .get_or_try_insert_with(self.find_or_create_list())
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to resolve Mailchimp list: {}", e))
            })
    }

    /// Forgets the resolved list so the next call goes back to the provider.
    pub async fn invalidate_list(&self) {
        tracing::info!("Invalidating cached Mailchimp list '{}'", self.cache.key());
        self.cache.invalidate().await;
    }

    /// Adds the address to the target list or updates it if already present.
    pub async fn subscribe(&self, email: &str, fields: &MergeFields) -> Result<Member, AppError> {
        let list = self.resolve_list().await?;
        let url = format!(
            "{}/lists/{}/members/{}",
            self.base_url,
            list.id,
            subscriber_hash(email)
        );
        tracing::info!("Subscribing {} to Mailchimp list {}", email, list.id);

        let body = MemberUpsert {
            email_address: email,
            status_if_new: MemberStatus::Subscribed,
            status: MemberStatus::Subscribed,
            merge_fields: fields,
        };
        let response = self.send(self.client.put(&url).json(&body), "subscribe").await?;

        let member: Member = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse Mailchimp member: {}", e))
        })?;

        tracing::info!("✓ Subscribed {} as member {}", email, member.id);
        Ok(member)
    }

    /// Removes the address from the target list.
    pub async fn unsubscribe(&self, email: &str) -> Result<(), AppError> {
        let list = self.resolve_list().await?;
        let url = format!(
            "{}/lists/{}/members/{}",
            self.base_url,
            list.id,
            subscriber_hash(email)
        );
        tracing::info!("Removing {} from Mailchimp list {}", email, list.id);

        self.send(self.client.delete(&url), "unsubscribe").await?;

        tracing::info!("✓ Removed {} from Mailchimp list {}", email, list.id);
        Ok(())
    }
}

#[async_trait]
impl MailingListSync for MailchimpClient {
    async fn subscribe(&self, email: &str, fields: &MergeFields) -> Result<Member, AppError> {
        MailchimpClient::subscribe(self, email, fields).await
    }

    async fn unsubscribe(&self, email: &str) -> Result<(), AppError> {
        MailchimpClient::unsubscribe(self, email).await
    }
}
