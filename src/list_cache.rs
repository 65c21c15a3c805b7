use crate::errors::AppError;
use crate::mailchimp_models::MailingList;
use moka::future::Cache;
use std::future::Future;
use std::sync::Arc;

/// Key the resolved target list is stored under unless configured otherwise.
pub const DEFAULT_LIST_CACHE_KEY: &str = "mailchimp_list";

/// Holds the resolved target list.
///
/// Entries never expire: a list renamed or deleted on the provider side stays
/// cached until [`ListCache::invalidate`] is called. Clones share the same
/// slot, so the owner of the client can invalidate it from anywhere.
#[derive(Clone)]
pub struct ListCache {
    entries: Cache<String, MailingList>,
    key: String,
}

impl ListCache {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            entries: Cache::builder().initial_capacity(1).build(),
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn get(&self) -> Option<MailingList> {
        self.entries.get(&self.key).await
    }

    pub async fn insert(&self, list: MailingList) {
        self.entries.insert(self.key.clone(), list).await;
    }

    pub async fn invalidate(&self) {
        self.entries.invalidate(&self.key).await;
    }

    /// Returns the cached list or runs `init` to produce it.
    ///
    /// Concurrent callers that miss at the same time share one `init` run;
    /// a failed `init` leaves the slot empty.
    pub async fn get_or_try_insert_with<F>(&self, init: F) -> Result<MailingList, Arc<AppError>>
    where
        F: Future<Output = Result<MailingList, AppError>>,
    {
        self.entries.try_get_with(self.key.clone(), init).await
    }
}

impl Default for ListCache {
    fn default() -> Self {
        Self::new(DEFAULT_LIST_CACHE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn list(id: &str) -> MailingList {
        MailingList {
            id: id.to_string(),
            name: "Leads".to_string(),
            permission_reminder: None,
            contact: None,
            campaign_defaults: None,
            stats: None,
        }
    }

    #[tokio::test]
    async fn test_insert_get_invalidate() {
        let cache = ListCache::default();
        assert_eq!(cache.key(), "mailchimp_list");
        assert!(cache.get().await.is_none());

        cache.insert(list("abc")).await;
        assert_eq!(cache.get().await.map(|l| l.id), Some("abc".to_string()));

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_clones_share_the_slot() {
        let cache = ListCache::new("custom");
        let other = cache.clone();

        cache.insert(list("abc")).await;
        assert!(other.get().await.is_some());

        other.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn test_init_runs_once_while_cached() {
        let cache = ListCache::default();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let resolved = cache
                .get_or_try_insert_with(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(list("abc"))
                })
                .await
                .unwrap();
            assert_eq!(resolved.id, "abc");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_is_not_cached() {
        let cache = ListCache::default();

        let err = cache
            .get_or_try_insert_with(async {
                Err(AppError::ExternalApiError("down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("down"));
        assert!(cache.get().await.is_none());
    }
}
