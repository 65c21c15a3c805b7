//! Utility to list every Mailchimp audience on the configured account and show
//! which one the service writes to.

use futures::TryStreamExt;
use rust_lead_sync::config::MailchimpConfig;
use rust_lead_sync::list_cache::ListCache;
use rust_lead_sync::mailchimp_client::MailchimpClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_sync=info".into()),
        )
        .init();

    let config = MailchimpConfig::from_env()?;
    let client = MailchimpClient::new(&config, ListCache::new(config.cache_key.clone()))?;

    println!("Lists at {}:", config.base_url);
    let mut target = None;
    let mut count = 0usize;

    let mut lists = std::pin::pin!(client.lists());
    while let Some(list) = lists.try_next().await? {
        count += 1;
        let members = list
            .stats
            .as_ref()
            .map(|s| s.member_count.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!("- {} {} ({} members)", list.id, list.name, members);

        if target.is_none() && list.name == config.list.name {
            target = Some(list.id.clone());
        }
    }
    println!("{} lists found", count);

    match target {
        Some(id) => println!("Target '{}' resolves to {}", config.list.name, id),
        None => println!(
            "Target '{}' not found; it will be created on the first subscribe",
            config.list.name
        ),
    }

    Ok(())
}
