use serde::Deserialize;
use std::time::Duration;

use crate::list_cache::DEFAULT_LIST_CACHE_KEY;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub mailchimp: MailchimpConfig,
}

/// Credentials and list provisioning settings for the Mailchimp Marketing API.
#[derive(Debug, Clone, Deserialize)]
pub struct MailchimpConfig {
    pub api_key: String,
    /// Root of the versioned API, e.g. `https://us21.api.mailchimp.com/3.0`.
    pub base_url: String,
    pub list: ListSettings,
    /// Pause between consecutive pages when walking all lists.
    pub page_delay: Duration,
    pub cache_key: String,
}

/// Metadata used to find the target list and to create it when missing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListSettings {
    pub name: String,
    pub permission_reminder: String,
    pub company: String,
    pub address: String,
    pub city: String,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub country: String,
    pub from_name: String,
    pub from_email: String,
    pub subject: String,
    pub language: String,
}

const DEFAULT_PAGE_DELAY_MS: u64 = 500;

fn required(name: &str) -> anyhow::Result<String> {
    let value = std::env::var(name)
        .map_err(|_| anyhow::anyhow!("{} environment variable required", name))?;
    if value.trim().is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    Ok(value)
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn http_url(name: &str, value: String) -> anyhow::Result<String> {
    let parsed = url::Url::parse(&value)
        .map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// Mailchimp keys end with the data-centre they belong to, e.g. `...-us21`.
pub fn server_from_api_key(api_key: &str) -> Option<&str> {
    api_key
        .rsplit_once('-')
        .map(|(_, server)| server)
        .filter(|server| !server.is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            mailchimp: MailchimpConfig::from_env()?,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            log_prefix(&config.database_url)
        );
        tracing::debug!("Mailchimp API: {}", config.mailchimp.base_url);
        tracing::debug!("Mailchimp list: {}", config.mailchimp.list.name);
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

impl MailchimpConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = required("MAILCHIMP_API_KEY")?;

        let base_url = match optional("MAILCHIMP_BASE_URL") {
            Some(url) => http_url("MAILCHIMP_BASE_URL", url)?,
            None => {
                let server = optional("MAILCHIMP_SERVER")
                    .or_else(|| server_from_api_key(&api_key).map(str::to_string))
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "MAILCHIMP_SERVER required when the API key has no data-centre suffix"
                        )
                    })?;
                if !server.chars().all(|c| c.is_ascii_alphanumeric()) {
                    anyhow::bail!("MAILCHIMP_SERVER must look like 'us21'");
                }
                format!("https://{}.api.mailchimp.com/3.0", server)
            }
        };

        let page_delay_ms = match optional("MAILCHIMP_PAGE_DELAY_MS") {
            Some(ms) => ms
                .parse()
                .map_err(|_| anyhow::anyhow!("MAILCHIMP_PAGE_DELAY_MS must be milliseconds"))?,
            None => DEFAULT_PAGE_DELAY_MS,
        };

        let from_email = required("MAILCHIMP_FROM_EMAIL")?;
        if !crate::models::is_valid_email(&from_email) {
            anyhow::bail!("MAILCHIMP_FROM_EMAIL must be a valid email address");
        }

        Ok(Self {
            api_key,
            base_url,
            list: ListSettings {
                name: required("MAILCHIMP_LIST_NAME")?,
                permission_reminder: required("MAILCHIMP_PERMISSION_REMINDER")?,
                company: required("MAILCHIMP_COMPANY")?,
                address: required("MAILCHIMP_ADDRESS")?,
                city: required("MAILCHIMP_CITY")?,
                state: optional("MAILCHIMP_STATE"),
                zip: optional("MAILCHIMP_ZIP"),
                country: required("MAILCHIMP_COUNTRY")?,
                from_name: required("MAILCHIMP_FROM_NAME")?,
                from_email,
                subject: required("MAILCHIMP_SUBJECT")?,
                language: required("MAILCHIMP_LANGUAGE")?,
            },
            page_delay: Duration::from_millis(page_delay_ms),
            cache_key: optional("MAILCHIMP_LIST_CACHE_KEY")
                .unwrap_or_else(|| DEFAULT_LIST_CACHE_KEY.to_string()),
        })
    }
}

/// First characters of a connection string, enough to tell databases apart
/// in logs without printing credentials in full.
fn log_prefix(url: &str) -> String {
    url.chars().take(20).collect()
}
