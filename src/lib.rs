//! Lead Sync Admin Library
//!
//! This library keeps a local store of leads in step with a Mailchimp
//! audience: every lead created, updated or deleted through the HTTP API is
//! mirrored as a list member, with local changes rolled back when the
//! provider call fails.
//!
//! # Modules
//!
//! - `config`: Configuration management.
//! - `db`: Database connection and migrations.
//! - `db_storage`: PostgreSQL lead storage.
//! - `errors`: Error handling types.
//! - `handlers`: HTTP request handlers and routes.
//! - `lead_sync`: Create/update/delete sagas and their unit of work.
//! - `list_cache`: Cache slot for the resolved target list.
//! - `mailchimp_client`: Mailchimp Marketing API client.
//! - `mailchimp_models`: Mailchimp payloads.
//! - `models`: Leads, validation and pagination.
//! - `store`: Lead storage trait and in-memory store.

pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod lead_sync;
pub mod list_cache;
pub mod mailchimp_client;
pub mod mailchimp_models;
pub mod models;
pub mod store;

#[cfg(test)]
mod test_utils;
