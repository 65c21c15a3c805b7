/// Integration tests with a mocked Mailchimp API
/// Exercises list resolution, pagination and member sync without hitting the real provider
use rust_lead_sync::config::{ListSettings, MailchimpConfig};
use rust_lead_sync::errors::AppError;
use rust_lead_sync::list_cache::ListCache;
use rust_lead_sync::mailchimp_client::{subscriber_hash, MailchimpClient, Pacing};
use rust_lead_sync::mailchimp_models::{MailingList, MergeFields};
use serde_json::json;
use std::time::{Duration, Instant};
use wiremock::matchers::{basic_auth, body_json, body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper function to create test config
fn create_test_config(base_url: String) -> MailchimpConfig {
    MailchimpConfig {
        api_key: "test-key-us21".to_string(),
        base_url,
        list: ListSettings {
            name: "Leads".to_string(),
            permission_reminder: "You signed up on our site".to_string(),
            company: "Acme".to_string(),
            address: "1 Main St".to_string(),
            city: "Springfield".to_string(),
            state: None,
            zip: None,
            country: "US".to_string(),
            from_name: "Acme".to_string(),
            from_email: "news@acme.test".to_string(),
            subject: "Hello".to_string(),
            language: "en".to_string(),
        },
        page_delay: Duration::ZERO,
        cache_key: "mailchimp_list".to_string(),
    }
}

fn client_for(server: &MockServer) -> MailchimpClient {
    MailchimpClient::new(&create_test_config(server.uri()), ListCache::default()).unwrap()
}

fn remote_list(id: &str, name: &str) -> serde_json::Value {
    json!({ "id": id, "name": name, "stats": { "member_count": 3 } })
}

fn filler_lists(count: usize) -> Vec<serde_json::Value> {
    (0..count)
        .map(|i| remote_list(&format!("other{}", i), &format!("Other {}", i)))
        .collect()
}

fn member_json(email: &str) -> serde_json::Value {
    json!({
        "id": subscriber_hash(email),
        "email_address": email,
        "status": "subscribed",
        "list_id": "l1",
        "merge_fields": { "FNAME": "A", "LNAME": "B" }
    })
}

async fn mount_list_page(
    server: &MockServer,
    offset: usize,
    lists: Vec<serde_json::Value>,
    total_items: usize,
    expected_calls: u64,
) {
    Mock::given(method("GET"))
        .and(path("/lists"))
        .and(query_param("count", "1000"))
        .and(query_param("offset", offset.to_string()))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "lists": lists, "total_items": total_items })),
        )
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_resolve_list_finds_existing_list_once() {
    let mock_server = MockServer::start().await;
    mount_list_page(
        &mock_server,
        0,
        vec![remote_list("l0", "Other"), remote_list("l1", "Leads")],
        2,
        1,
    )
    .await;

    let client = client_for(&mock_server);
    let first = client.resolve_list().await.unwrap();
    let second = client.resolve_list().await.unwrap();

    assert_eq!(first.id, "l1");
    assert_eq!(second, first);
    assert_eq!(client.cache().get().await.map(|l| l.id), Some("l1".to_string()));
}

#[tokio::test]
async fn test_warm_cache_skips_list_lookup() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![], 0, 0).await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/lists/cached/members/{}",
            subscriber_hash("a@x.com")
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(member_json("a@x.com")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    client
        .cache()
        .insert(MailingList {
            id: "cached".to_string(),
            name: "Leads".to_string(),
            permission_reminder: None,
            contact: None,
            campaign_defaults: None,
            stats: None,
        })
        .await;

    client
        .subscribe("a@x.com", &MergeFields::new("A", "B"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_lists_follow_pages_until_target_found() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, filler_lists(1000), 1001, 1).await;
    mount_list_page(&mock_server, 1000, vec![remote_list("l1", "Leads")], 1001, 1).await;

    let client = client_for(&mock_server);
    let list = client.resolve_list().await.unwrap();
    assert_eq!(list.id, "l1");
}

#[tokio::test]
async fn test_lookup_stops_once_target_is_found() {
    let mock_server = MockServer::start().await;
    let mut first_page = vec![remote_list("l1", "Leads")];
    first_page.extend(filler_lists(999));
    mount_list_page(&mock_server, 0, first_page, 5000, 1).await;
    mount_list_page(&mock_server, 1000, filler_lists(1000), 5000, 0).await;

    let client = client_for(&mock_server);
    assert_eq!(client.resolve_list().await.unwrap().id, "l1");
}

#[tokio::test]
async fn test_short_page_ends_the_stream() {
    let mock_server = MockServer::start().await;
    // total_items claims more, but a short page is the last one
    mount_list_page(&mock_server, 0, filler_lists(3), 10, 1).await;
    mount_list_page(&mock_server, 3, filler_lists(3), 10, 0).await;
    mount_list_page(&mock_server, 1000, filler_lists(3), 10, 0).await;

    let client = client_for(&mock_server);
    let lists = client.all_lists().await.unwrap();
    assert_eq!(lists.len(), 3);
}

#[tokio::test]
async fn test_pages_are_paced() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, filler_lists(1000), 1500, 1).await;
    mount_list_page(&mock_server, 1000, filler_lists(500), 1500, 1).await;

    let client = client_for(&mock_server).with_pacing(Pacing::fixed(Duration::from_millis(50)));
    let started = Instant::now();
    let lists = client.all_lists().await.unwrap();

    assert_eq!(lists.len(), 1500);
    assert!(started.elapsed() >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_missing_list_is_created_from_settings() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![], 0, 1).await;

    Mock::given(method("POST"))
        .and(path("/lists"))
        .and(body_partial_json(json!({
            "name": "Leads",
            "permission_reminder": "You signed up on our site",
            "email_type_option": true,
            "contact": { "company": "Acme", "address1": "1 Main St", "country": "US" },
            "campaign_defaults": { "from_email": "news@acme.test", "language": "en" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(remote_list("new1", "Leads")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    assert_eq!(client.resolve_list().await.unwrap().id, "new1");
    // Cached now: no second lookup or creation
    assert_eq!(client.resolve_list().await.unwrap().id, "new1");
}

#[tokio::test]
async fn test_subscribe_upserts_member_with_merge_fields() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![remote_list("l1", "Leads")], 1, 1).await;

    Mock::given(method("PUT"))
        .and(path(format!(
            "/lists/l1/members/{}",
            subscriber_hash("a@x.com")
        )))
        .and(basic_auth("anystring", "test-key-us21"))
        .and(body_json(json!({
            "email_address": "A@x.com",
            "status_if_new": "subscribed",
            "status": "subscribed",
            "merge_fields": { "FNAME": "A", "LNAME": "B" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(member_json("a@x.com")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let member = client
        .subscribe("A@x.com", &MergeFields::new("A", "B"))
        .await
        .unwrap();

    assert_eq!(member.id, subscriber_hash("a@x.com"));
}

#[tokio::test]
async fn test_unsubscribe_deletes_member() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![remote_list("l1", "Leads")], 1, 1).await;

    Mock::given(method("DELETE"))
        .and(path(format!(
            "/lists/l1/members/{}",
            subscriber_hash("john@example.com")
        )))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    client.unsubscribe("John@Example.com").await.unwrap();
}

#[tokio::test]
async fn test_provider_errors_surface_as_external_errors() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![remote_list("l1", "Leads")], 1, 1).await;

    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "title": "Resource Not Found",
            "status": 404
        })))
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let err = client.unsubscribe("gone@example.com").await.unwrap_err();

    match err {
        AppError::ExternalApiError(msg) => assert!(msg.contains("404")),
        other => panic!("expected external API error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_lookup_is_not_cached() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(ResponseTemplate::new(401).set_body_string("API Key Invalid"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    assert!(client.resolve_list().await.is_err());
    assert!(client.cache().get().await.is_none());
    assert!(client.resolve_list().await.is_err());
}

#[tokio::test]
async fn test_invalidate_forces_remote_lookup() {
    let mock_server = MockServer::start().await;
    mount_list_page(&mock_server, 0, vec![remote_list("l1", "Leads")], 1, 2).await;

    let client = client_for(&mock_server);
    client.resolve_list().await.unwrap();
    client.resolve_list().await.unwrap();

    client.invalidate_list().await;
    assert!(client.cache().get().await.is_none());
    client.resolve_list().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_first_resolution_shares_one_lookup() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/lists"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "lists": [remote_list("l1", "Leads")], "total_items": 1 }))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = client_for(&mock_server);
    let (a, b) = tokio::join!(client.resolve_list(), client.resolve_list());
    assert_eq!(a.unwrap().id, "l1");
    assert_eq!(b.unwrap().id, "l1");
}
