//! The reqwest transport against a mock backend, through the query and
//! mutation facades.

use std::sync::Arc;
use std::time::Duration;

use httpmock::MockServer;
use medtrack::application::error::AppError;
use medtrack::application::mutation::MutationService;
use medtrack::application::query::QueryService;
use medtrack::application::transport::Transport;
use medtrack::cache::{CacheConfig, CacheStore, EventKind, EventQueue, Invalidator, SubscriptionRegistry};
use medtrack::domain::types::ResourceTag;
use medtrack::infra::client::{HttpTransport, STALE_SOON_HEADER, TokenStore};
use medtrack_api_types::Accessory;
use serde_json::{Value, json};
use tempfile::NamedTempFile;

struct Stack {
    queries: QueryService,
    mutations: MutationService,
    invalidator: Arc<Invalidator>,
}

fn stack(server: &MockServer, tokens: TokenStore) -> Stack {
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(&server.url("/v2"), tokens, Duration::from_secs(5)).expect("transport"),
    );
    let invalidator = Arc::new(Invalidator::new(
        Arc::new(CacheStore::new(CacheConfig::default())),
        Arc::new(SubscriptionRegistry::new()),
        Arc::new(EventQueue::new()),
    ));
    Stack {
        queries: QueryService::new(Arc::clone(&transport), Arc::clone(&invalidator)),
        mutations: MutationService::new(transport, Arc::clone(&invalidator)),
        invalidator,
    }
}

#[tokio::test]
async fn filtered_read_sends_token_and_is_served_from_cache_afterwards() {
    let server = MockServer::start_async().await;
    let token_file = NamedTempFile::new().expect("tmp file");
    std::fs::write(token_file.path(), "secret\n").expect("write token");

    let mock = server.mock(|when, then| {
        when.method("GET")
            .path("/v2/biomedical/accessories")
            .query_param("equipment", "7")
            .header("authorization", "Bearer secret");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!([{ "_id": "a-1", "curriculum": "7", "name": "Probe" }]));
    });

    let tokens = TokenStore::from_file(token_file.path()).expect("token store");
    let stack = stack(&server, tokens);

    for _ in 0..2 {
        let accessories: Vec<Accessory> = stack
            .queries
            .fetch_by_query(&ResourceTag::ACCESSORY, &json!({ "equipment": "7" }))
            .await
            .expect("accessories");
        assert_eq!(accessories[0].equipment, "7");
    }

    mock.assert_hits(1);
}

#[tokio::test]
async fn status_codes_map_to_typed_errors() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method("GET").path("/v2/maintenance/maintenance/missing");
        then.status(404);
    });
    server.mock(|when, then| {
        when.method("GET").path("/v2/maintenance/maintenance/broken");
        then.status(503).body("maintenance window");
    });
    let stack = stack(&server, TokenStore::default());

    let missing = stack
        .queries
        .fetch_by_id::<Value>(&ResourceTag::MAINTENANCE, "missing")
        .await
        .expect_err("404");
    assert_eq!(missing, AppError::not_found("/maintenance/maintenance/missing"));

    let broken = stack
        .queries
        .fetch_by_id::<Value>(&ResourceTag::MAINTENANCE, "broken")
        .await
        .expect_err("503");
    match broken {
        AppError::Transport { status, message } => {
            assert_eq!(status, Some(503));
            assert!(message.contains("maintenance window"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(stack.invalidator.store().is_empty());
}

#[tokio::test]
async fn undecodable_body_is_a_decode_error() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method("GET").path("/v2/biomedical/accessory/1");
        then.status(200).body("<html>login</html>");
    });
    let stack = stack(&server, TokenStore::default());

    let err = stack
        .queries
        .fetch_by_id::<Accessory>(&ResourceTag::ACCESSORY, "1")
        .await
        .expect_err("html body");
    assert_eq!(err.kind(), "decode");
}

#[tokio::test]
async fn stale_soon_header_is_published_as_an_event() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method("GET").path("/v2/maintenance/schedules");
        then.status(200)
            .header(STALE_SOON_HEADER, "1")
            .json_body(json!([]));
    });
    let stack = stack(&server, TokenStore::default());

    let _: Value = stack
        .queries
        .fetch_all(&ResourceTag::SCHEDULE)
        .await
        .expect("schedules");

    let events = stack.invalidator.events().drain(8);
    assert!(events.iter().any(|event| {
        event.kind
            == EventKind::StaleSoon {
                path: "/maintenance/schedules".into(),
            }
    }));
}

#[tokio::test]
async fn update_hits_the_backend_then_the_list_is_read_again() {
    let server = MockServer::start_async().await;
    let list = server.mock(|when, then| {
        when.method("GET").path("/v2/biomedical/accessories");
        then.status(200).json_body(json!([]));
    });
    let update = server.mock(|when, then| {
        when.method("PUT")
            .path("/v2/biomedical/accessory/a-1")
            .json_body_includes(r#"{"name":"Probe v2"}"#);
        then.status(200)
            .json_body(json!({ "_id": "a-1", "equipment": "7", "name": "Probe v2" }));
    });
    let stack = stack(&server, TokenStore::default());

    let _: Value = stack
        .queries
        .fetch_all(&ResourceTag::ACCESSORY)
        .await
        .expect("list");
    let updated: Accessory = stack
        .mutations
        .update(&ResourceTag::ACCESSORY, "a-1", json!({ "name": "Probe v2" }))
        .await
        .expect("update");
    let _: Value = stack
        .queries
        .fetch_all(&ResourceTag::ACCESSORY)
        .await
        .expect("list again");

    assert_eq!(updated.name, "Probe v2");
    update.assert_hits(1);
    list.assert_hits(2);
}

#[tokio::test]
async fn unreachable_backend_is_a_transport_error() {
    let transport = HttpTransport::new(
        "http://127.0.0.1:9/",
        TokenStore::default(),
        Duration::from_millis(500),
    )
    .expect("transport");

    let err = transport
        .send(medtrack::application::transport::TransportRequest::get("/ping"))
        .await
        .expect_err("nothing listens on the discard port");
    assert!(matches!(err, AppError::Transport { status: None, .. }));
}
