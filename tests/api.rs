use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use colabri_sync::broker::MemoryBroker;
use colabri_sync::build_app;
use colabri_sync::collab::CollabService;
use colabri_sync::config::Config;
use colabri_sync::db::MemoryDocumentStore;
use colabri_sync::models::{
    ActiveUsersResponse, DocumentChange, JoinSessionResponse, Operation, PresenceEvent,
    SyncDocumentResponse,
};
use colabri_sync::routes::AppState;
use colabri_sync::services::auth_service::Claims;
use futures_util::StreamExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "integration-secret";

struct TestApp {
    app: Router,
    store: Arc<MemoryDocumentStore>,
    collab: Arc<CollabService>,
    document_id: String,
}

fn test_app() -> TestApp {
    let store = Arc::new(MemoryDocumentStore::new());
    let id = Uuid::new_v4();
    store.insert_document(id, "Design notes", "alice", "1");
    store.grant(&id.to_string(), "bob");

    let collab = Arc::new(CollabService::new(store.clone(), Arc::new(MemoryBroker::new()), 100));
    let config = Config {
        auth_jwt_secret: Some(SECRET.to_string()),
        ..Config::default()
    };
    let state = AppState {
        collab: collab.clone(),
        store: store.clone(),
        config: Arc::new(config),
    };

    TestApp {
        app: build_app(state),
        store,
        collab,
        document_id: id.to_string(),
    }
}

fn token(user_id: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        username: Some(format!("{} (test)", user_id)),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn get(uri: &str, user_id: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)))
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str, user_id: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token(user_id)))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json<T: DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn sync(t: &TestApp, user_id: &str, base_version: &str, content: &str) -> SyncDocumentResponse {
    let response = t
        .app
        .clone()
        .oneshot(post(
            &format!("/api/v1/documents/{}/sync", t.document_id),
            user_id,
            json!({
                "operations": [Operation::insert(0, content)],
                "base_version": base_version,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    read_json(response).await
}

#[tokio::test]
async fn health_needs_no_token() {
    let t = test_app();
    let response = t
        .app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ready_reports_store_and_broker() {
    let t = test_app();
    let response = t
        .app
        .oneshot(Request::builder().uri("/api/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = read_json(response).await;
    assert_eq!(body["store"], "memory");
    assert_eq!(body["broker"], "memory");
}

#[tokio::test]
async fn missing_token_is_unauthorized() {
    let t = test_app();
    let response = t
        .app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/documents/{}/session/join", t.document_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn token_in_cookie_is_accepted() {
    let t = test_app();
    let response = t
        .app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/documents/{}/session/users", t.document_id))
                .header(header::COOKIE, format!("auth_token={}", token("alice")))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn join_requires_read_access() {
    let t = test_app();
    let uri = format!("/api/v1/documents/{}/session/join", t.document_id);

    let response = t.app.clone().oneshot(post(&uri, "mallory", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(t.collab.session_count(), 0);

    let response = t
        .app
        .clone()
        .oneshot(post("/api/v1/documents/not-a-uuid/session/join", "alice", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn join_users_and_leave() {
    let t = test_app();
    let base = format!("/api/v1/documents/{}/session", t.document_id);

    let response = t.app.clone().oneshot(post(&format!("{}/join", base), "alice", json!({}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let joined: JoinSessionResponse = read_json(response).await;
    assert_eq!(joined.session_id, t.document_id);
    assert_eq!(joined.change_topic, format!("documents/{}/changes", t.document_id));
    assert_eq!(joined.presence_topic, format!("documents/{}/presence", t.document_id));
    assert_eq!(joined.active_users.len(), 1);
    assert_eq!(joined.active_users[0].username, "alice (test)");

    let response = t.app.clone().oneshot(post(&format!("{}/join", base), "bob", json!({}))).await.unwrap();
    let joined: JoinSessionResponse = read_json(response).await;
    let ids: Vec<_> = joined.active_users.iter().map(|u| u.user_id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob"]);

    let response = t
        .app
        .clone()
        .oneshot(post(&format!("{}/cursor", base), "bob", json!({"cursor_position": "2:7"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = t.app.clone().oneshot(get(&format!("{}/users", base), "alice")).await.unwrap();
    let users: ActiveUsersResponse = read_json(response).await;
    let bob = users.users.iter().find(|u| u.user_id == "bob").unwrap();
    assert_eq!(bob.cursor_position, "2:7");

    for user in ["alice", "bob"] {
        let response = t.app.clone().oneshot(post(&format!("{}/leave", base), user, json!({}))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    assert_eq!(t.collab.session_count(), 0);
    assert_eq!(t.collab.broker_topic_count(), 0);
}

#[tokio::test]
async fn sync_applies_then_reports_conflict() {
    let t = test_app();

    let applied = sync(&t, "alice", "1", "hello").await;
    assert!(applied.success);
    assert!(applied.concurrent_changes.is_none());
    assert_ne!(applied.new_version, "1");

    // Bob still believes version 1 is current
    let conflict = sync(&t, "bob", "1", "world").await;
    assert!(conflict.success);
    assert_eq!(conflict.new_version, applied.new_version);
    let missed = conflict.concurrent_changes.unwrap();
    assert_eq!(missed.len(), 1);
    assert_eq!(missed[0].version, applied.new_version);
    assert_eq!(missed[0].user_id, "alice");

    assert_eq!(t.store.history(&t.document_id).len(), 1);
}

#[tokio::test]
async fn sync_without_access_is_forbidden() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(post(
            &format!("/api/v1/documents/{}/sync", t.document_id),
            "mallory",
            json!({"operations": [], "base_version": "1"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(t.store.history(&t.document_id).is_empty());
}

#[tokio::test]
async fn change_stream_receives_committed_changes() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/documents/{}/changes", t.document_id), "bob"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(t.collab.subscription_count(), 1);

    let applied = sync(&t, "alice", "1", "hi").await;

    let mut body = response.into_body().into_data_stream();
    let mut received = String::new();
    let change: DocumentChange = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let chunk = body.next().await.expect("stream ended").unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
            if let Some(data) = received
                .lines()
                .find_map(|line| line.strip_prefix("data: "))
            {
                if received.contains("event: change") && received.contains("\n\n") {
                    return serde_json::from_str(data).unwrap();
                }
            }
        }
    })
    .await
    .expect("no change event within timeout");

    assert_eq!(change.version, applied.new_version);
    assert_eq!(change.user_id, "alice");

    drop(body);
    assert_eq!(t.collab.subscription_count(), 0);
}

/// Collects `presence` event payloads from an SSE body until `count` have arrived
async fn read_presence_events<S>(body: &mut S, count: usize) -> Vec<PresenceEvent>
where
    S: futures_util::Stream<Item = Result<axum::body::Bytes, axum::Error>> + Unpin,
{
    let mut buffer = String::new();
    let mut events = Vec::new();
    while events.len() < count {
        let chunk = body.next().await.expect("stream ended").unwrap();
        buffer.push_str(std::str::from_utf8(&chunk).unwrap());
        while let Some(end) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..end + 2).collect();
            if !frame.lines().any(|line| line == "event: presence") {
                continue;
            }
            if let Some(data) = frame.lines().find_map(|line| line.strip_prefix("data: ")) {
                events.push(serde_json::from_str(data).unwrap());
            }
        }
    }
    events
}

#[tokio::test]
async fn change_stream_carries_presence_of_others() {
    let t = test_app();
    let base = format!("/api/v1/documents/{}", t.document_id);

    t.app.clone().oneshot(post(&format!("{}/session/join", base), "alice", json!({}))).await.unwrap();
    let response = t
        .app
        .clone()
        .oneshot(get(&format!("{}/changes", base), "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response_join = t.app.clone().oneshot(post(&format!("{}/session/join", base), "bob", json!({}))).await.unwrap();
    assert_eq!(response_join.status(), StatusCode::OK);
    let response_cursor = t
        .app
        .clone()
        .oneshot(post(&format!("{}/session/cursor", base), "bob", json!({"cursor_position": "5:1"})))
        .await
        .unwrap();
    assert_eq!(response_cursor.status(), StatusCode::OK);

    let mut body = response.into_body().into_data_stream();
    let events = tokio::time::timeout(Duration::from_secs(5), read_presence_events(&mut body, 2))
        .await
        .expect("no presence events within timeout");

    match &events[0] {
        PresenceEvent::Join { user } => {
            assert_eq!(user.user_id, "bob");
            assert_eq!(user.username, "bob (test)");
        }
        other => panic!("expected a join, got {:?}", other),
    }
    assert_eq!(
        events[1],
        PresenceEvent::Cursor {
            user_id: "bob".to_string(),
            cursor_position: "5:1".to_string(),
        }
    );
}

#[tokio::test]
async fn shutdown_cancels_open_streams() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(get(&format!("/api/v1/documents/{}/changes", t.document_id), "alice"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    t.collab.shutdown();

    let mut body = response.into_body().into_data_stream();
    let received = tokio::time::timeout(Duration::from_secs(5), async {
        let mut received = String::new();
        while let Some(chunk) = body.next().await {
            received.push_str(std::str::from_utf8(&chunk.unwrap()).unwrap());
        }
        received
    })
    .await
    .expect("stream did not end after shutdown");

    assert!(received.contains("event: canceled"));
    assert_eq!(t.collab.subscription_count(), 0);
}
