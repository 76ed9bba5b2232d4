//! Integration tests for the Redoom HTTP endpoints
//!
//! Each test starts a node on an in-memory store and drives it through the
//! public router.

use axum_test::TestServer;
use redoom_ledger::api::build_api_router;
use redoom_ledger::config::Config;
use redoom_ledger::node::Node;
use redoom_ledger::persistence::InMemoryPersistence;
use serde_json::Value;
use std::sync::Arc;

const SECRET: &str = "test-secret";

fn server_with(difficulty: u32, timeout_secs: Option<u64>) -> TestServer {
    let mut config = Config::default();
    config.auth.secret_key = SECRET.to_string();
    config.ledger.difficulty = difficulty;
    config.ledger.mining_timeout_secs = timeout_secs;

    let node = Node::with_persistence(config, Arc::new(InMemoryPersistence::new()))
        .expect("Failed to create node");
    TestServer::new(build_api_router(Arc::new(node))).expect("Failed to create test server")
}

fn server() -> TestServer {
    server_with(1, None)
}

async fn create_user(server: &TestServer, username: &str) -> Value {
    let email = format!("{}@example.com", username);
    let response = server
        .post("/new/user")
        .form(&[("secret_key", SECRET), ("username", username), ("email", email.as_str())])
        .await;
    assert_eq!(response.status_code(), 200);
    response.json()
}

async fn chain_length(server: &TestServer) -> u64 {
    let json: Value = server.get("/chain").await.json();
    json["length"].as_u64().unwrap()
}

#[tokio::test]
async fn test_root_message() {
    let server = server();
    let response = server.get("/").await;
    assert_eq!(response.status_code(), 200);
    let json: Value = response.json();
    assert_eq!(json["message"], "redoom blockchain system");
}

#[tokio::test]
async fn test_new_user_mints_linked_record() {
    let server = server();
    let json = create_user(&server, "ada").await;

    assert_eq!(json["error"], false);
    assert_eq!(json["message"], "success");
    assert!(json["hash"].as_str().unwrap().starts_with('0'));
    assert_eq!(json["preHash"], "0");
    assert_eq!(json["blockData"]["to"], "users");
    assert_eq!(json["blockData"]["amount"], 1);
    let id = json["user"]["id"].as_str().unwrap();
    assert_eq!(id.len(), 24);
    assert_eq!(json["blockData"]["from"], id);

    let response = server.get("/chain/validate").await;
    assert_eq!(response.status_code(), 200);
    let validation: Value = response.json();
    assert_eq!(validation["valid"], true);
    assert_eq!(validation["length"], 2);
    assert!(validation["first_violation"].is_null());

    let record: Value = server.get("/chain/records/1").await.json();
    assert_eq!(record["digest"], json["hash"]);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let server = server();
    let response = server
        .post("/new/user")
        .form(&[("secret_key", "wrong"), ("username", "ada"), ("email", "ada@example.com")])
        .await;
    assert_eq!(response.status_code(), 401);
    let json: Value = response.json();
    assert_eq!(json["error"], true);
    assert!(json["message"].is_string());
    assert_eq!(chain_length(&server).await, 1);
}

#[tokio::test]
async fn test_missing_fields() {
    let server = server();
    let response = server
        .post("/new/user")
        .form(&[("secret_key", SECRET), ("username", "ada")])
        .await;
    assert_eq!(response.status_code(), 400);
    assert_eq!(chain_length(&server).await, 1);
}

#[tokio::test]
async fn test_duplicate_user_conflicts() {
    let server = server();
    create_user(&server, "ada").await;

    let response = server
        .post("/new/user")
        .form(&[("secret_key", SECRET), ("username", "ada"), ("email", "new@example.com")])
        .await;
    assert_eq!(response.status_code(), 409);
    assert_eq!(chain_length(&server).await, 2);
}

#[tokio::test]
async fn test_post_and_comment_flow() {
    let server = server();
    let owner = create_user(&server, "owner").await;
    let reader = create_user(&server, "reader").await;
    let owner_id = owner["user"]["id"].as_str().unwrap().to_string();
    let reader_id = reader["user"]["id"].as_str().unwrap().to_string();

    let response = server
        .post("/new/post")
        .form(&[("secret_key", SECRET), ("id", owner_id.as_str())])
        .await;
    assert_eq!(response.status_code(), 200);
    let post: Value = response.json();
    let post_id = post["post_id"].as_str().unwrap().to_string();
    assert_eq!(post["preHash"], reader["hash"]);
    assert_eq!(post["blockData"]["from"], post_id.as_str());
    assert_eq!(post["blockData"]["to"], owner_id.as_str());

    let response = server
        .post("/new/comment")
        .form(&[
            ("secret_key", SECRET),
            ("id", reader_id.as_str()),
            ("post_owner_id", owner_id.as_str()),
            ("post_id", post_id.as_str()),
        ])
        .await;
    assert_eq!(response.status_code(), 200);
    let comment: Value = response.json();
    assert_eq!(comment["preHash"], post["hash"]);
    assert_eq!(
        comment["blockData"]["to"],
        format!("{}&{}&{}", post_id, owner_id, reader_id)
    );
    assert!(comment["comment_id"].is_string());

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["records"], 5);
    assert_eq!(health["documents"]["users"], 2);
    assert_eq!(health["documents"]["posts"], 1);
    assert_eq!(health["documents"]["comments"], 1);

    let validation: Value = server.get("/chain/validate").await.json();
    assert_eq!(validation["valid"], true);
}

#[tokio::test]
async fn test_post_owner_may_comment_on_own_post() {
    let server = server();
    let owner = create_user(&server, "owner").await;
    let owner_id = owner["user"]["id"].as_str().unwrap().to_string();

    let post: Value = server
        .post("/new/post")
        .form(&[("secret_key", SECRET), ("id", owner_id.as_str())])
        .await
        .json();
    let post_id = post["post_id"].as_str().unwrap().to_string();

    let response = server
        .post("/new/comment")
        .form(&[
            ("secret_key", SECRET),
            ("id", owner_id.as_str()),
            ("post_owner_id", owner_id.as_str()),
            ("post_id", post_id.as_str()),
        ])
        .await;
    assert_eq!(response.status_code(), 200);
    let comment: Value = response.json();
    assert_eq!(
        comment["blockData"]["to"],
        format!("{}&{}&{}", post_id, owner_id, owner_id)
    );
    assert_eq!(chain_length(&server).await, 4);
}

#[tokio::test]
async fn test_unknown_references() {
    let server = server();
    let response = server
        .post("/new/post")
        .form(&[("secret_key", SECRET), ("id", "000000000000000000000000")])
        .await;
    assert_eq!(response.status_code(), 404);

    let user = create_user(&server, "ada").await;
    let id = user["user"]["id"].as_str().unwrap().to_string();
    let response = server
        .post("/new/comment")
        .form(&[
            ("secret_key", SECRET),
            ("id", id.as_str()),
            ("post_owner_id", id.as_str()),
            ("post_id", "missing"),
        ])
        .await;
    assert_eq!(response.status_code(), 404);
    assert_eq!(chain_length(&server).await, 2);
}

#[tokio::test]
async fn test_missing_record() {
    let server = server();
    let response = server.get("/chain/records/999").await;
    assert_eq!(response.status_code(), 404);
    let json: Value = response.json();
    assert_eq!(json["error"], true);
}

#[tokio::test]
async fn test_mining_timeout_stores_nothing() {
    // Difficulty 64 cannot be met, so the zero timeout always fires.
    let server = server_with(64, Some(0));
    let response = server
        .post("/new/user")
        .form(&[("secret_key", SECRET), ("username", "ada"), ("email", "ada@example.com")])
        .await;
    assert_eq!(response.status_code(), 503);

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["records"], 1);
    assert_eq!(health["documents"]["users"], 0);
}
