//! REST API for the Redoom ledger node
//!
//! Every accepted write (user, post, comment) mints one ledger record and
//! stores the document together with that record's seal.

use axum::{
    extract::{Path, Request, State},
    http::{self, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{error, info, warn};

use crate::blockchain::{ChainViolation, Payload, Record};
use crate::documents::{
    comment_payload, new_object_id, post_payload, user_payload, Comment, Document, Post, Seal, User,
};
use crate::error::LedgerError;
use crate::node::Node;
use crate::persistence::DocumentCounts;

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    InvalidInput(String),
    NotFound(String),
    Conflict(String),
    MiningTimeout,
    InternalError(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: bool,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Invalid secret key".to_string()),
            ApiError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::MiningTimeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Mining did not finish in time; nothing was stored".to_string(),
            ),
            ApiError::InternalError(msg) => {
                error!("Internal API error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: true, message })).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::MiningAborted { attempts } => {
                warn!("Append aborted after {} attempts", attempts);
                ApiError::MiningTimeout
            }
            LedgerError::DuplicateDocument(msg) => ApiError::Conflict(msg),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

// ============================================================================
// Request / response types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct NewUserForm {
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewPostForm {
    #[serde(default)]
    pub secret_key: String,
    /// Author's user id.
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct NewCommentForm {
    #[serde(default)]
    pub secret_key: String,
    /// Commenter's user id.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub post_owner_id: String,
    #[serde(default)]
    pub post_id: String,
}

#[derive(Serialize)]
struct SealedResponse {
    error: bool,
    message: &'static str,
    hash: String,
    #[serde(rename = "preHash")]
    pre_hash: String,
    #[serde(rename = "blockData")]
    block_data: Payload,
    #[serde(flatten)]
    extra: Value,
}

impl SealedResponse {
    fn new(record: Record, extra: Value) -> Self {
        SealedResponse {
            error: false,
            message: "success",
            hash: record.digest,
            pre_hash: record.previous_digest,
            block_data: record.payload,
            extra,
        }
    }
}

#[derive(Serialize)]
struct ValidationResponse {
    valid: bool,
    length: usize,
    first_violation: Option<ChainViolation>,
    insufficient_work: Option<usize>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    records: usize,
    documents: DocumentCounts,
}

fn check_secret(node: &Node, provided: &str) -> Result<(), ApiError> {
    if provided != node.config.auth.secret_key {
        return Err(ApiError::Unauthorized);
    }
    Ok(())
}

fn require_user(node: &Node, id: &str) -> Result<User, ApiError> {
    node.persistence
        .find_user(id)?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", id)))
}

/// Mint a record for `payload` and store `document` with its seal in the same step.
async fn seal_document<F>(node: &Node, payload: Payload, document: F) -> Result<Record, ApiError>
where
    F: FnOnce(Seal) -> Document + Send + 'static,
{
    let store = node.persistence.clone();
    let record = node
        .ledger
        .append(payload, node.config.ledger.mining_timeout(), move |height, record| {
            let document = document(Seal::from(record));
            store.commit_sealed(height, record, &document)
        })
        .await?;
    Ok(record)
}

// ============================================================================
// API Server
// ============================================================================

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(vec![http::Method::GET, http::Method::POST, http::Method::OPTIONS])
        .allow_headers(vec![http::header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the API router with all endpoints
pub fn build_api_router(node: Arc<Node>) -> Router {
    Router::new()
        .route("/", get(root))
        // Sealed writes
        .route("/new/user", post(new_user))
        .route("/new/post", post(new_post))
        .route("/new/comment", post(new_comment))
        // Ledger inspection
        .route("/chain", get(chain_summary))
        .route("/chain/records/:height", get(get_record))
        .route("/chain/validate", get(validate_chain))
        // System
        .route("/health", get(health_check))
        .layer(middleware::from_fn(logging_middleware))
        .with_state(node)
        .layer(cors_layer())
}

pub async fn run_api_server(node: Arc<Node>) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("{}:{}", node.config.server.host, node.config.server.port).parse()?;
    let app = build_api_router(node);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn logging_middleware(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(req).await;

    info!(
        "{} {} -> {} ({} ms)",
        method,
        path,
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}

// ============================================================================
// Route Handlers
// ============================================================================

async fn root() -> impl IntoResponse {
    Json(json!({ "message": "redoom blockchain system" }))
}

async fn new_user(
    State(node): State<Arc<Node>>,
    Form(form): Form<NewUserForm>,
) -> Result<Json<SealedResponse>, ApiError> {
    check_secret(&node, &form.secret_key)?;

    let username = form.username.trim().to_string();
    let email = form.email.trim().to_string();
    if username.is_empty() || email.is_empty() {
        return Err(ApiError::InvalidInput("username and email are required".to_string()));
    }
    if node.persistence.user_exists(&username, &email)? {
        return Err(ApiError::Conflict("User is already registered".to_string()));
    }

    let id = new_object_id();
    let extra = json!({ "user": { "id": id, "username": username, "email": email } });
    let (user_id, name, mail) = (id.clone(), username, email);
    let record = seal_document(&node, user_payload(&id), move |seal| {
        Document::User(User {
            id: user_id,
            username: name,
            email: mail,
            seal,
        })
    })
    .await?;

    info!("Registered user {} in record {}", id, record.digest);
    Ok(Json(SealedResponse::new(record, extra)))
}

async fn new_post(
    State(node): State<Arc<Node>>,
    Form(form): Form<NewPostForm>,
) -> Result<Json<SealedResponse>, ApiError> {
    check_secret(&node, &form.secret_key)?;
    let owner = require_user(&node, &form.id)?;

    let post_id = new_object_id();
    let id = post_id.clone();
    let owner_id = owner.id.clone();
    let record = seal_document(&node, post_payload(&post_id, &owner.id), move |seal| {
        Document::Post(Post {
            id,
            owner: owner_id,
            seal,
        })
    })
    .await?;

    info!("Stored post {} in record {}", post_id, record.digest);
    Ok(Json(SealedResponse::new(record, json!({ "post_id": post_id }))))
}

async fn new_comment(
    State(node): State<Arc<Node>>,
    Form(form): Form<NewCommentForm>,
) -> Result<Json<SealedResponse>, ApiError> {
    check_secret(&node, &form.secret_key)?;
    let author = require_user(&node, &form.id)?;
    let owner = require_user(&node, &form.post_owner_id)?;
    let post = node
        .persistence
        .find_post(&form.post_id)?
        .ok_or_else(|| ApiError::NotFound(format!("Post {} not found", form.post_id)))?;

    let comment_id = new_object_id();
    let payload = comment_payload(&comment_id, &post.id, &owner.id, &author.id);
    let id = comment_id.clone();
    let record = seal_document(&node, payload, move |seal| {
        Document::Comment(Comment {
            id,
            owner: owner.id,
            user_id: author.id,
            post: post.id,
            seal,
        })
    })
    .await?;

    info!("Stored comment {} in record {}", comment_id, record.digest);
    Ok(Json(SealedResponse::new(record, json!({ "comment_id": comment_id }))))
}

async fn chain_summary(State(node): State<Arc<Node>>) -> impl IntoResponse {
    let tail = node.ledger.tail();
    Json(json!({
        "length": node.ledger.len(),
        "difficulty": node.ledger.difficulty(),
        "tail": tail.digest,
    }))
}

async fn get_record(
    State(node): State<Arc<Node>>,
    Path(height): Path<usize>,
) -> Result<Json<Record>, ApiError> {
    node.ledger
        .get(height)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Record at height {} not found", height)))
}

async fn validate_chain(State(node): State<Arc<Node>>) -> Result<Json<ValidationResponse>, ApiError> {
    let ledger = node.ledger.clone();
    let response = tokio::task::spawn_blocking(move || {
        let first_violation = ledger.first_violation();
        ValidationResponse {
            valid: first_violation.is_none(),
            length: ledger.len(),
            first_violation,
            insufficient_work: ledger.audit_work(),
        }
    })
    .await
    .map_err(|e| ApiError::InternalError(format!("Validation task failed: {}", e)))?;

    if let Some(violation) = &response.first_violation {
        warn!("Ledger validation failed: {}", violation);
    }
    Ok(Json(response))
}

async fn health_check(State(node): State<Arc<Node>>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy",
        records: node.ledger.len(),
        documents: node.persistence.count_documents()?,
    }))
}
