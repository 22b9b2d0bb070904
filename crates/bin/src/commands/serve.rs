//! Serve command - runs the vaultsync HTTP server.

use std::path::PathBuf;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::signal::unix::{SignalKind, signal};
use tower_cookies::{Cookie, CookieManagerLayer, Cookies};

use vaultsync::{
    ErrorKind,
    backend::database::InMemory,
    protocol::{
        AccountId, AccountRegistration, ApiResponse, ChallengeAnswer, ChallengeInfo, Message,
        MessageId, OutgoingMessage, PeerInfo, Record, SESSION_COOKIE, SessionGrant, SessionId,
        TransactionId, TransactionStatus,
    },
    server::Server,
};

use crate::backend::{JSON_FILE, backend_name, create_backend, data_dir};
use crate::cli::ServeArgs;

/// Shared application state
#[derive(Clone)]
pub(crate) struct AppState {
    server: Server,
    backend: &'static str,
}

impl AppState {
    pub(crate) fn new(server: Server) -> Self {
        let backend = backend_name(server.backend().as_ref());
        Self { server, backend }
    }
}

/// Run the vaultsync server
pub async fn run(args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let backend = create_backend(args).await?;
    let server = Server::new(backend, args.config());
    server.start().await;

    let app_state = AppState::new(server.clone());
    let app = router(app_state.clone());

    // Bind server
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    println!("vaultsync server listening on http://{local_addr} ({})", app_state.backend);
    println!();
    println!("Available endpoints:");
    println!("  POST /account                     - Register an account");
    println!("  POST /account/{{username}}          - Login challenge");
    println!("  POST /account/{{username}}/answer   - Login answer");
    println!("  POST /transaction/create          - Open a transaction");
    println!("  POST /transaction/{{id}}            - Stage a chunk");
    println!("  POST /transaction/{{id}}/commit     - Request commit");
    println!("  GET  /transaction/{{id}}            - Transaction status");
    println!("  GET  /container/{{name}}?after=N    - Container records");
    println!("  GET  /peer/{{username}}             - Peer public keys");
    println!("  POST /peer/{{username}}/message     - Send a message");
    println!("  GET  /messages                    - Inbox");
    println!("  GET  /health                      - Health check");
    println!();
    println!("Press Ctrl+C to shutdown");

    let data_dir = data_dir(args);
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown..."),
                _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown..."),
            }
        })
        .await?;

    if let Err(e) = server.shutdown().await {
        tracing::warn!("Commit coordinator did not stop cleanly: {e}");
    }
    save_in_memory(&server, data_dir).await;

    println!("Server shut down");
    Ok(())
}

/// Persist the in-memory backend; other backends are already durable.
async fn save_in_memory(server: &Server, data_dir: PathBuf) {
    let Some(in_memory) = server.backend().as_any().downcast_ref::<InMemory>() else {
        return;
    };
    let json_path = data_dir.join(JSON_FILE);
    match in_memory.save_to_file(&json_path).await {
        Ok(()) => tracing::info!("Database saved to {}", json_path.display()),
        Err(e) => tracing::error!("Failed to save database: {e:?}"),
    }
}

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handle_health))
        .route("/account", post(handle_register))
        .route("/account/{username}", post(handle_challenge))
        .route("/account/{username}/answer", post(handle_answer))
        .route("/logout", post(handle_logout))
        .route("/transaction/create", post(handle_create_transaction))
        .route(
            "/transaction/{id}",
            post(handle_stage).get(handle_transaction_status),
        )
        .route("/transaction/{id}/commit", post(handle_request_commit))
        .route("/container/{name_hmac}", get(handle_records))
        .route("/peer/{username}", get(handle_peer))
        .route("/peer/{username}/message", post(handle_send_message))
        .route("/messages", get(handle_messages))
        .layer(CookieManagerLayer::new())
        .with_state(state)
}

// ============================================================================
// Responses
// ============================================================================

/// A library error on its way out as an HTTP response.
struct ApiError {
    kind: ErrorKind,
    message: String,
}

impl From<vaultsync::Error> for ApiError {
    fn from(err: vaultsync::Error) -> Self {
        let kind = err.kind();
        let message = match kind {
            ErrorKind::Database | ErrorKind::Internal => {
                tracing::error!(error = %err, module = err.module(), "Request failed");
                "Internal server error".to_string()
            }
            _ => err.to_string(),
        };
        Self { kind, message }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.kind {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Authentication => StatusCode::UNAUTHORIZED,
            ErrorKind::Authorization => StatusCode::FORBIDDEN,
            ErrorKind::Constraint => StatusCode::CONFLICT,
            ErrorKind::Database | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ApiResponse::<()>::err(self.kind, self.message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::ok(data)))
}

/// The session id carried by the request's cookie.
fn session(cookies: &Cookies) -> Result<SessionId, ApiError> {
    cookies
        .get(SESSION_COOKIE)
        .map(|cookie| SessionId::from(cookie.value().to_string()))
        .ok_or(ApiError {
            kind: ErrorKind::Authentication,
            message: "Not logged in".to_string(),
        })
}

// ============================================================================
// Account Handlers
// ============================================================================

/// Handler for POST /account - register a new account
async fn handle_register(
    State(state): State<AppState>,
    Json(registration): Json<AccountRegistration>,
) -> ApiResult<AccountId> {
    ok(state.server.register(&registration).await?)
}

/// Handler for POST /account/{username} - login challenge
async fn handle_challenge(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<ChallengeInfo> {
    ok(state.server.challenge(&username).await?)
}

/// Handler for POST /account/{username}/answer - login answer
async fn handle_answer(
    State(state): State<AppState>,
    Path(username): Path<String>,
    cookies: Cookies,
    Json(answer): Json<ChallengeAnswer>,
) -> ApiResult<SessionGrant> {
    let grant = state.server.answer(&username, &answer).await?;

    let mut cookie = Cookie::new(SESSION_COOKIE, grant.session_id.as_str().to_string());
    cookie.set_http_only(true);
    cookie.set_path("/");
    cookies.add(cookie);
    ok(grant)
}

/// Handler for POST /logout - destroy the session
async fn handle_logout(State(state): State<AppState>, cookies: Cookies) -> ApiResult<bool> {
    let session = session(&cookies)?;
    let existed = state.server.logout(&session).await;
    cookies.remove(Cookie::from(SESSION_COOKIE));
    ok(existed)
}

// ============================================================================
// Transaction Handlers
// ============================================================================

async fn handle_create_transaction(
    State(state): State<AppState>,
    cookies: Cookies,
) -> ApiResult<TransactionId> {
    ok(state.server.open_transaction(&session(&cookies)?).await?)
}

/// Handler for POST /transaction/{id} - stage one chunk in its JSON form
async fn handle_stage(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    cookies: Cookies,
    Json(chunk): Json<Value>,
) -> ApiResult<()> {
    ok(state.server.stage_json(&session(&cookies)?, id, chunk).await?)
}

async fn handle_request_commit(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    cookies: Cookies,
) -> ApiResult<()> {
    ok(state.server.request_commit(&session(&cookies)?, id).await?)
}

async fn handle_transaction_status(
    State(state): State<AppState>,
    Path(id): Path<TransactionId>,
    cookies: Cookies,
) -> ApiResult<TransactionStatus> {
    ok(state.server.transaction_status(&session(&cookies)?, id).await?)
}

// ============================================================================
// Container, Peer and Message Handlers
// ============================================================================

#[derive(Deserialize)]
struct RecordsQuery {
    #[serde(default)]
    after: i64,
}

async fn handle_records(
    State(state): State<AppState>,
    Path(name_hmac): Path<String>,
    Query(query): Query<RecordsQuery>,
    cookies: Cookies,
) -> ApiResult<Vec<Record>> {
    ok(state
        .server
        .records(&session(&cookies)?, &name_hmac, query.after)
        .await?)
}

async fn handle_peer(
    State(state): State<AppState>,
    Path(username): Path<String>,
    cookies: Cookies,
) -> ApiResult<PeerInfo> {
    ok(state.server.peer(&session(&cookies)?, &username).await?)
}

async fn handle_send_message(
    State(state): State<AppState>,
    Path(username): Path<String>,
    cookies: Cookies,
    Json(message): Json<OutgoingMessage>,
) -> ApiResult<MessageId> {
    ok(state
        .server
        .send_message(&session(&cookies)?, &username, message.headers, message.body)
        .await?)
}

async fn handle_messages(State(state): State<AppState>, cookies: Cookies) -> ApiResult<Vec<Message>> {
    ok(state.server.messages(&session(&cookies)?).await?)
}

// ============================================================================
// Health
// ============================================================================

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    backend: &'static str,
    /// RFC 3339, from the clock that stamps records
    server_time: String,
}

/// Handler for GET /health - Health check endpoint
async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        backend: state.backend,
        server_time: state.server.clock().now_utc().to_rfc3339(),
    })
}
