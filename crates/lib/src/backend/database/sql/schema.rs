//! SQL schema definitions and migrations.
//!
//! The schema is portable between SQLite and PostgreSQL. Timestamps are
//! milliseconds since the Unix epoch stored as `BIGINT`; identifiers are UUID
//! strings; ciphertext and envelopes are stored as base64 or JSON text.
//!
//! # Migration System
//!
//! Migrations are code-based rather than SQL files so each step can issue
//! dialect-specific SQL when needed.
//!
//! ## Adding a New Migration
//!
//! 1. Increment `SCHEMA_VERSION`
//! 2. Add a new `migrate_vN_to_vM` async function
//! 3. Add the migration to the match statement in `run_migration`

use crate::Result;
use crate::backend::errors::BackendError;

use super::{SqlxBackend, SqlxResultExt};

/// Current schema version.
pub const SCHEMA_VERSION: i64 = 1;

/// SQL statements to create the schema tables.
pub const CREATE_TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version BIGINT PRIMARY KEY
    )",
    // Only the slow hash of the challenge key is kept
    "CREATE TABLE IF NOT EXISTS accounts (
        account_id TEXT PRIMARY KEY NOT NULL,
        username TEXT NOT NULL UNIQUE,
        challenge_key_hash TEXT NOT NULL,
        challenge_key_salt TEXT NOT NULL,
        keyring_salt TEXT NOT NULL,
        keyring TEXT NOT NULL,
        signing_key TEXT NOT NULL,
        encryption_key TEXT NOT NULL,
        created_time BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS transactions (
        transaction_id TEXT PRIMARY KEY NOT NULL,
        account_id TEXT NOT NULL,
        state TEXT NOT NULL,
        created_time BIGINT NOT NULL,
        commit_request_time BIGINT,
        commit_start_time BIGINT,
        commit_finish_time BIGINT,
        attempts BIGINT NOT NULL DEFAULT 0,
        failure_kind TEXT,
        failure_reason TEXT
    )",
    // account_id is the account that staged the chunk
    "CREATE TABLE IF NOT EXISTS transaction_chunks (
        transaction_id TEXT NOT NULL,
        chunk_index BIGINT NOT NULL,
        account_id TEXT NOT NULL,
        chunk_json TEXT NOT NULL,
        PRIMARY KEY (transaction_id, chunk_index)
    )",
    "CREATE TABLE IF NOT EXISTS containers (
        name_hmac TEXT PRIMARY KEY NOT NULL,
        owner_account_id TEXT NOT NULL,
        created_time BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS container_session_keys (
        name_hmac TEXT NOT NULL,
        account_id TEXT NOT NULL,
        session_key_json TEXT NOT NULL,
        PRIMARY KEY (name_hmac, account_id)
    )",
    // The primary key enforces one record per index
    "CREATE TABLE IF NOT EXISTS container_records (
        name_hmac TEXT NOT NULL,
        record_index BIGINT NOT NULL,
        creation_time BIGINT NOT NULL,
        payload_json TEXT NOT NULL,
        PRIMARY KEY (name_hmac, record_index)
    )",
    "CREATE TABLE IF NOT EXISTS messages (
        message_id TEXT PRIMARY KEY NOT NULL,
        to_account_id TEXT NOT NULL,
        from_account_id TEXT NOT NULL,
        from_username TEXT NOT NULL,
        headers_json TEXT NOT NULL,
        body_json TEXT NOT NULL,
        creation_time BIGINT NOT NULL
    )",
];

/// SQL statements to create indexes.
pub const CREATE_INDEXES: &[&str] = &[
    // Coordinator sweep
    "CREATE INDEX IF NOT EXISTS idx_transactions_pending ON transactions(state, commit_request_time)",
    "CREATE INDEX IF NOT EXISTS idx_session_keys_account ON container_session_keys(account_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_to ON messages(to_account_id, creation_time)",
];

/// Initialize the database schema.
///
/// Creates tables and indexes if they don't exist, and handles migrations
/// if the schema version has changed.
pub async fn initialize(backend: &SqlxBackend) -> Result<()> {
    let pool = backend.pool();

    for statement in CREATE_TABLES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Schema creation failed: {e} - SQL: {statement}"),
                source: Some(e),
            })?;
    }

    let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM schema_version")
        .fetch_optional(pool)
        .await
        .sql_context("Failed to check schema version")?;

    match row {
        None => {
            sqlx::query("INSERT INTO schema_version (version) VALUES ($1)")
                .bind(SCHEMA_VERSION)
                .execute(pool)
                .await
                .sql_context("Failed to initialize schema version")?;
        }
        Some((current,)) if current < SCHEMA_VERSION => {
            migrate(backend, current, SCHEMA_VERSION).await?;
        }
        Some((current,)) if current > SCHEMA_VERSION => {
            return Err(BackendError::Storage {
                reason: format!(
                    "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
                ),
            }
            .into());
        }
        Some(_) => {}
    }

    for statement in CREATE_INDEXES {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| BackendError::SqlxError {
                reason: format!("Index creation failed: {e} - SQL: {statement}"),
                source: Some(e),
            })?;
    }

    Ok(())
}

/// Run migrations sequentially from one schema version to another.
async fn migrate(backend: &SqlxBackend, from: i64, to: i64) -> Result<()> {
    tracing::info!(from, to, "Starting SQL schema migration");

    let mut current = from;
    while current < to {
        let next = current + 1;
        tracing::info!(from = current, to = next, "Running migration");

        run_migration(backend, current, next).await?;

        sqlx::query("UPDATE schema_version SET version = $1")
            .bind(next)
            .execute(backend.pool())
            .await
            .sql_context(&format!("Failed to update schema version to {next}"))?;

        tracing::info!(version = next, "Migration completed");
        current = next;
    }

    Ok(())
}

/// Execute a single migration step.
async fn run_migration(_backend: &SqlxBackend, from: i64, to: i64) -> Result<()> {
    // No migrations exist yet; version 1 is the initial schema.
    Err(BackendError::Storage {
        reason: format!("No migration defined from schema version {from} to {to}"),
    }
    .into())
}
