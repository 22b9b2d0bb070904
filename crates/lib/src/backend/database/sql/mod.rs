//! Relational storage over sqlx's `AnyPool`.
//!
//! One [`SqlxBackend`] serves both SQLite (feature `sqlite`) and PostgreSQL
//! (feature `postgres`). Queries use `$n` placeholders, which both dialects
//! accept through the `Any` driver. Each [`CommitUnit`] is one database
//! transaction, and units are serialized in-process so a SQLite file never
//! sees two writers racing on the same container.
//!
//! Tables are created by [`schema::initialize`] on connect.

mod storage;
mod unit;

/// Schema definition and migration system.
pub mod schema;

use std::any::Any;
use std::sync::Arc;
#[cfg(feature = "postgres")]
use std::time::Duration;

use async_trait::async_trait;
use sqlx::AnyPool;
#[cfg(feature = "postgres")]
use sqlx::Executor;
use sqlx::any::AnyPoolOptions;
use tokio::sync::Mutex;

use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{
    AccountRow, Backend, CommitOutcome, CommitUnit, NewMessage, StagedChunk, StoredRecord,
    TransactionRow,
};
use crate::crypto::SealedKey;
use crate::protocol::{AccountId, Message, TransactionId};

/// Attach context to sqlx failures.
pub(crate) trait SqlxResultExt<T> {
    fn sql_context(self, context: &str) -> Result<T>;

    /// Like [`SqlxResultExt::sql_context`], but a unique-key violation becomes
    /// a [`BackendError::Constraint`].
    fn sql_unique(self, context: &str) -> Result<T>;
}

impl<T> SqlxResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn sql_context(self, context: &str) -> Result<T> {
        self.map_err(|e| {
            BackendError::SqlxError {
                reason: format!("{context}: {e}"),
                source: Some(e),
            }
            .into()
        })
    }

    fn sql_unique(self, context: &str) -> Result<T> {
        match self {
            Err(e) if is_unique_violation(&e) => Err(BackendError::Constraint {
                reason: format!("{context}: {e}"),
            }
            .into()),
            other => other.sql_context(context),
        }
    }
}

/// Postgres reports `23505`; SQLite reports extended codes 2067 (UNIQUE) and
/// 1555 (PRIMARY KEY).
fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db_error) => {
            db_error.is_unique_violation()
                || matches!(db_error.code().as_deref(), Some("23505" | "2067" | "1555"))
        }
        _ => false,
    }
}

/// Maps a stored JSON column back to its type.
fn decode_json<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> Result<T> {
    serde_json::from_str(json).map_err(|e| {
        BackendError::Corrupt {
            reason: format!("invalid stored {what}: {e}"),
        }
        .into()
    })
}

fn encode_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        BackendError::Storage {
            reason: format!("failed to encode {what}: {e}"),
        }
        .into()
    })
}

/// Maps a stored text column back to a type with a `FromStr`.
fn decode_str<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value.parse().map_err(|_| {
        BackendError::Corrupt {
            reason: format!("invalid stored {what}: {value}"),
        }
        .into()
    })
}

/// Timestamps are `u64` milliseconds in memory and `BIGINT` in the database.
fn to_db_time(millis: u64) -> i64 {
    i64::try_from(millis).unwrap_or(i64::MAX)
}

fn from_db_time(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Database backend kind for SQL dialect selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    /// SQLite database
    Sqlite,
    /// PostgreSQL database
    Postgres,
}

/// [`Backend`] over a SQLite or PostgreSQL pool.
pub struct SqlxBackend {
    pool: AnyPool,
    kind: DbKind,
    /// Held by each live [`CommitUnit`].
    commit_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SqlxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlxBackend")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SqlxBackend {
    fn from_pool(pool: AnyPool, kind: DbKind) -> Self {
        Self {
            pool,
            kind,
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub fn kind(&self) -> DbKind {
        self.kind
    }

    /// Check if this backend is using SQLite.
    pub fn is_sqlite(&self) -> bool {
        self.kind == DbKind::Sqlite
    }

    /// Check if this backend is using PostgreSQL.
    pub fn is_postgres(&self) -> bool {
        self.kind == DbKind::Postgres
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

const POOL_SIZE: u32 = 5;

#[cfg(feature = "sqlite")]
impl SqlxBackend {
    /// Open (or create) the SQLite database file at `path`.
    pub async fn open_sqlite<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let url = format!("sqlite:{}?mode=rwc", path.as_ref().display());
        Self::connect_sqlite(&url).await
    }

    /// Connect with a full SQLite URL such as `sqlite:./vaultsync.db`.
    pub async fn connect_sqlite(url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();

        // A shared-cache memory database lives only while a connection does
        let memory = url.contains("mode=memory");
        let mut options = AnyPoolOptions::new().max_connections(POOL_SIZE);
        if memory {
            options = options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }
        let pool = options
            .connect(url)
            .await
            .sql_context("Failed to open SQLite database")?;

        let pragmas = if memory {
            "PRAGMA busy_timeout = 5000;"
        } else {
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;"
        };
        sqlx::query(pragmas)
            .execute(&pool)
            .await
            .sql_context("Failed to set SQLite pragmas")?;

        let backend = Self::from_pool(pool, DbKind::Sqlite);
        schema::initialize(&backend).await?;
        tracing::debug!(url, "Opened SQLite backend");
        Ok(backend)
    }

    /// A private in-memory database, mostly for tests.
    pub async fn sqlite_in_memory() -> Result<Self> {
        let name = uuid::Uuid::new_v4().simple();
        Self::connect_sqlite(&format!("sqlite:file:vaultsync_{name}?mode=memory&cache=shared")).await
    }
}

#[cfg(feature = "postgres")]
impl SqlxBackend {
    /// Connect to PostgreSQL, using the server's default `search_path`.
    pub async fn connect_postgres(url: &str) -> Result<Self> {
        Self::connect_postgres_in(url, None).await
    }

    /// Connect to PostgreSQL inside a fresh schema of its own.
    ///
    /// Each call gets an empty set of tables, so parallel tests against one
    /// server do not see each other's accounts.
    pub async fn connect_postgres_isolated(url: &str) -> Result<Self> {
        let schema = format!("vaultsync_test_{}", uuid::Uuid::new_v4().simple());
        Self::connect_postgres_in(url, Some(schema)).await
    }

    async fn connect_postgres_in(url: &str, schema: Option<String>) -> Result<Self> {
        sqlx::any::install_default_drivers();

        let mut options = AnyPoolOptions::new().max_connections(POOL_SIZE);
        if let Some(schema) = schema {
            let setup = AnyPoolOptions::new()
                .max_connections(1)
                .connect(url)
                .await
                .sql_context("Failed to connect to PostgreSQL")?;
            sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
                .execute(&setup)
                .await
                .sql_context("Failed to create schema")?;
            setup.close().await;

            options = options
                .max_connections(2)
                .acquire_timeout(Duration::from_secs(30))
                .after_connect(move |conn, _meta| {
                    let set_path = format!("SET search_path TO {schema}");
                    Box::pin(async move {
                        conn.execute(set_path.as_str()).await?;
                        Ok(())
                    })
                });
        }

        let pool = options
            .connect(url)
            .await
            .sql_context("Failed to connect to PostgreSQL")?;
        let backend = Self::from_pool(pool, DbKind::Postgres);
        schema::initialize(&backend).await?;
        Ok(backend)
    }
}

#[async_trait]
impl Backend for SqlxBackend {
    async fn insert_account(&self, account: &AccountRow) -> Result<()> {
        storage::insert_account(self, account).await
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        storage::account_by_username(self, username).await
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<AccountRow>> {
        storage::account_by_id(self, id).await
    }

    async fn insert_transaction(&self, transaction: &TransactionRow) -> Result<()> {
        storage::insert_transaction(self, transaction).await
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRow>> {
        storage::transaction(self.pool(), id).await
    }

    async fn append_chunk(&self, id: TransactionId, staged: &StagedChunk) -> Result<bool> {
        storage::append_chunk(self, id, staged).await
    }

    async fn chunks(&self, id: TransactionId) -> Result<Vec<StagedChunk>> {
        storage::chunks(self, id).await
    }

    async fn request_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        storage::request_commit(self, id, now).await
    }

    async fn pending_commits(&self) -> Result<Vec<TransactionRow>> {
        storage::pending_commits(self).await
    }

    async fn claim_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        storage::claim_commit(self, id, now).await
    }

    async fn release_commit(
        &self,
        id: TransactionId,
        outcome: &CommitOutcome,
        now: u64,
    ) -> Result<()> {
        storage::release_commit(self, id, outcome, now).await
    }

    async fn begin_commit(&self) -> Result<Box<dyn CommitUnit>> {
        let guard = self.commit_lock.clone().lock_owned().await;
        let tx = self
            .pool
            .begin()
            .await
            .sql_context("Failed to begin commit")?;
        Ok(Box::new(unit::SqlCommitUnit::new(tx, guard)))
    }

    async fn records_after(&self, container: &str, after: i64) -> Result<Vec<StoredRecord>> {
        storage::records_after(self, container, after).await
    }

    async fn container_owner(&self, container: &str) -> Result<Option<AccountId>> {
        storage::container_owner(self.pool(), container).await
    }

    async fn session_key(&self, container: &str, account: AccountId) -> Result<Option<SealedKey>> {
        storage::session_key(self, container, account).await
    }

    async fn key_holders(&self, container: &str) -> Result<Vec<AccountId>> {
        storage::key_holders(self, container).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        storage::insert_message(self, message).await
    }

    async fn messages_for(&self, account: AccountId) -> Result<Vec<Message>> {
        storage::messages_for(self, account).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// [`SqlxBackend`] opened on SQLite.
#[cfg(feature = "sqlite")]
pub type Sqlite = SqlxBackend;

/// [`SqlxBackend`] connected to PostgreSQL.
#[cfg(feature = "postgres")]
pub type Postgres = SqlxBackend;
