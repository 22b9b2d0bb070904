use std::sync::Arc;

use vaultsync::{
    Config,
    backend::{Backend, database::InMemory},
    config::HashingConfig,
    connection::{Connection, LocalConnection},
    server::Server,
    session::Session,
};

// ==========================
// CORE TEST FACTORIES
// ==========================
// Single point of change for backend matrix testing via TEST_BACKEND env var.

/// Creates a test backend based on TEST_BACKEND env var.
///
/// Supported values:
/// - "inmemory" or unset: InMemory backend (default)
/// - "sqlite": SQLite in-memory backend (requires `sqlite` feature)
/// - "postgres": PostgreSQL backend (requires `postgres` feature and TEST_POSTGRES_URL)
///
/// ```bash
/// TEST_BACKEND=sqlite cargo test
/// TEST_BACKEND=postgres TEST_POSTGRES_URL="postgres://localhost/vaultsync_test" cargo test
/// ```
pub async fn test_backend() -> Arc<dyn Backend> {
    match std::env::var("TEST_BACKEND").as_deref() {
        Ok("sqlite") => {
            #[cfg(feature = "sqlite")]
            {
                use vaultsync::backend::database::Sqlite;
                Arc::new(
                    Sqlite::sqlite_in_memory()
                        .await
                        .expect("Failed to create SQLite backend"),
                )
            }
            #[cfg(not(feature = "sqlite"))]
            {
                panic!("TEST_BACKEND=sqlite requires the 'sqlite' feature to be enabled")
            }
        }
        Ok("postgres") => {
            #[cfg(feature = "postgres")]
            {
                use vaultsync::backend::database::Postgres;
                let url = std::env::var("TEST_POSTGRES_URL")
                    .unwrap_or_else(|_| "postgres://localhost/vaultsync_test".to_string());
                Arc::new(
                    Postgres::connect_postgres_isolated(&url)
                        .await
                        .expect("Failed to connect to PostgreSQL"),
                )
            }
            #[cfg(not(feature = "postgres"))]
            {
                panic!("TEST_BACKEND=postgres requires the 'postgres' feature to be enabled")
            }
        }
        Ok("inmemory") | Err(_) => Arc::new(InMemory::new()),
        Ok(other) => panic!("Unknown TEST_BACKEND: {other}"),
    }
}

/// Fast hashing and a tight sweep so commits land within milliseconds.
pub fn test_config() -> Config {
    Config {
        hashing: HashingConfig::insecure_fast(),
        commit_sweep_interval_ms: 5,
        commit_poll_interval_ms: 5,
        commit_wait_timeout_ms: 10_000,
        ..Config::default()
    }
}

/// A server over the test backend with its coordinator running.
pub async fn test_server() -> Server {
    let server = Server::new(test_backend().await, test_config());
    server.start().await;
    server
}

pub fn connect(server: &Server) -> Arc<dyn Connection> {
    Arc::new(LocalConnection::new(server.clone()))
}

/// Register `username` with passphrase "pw" and return its session.
pub async fn register(server: &Server, username: &str) -> Session {
    Session::register(connect(server), username, "pw", test_config())
        .await
        .expect("registration should succeed")
}

/// A second, independent login of an existing account.
pub async fn login(server: &Server, username: &str) -> Session {
    Session::login(connect(server), username, "pw", test_config())
        .await
        .expect("login should succeed")
}
