//! Backend creation and utility functions.

use std::path::PathBuf;
use std::sync::Arc;

use vaultsync::backend::Backend;
use vaultsync::backend::database::{DbKind, InMemory, SqlxBackend};

use crate::cli::{self, ServeArgs};

/// File name of the SQLite database inside the data directory.
pub const SQLITE_FILE: &str = "vaultsync.db";
/// File name of the in-memory backend snapshot inside the data directory.
pub const JSON_FILE: &str = "vaultsync.json";

/// Redact credentials from a PostgreSQL connection URL for safe logging
pub fn redact_postgres_url(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return "postgres://***@<unparsable-url>".to_string();
    };
    match rest.rsplit_once('@') {
        Some((_, host)) => format!("{scheme}://***@{host}"),
        None => url.to_string(),
    }
}

/// The data directory, defaulting to the working directory.
pub fn data_dir(args: &ServeArgs) -> PathBuf {
    args.data_dir.clone().unwrap_or_else(|| PathBuf::from("."))
}

/// Create the appropriate backend based on configuration
pub async fn create_backend(
    args: &ServeArgs,
) -> Result<Arc<dyn Backend>, Box<dyn std::error::Error>> {
    let data_dir = data_dir(args);

    // Ensure data directory exists
    tokio::fs::create_dir_all(&data_dir).await?;

    match args.backend {
        cli::Backend::Sqlite => {
            let db_path = data_dir.join(SQLITE_FILE);
            tracing::info!("Using SQLite backend at {}", db_path.display());
            Ok(Arc::new(SqlxBackend::open_sqlite(&db_path).await?))
        }
        cli::Backend::Postgres => {
            let url = args
                .postgres_url
                .as_ref()
                .ok_or("PostgreSQL backend requires --postgres-url or VAULTSYNC_POSTGRES_URL")?;

            let display_url = redact_postgres_url(url);
            tracing::info!("Connecting to PostgreSQL backend at {}", display_url);

            match SqlxBackend::connect_postgres(url).await {
                Ok(backend) => {
                    tracing::info!("Connected to PostgreSQL successfully");
                    Ok(Arc::new(backend))
                }
                Err(e) => {
                    Err(format!("Failed to connect to PostgreSQL at {display_url}: {e}").into())
                }
            }
        }
        cli::Backend::Inmemory => {
            let json_path = data_dir.join(JSON_FILE);
            tracing::info!(
                "Using in-memory backend with persistence at {}",
                json_path.display()
            );
            Ok(Arc::new(InMemory::load_from_file(&json_path).await?))
        }
    }
}

/// Short name of the backend behind the trait object.
pub fn backend_name(backend: &dyn Backend) -> &'static str {
    if let Some(sqlx) = backend.as_any().downcast_ref::<SqlxBackend>() {
        match sqlx.kind() {
            DbKind::Sqlite => "sqlite",
            DbKind::Postgres => "postgres",
        }
    } else if backend.as_any().is::<InMemory>() {
        "inmemory"
    } else {
        "unknown"
    }
}
