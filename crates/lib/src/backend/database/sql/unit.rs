use async_trait::async_trait;
use sqlx::Any;
use tokio::sync::OwnedMutexGuard;

use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{CommitUnit, StoredRecord, TransactionState};
use crate::crypto::SealedKey;
use crate::protocol::{AccountId, TransactionId};

use super::{SqlxResultExt, decode_str, encode_json, storage, to_db_time};

/// One database transaction. Dropping it rolls back.
pub(super) struct SqlCommitUnit {
    tx: sqlx::Transaction<'static, Any>,
    _guard: OwnedMutexGuard<()>,
}

impl SqlCommitUnit {
    pub(super) fn new(tx: sqlx::Transaction<'static, Any>, guard: OwnedMutexGuard<()>) -> Self {
        Self { tx, _guard: guard }
    }
}

#[async_trait]
impl CommitUnit for SqlCommitUnit {
    async fn container_owner(&mut self, container: &str) -> Result<Option<AccountId>> {
        storage::container_owner(&mut *self.tx, container).await
    }

    async fn insert_container(&mut self, container: &str, owner: AccountId, now: u64) -> Result<()> {
        sqlx::query(
            "INSERT INTO containers (name_hmac, owner_account_id, created_time) VALUES ($1, $2, $3)",
        )
        .bind(container)
        .bind(owner.to_string())
        .bind(to_db_time(now))
        .execute(&mut *self.tx)
        .await
        .sql_unique("Failed to insert container")?;
        Ok(())
    }

    async fn insert_session_key(
        &mut self,
        container: &str,
        account: AccountId,
        key: &SealedKey,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO container_session_keys (name_hmac, account_id, session_key_json)
             VALUES ($1, $2, $3)",
        )
        .bind(container)
        .bind(account.to_string())
        .bind(encode_json(key, "session key")?)
        .execute(&mut *self.tx)
        .await
        .sql_unique("Failed to insert session key")?;
        Ok(())
    }

    async fn account_id_by_username(&mut self, username: &str) -> Result<Option<AccountId>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT account_id FROM accounts WHERE username = $1")
                .bind(username)
                .fetch_optional(&mut *self.tx)
                .await
                .sql_context("Failed to look up account")?;
        row.map(|(id,)| decode_str(&id, "account id")).transpose()
    }

    async fn latest_record_index(&mut self, container: &str) -> Result<Option<i64>> {
        let (latest,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(record_index) FROM container_records WHERE name_hmac = $1")
                .bind(container)
                .fetch_one(&mut *self.tx)
                .await
                .sql_context("Failed to get latest record index")?;
        Ok(latest)
    }

    async fn insert_record(&mut self, record: &StoredRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO container_records (name_hmac, record_index, creation_time, payload_json)
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&record.container_name_hmac)
        .bind(record.index)
        .bind(to_db_time(record.creation_time))
        .bind(encode_json(&record.payload, "record payload")?)
        .execute(&mut *self.tx)
        .await
        .sql_unique("Failed to insert record")?;
        Ok(())
    }

    async fn delete_records_before(&mut self, container: &str, index: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM container_records WHERE name_hmac = $1 AND record_index < $2",
        )
        .bind(container)
        .bind(index)
        .execute(&mut *self.tx)
        .await
        .sql_context("Failed to delete records")?;
        Ok(result.rows_affected())
    }

    async fn mark_committed(&mut self, id: TransactionId, now: u64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE transactions SET state = $1, commit_finish_time = $2,
                 failure_kind = NULL, failure_reason = NULL
             WHERE transaction_id = $3",
        )
        .bind(TransactionState::Committed.as_str())
        .bind(to_db_time(now))
        .bind(id.to_string())
        .execute(&mut *self.tx)
        .await
        .sql_context("Failed to mark transaction committed")?;
        if result.rows_affected() == 0 {
            return Err(BackendError::NotFound {
                entity: "Transaction",
                id: id.to_string(),
            }
            .into());
        }
        storage::delete_chunks(&mut *self.tx, id).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let SqlCommitUnit { tx, _guard } = *self;
        tx.commit().await.sql_context("Failed to commit")?;
        Ok(())
    }
}
