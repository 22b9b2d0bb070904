//! Query functions for SQL backends.
//!
//! Every function here is a single statement (or a read followed by a
//! compare-and-set update) against the pool. Writes that must commit together
//! live in [`super::unit`].

use sqlx::Any;

use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{
    AccountRow, CommitOutcome, Failure, NewMessage, StagedChunk, StoredRecord, TransactionRow,
    TransactionState,
};
use crate::crypto::{self, Ciphertext, EncryptionPublicKey, PublicKey, SealedKey};
use crate::protocol::{AccountId, Message, TransactionId};
use crate::ErrorKind;

use super::{
    SqlxBackend, SqlxResultExt, decode_json, decode_str, encode_json, from_db_time, to_db_time,
};

type AccountTuple = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
);

const ACCOUNT_COLUMNS: &str = "account_id, username, challenge_key_hash, challenge_key_salt, \
     keyring_salt, keyring, signing_key, encryption_key, created_time";

fn account_from_row(row: AccountTuple) -> Result<AccountRow> {
    let (
        id,
        username,
        challenge_key_hash,
        challenge_key_salt,
        keyring_salt,
        keyring,
        signing_key,
        encryption_key,
        created_time,
    ) = row;
    let corrupt = |what: &str, e: crypto::CryptoError| -> crate::Error {
        BackendError::Corrupt {
            reason: format!("invalid stored {what}: {e}"),
        }
        .into()
    };
    Ok(AccountRow {
        id: decode_str(&id, "account id")?,
        username,
        challenge_key_hash,
        challenge_key_salt,
        keyring_salt,
        keyring: Ciphertext::from_bytes(
            crypto::decode_base64(&keyring).map_err(|e| corrupt("keyring", e))?,
        ),
        signing_key: PublicKey::from_prefixed_string(&signing_key)
            .map_err(|e| corrupt("signing key", e))?,
        encryption_key: EncryptionPublicKey::from_prefixed_string(&encryption_key)
            .map_err(|e| corrupt("encryption key", e))?,
        created_time: from_db_time(created_time),
    })
}

pub async fn insert_account(backend: &SqlxBackend, account: &AccountRow) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO accounts ({ACCOUNT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
    ))
    .bind(account.id.to_string())
    .bind(&account.username)
    .bind(&account.challenge_key_hash)
    .bind(&account.challenge_key_salt)
    .bind(&account.keyring_salt)
    .bind(crypto::encode_base64(account.keyring.as_bytes()))
    .bind(account.signing_key.to_prefixed_string())
    .bind(account.encryption_key.to_prefixed_string())
    .bind(to_db_time(account.created_time))
    .execute(backend.pool())
    .await
    .sql_unique("Failed to insert account")?;
    Ok(())
}

pub async fn account_by_username(
    backend: &SqlxBackend,
    username: &str,
) -> Result<Option<AccountRow>> {
    let row: Option<AccountTuple> = sqlx::query_as(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(backend.pool())
    .await
    .sql_context("Failed to get account")?;
    row.map(account_from_row).transpose()
}

pub async fn account_by_id(backend: &SqlxBackend, id: AccountId) -> Result<Option<AccountRow>> {
    let row: Option<AccountTuple> = sqlx::query_as(&format!(
        "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE account_id = $1"
    ))
    .bind(id.to_string())
    .fetch_optional(backend.pool())
    .await
    .sql_context("Failed to get account")?;
    row.map(account_from_row).transpose()
}

type TransactionTuple = (
    String,
    String,
    String,
    i64,
    Option<i64>,
    Option<i64>,
    Option<i64>,
    i64,
    Option<String>,
    Option<String>,
);

const TRANSACTION_COLUMNS: &str = "transaction_id, account_id, state, created_time, \
     commit_request_time, commit_start_time, commit_finish_time, attempts, \
     failure_kind, failure_reason";

fn transaction_from_row(row: TransactionTuple) -> Result<TransactionRow> {
    let (
        id,
        account_id,
        state,
        created_time,
        commit_request_time,
        commit_start_time,
        commit_finish_time,
        attempts,
        failure_kind,
        failure_reason,
    ) = row;

    let state = TransactionState::parse(&state).ok_or_else(|| BackendError::Corrupt {
        reason: format!("invalid stored transaction state: {state}"),
    })?;
    let failure = match (failure_kind, failure_reason) {
        (Some(kind), reason) => Some(Failure {
            kind: ErrorKind::parse(&kind).unwrap_or(ErrorKind::Internal),
            reason: reason.unwrap_or_default(),
        }),
        (None, _) => None,
    };

    Ok(TransactionRow {
        id: decode_str(&id, "transaction id")?,
        account_id: decode_str(&account_id, "account id")?,
        state,
        created_time: from_db_time(created_time),
        commit_request_time: commit_request_time.map(from_db_time),
        commit_start_time: commit_start_time.map(from_db_time),
        commit_finish_time: commit_finish_time.map(from_db_time),
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        failure,
    })
}

fn transaction_not_found(id: TransactionId) -> crate::Error {
    BackendError::NotFound {
        entity: "Transaction",
        id: id.to_string(),
    }
    .into()
}

pub async fn insert_transaction(backend: &SqlxBackend, transaction: &TransactionRow) -> Result<()> {
    sqlx::query(
        "INSERT INTO transactions (transaction_id, account_id, state, created_time, attempts)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(transaction.id.to_string())
    .bind(transaction.account_id.to_string())
    .bind(transaction.state.as_str())
    .bind(to_db_time(transaction.created_time))
    .bind(i64::from(transaction.attempts))
    .execute(backend.pool())
    .await
    .sql_unique("Failed to insert transaction")?;
    Ok(())
}

pub async fn transaction<'e, E>(executor: E, id: TransactionId) -> Result<Option<TransactionRow>>
where
    E: sqlx::Executor<'e, Database = Any>,
{
    let row: Option<TransactionTuple> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = $1"
    ))
    .bind(id.to_string())
    .fetch_optional(executor)
    .await
    .sql_context("Failed to get transaction")?;
    row.map(transaction_from_row).transpose()
}

async fn transaction_exists(backend: &SqlxBackend, id: TransactionId) -> Result<bool> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT transaction_id FROM transactions WHERE transaction_id = $1")
            .bind(id.to_string())
            .fetch_optional(backend.pool())
            .await
            .sql_context("Failed to look up transaction")?;
    Ok(row.is_some())
}

pub async fn append_chunk(
    backend: &SqlxBackend,
    id: TransactionId,
    staged: &StagedChunk,
) -> Result<bool> {
    let chunk_json = encode_json(&staged.chunk, "chunk")?;
    let mut tx = backend
        .pool()
        .begin()
        .await
        .sql_context("Failed to begin staging")?;

    // Holds the row lock until commit, so a concurrent `request_commit` waits
    // for this chunk instead of sealing the transaction without it.
    let locked = sqlx::query(
        "UPDATE transactions SET state = state WHERE transaction_id = $1 AND state = $2",
    )
    .bind(id.to_string())
    .bind(TransactionState::Open.as_str())
    .execute(&mut *tx)
    .await
    .sql_context("Failed to lock transaction")?;

    if locked.rows_affected() == 0 {
        tx.rollback().await.sql_context("Failed to roll back staging")?;
        if !transaction_exists(backend, id).await? {
            return Err(transaction_not_found(id));
        }
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO transaction_chunks (transaction_id, chunk_index, account_id, chunk_json)
         SELECT $1, COALESCE(MAX(chunk_index), -1) + 1, $2, $3
         FROM transaction_chunks WHERE transaction_id = $1",
    )
    .bind(id.to_string())
    .bind(staged.account_id.to_string())
    .bind(&chunk_json)
    .execute(&mut *tx)
    .await
    .sql_unique("Failed to stage chunk")?;

    tx.commit().await.sql_context("Failed to commit staged chunk")?;
    Ok(true)
}

pub async fn chunks(backend: &SqlxBackend, id: TransactionId) -> Result<Vec<StagedChunk>> {
    if !transaction_exists(backend, id).await? {
        return Err(transaction_not_found(id));
    }

    let rows: Vec<(String, String)> = sqlx::query_as(
        "SELECT account_id, chunk_json FROM transaction_chunks
         WHERE transaction_id = $1 ORDER BY chunk_index",
    )
    .bind(id.to_string())
    .fetch_all(backend.pool())
    .await
    .sql_context("Failed to get chunks")?;

    rows.into_iter()
        .map(|(account_id, chunk_json)| {
            Ok(StagedChunk {
                account_id: decode_str(&account_id, "account id")?,
                chunk: decode_json(&chunk_json, "chunk")?,
            })
        })
        .collect()
}

pub async fn request_commit(backend: &SqlxBackend, id: TransactionId, now: u64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE transactions SET state = $1, commit_request_time = $2
         WHERE transaction_id = $3 AND state = $4",
    )
    .bind(TransactionState::CommitRequested.as_str())
    .bind(to_db_time(now))
    .bind(id.to_string())
    .bind(TransactionState::Open.as_str())
    .execute(backend.pool())
    .await
    .sql_context("Failed to request commit")?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }
    if !transaction_exists(backend, id).await? {
        return Err(transaction_not_found(id));
    }
    Ok(false)
}

pub async fn pending_commits(backend: &SqlxBackend) -> Result<Vec<TransactionRow>> {
    let rows: Vec<TransactionTuple> = sqlx::query_as(&format!(
        "SELECT {TRANSACTION_COLUMNS} FROM transactions
         WHERE state = $1 AND commit_request_time IS NOT NULL AND commit_start_time IS NULL
         ORDER BY commit_request_time, created_time"
    ))
    .bind(TransactionState::CommitRequested.as_str())
    .fetch_all(backend.pool())
    .await
    .sql_context("Failed to list pending commits")?;
    rows.into_iter().map(transaction_from_row).collect()
}

pub async fn claim_commit(backend: &SqlxBackend, id: TransactionId, now: u64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE transactions SET state = $1, commit_start_time = $2
         WHERE transaction_id = $3 AND state = $4 AND commit_start_time IS NULL",
    )
    .bind(TransactionState::Committing.as_str())
    .bind(to_db_time(now))
    .bind(id.to_string())
    .bind(TransactionState::CommitRequested.as_str())
    .execute(backend.pool())
    .await
    .sql_context("Failed to claim commit")?;

    if result.rows_affected() == 1 {
        return Ok(true);
    }
    if !transaction_exists(backend, id).await? {
        return Err(transaction_not_found(id));
    }
    Ok(false)
}

pub async fn release_commit(
    backend: &SqlxBackend,
    id: TransactionId,
    outcome: &CommitOutcome,
    now: u64,
) -> Result<()> {
    let query = match outcome {
        CommitOutcome::Retry(failure) => sqlx::query(
            "UPDATE transactions SET attempts = attempts + 1, state = $1,
                 commit_start_time = NULL, failure_kind = $2, failure_reason = $3
             WHERE transaction_id = $4",
        )
        .bind(TransactionState::CommitRequested.as_str())
        .bind(failure.kind.as_str())
        .bind(failure.reason.clone())
        .bind(id.to_string()),
        CommitOutcome::Failed(failure) => sqlx::query(
            "UPDATE transactions SET attempts = attempts + 1, state = $1,
                 commit_finish_time = $2, failure_kind = $3, failure_reason = $4
             WHERE transaction_id = $5",
        )
        .bind(TransactionState::Failed.as_str())
        .bind(to_db_time(now))
        .bind(failure.kind.as_str())
        .bind(failure.reason.clone())
        .bind(id.to_string()),
    };

    let mut tx = backend
        .pool()
        .begin()
        .await
        .sql_context("Failed to begin release")?;
    let result = query
        .execute(&mut *tx)
        .await
        .sql_context("Failed to release commit")?;
    if result.rows_affected() == 0 {
        return Err(transaction_not_found(id));
    }
    if matches!(outcome, CommitOutcome::Failed(_)) {
        delete_chunks(&mut *tx, id).await?;
    }
    tx.commit().await.sql_context("Failed to commit release")?;
    Ok(())
}

/// Drop the staged chunks of a finalized transaction.
pub async fn delete_chunks<'e, E>(executor: E, id: TransactionId) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Any>,
{
    sqlx::query("DELETE FROM transaction_chunks WHERE transaction_id = $1")
        .bind(id.to_string())
        .execute(executor)
        .await
        .sql_context("Failed to delete chunks")?;
    Ok(())
}

pub async fn records_after(
    backend: &SqlxBackend,
    container: &str,
    after: i64,
) -> Result<Vec<StoredRecord>> {
    let rows: Vec<(i64, i64, String)> = sqlx::query_as(
        "SELECT record_index, creation_time, payload_json FROM container_records
         WHERE name_hmac = $1 AND record_index > $2 ORDER BY record_index",
    )
    .bind(container)
    .bind(after)
    .fetch_all(backend.pool())
    .await
    .sql_context("Failed to get records")?;

    rows.into_iter()
        .map(|(index, creation_time, payload_json)| {
            Ok(StoredRecord {
                container_name_hmac: container.to_string(),
                index,
                creation_time: from_db_time(creation_time),
                payload: decode_json(&payload_json, "record payload")?,
            })
        })
        .collect()
}

pub async fn container_owner<'e, E>(executor: E, container: &str) -> Result<Option<AccountId>>
where
    E: sqlx::Executor<'e, Database = Any>,
{
    let row: Option<(String,)> =
        sqlx::query_as("SELECT owner_account_id FROM containers WHERE name_hmac = $1")
            .bind(container)
            .fetch_optional(executor)
            .await
            .sql_context("Failed to get container owner")?;
    row.map(|(owner,)| decode_str(&owner, "account id"))
        .transpose()
}

pub async fn session_key(
    backend: &SqlxBackend,
    container: &str,
    account: AccountId,
) -> Result<Option<SealedKey>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT session_key_json FROM container_session_keys
         WHERE name_hmac = $1 AND account_id = $2",
    )
    .bind(container)
    .bind(account.to_string())
    .fetch_optional(backend.pool())
    .await
    .sql_context("Failed to get session key")?;
    row.map(|(json,)| decode_json(&json, "session key"))
        .transpose()
}

pub async fn key_holders(backend: &SqlxBackend, container: &str) -> Result<Vec<AccountId>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT account_id FROM container_session_keys WHERE name_hmac = $1 ORDER BY account_id",
    )
    .bind(container)
    .fetch_all(backend.pool())
    .await
    .sql_context("Failed to list key holders")?;
    rows.iter()
        .map(|(id,)| decode_str(id, "account id"))
        .collect()
}

pub async fn insert_message(backend: &SqlxBackend, message: &NewMessage) -> Result<()> {
    sqlx::query(
        "INSERT INTO messages (message_id, to_account_id, from_account_id, from_username,
             headers_json, body_json, creation_time)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(message.id.to_string())
    .bind(message.to_account.to_string())
    .bind(message.from_account.to_string())
    .bind(&message.from_username)
    .bind(encode_json(&message.headers, "message headers")?)
    .bind(encode_json(&message.body, "message body")?)
    .bind(to_db_time(message.creation_time))
    .execute(backend.pool())
    .await
    .sql_unique("Failed to insert message")?;
    Ok(())
}

pub async fn messages_for(backend: &SqlxBackend, account: AccountId) -> Result<Vec<Message>> {
    let rows: Vec<(String, String, String, String, i64)> = sqlx::query_as(
        "SELECT message_id, from_username, headers_json, body_json, creation_time
         FROM messages WHERE to_account_id = $1 ORDER BY creation_time",
    )
    .bind(account.to_string())
    .fetch_all(backend.pool())
    .await
    .sql_context("Failed to list messages")?;

    rows.into_iter()
        .map(|(id, from_username, headers, body, creation_time)| {
            Ok(Message {
                message_id: decode_str(&id, "message id")?,
                from_username,
                headers: decode_json(&headers, "message headers")?,
                body: decode_json(&body, "message body")?,
                creation_time: from_db_time(creation_time),
            })
        })
        .collect()
}
