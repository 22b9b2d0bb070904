//! Chunk appliers run by the commit coordinator inside one [`CommitUnit`].

use super::{Chunk, TransactionError};
use crate::Result;
use crate::backend::{CommitUnit, StagedChunk, StoredRecord, TransactionRow};
use crate::protocol::{AccountId, SignedPayload};

/// Apply every staged chunk of `row` to `unit`, in staging order.
///
/// Returns the containers written to, without duplicates, so the caller can
/// notify their key holders once the unit commits. The first failing chunk
/// aborts; the caller drops the unit to discard earlier writes.
pub(crate) async fn apply_chunks(
    unit: &mut dyn CommitUnit,
    row: &TransactionRow,
    chunks: &[StagedChunk],
    now: u64,
) -> Result<Vec<String>> {
    let mut touched: Vec<String> = Vec::new();

    for staged in chunks {
        if staged.account_id != row.account_id {
            return Err(TransactionError::AccountMismatch.into());
        }
        apply_chunk(unit, row.account_id, &staged.chunk, now).await?;

        let container = staged.chunk.container_name_hmac();
        if !touched.iter().any(|c| c == container) {
            touched.push(container.to_string());
        }
    }
    Ok(touched)
}

async fn apply_chunk(
    unit: &mut dyn CommitUnit,
    account: AccountId,
    chunk: &Chunk,
    now: u64,
) -> Result<()> {
    match chunk {
        Chunk::AddContainer {
            container_name_hmac,
        } => unit.insert_container(container_name_hmac, account, now).await,
        Chunk::AddContainerSessionKey {
            container_name_hmac,
            session_key,
        } => {
            require_owner(unit, container_name_hmac, account).await?;
            unit.insert_session_key(container_name_hmac, account, session_key)
                .await
        }
        Chunk::AddContainerSessionKeyShare {
            container_name_hmac,
            to_username,
            session_key,
        } => {
            require_owner(unit, container_name_hmac, account).await?;
            let recipient = unit.account_id_by_username(to_username).await?.ok_or_else(|| {
                TransactionError::UnknownRecipient {
                    username: to_username.clone(),
                }
            })?;
            unit.insert_session_key(container_name_hmac, recipient, session_key)
                .await
        }
        Chunk::AddContainerRecord {
            container_name_hmac,
            record_index,
            payload,
        } => {
            append_record(unit, account, container_name_hmac, *record_index, payload, now).await
        }
        Chunk::CompactContainer {
            container_name_hmac,
            record_index,
            payload,
        } => {
            append_record(unit, account, container_name_hmac, *record_index, payload, now).await?;
            let removed = unit
                .delete_records_before(container_name_hmac, *record_index)
                .await?;
            tracing::debug!(container = %container_name_hmac, removed, "Compacted container");
            Ok(())
        }
    }
}

async fn require_owner(unit: &mut dyn CommitUnit, container: &str, account: AccountId) -> Result<()> {
    match unit.container_owner(container).await? {
        None => Err(TransactionError::UnknownContainer {
            container: container.to_string(),
        }
        .into()),
        Some(owner) if owner != account => Err(TransactionError::NotContainerOwner {
            container: container.to_string(),
        }
        .into()),
        Some(_) => Ok(()),
    }
}

async fn append_record(
    unit: &mut dyn CommitUnit,
    account: AccountId,
    container: &str,
    index: i64,
    payload: &SignedPayload,
    now: u64,
) -> Result<()> {
    require_owner(unit, container, account).await?;

    if index < 1 {
        return Err(TransactionError::InvalidChunk {
            reason: format!("record index must be positive, got {index}"),
        }
        .into());
    }
    if let Some(latest) = unit.latest_record_index(container).await? {
        if index <= latest {
            return Err(TransactionError::IndexNotIncreasing {
                container: container.to_string(),
                index,
                latest,
            }
            .into());
        }
    }

    unit.insert_record(&StoredRecord {
        container_name_hmac: container.to_string(),
        index,
        creation_time: now,
        payload: payload.clone(),
    })
    .await
}
