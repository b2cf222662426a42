//! Per-posting chat between the donor, the requester and the volunteer.

use std::collections::BTreeSet;

use chrono::Utc;
use tracing::debug;

use crate::errors::{Error, RejectReason, Result};
use crate::storage::Store;
use crate::types::{new_id, ChatMessage, Posting, User};

async fn party_to<S: Store + ?Sized>(
    store: &S,
    posting_id: &str,
    user_id: &str,
) -> Result<(Posting, User)> {
    let posting = store
        .get_posting(posting_id)
        .await?
        .ok_or_else(|| Error::PostingNotFound(posting_id.to_string()))?;
    let user = store
        .get_user(user_id)
        .await?
        .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
    if !posting.is_party(&user.id) {
        return Err(RejectReason::NotAParty.into());
    }
    Ok((posting, user))
}

pub async fn send_message<S: Store + ?Sized>(
    store: &S,
    posting_id: &str,
    sender_id: &str,
    text: &str,
) -> Result<ChatMessage> {
    let text = text.trim();
    if text.is_empty() {
        return Err(RejectReason::EmptyField("text").into());
    }
    let (posting, sender) = party_to(store, posting_id, sender_id).await?;

    let message = ChatMessage {
        id: new_id(),
        posting_id: posting.id,
        sender_id: sender.id.clone(),
        sender_name: sender.name,
        text: text.to_string(),
        read_by: BTreeSet::from([sender.id]),
        created_at: Utc::now(),
    };
    store.push_message(&message).await?;
    debug!("Message {} on posting {}", message.id, message.posting_id);
    Ok(message)
}

/// Oldest first. Only parties to the posting may read the thread.
pub async fn messages<S: Store + ?Sized>(
    store: &S,
    posting_id: &str,
    reader_id: &str,
) -> Result<Vec<ChatMessage>> {
    party_to(store, posting_id, reader_id).await?;
    let mut thread = store.messages_for(posting_id).await?;
    thread.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(thread)
}

pub async fn mark_messages_read<S: Store + ?Sized>(
    store: &S,
    posting_id: &str,
    reader_id: &str,
) -> Result<usize> {
    party_to(store, posting_id, reader_id).await?;
    Ok(store.mark_messages_read(posting_id, reader_id).await?)
}

/// Unread messages across every posting `user_id` is party to.
pub async fn unread_message_count<S: Store + ?Sized>(store: &S, user_id: &str) -> Result<usize> {
    let mut unread = 0;
    for posting in store.all_postings().await? {
        if !posting.is_party(user_id) {
            continue;
        }
        unread += store
            .messages_for(&posting.id)
            .await?
            .iter()
            .filter(|m| !m.read_by.contains(user_id))
            .count();
    }
    Ok(unread)
}
