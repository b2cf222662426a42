//! # Storage
//!
//! Repository seams the core is written against, plus [`MemoryStore`], an
//! in-process implementation used by tests and by embedders that do not
//! need persistence.
//!
//! | Repository               | Records            | Write discipline                        |
//! |--------------------------|--------------------|-----------------------------------------|
//! | [`PostingRepository`]    | [`Posting`]        | compare-and-set on `version`            |
//! | [`UserRepository`]       | [`User`]           | atomic read-modify-write via closure    |
//! | [`NotificationRepository`] | [`Notification`] | append, flip `is_read`                  |
//! | [`MessageRepository`]    | [`ChatMessage`]    | append, extend `read_by`                |
//! | [`EventRepository`]      | [`PostingEvent`]   | append only                             |
//!
//! ## Posting versions
//!
//! `update_posting` succeeds only when the stored version equals the version
//! on the record handed in; the stored copy is written with `version + 1`.
//! `update_postings` applies the same check per record and reports the ids
//! that lost the race instead of failing the whole batch.
//!
//! ## Transition commits
//!
//! A lifecycle step writes more than the posting: impact counters, rating
//! aggregates, notifications and the audit entry. `commit_transition`
//! applies all of them or none, so a failed write can be retried without
//! the posting having already moved on.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::StoreError;
use crate::types::{ChatMessage, Notification, Posting, PostingEvent, PostingId, User, UserId};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Closure applied to a user record under the store's write guard.
pub type UserChange<'a> = &'a (dyn Fn(&mut User) + Send + Sync);

/// Counter change applied to a user as part of a transition commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UserDelta {
    IncrementImpact,
    /// Fold one received rating into the running mean.
    Rating(u8),
}

impl UserDelta {
    pub fn apply(self, user: &mut User) {
        match self {
            Self::IncrementImpact => user.impact_score += 1,
            Self::Rating(rating) => user.apply_rating(rating),
        }
    }
}

/// Everything one accepted lifecycle step writes.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionCommit {
    /// Next posting state, carrying the version it was derived from.
    pub posting: Posting,
    pub user_deltas: Vec<(UserId, UserDelta)>,
    pub notifications: Vec<Notification>,
    pub event: Option<PostingEvent>,
}

#[async_trait]
pub trait PostingRepository: Send + Sync {
    async fn all_postings(&self) -> StoreResult<Vec<Posting>>;
    async fn get_posting(&self, id: &str) -> StoreResult<Option<Posting>>;
    async fn insert_posting(&self, posting: &Posting) -> StoreResult<()>;
    /// Compare-and-set on `posting.version`. Returns the stored copy.
    async fn update_posting(&self, posting: &Posting) -> StoreResult<Posting>;
    /// Batch compare-and-set. Returns the ids that were not written.
    async fn update_postings(&self, postings: &[Posting]) -> StoreResult<Vec<PostingId>>;
    /// Compare-and-set on the posting plus every side write, atomically.
    /// Returns the stored posting.
    async fn commit_transition(&self, commit: &TransitionCommit) -> StoreResult<Posting>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn all_users(&self) -> StoreResult<Vec<User>>;
    async fn get_user(&self, id: &str) -> StoreResult<Option<User>>;
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    /// Apply `change` atomically and return the updated user.
    async fn modify_user(&self, id: &str, change: UserChange<'_>) -> StoreResult<User>;
}

#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn push_notifications(&self, notifications: &[Notification]) -> StoreResult<()>;
    /// Newest first.
    async fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>>;
    /// `false` when no such notification exists.
    async fn mark_notification_read(&self, id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn push_message(&self, message: &ChatMessage) -> StoreResult<()>;
    /// Oldest first.
    async fn messages_for(&self, posting_id: &str) -> StoreResult<Vec<ChatMessage>>;
    /// Returns how many messages were newly marked.
    async fn mark_messages_read(&self, posting_id: &str, reader_id: &str) -> StoreResult<usize>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn append_event(&self, event: &PostingEvent) -> StoreResult<()>;
    /// Oldest first.
    async fn events_for(&self, posting_id: &str) -> StoreResult<Vec<PostingEvent>>;
    async fn all_events(&self) -> StoreResult<Vec<PostingEvent>>;
}

/// Everything the manager needs from persistence.
pub trait Store:
    PostingRepository + UserRepository + NotificationRepository + MessageRepository + EventRepository
{
}

impl<T> Store for T where
    T: PostingRepository
        + UserRepository
        + NotificationRepository
        + MessageRepository
        + EventRepository
{
}

/// Shared compare-and-set step so every backend rejects stale writes alike.
pub fn check_version(id: &str, stored: u64, expected: u64) -> StoreResult<()> {
    if stored == expected {
        Ok(())
    } else {
        Err(StoreError::Conflict {
            id: id.to_string(),
            expected,
            found: stored,
        })
    }
}

#[derive(Default)]
struct Collections {
    postings: Vec<Posting>,
    users: Vec<User>,
    notifications: Vec<Notification>,
    messages: Vec<ChatMessage>,
    events: Vec<PostingEvent>,
}

/// In-process store guarded by a single async `RwLock`.
#[derive(Default)]
pub struct MemoryStore(RwLock<Collections>);

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn cas_in_place(postings: &mut [Posting], posting: &Posting) -> StoreResult<Posting> {
    let slot = postings
        .iter_mut()
        .find(|p| p.id == posting.id)
        .ok_or(StoreError::NotFound)?;
    check_version(&posting.id, slot.version, posting.version)?;

    let mut stored = posting.clone();
    stored.version = posting.version + 1;
    *slot = stored.clone();
    Ok(stored)
}

#[async_trait]
impl PostingRepository for MemoryStore {
    async fn all_postings(&self) -> StoreResult<Vec<Posting>> {
        Ok(self.0.read().await.postings.clone())
    }

    async fn get_posting(&self, id: &str) -> StoreResult<Option<Posting>> {
        Ok(self
            .0
            .read()
            .await
            .postings
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }

    async fn insert_posting(&self, posting: &Posting) -> StoreResult<()> {
        let mut guard = self.0.write().await;
        if guard.postings.iter().any(|p| p.id == posting.id) {
            return Err(StoreError::Duplicate(posting.id.clone()));
        }
        guard.postings.push(posting.clone());
        Ok(())
    }

    async fn update_posting(&self, posting: &Posting) -> StoreResult<Posting> {
        let mut guard = self.0.write().await;
        cas_in_place(&mut guard.postings, posting)
    }

    async fn update_postings(&self, postings: &[Posting]) -> StoreResult<Vec<PostingId>> {
        let mut guard = self.0.write().await;
        let mut skipped = Vec::new();
        for posting in postings {
            match cas_in_place(&mut guard.postings, posting) {
                Ok(_) => {}
                Err(StoreError::Conflict { .. }) | Err(StoreError::NotFound) => {
                    skipped.push(posting.id.clone())
                }
                Err(e) => return Err(e),
            }
        }
        Ok(skipped)
    }

    async fn commit_transition(&self, commit: &TransitionCommit) -> StoreResult<Posting> {
        let mut guard = self.0.write().await;
        let c = &mut *guard;

        // Every check happens before the first mutation.
        let slot = c
            .postings
            .iter()
            .position(|p| p.id == commit.posting.id)
            .ok_or(StoreError::NotFound)?;
        check_version(
            &commit.posting.id,
            c.postings[slot].version,
            commit.posting.version,
        )?;
        if commit
            .user_deltas
            .iter()
            .any(|(id, _)| !c.users.iter().any(|u| &u.id == id))
        {
            return Err(StoreError::NotFound);
        }

        let mut stored = commit.posting.clone();
        stored.version = commit.posting.version + 1;
        c.postings[slot] = stored.clone();
        for (id, delta) in &commit.user_deltas {
            if let Some(user) = c.users.iter_mut().find(|u| &u.id == id) {
                delta.apply(user);
            }
        }
        c.notifications.extend_from_slice(&commit.notifications);
        c.events.extend(commit.event.iter().cloned());
        Ok(stored)
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn all_users(&self) -> StoreResult<Vec<User>> {
        Ok(self.0.read().await.users.clone())
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.0.read().await.users.iter().find(|u| u.id == id).cloned())
    }

    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut guard = self.0.write().await;
        if guard.users.iter().any(|u| u.id == user.id) {
            return Err(StoreError::Duplicate(user.id.clone()));
        }
        guard.users.push(user.clone());
        Ok(())
    }

    async fn modify_user(&self, id: &str, change: UserChange<'_>) -> StoreResult<User> {
        let mut guard = self.0.write().await;
        let user = guard
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or(StoreError::NotFound)?;
        change(user);
        Ok(user.clone())
    }
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn push_notifications(&self, notifications: &[Notification]) -> StoreResult<()> {
        self.0
            .write()
            .await
            .notifications
            .extend_from_slice(notifications);
        Ok(())
    }

    async fn notifications_for(&self, user_id: &str) -> StoreResult<Vec<Notification>> {
        let mut found: Vec<_> = self
            .0
            .read()
            .await
            .notifications
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        found.reverse();
        Ok(found)
    }

    async fn mark_notification_read(&self, id: &str) -> StoreResult<bool> {
        let mut guard = self.0.write().await;
        match guard.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.is_read = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl MessageRepository for MemoryStore {
    async fn push_message(&self, message: &ChatMessage) -> StoreResult<()> {
        self.0.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn messages_for(&self, posting_id: &str) -> StoreResult<Vec<ChatMessage>> {
        Ok(self
            .0
            .read()
            .await
            .messages
            .iter()
            .filter(|m| m.posting_id == posting_id)
            .cloned()
            .collect())
    }

    async fn mark_messages_read(&self, posting_id: &str, reader_id: &str) -> StoreResult<usize> {
        let mut guard = self.0.write().await;
        let mut marked = 0;
        for m in guard
            .messages
            .iter_mut()
            .filter(|m| m.posting_id == posting_id && m.sender_id != reader_id)
        {
            if m.read_by.insert(reader_id.to_string()) {
                marked += 1;
            }
        }
        Ok(marked)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn append_event(&self, event: &PostingEvent) -> StoreResult<()> {
        self.0.write().await.events.push(event.clone());
        Ok(())
    }

    async fn events_for(&self, posting_id: &str) -> StoreResult<Vec<PostingEvent>> {
        Ok(self
            .0
            .read()
            .await
            .events
            .iter()
            .filter(|e| e.posting_id == posting_id)
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> StoreResult<Vec<PostingEvent>> {
        Ok(self.0.read().await.events.clone())
    }
}
