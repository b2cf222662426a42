//! # Lifecycle manager
//!
//! Runs [`apply_transition`] against a [`Store`] and persists the result,
//! effects included (notifications, impact counters, rating aggregation,
//! audit trail), as one [`TransitionCommit`]. Also hosts the two location update paths: the simulator
//! tick and live reports from a volunteer's device.
//!
//! Every posting write is a compare-and-set. On a version conflict the
//! manager re-reads the posting and re-applies the same event, up to
//! `retry_limit` times, so a simulator tick racing a user action never
//! swallows the user action.

use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::errors::{Error, RejectReason, Result, StoreError};
use crate::lifecycle::{apply_transition, Actor, Effect, Event, Transition, TransitionContext};
use crate::oracle::{
    resolve_verdict, ImageVerifier, ProofKind, RouteOracle, Unconfigured, Verdict,
    VerificationPolicy,
};
use crate::storage::{Store, TransitionCommit, UserDelta};
use crate::tracking;
use crate::types::{
    new_id, Coordinates, EventKind, NewPosting, Notification, NotificationKind, Posting,
    PostingEvent, PostingStatus, Role, User,
};

/// Range the initial ETA is drawn from when a volunteer is attached.
pub const INITIAL_ETA_MINUTES: RangeInclusive<u32> = 15..=40;

pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Outcome of one simulator tick.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub moved: usize,
    /// Postings whose version moved under the tick; picked up next time.
    pub skipped: Vec<String>,
}

pub struct LifecycleManager<S> {
    store: Arc<S>,
    verifier: Arc<dyn ImageVerifier>,
    router: Arc<dyn RouteOracle>,
    policy: VerificationPolicy,
    retry_limit: u32,
}

fn draw_initial_eta() -> u32 {
    rand::thread_rng().gen_range(INITIAL_ETA_MINUTES)
}

/// Turn a transition into the single write that persists it.
fn commit_for(actor: &Actor, transition: Transition) -> TransitionCommit {
    let now = Utc::now();
    let mut commit = TransitionCommit {
        event: transition.kind.map(|kind| PostingEvent {
            id: new_id(),
            posting_id: transition.posting.id.clone(),
            kind,
            actor_id: actor.id.clone(),
            created_at: now,
        }),
        posting: transition.posting,
        user_deltas: Vec::new(),
        notifications: Vec::new(),
    };

    for effect in transition.effects {
        match effect {
            Effect::Notify {
                user_id,
                message,
                kind,
            } => commit
                .notifications
                .push(Notification::new(&user_id, message, kind, now)),
            Effect::IncrementImpact { user_id } => {
                commit.user_deltas.push((user_id, UserDelta::IncrementImpact))
            }
            Effect::RecordVolunteerRating {
                volunteer_id,
                rating,
            } => commit
                .user_deltas
                .push((volunteer_id, UserDelta::Rating(rating))),
        }
    }
    commit
}

impl<S: Store> LifecycleManager<S> {
    /// Manager with no oracles configured and a fail-closed policy.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            verifier: Arc::new(Unconfigured),
            router: Arc::new(Unconfigured),
            policy: VerificationPolicy::default(),
            retry_limit: DEFAULT_RETRY_LIMIT,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn ImageVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_router(mut self, router: Arc<dyn RouteOracle>) -> Self {
        self.router = router;
        self
    }

    pub fn with_policy(mut self, policy: VerificationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────

    pub async fn posting(&self, id: &str) -> Result<Posting> {
        self.store
            .get_posting(id)
            .await?
            .ok_or_else(|| Error::PostingNotFound(id.to_string()))
    }

    /// All postings, optionally restricted to one status, oldest first.
    pub async fn postings(&self, status: Option<PostingStatus>) -> Result<Vec<Posting>> {
        let mut postings = self.store.all_postings().await?;
        if let Some(status) = status {
            postings.retain(|p| p.status == status);
        }
        postings.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(postings)
    }

    pub async fn events(&self, posting_id: &str) -> Result<Vec<PostingEvent>> {
        self.posting(posting_id).await?;
        Ok(self.store.events_for(posting_id).await?)
    }

    /// Audit trail across every posting, oldest first.
    pub async fn all_events(&self) -> Result<Vec<PostingEvent>> {
        Ok(self.store.all_events().await?)
    }

    async fn user(&self, id: &str) -> Result<User> {
        self.store
            .get_user(id)
            .await?
            .ok_or_else(|| Error::UserNotFound(id.to_string()))
    }

    async fn actor(&self, id: &str) -> Result<Actor> {
        Ok(Actor::from(&self.user(id).await?))
    }

    // ─────────────────────────────────────────────────────────
    // Creation
    // ─────────────────────────────────────────────────────────

    /// Post a donation and tell every volunteer about it.
    pub async fn create_posting(&self, donor_id: &str, input: NewPosting) -> Result<Posting> {
        let donor = self.user(donor_id).await?;
        if donor.role != Role::Donor {
            return Err(RejectReason::RoleNotAllowed {
                role: donor.role,
                event: "create a posting",
            }
            .into());
        }
        if input.food_description.trim().is_empty() {
            return Err(RejectReason::EmptyField("food_description").into());
        }
        if input.location.trim().is_empty() {
            return Err(RejectReason::EmptyField("location").into());
        }

        let now = Utc::now();
        let posting = Posting::new(&donor, input, now);
        self.store.insert_posting(&posting).await?;

        let fan_out: Vec<Notification> = self
            .store
            .all_users()
            .await?
            .iter()
            .filter(|u| u.role == Role::Volunteer)
            .map(|u| {
                Notification::new(
                    &u.id,
                    format!(
                        "New donation: {} at {}",
                        posting.food_description, posting.location
                    ),
                    NotificationKind::Info,
                    now,
                )
            })
            .collect();
        if !fan_out.is_empty() {
            self.store.push_notifications(&fan_out).await?;
        }

        self.log_event(&posting.id, EventKind::PostingCreated, &donor.id)
            .await?;
        info!(
            "Posting {} created by {} ({} volunteers notified)",
            posting.id,
            donor.id,
            fan_out.len()
        );
        Ok(posting)
    }

    // ─────────────────────────────────────────────────────────
    // Lifecycle events
    // ─────────────────────────────────────────────────────────

    pub async fn request(
        &self,
        posting_id: &str,
        requester_id: &str,
        requester_address: String,
        destination: Option<Coordinates>,
    ) -> Result<Posting> {
        let actor = self.actor(requester_id).await?;
        self.apply(
            posting_id,
            &actor,
            Event::Request {
                requester_address,
                destination,
            },
        )
        .await
    }

    pub async fn accept(
        &self,
        posting_id: &str,
        volunteer_id: &str,
        reported_location: Option<Coordinates>,
    ) -> Result<Posting> {
        let actor = self.actor(volunteer_id).await?;
        self.apply(posting_id, &actor, Event::Accept { reported_location })
            .await
    }

    pub async fn register_interest(&self, posting_id: &str, volunteer_id: &str) -> Result<Posting> {
        let actor = self.actor(volunteer_id).await?;
        self.apply(posting_id, &actor, Event::RegisterInterest).await
    }

    pub async fn assign(
        &self,
        posting_id: &str,
        donor_id: &str,
        volunteer_id: &str,
    ) -> Result<Posting> {
        let actor = self.actor(donor_id).await?;
        let volunteer = self.actor(volunteer_id).await?;
        self.apply(posting_id, &actor, Event::Assign { volunteer })
            .await
    }

    /// Verify a pickup photo and, when it passes, flag the posting picked up.
    pub async fn verify_pickup(
        &self,
        posting_id: &str,
        volunteer_id: &str,
        image: &[u8],
        proof: String,
    ) -> Result<(Posting, Verdict)> {
        self.verify_and_apply(
            posting_id,
            volunteer_id,
            image,
            ProofKind::Pickup,
            Event::VerifyPickup { proof },
        )
        .await
    }

    /// Verify a delivery photo and, when it passes, mark the posting delivered.
    pub async fn verify_delivery(
        &self,
        posting_id: &str,
        volunteer_id: &str,
        image: &[u8],
        proof: String,
    ) -> Result<(Posting, Verdict)> {
        self.verify_and_apply(
            posting_id,
            volunteer_id,
            image,
            ProofKind::Delivery,
            Event::VerifyDelivery { proof },
        )
        .await
    }

    /// Requester's manual confirmation of receipt.
    pub async fn confirm_delivery(&self, posting_id: &str, requester_id: &str) -> Result<Posting> {
        let actor = self.actor(requester_id).await?;
        self.apply(posting_id, &actor, Event::ConfirmDelivery).await
    }

    pub async fn rate(
        &self,
        posting_id: &str,
        rater_id: &str,
        rating: u8,
        feedback: String,
    ) -> Result<Posting> {
        let actor = self.actor(rater_id).await?;
        self.apply(posting_id, &actor, Event::Rate { rating, feedback })
            .await
    }

    async fn verify_and_apply(
        &self,
        posting_id: &str,
        volunteer_id: &str,
        image: &[u8],
        kind: ProofKind,
        event: Event,
    ) -> Result<(Posting, Verdict)> {
        let actor = self.actor(volunteer_id).await?;

        // Refuse early so an ineligible request never reaches the oracle.
        let current = self.posting(posting_id).await?;
        apply_transition(&current, &event, &actor, &self.context(0))?;

        let outcome = self.verifier.verify(image, kind).await;
        let verdict =
            resolve_verdict(outcome, self.policy).ok_or(RejectReason::VerificationUnavailable)?;
        if !verdict.is_valid {
            info!(
                "{} photo for posting {posting_id} rejected: {}",
                kind.as_str(),
                verdict.feedback
            );
            return Err(RejectReason::VerificationFailed {
                feedback: verdict.feedback,
            }
            .into());
        }

        let posting = self.apply(posting_id, &actor, event).await?;
        Ok((posting, verdict))
    }

    fn context(&self, initial_eta_minutes: u32) -> TransitionContext {
        TransitionContext {
            now: Utc::now(),
            initial_eta_minutes,
        }
    }

    /// Read, transition, commit; retry on conflict.
    async fn apply(&self, posting_id: &str, actor: &Actor, event: Event) -> Result<Posting> {
        let initial_eta = draw_initial_eta();
        let mut attempt = 0;

        loop {
            let current = self.posting(posting_id).await?;
            let transition = apply_transition(&current, &event, actor, &self.context(initial_eta))?;
            if transition.is_noop() {
                debug!(
                    "{} on posting {posting_id} by {} changed nothing",
                    event.name(),
                    actor.id
                );
                return Ok(current);
            }

            let commit = commit_for(actor, transition);
            match self.store.commit_transition(&commit).await {
                Ok(stored) => {
                    info!(
                        "Posting {posting_id}: {} -> {} ({} by {})",
                        current.status,
                        stored.status,
                        event.name(),
                        actor.id
                    );
                    return Ok(stored);
                }
                Err(StoreError::Conflict { expected, found, .. }) if attempt < self.retry_limit => {
                    attempt += 1;
                    warn!(
                        "Posting {posting_id} moved from v{expected} to v{found}, retrying {} (attempt {attempt})",
                        event.name()
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn log_event(&self, posting_id: &str, kind: EventKind, actor_id: &str) -> Result<()> {
        let event = PostingEvent {
            id: new_id(),
            posting_id: posting_id.to_string(),
            kind,
            actor_id: actor_id.to_string(),
            created_at: Utc::now(),
        };
        Ok(self.store.append_event(&event).await?)
    }

    // ─────────────────────────────────────────────────────────
    // Location
    // ─────────────────────────────────────────────────────────

    /// One simulator tick: nudge every in-transit volunteer and write the
    /// batch back in one call.
    pub async fn simulate_tick(&self) -> Result<TickReport> {
        let postings = self.store.all_postings().await?;
        let moved = tracking::simulate_tick(&postings, Utc::now());
        if moved.is_empty() {
            return Ok(TickReport::default());
        }

        let skipped = self.store.update_postings(&moved).await?;
        debug!(
            "Simulator tick moved {} postings ({} skipped on conflict)",
            moved.len() - skipped.len(),
            skipped.len()
        );
        Ok(TickReport {
            moved: moved.len() - skipped.len(),
            skipped,
        })
    }

    /// A real coordinate from the assigned volunteer's device. The ETA
    /// oracle is asked once; on failure only the location is written.
    pub async fn report_location(
        &self,
        posting_id: &str,
        volunteer_id: &str,
        location: Coordinates,
    ) -> Result<Posting> {
        let actor = self.actor(volunteer_id).await?;
        let current = self.posting(posting_id).await?;
        tracking::apply_live_report(&current, &actor, location, None, Utc::now())?;

        let eta = match current.requester_address.as_deref() {
            Some(destination) => match self.router.calculate_eta(location, destination).await {
                Ok(eta) => eta,
                Err(e) => {
                    warn!("ETA oracle failed for posting {posting_id}, keeping previous ETA: {e}");
                    None
                }
            },
            None => None,
        };

        let mut attempt = 0;
        loop {
            let current = self.posting(posting_id).await?;
            let next = tracking::apply_live_report(&current, &actor, location, eta, Utc::now())?;
            match self.store.update_posting(&next).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::Conflict { .. }) if attempt < self.retry_limit => {
                    attempt += 1;
                    debug!("Live location for {posting_id} raced a write, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
