//! # Lifecycle
//!
//! The single authoritative transition function for postings.
//!
//! | From                  | Event             | To         |
//! |-----------------------|-------------------|------------|
//! | Available             | `Request`         | Requested  |
//! | Available / Requested | `Accept`          | InTransit  |
//! | Available             | `RegisterInterest`| Available  |
//! | Available / Requested | `Assign`          | InTransit  |
//! | InTransit             | `VerifyPickup`    | InTransit  |
//! | InTransit             | `VerifyDelivery`  | Delivered  |
//! | InTransit             | `ConfirmDelivery` | Delivered  |
//! | Delivered             | `Rate`            | Delivered  |
//!
//! [`apply_transition`] is pure: it neither reads the clock nor touches a
//! store. It returns the updated posting together with the [`Effect`]s the
//! caller must carry out once the posting is persisted.

use chrono::{DateTime, Utc};

use crate::errors::RejectReason;
use crate::types::{
    Coordinates, EventKind, InterestedVolunteer, NotificationKind, Posting, PostingStatus, Rating,
    Role, User, UserId,
};

/// Who is acting. Built from the stored [`User`], never from client input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    pub role: Role,
}

impl From<&User> for Actor {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            role: user.role,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Request {
        requester_address: String,
        destination: Option<Coordinates>,
    },
    Accept {
        reported_location: Option<Coordinates>,
    },
    RegisterInterest,
    /// Donor picks `volunteer` from the interest list.
    Assign {
        volunteer: Actor,
    },
    /// Only built after the image oracle returned a valid verdict.
    VerifyPickup {
        proof: String,
    },
    VerifyDelivery {
        proof: String,
    },
    ConfirmDelivery,
    Rate {
        rating: u8,
        feedback: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Request { .. } => "request",
            Self::Accept { .. } => "accept",
            Self::RegisterInterest => "register interest in",
            Self::Assign { .. } => "assign",
            Self::VerifyPickup { .. } => "verify pickup of",
            Self::VerifyDelivery { .. } => "verify delivery of",
            Self::ConfirmDelivery => "confirm delivery of",
            Self::Rate { .. } => "rate",
        }
    }
}

/// Values the caller decides outside the pure function.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TransitionContext {
    pub now: DateTime<Utc>,
    /// Used when a volunteer is attached; drawn from [15, 40] by the manager.
    pub initial_eta_minutes: u32,
}

/// Work to perform after the posting write succeeded.
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    Notify {
        user_id: UserId,
        message: String,
        kind: NotificationKind,
    },
    IncrementImpact {
        user_id: UserId,
    },
    RecordVolunteerRating {
        volunteer_id: UserId,
        rating: u8,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub posting: Posting,
    pub effects: Vec<Effect>,
    /// `None` when the event was an idempotent repeat and nothing changed.
    pub kind: Option<EventKind>,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        self.kind.is_none()
    }

    fn unchanged(posting: &Posting) -> Self {
        Self {
            posting: posting.clone(),
            effects: Vec::new(),
            kind: None,
        }
    }
}

/// Decide whether `actor` may apply `event` to `posting`, and compute the result.
pub fn apply_transition(
    posting: &Posting,
    event: &Event,
    actor: &Actor,
    ctx: &TransitionContext,
) -> Result<Transition, RejectReason> {
    let mut next = posting.clone();
    let mut effects = Vec::new();
    let invalid = || RejectReason::InvalidTransition {
        from: posting.status,
        event: event.name(),
    };

    let kind = match event {
        Event::Request {
            requester_address,
            destination,
        } => {
            require_role(actor, Role::Requester, event)?;
            if posting.status != PostingStatus::Available {
                return Err(invalid());
            }
            if requester_address.trim().is_empty() {
                return Err(RejectReason::EmptyField("requester_address"));
            }

            next.status = PostingStatus::Requested;
            next.orphanage_id = Some(actor.id.clone());
            next.orphanage_name = Some(actor.name.clone());
            next.requester_address = Some(requester_address.trim().to_string());
            next.destination_coordinates = *destination;

            effects.push(notify(
                &posting.donor_id,
                format!(
                    "{} requested your donation: {}",
                    actor.name, posting.food_description
                ),
                NotificationKind::Info,
            ));
            EventKind::Requested
        }

        Event::Accept { reported_location } => {
            require_role(actor, Role::Volunteer, event)?;
            if !matches!(
                posting.status,
                PostingStatus::Available | PostingStatus::Requested
            ) {
                return Err(invalid());
            }

            attach_volunteer(&mut next, actor, *reported_location, ctx);

            effects.push(notify(
                &posting.donor_id,
                format!("{} will pick up your donation", actor.name),
                NotificationKind::Info,
            ));
            if let Some(requester) = &posting.orphanage_id {
                effects.push(notify(
                    requester,
                    format!("{} is bringing {}", actor.name, posting.food_description),
                    NotificationKind::Info,
                ));
            }
            EventKind::Accepted
        }

        Event::RegisterInterest => {
            require_role(actor, Role::Volunteer, event)?;
            if posting.status != PostingStatus::Available {
                return Err(invalid());
            }
            if posting.is_interested(&actor.id) {
                return Ok(Transition::unchanged(posting));
            }

            next.interested_volunteers.push(InterestedVolunteer {
                user_id: actor.id.clone(),
                user_name: actor.name.clone(),
            });

            effects.push(notify(
                &posting.donor_id,
                format!("{} is interested in delivering your donation", actor.name),
                NotificationKind::Info,
            ));
            EventKind::InterestRegistered
        }

        Event::Assign { volunteer } => {
            require_role(actor, Role::Donor, event)?;
            if actor.id != posting.donor_id {
                return Err(RejectReason::NotAParty);
            }
            if !matches!(
                posting.status,
                PostingStatus::Available | PostingStatus::Requested
            ) {
                return Err(invalid());
            }
            if volunteer.role != Role::Volunteer {
                return Err(RejectReason::RoleNotAllowed {
                    role: volunteer.role,
                    event: event.name(),
                });
            }
            if !posting.is_interested(&volunteer.id) {
                return Err(RejectReason::NotInterested);
            }

            attach_volunteer(&mut next, volunteer, None, ctx);

            effects.push(notify(
                &volunteer.id,
                format!(
                    "{} assigned you to deliver {}",
                    actor.name, posting.food_description
                ),
                NotificationKind::Info,
            ));
            EventKind::VolunteerAssigned
        }

        Event::VerifyPickup { proof } => {
            if posting.status != PostingStatus::InTransit {
                return Err(invalid());
            }
            require_assigned_volunteer(posting, actor)?;
            if posting.is_picked_up {
                return Err(RejectReason::AlreadyPickedUp);
            }

            next.is_picked_up = true;
            next.pickup_proof = Some(proof.clone());
            EventKind::PickupVerified
        }

        Event::VerifyDelivery { proof } => {
            if posting.status != PostingStatus::InTransit {
                return Err(invalid());
            }
            require_assigned_volunteer(posting, actor)?;
            if !posting.is_picked_up {
                return Err(RejectReason::NotPickedUp);
            }

            next.delivery_proof = Some(proof.clone());
            mark_delivered(posting, &mut next, &mut effects);
            EventKind::Delivered
        }

        Event::ConfirmDelivery => {
            if posting.status != PostingStatus::InTransit {
                return Err(invalid());
            }
            if posting.orphanage_id.as_deref() != Some(actor.id.as_str()) {
                return Err(RejectReason::NotAParty);
            }

            mark_delivered(posting, &mut next, &mut effects);
            EventKind::DeliveryConfirmed
        }

        Event::Rate { rating, feedback } => {
            if posting.status != PostingStatus::Delivered {
                return Err(invalid());
            }
            if !(1..=5).contains(rating) {
                return Err(RejectReason::InvalidRating(*rating));
            }
            let is_rater = actor.id == posting.donor_id
                || posting.orphanage_id.as_deref() == Some(actor.id.as_str());
            if !is_rater || posting.volunteer_id.as_deref() == Some(actor.id.as_str()) {
                return Err(RejectReason::NotAParty);
            }
            if posting.has_rated(&actor.id) {
                return Err(RejectReason::AlreadyRated);
            }

            next.ratings.push(Rating {
                rater_id: actor.id.clone(),
                rating: *rating,
                feedback: feedback.trim().to_string(),
                created_at: ctx.now,
            });
            if let Some(volunteer_id) = &posting.volunteer_id {
                effects.push(Effect::RecordVolunteerRating {
                    volunteer_id: volunteer_id.clone(),
                    rating: *rating,
                });
            }
            EventKind::Rated
        }
    };

    next.updated_at = ctx.now;
    Ok(Transition {
        posting: next,
        effects,
        kind: Some(kind),
    })
}

fn require_role(actor: &Actor, role: Role, event: &Event) -> Result<(), RejectReason> {
    if actor.role == role {
        Ok(())
    } else {
        Err(RejectReason::RoleNotAllowed {
            role: actor.role,
            event: event.name(),
        })
    }
}

fn require_assigned_volunteer(posting: &Posting, actor: &Actor) -> Result<(), RejectReason> {
    match posting.volunteer_id.as_deref() {
        Some(id) if id == actor.id => Ok(()),
        _ => Err(RejectReason::NotAParty),
    }
}

fn attach_volunteer(
    next: &mut Posting,
    volunteer: &Actor,
    reported_location: Option<Coordinates>,
    ctx: &TransitionContext,
) {
    next.status = PostingStatus::InTransit;
    next.volunteer_id = Some(volunteer.id.clone());
    next.volunteer_name = Some(volunteer.name.clone());
    next.volunteer_location = reported_location.or(next.pickup_coordinates);
    next.eta_minutes = Some(ctx.initial_eta_minutes);
    next.interested_volunteers.clear();
    next.is_picked_up = false;
}

// Impact is only granted on the edge into Delivered.
fn mark_delivered(previous: &Posting, next: &mut Posting, effects: &mut Vec<Effect>) {
    next.status = PostingStatus::Delivered;
    if previous.status == PostingStatus::Delivered {
        return;
    }

    effects.push(Effect::IncrementImpact {
        user_id: previous.donor_id.clone(),
    });
    effects.push(notify(
        &previous.donor_id,
        format!("Your donation of {} was delivered", previous.food_description),
        NotificationKind::Success,
    ));

    if let Some(volunteer_id) = &previous.volunteer_id {
        effects.push(Effect::IncrementImpact {
            user_id: volunteer_id.clone(),
        });
        effects.push(notify(
            volunteer_id,
            format!("Delivery of {} completed", previous.food_description),
            NotificationKind::Success,
        ));
    }
}

fn notify(user_id: &str, message: String, kind: NotificationKind) -> Effect {
    Effect::Notify {
        user_id: user_id.to_string(),
        message,
        kind,
    }
}
