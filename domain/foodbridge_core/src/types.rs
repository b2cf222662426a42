//! # Types
//!
//! Shared data structures used across all modules of the FoodBridge core.
//!
//! ## Design decisions
//!
//! ### Status as a Finite-State Machine
//!
//! [`PostingStatus`] enforces a strict forward-only lifecycle:
//!
//! ```text
//! Available ──► Requested ──► InTransit ──► Delivered
//!     └──────────────────────►┘
//! ```
//!
//! Every move is decided by [`crate::lifecycle::apply_transition`]; nothing
//! else writes `status`.
//!
//! ### Versioned postings
//!
//! A [`Posting`] carries a `version` that the store bumps on every accepted
//! write. Writers hand back the version they read; a stale version is a
//! conflict, not a silent overwrite.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type PostingId = String;
pub type UserId = String;

/// Fresh opaque identifier for any stored record.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Lifecycle status of a posting.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostingStatus {
    /// Posted by a donor; open for requests and volunteer interest.
    Available,
    /// A requester organisation has claimed it.
    Requested,
    /// A volunteer is assigned and on the way.
    InTransit,
    /// Handed over to the requester. Terminal.
    Delivered,
}

impl PostingStatus {
    /// Position in the forward-only order.
    pub fn rank(self) -> u8 {
        match self {
            Self::Available => 0,
            Self::Requested => 1,
            Self::InTransit => 2,
            Self::Delivered => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Requested => "REQUESTED",
            Self::InTransit => "IN_TRANSIT",
            Self::Delivered => "DELIVERED",
        }
    }

    /// Case-insensitive parse, accepting both `IN_TRANSIT` and `in-transit`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "AVAILABLE" => Some(Self::Available),
            "REQUESTED" => Some(Self::Requested),
            "IN_TRANSIT" => Some(Self::InTransit),
            "DELIVERED" => Some(Self::Delivered),
            _ => None,
        }
    }
}

impl std::fmt::Display for PostingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account role. Fixed at registration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Donor,
    Volunteer,
    Requester,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Donor => "DONOR",
            Self::Volunteer => "VOLUNTEER",
            Self::Requester => "REQUESTER",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Straight-line distance in degree space. Not a geodesic.
    pub fn distance_to(&self, other: &Coordinates) -> f64 {
        let d_lat = other.lat - self.lat;
        let d_lng = other.lng - self.lng;
        (d_lat * d_lat + d_lng * d_lng).sqrt()
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InterestedVolunteer {
    pub user_id: UserId,
    pub user_name: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rating {
    pub rater_id: UserId,
    /// 1 to 5 inclusive.
    pub rating: u8,
    pub feedback: String,
    pub created_at: DateTime<Utc>,
}

/// Donor input for a new posting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NewPosting {
    pub food_description: String,
    pub quantity: String,
    /// Pickup address text.
    pub location: String,
    pub pickup_coordinates: Option<Coordinates>,
    pub expires_at: Option<DateTime<Utc>>,
    pub image: Option<String>,
}

/// One surplus-food donation tracked through its lifecycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub id: PostingId,
    pub status: PostingStatus,

    pub donor_id: UserId,
    pub donor_name: String,
    pub orphanage_id: Option<UserId>,
    pub orphanage_name: Option<String>,
    pub volunteer_id: Option<UserId>,
    pub volunteer_name: Option<String>,

    pub food_description: String,
    pub quantity: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub image: Option<String>,

    /// Pickup address text. Immutable.
    pub location: String,
    pub pickup_coordinates: Option<Coordinates>,
    pub requester_address: Option<String>,
    pub destination_coordinates: Option<Coordinates>,
    pub volunteer_location: Option<Coordinates>,
    pub eta_minutes: Option<u32>,
    pub is_picked_up: bool,
    pub pickup_proof: Option<String>,
    pub delivery_proof: Option<String>,

    pub interested_volunteers: Vec<InterestedVolunteer>,
    pub ratings: Vec<Rating>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter, owned by the store.
    pub version: u64,
}

impl Posting {
    /// Build a fresh `Available` posting for `donor`.
    pub fn new(donor: &User, input: NewPosting, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            status: PostingStatus::Available,
            donor_id: donor.id.clone(),
            donor_name: donor.name.clone(),
            orphanage_id: None,
            orphanage_name: None,
            volunteer_id: None,
            volunteer_name: None,
            food_description: input.food_description.trim().to_string(),
            quantity: input.quantity.trim().to_string(),
            expires_at: input.expires_at,
            image: input.image,
            location: input.location.trim().to_string(),
            pickup_coordinates: input.pickup_coordinates,
            requester_address: None,
            destination_coordinates: None,
            volunteer_location: None,
            eta_minutes: None,
            is_picked_up: false,
            pickup_proof: None,
            delivery_proof: None,
            interested_volunteers: Vec::new(),
            ratings: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Donor, requester or assigned volunteer.
    pub fn is_party(&self, user_id: &str) -> bool {
        self.donor_id == user_id
            || self.orphanage_id.as_deref() == Some(user_id)
            || self.volunteer_id.as_deref() == Some(user_id)
    }

    pub fn is_interested(&self, user_id: &str) -> bool {
        self.interested_volunteers
            .iter()
            .any(|v| v.user_id == user_id)
    }

    pub fn has_rated(&self, user_id: &str) -> bool {
        self.ratings.iter().any(|r| r.rater_id == user_id)
    }
}

/// Postal address as produced by reverse geocoding or typed by a user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostalAddress {
    pub line1: String,
    pub line2: String,
    pub landmark: Option<String>,
    pub pincode: String,
}

impl PostalAddress {
    /// Six ASCII digits, first digit non-zero.
    pub fn is_valid_pincode(pincode: &str) -> bool {
        let bytes = pincode.as_bytes();
        bytes.len() == 6 && bytes.iter().all(u8::is_ascii_digit) && bytes[0] != b'0'
    }

    /// Single-line rendering used as ETA oracle input.
    pub fn one_line(&self) -> String {
        let mut parts = vec![self.line1.trim(), self.line2.trim()];
        if let Some(landmark) = self.landmark.as_deref() {
            parts.push(landmark.trim());
        }
        parts.push(self.pincode.trim());
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Donor, volunteer, or requester account.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub impact_score: u32,
    /// Running mean of received ratings. Volunteers only.
    pub average_rating: f64,
    pub ratings_count: u32,
    /// Donors only.
    pub favorite_requester_ids: BTreeSet<UserId>,
    pub address: Option<PostalAddress>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: &str, role: Role, address: Option<PostalAddress>, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            name: name.trim().to_string(),
            role,
            impact_score: 0,
            average_rating: 0.0,
            ratings_count: 0,
            favorite_requester_ids: BTreeSet::new(),
            address,
            created_at: now,
        }
    }

    /// Fold one more rating into the running mean.
    pub fn apply_rating(&mut self, rating: u8) {
        let count = f64::from(self.ratings_count);
        self.average_rating = (self.average_rating * count + f64::from(rating)) / (count + 1.0);
        self.ratings_count += 1;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Info,
    Success,
    Warning,
}

/// One-way fact addressed to a user.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: UserId,
    pub message: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub kind: NotificationKind,
}

impl Notification {
    pub fn new(user_id: &str, message: String, kind: NotificationKind, now: DateTime<Utc>) -> Self {
        Self {
            id: new_id(),
            user_id: user_id.to_string(),
            message,
            is_read: false,
            created_at: now,
            kind,
        }
    }
}

/// A chat line on a posting's thread.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub posting_id: PostingId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    pub read_by: BTreeSet<UserId>,
    pub created_at: DateTime<Utc>,
}

/// Kind of an audit-trail entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    PostingCreated,
    Requested,
    Accepted,
    InterestRegistered,
    VolunteerAssigned,
    PickupVerified,
    /// Delivered on a verified photo.
    Delivered,
    /// Delivered on the requester's manual confirmation.
    DeliveryConfirmed,
    Rated,
}

impl EventKind {
    /// Short identifier string suitable for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PostingCreated => "posting_created",
            Self::Requested => "requested",
            Self::Accepted => "accepted",
            Self::InterestRegistered => "interest_registered",
            Self::VolunteerAssigned => "volunteer_assigned",
            Self::PickupVerified => "pickup_verified",
            Self::Delivered => "delivered",
            Self::DeliveryConfirmed => "delivery_confirmed",
            Self::Rated => "rated",
        }
    }
}

/// One applied transition, kept for the audit trail.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PostingEvent {
    pub id: String,
    pub posting_id: PostingId,
    pub kind: EventKind,
    pub actor_id: UserId,
    pub created_at: DateTime<Utc>,
}
