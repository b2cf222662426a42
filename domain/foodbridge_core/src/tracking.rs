//! # Tracking
//!
//! Simulated live location. This is **not** navigation: each tick moves the
//! volunteer a fixed fraction of the remaining straight-line delta toward the
//! destination, and the ETA is a scaled distance. The coordinate approaches
//! the destination exponentially and never reaches it; a posting only
//! leaves `InTransit` through delivery.

use chrono::{DateTime, Utc};

use crate::errors::RejectReason;
use crate::lifecycle::Actor;
use crate::types::{Coordinates, Posting, PostingStatus};

/// Fraction of the remaining delta covered per tick.
pub const STEP_FRACTION: f64 = 0.05;

/// Minutes per degree of straight-line distance in the ETA heuristic.
pub const ETA_SCALE: f64 = 1000.0;

/// Move `current` one tick toward `destination`.
pub fn step_toward(current: Coordinates, destination: Coordinates) -> Coordinates {
    Coordinates {
        lat: current.lat + (destination.lat - current.lat) * STEP_FRACTION,
        lng: current.lng + (destination.lng - current.lng) * STEP_FRACTION,
    }
}

/// `max(1, floor(distance * 1000))`.
pub fn eta_minutes(distance: f64) -> u32 {
    // `as` saturates on overflow and maps NaN to 0.
    ((distance * ETA_SCALE).floor() as u32).max(1)
}

/// Where the simulated volunteer starts from, if anywhere.
fn start_of(posting: &Posting) -> Option<Coordinates> {
    posting.volunteer_location.or(posting.pickup_coordinates)
}

/// Advance one posting by one tick. `None` when the posting is not eligible.
pub fn advance(posting: &Posting, now: DateTime<Utc>) -> Option<Posting> {
    if posting.status != PostingStatus::InTransit {
        return None;
    }
    let current = start_of(posting)?;
    let destination = posting.destination_coordinates?;

    let moved = step_toward(current, destination);
    let mut next = posting.clone();
    next.volunteer_location = Some(moved);
    next.eta_minutes = Some(eta_minutes(moved.distance_to(&destination)));
    next.updated_at = now;
    Some(next)
}

/// Compute the batch of updated postings for one simulator tick.
pub fn simulate_tick(postings: &[Posting], now: DateTime<Utc>) -> Vec<Posting> {
    postings.iter().filter_map(|p| advance(p, now)).collect()
}

/// Overwrite the simulated position with a real device coordinate.
///
/// Only the assigned volunteer of an in-transit posting may report. `eta`
/// comes from the route oracle; `None` keeps the previous estimate.
pub fn apply_live_report(
    posting: &Posting,
    actor: &Actor,
    location: Coordinates,
    eta: Option<u32>,
    now: DateTime<Utc>,
) -> Result<Posting, RejectReason> {
    if posting.status != PostingStatus::InTransit {
        return Err(RejectReason::InvalidTransition {
            from: posting.status,
            event: "report location for",
        });
    }
    if posting.volunteer_id.as_deref() != Some(actor.id.as_str()) {
        return Err(RejectReason::NotAParty);
    }

    let mut next = posting.clone();
    next.volunteer_location = Some(location);
    if let Some(eta) = eta {
        next.eta_minutes = Some(eta.max(1));
    }
    next.updated_at = now;
    Ok(next)
}
