use chrono::Utc;

use crate::errors::RejectReason;
use crate::lifecycle::Actor;
use crate::tracking::{advance, apply_live_report, eta_minutes, simulate_tick, step_toward};
use crate::types::{Coordinates, NewPosting, Posting, PostingStatus, Role, User};

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-12
}

fn posting_in_transit(start: Option<Coordinates>, destination: Option<Coordinates>) -> Posting {
    let donor = User::new("Asha", Role::Donor, None, Utc::now());
    let mut p = Posting::new(
        &donor,
        NewPosting {
            food_description: "bread".to_string(),
            location: "bakery".to_string(),
            pickup_coordinates: Some(Coordinates::new(1.0, 1.0)),
            ..NewPosting::default()
        },
        Utc::now(),
    );
    p.status = PostingStatus::InTransit;
    p.volunteer_id = Some("vol-1".to_string());
    p.volunteer_location = start;
    p.destination_coordinates = destination;
    p
}

#[test]
fn test_one_step_covers_five_percent() {
    let moved = step_toward(Coordinates::new(0.0, 0.0), Coordinates::new(10.0, 10.0));
    assert!(close(moved.lat, 0.5));
    assert!(close(moved.lng, 0.5));
}

#[test]
fn test_distance_shrinks_but_never_reaches_zero() {
    let destination = Coordinates::new(10.0, 10.0);
    let mut current = Coordinates::new(0.0, 0.0);
    let mut last = current.distance_to(&destination);

    for _ in 0..300 {
        current = step_toward(current, destination);
        let d = current.distance_to(&destination);
        assert!(d < last, "distance did not shrink: {d} >= {last}");
        assert!(d > 0.0);
        last = d;
    }
}

#[test]
fn test_eta_heuristic() {
    assert_eq!(eta_minutes(0.0123), 12);
    assert_eq!(eta_minutes(0.25), 250);
    assert_eq!(eta_minutes(0.0004), 1);
    assert_eq!(eta_minutes(0.0), 1);
}

#[test]
fn test_advance_uses_pickup_when_no_volunteer_location() {
    let destination = Coordinates::new(3.0, 1.0);
    let p = posting_in_transit(None, Some(destination));
    let next = advance(&p, Utc::now()).expect("eligible posting");

    let loc = next.volunteer_location.unwrap();
    assert!(close(loc.lat, 1.1));
    assert!(close(loc.lng, 1.0));
    // Roughly 1.9 degrees left.
    let eta = next.eta_minutes.unwrap();
    assert_eq!(eta, eta_minutes(loc.distance_to(&destination)));
    assert!((1899..=1900).contains(&eta));
    assert_eq!(next.version, p.version);
}

#[test]
fn test_advance_skips_ineligible_postings() {
    let no_destination = posting_in_transit(Some(Coordinates::new(0.0, 0.0)), None);
    assert!(advance(&no_destination, Utc::now()).is_none());

    let mut not_moving = posting_in_transit(None, Some(Coordinates::new(2.0, 2.0)));
    not_moving.status = PostingStatus::Requested;
    assert!(advance(&not_moving, Utc::now()).is_none());

    let mut delivered = posting_in_transit(None, Some(Coordinates::new(2.0, 2.0)));
    delivered.status = PostingStatus::Delivered;
    assert!(advance(&delivered, Utc::now()).is_none());
}

#[test]
fn test_tick_moves_only_in_transit_postings() {
    let moving = posting_in_transit(
        Some(Coordinates::new(0.0, 0.0)),
        Some(Coordinates::new(10.0, 10.0)),
    );
    let mut idle = moving.clone();
    idle.id = "idle".to_string();
    idle.status = PostingStatus::Available;

    let batch = simulate_tick(&[moving.clone(), idle], Utc::now());
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, moving.id);
    assert_eq!(batch[0].status, PostingStatus::InTransit);
}

#[test]
fn test_live_report_only_from_assigned_volunteer() {
    let p = posting_in_transit(None, Some(Coordinates::new(2.0, 2.0)));
    let volunteer = Actor {
        id: "vol-1".to_string(),
        name: "Ravi".to_string(),
        role: Role::Volunteer,
    };
    let stranger = Actor {
        id: "vol-2".to_string(),
        ..volunteer.clone()
    };
    let here = Coordinates::new(1.5, 1.5);

    assert_eq!(
        apply_live_report(&p, &stranger, here, Some(9), Utc::now()).unwrap_err(),
        RejectReason::NotAParty
    );

    let next = apply_live_report(&p, &volunteer, here, Some(9), Utc::now()).unwrap();
    assert_eq!(next.volunteer_location, Some(here));
    assert_eq!(next.eta_minutes, Some(9));

    let kept = apply_live_report(&next, &volunteer, here, None, Utc::now()).unwrap();
    assert_eq!(kept.eta_minutes, Some(9));
}
