use chrono::Utc;

use crate::errors::RejectReason;
use crate::invariants::{
    assert_all_posting_invariants, assert_posting_immutable_fields, assert_valid_status_transition,
};
use crate::lifecycle::{apply_transition, Actor, Effect, Event, TransitionContext};
use crate::types::{Coordinates, EventKind, NewPosting, Posting, PostingStatus, Role, User};

fn user(name: &str, role: Role) -> User {
    User::new(name, role, None, Utc::now())
}

fn ctx() -> TransitionContext {
    TransitionContext {
        now: Utc::now(),
        initial_eta_minutes: 25,
    }
}

fn fresh_posting(donor: &User) -> Posting {
    Posting::new(
        donor,
        NewPosting {
            food_description: "20 veg meals".to_string(),
            quantity: "20 plates".to_string(),
            location: "12 MG Road".to_string(),
            pickup_coordinates: Some(Coordinates::new(12.97, 77.59)),
            ..NewPosting::default()
        },
        Utc::now(),
    )
}

struct Cast {
    donor: Actor,
    volunteer: Actor,
    requester: Actor,
    posting: Posting,
}

fn cast() -> Cast {
    let donor = user("Asha", Role::Donor);
    let posting = fresh_posting(&donor);
    Cast {
        donor: Actor::from(&donor),
        volunteer: Actor::from(&user("Ravi", Role::Volunteer)),
        requester: Actor::from(&user("Hope Home", Role::Requester)),
        posting,
    }
}

fn step(posting: &Posting, event: Event, actor: &Actor) -> Posting {
    let t = apply_transition(posting, &event, actor, &ctx()).expect("transition rejected");
    assert_valid_status_transition(posting.status, t.posting.status);
    assert_posting_immutable_fields(posting, &t.posting);
    assert_all_posting_invariants(&t.posting);
    t.posting
}

fn request_event() -> Event {
    Event::Request {
        requester_address: "4 Lake View".to_string(),
        destination: Some(Coordinates::new(12.99, 77.61)),
    }
}

fn in_transit(c: &Cast) -> Posting {
    let requested = step(&c.posting, request_event(), &c.requester);
    step(
        &requested,
        Event::Accept {
            reported_location: None,
        },
        &c.volunteer,
    )
}

#[test]
fn test_request_claims_available_posting() {
    let c = cast();
    let t = apply_transition(&c.posting, &request_event(), &c.requester, &ctx()).unwrap();

    assert_eq!(t.posting.status, PostingStatus::Requested);
    assert_eq!(t.posting.orphanage_id.as_deref(), Some(c.requester.id.as_str()));
    assert_eq!(t.posting.orphanage_name.as_deref(), Some("Hope Home"));
    assert_eq!(t.posting.requester_address.as_deref(), Some("4 Lake View"));
    assert_eq!(
        t.posting.destination_coordinates,
        Some(Coordinates::new(12.99, 77.61))
    );
    assert_eq!(t.kind, Some(EventKind::Requested));
    assert!(matches!(&t.effects[..], [Effect::Notify { user_id, .. }] if *user_id == c.donor.id));
}

#[test]
fn test_request_requires_requester_role() {
    let c = cast();
    let err = apply_transition(&c.posting, &request_event(), &c.volunteer, &ctx()).unwrap_err();
    assert_eq!(
        err,
        RejectReason::RoleNotAllowed {
            role: Role::Volunteer,
            event: "request"
        }
    );
}

#[test]
fn test_request_twice_is_rejected() {
    let c = cast();
    let requested = step(&c.posting, request_event(), &c.requester);
    let err = apply_transition(&requested, &request_event(), &c.requester, &ctx()).unwrap_err();
    assert_eq!(
        err,
        RejectReason::InvalidTransition {
            from: PostingStatus::Requested,
            event: "request"
        }
    );
}

#[test]
fn test_request_needs_an_address() {
    let c = cast();
    let event = Event::Request {
        requester_address: "   ".to_string(),
        destination: None,
    };
    let err = apply_transition(&c.posting, &event, &c.requester, &ctx()).unwrap_err();
    assert_eq!(err, RejectReason::EmptyField("requester_address"));
}

#[test]
fn test_accept_from_available_starts_at_pickup() {
    let c = cast();
    let t = apply_transition(
        &c.posting,
        &Event::Accept {
            reported_location: None,
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap();

    assert_eq!(t.posting.status, PostingStatus::InTransit);
    assert_eq!(t.posting.volunteer_id.as_deref(), Some(c.volunteer.id.as_str()));
    assert_eq!(t.posting.volunteer_location, c.posting.pickup_coordinates);
    assert_eq!(t.posting.eta_minutes, Some(25));
    assert!(!t.posting.is_picked_up);
    // No requester yet: only the donor hears about it.
    assert_eq!(t.effects.len(), 1);
}

#[test]
fn test_accept_from_requested_notifies_both_sides() {
    let c = cast();
    let requested = step(&c.posting, request_event(), &c.requester);
    let reported = Coordinates::new(12.5, 77.5);
    let t = apply_transition(
        &requested,
        &Event::Accept {
            reported_location: Some(reported),
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap();

    assert_eq!(t.posting.volunteer_location, Some(reported));
    let notified: Vec<_> = t
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::Notify { user_id, .. } => Some(user_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(notified, vec![c.donor.id.as_str(), c.requester.id.as_str()]);
}

#[test]
fn test_accept_clears_interest_list() {
    let c = cast();
    let other = Actor::from(&user("Meena", Role::Volunteer));
    let p = step(&c.posting, Event::RegisterInterest, &other);
    assert_eq!(p.interested_volunteers.len(), 1);

    let p = step(
        &p,
        Event::Accept {
            reported_location: None,
        },
        &c.volunteer,
    );
    assert!(p.interested_volunteers.is_empty());
}

#[test]
fn test_accept_in_transit_is_rejected() {
    let c = cast();
    let p = in_transit(&c);
    let err = apply_transition(
        &p,
        &Event::Accept {
            reported_location: None,
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap_err();
    assert!(matches!(err, RejectReason::InvalidTransition { .. }));
}

#[test]
fn test_interest_is_idempotent_per_volunteer() {
    let c = cast();
    let once = step(&c.posting, Event::RegisterInterest, &c.volunteer);
    let twice = apply_transition(&once, &Event::RegisterInterest, &c.volunteer, &ctx()).unwrap();

    assert!(twice.is_noop());
    assert!(twice.effects.is_empty());
    assert_eq!(twice.posting.interested_volunteers.len(), 1);
    assert_eq!(twice.posting.interested_volunteers[0].user_id, c.volunteer.id);
}

#[test]
fn test_interest_only_while_available() {
    let c = cast();
    let requested = step(&c.posting, request_event(), &c.requester);
    let err =
        apply_transition(&requested, &Event::RegisterInterest, &c.volunteer, &ctx()).unwrap_err();
    assert!(matches!(err, RejectReason::InvalidTransition { .. }));
}

#[test]
fn test_assign_picks_from_interest_list() {
    let c = cast();
    let p = step(&c.posting, Event::RegisterInterest, &c.volunteer);
    let t = apply_transition(
        &p,
        &Event::Assign {
            volunteer: c.volunteer.clone(),
        },
        &c.donor,
        &ctx(),
    )
    .unwrap();

    assert_eq!(t.posting.status, PostingStatus::InTransit);
    assert_eq!(t.posting.volunteer_id.as_deref(), Some(c.volunteer.id.as_str()));
    assert!(t.posting.interested_volunteers.is_empty());
    assert_eq!(t.kind, Some(EventKind::VolunteerAssigned));
}

#[test]
fn test_assign_requires_interest() {
    let c = cast();
    let err = apply_transition(
        &c.posting,
        &Event::Assign {
            volunteer: c.volunteer.clone(),
        },
        &c.donor,
        &ctx(),
    )
    .unwrap_err();
    assert_eq!(err, RejectReason::NotInterested);
}

#[test]
fn test_assign_only_by_owning_donor() {
    let c = cast();
    let p = step(&c.posting, Event::RegisterInterest, &c.volunteer);
    let stranger = Actor::from(&user("Other Donor", Role::Donor));
    let err = apply_transition(
        &p,
        &Event::Assign {
            volunteer: c.volunteer.clone(),
        },
        &stranger,
        &ctx(),
    )
    .unwrap_err();
    assert_eq!(err, RejectReason::NotAParty);
}

#[test]
fn test_pickup_only_by_assigned_volunteer() {
    let c = cast();
    let p = in_transit(&c);
    let other = Actor::from(&user("Meena", Role::Volunteer));
    let err = apply_transition(
        &p,
        &Event::VerifyPickup {
            proof: "img".to_string(),
        },
        &other,
        &ctx(),
    )
    .unwrap_err();
    assert_eq!(err, RejectReason::NotAParty);
}

#[test]
fn test_pickup_twice_is_rejected() {
    let c = cast();
    let p = step(
        &in_transit(&c),
        Event::VerifyPickup {
            proof: "pickup.jpg".to_string(),
        },
        &c.volunteer,
    );
    assert!(p.is_picked_up);
    assert_eq!(p.status, PostingStatus::InTransit);

    let err = apply_transition(
        &p,
        &Event::VerifyPickup {
            proof: "again.jpg".to_string(),
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap_err();
    assert_eq!(err, RejectReason::AlreadyPickedUp);
}

#[test]
fn test_photo_delivery_needs_pickup_first() {
    let c = cast();
    let err = apply_transition(
        &in_transit(&c),
        &Event::VerifyDelivery {
            proof: "drop.jpg".to_string(),
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap_err();
    assert_eq!(err, RejectReason::NotPickedUp);
}

#[test]
fn test_delivery_grants_impact_once() {
    let c = cast();
    let picked = step(
        &in_transit(&c),
        Event::VerifyPickup {
            proof: "pickup.jpg".to_string(),
        },
        &c.volunteer,
    );
    let t = apply_transition(
        &picked,
        &Event::VerifyDelivery {
            proof: "drop.jpg".to_string(),
        },
        &c.volunteer,
        &ctx(),
    )
    .unwrap();

    assert_eq!(t.posting.status, PostingStatus::Delivered);
    assert_eq!(t.posting.delivery_proof.as_deref(), Some("drop.jpg"));
    let increments: Vec<_> = t
        .effects
        .iter()
        .filter_map(|e| match e {
            Effect::IncrementImpact { user_id } => Some(user_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(increments, vec![c.donor.id.clone(), c.volunteer.id.clone()]);

    // Re-applying the same update is refused, so nothing is counted twice.
    let again = apply_transition(
        &t.posting,
        &Event::VerifyDelivery {
            proof: "drop.jpg".to_string(),
        },
        &c.volunteer,
        &ctx(),
    );
    assert!(matches!(
        again,
        Err(RejectReason::InvalidTransition {
            from: PostingStatus::Delivered,
            ..
        })
    ));
}

#[test]
fn test_requester_confirms_delivery() {
    let c = cast();
    let p = step(&in_transit(&c), Event::ConfirmDelivery, &c.requester);
    assert_eq!(p.status, PostingStatus::Delivered);
    assert!(p.delivery_proof.is_none());
}

#[test]
fn test_only_requester_confirms_delivery() {
    let c = cast();
    let err = apply_transition(&in_transit(&c), &Event::ConfirmDelivery, &c.donor, &ctx())
        .unwrap_err();
    assert_eq!(err, RejectReason::NotAParty);
}

#[test]
fn test_rating_rules() {
    let c = cast();
    let delivered = step(&in_transit(&c), Event::ConfirmDelivery, &c.requester);
    let rate = |rating: u8| Event::Rate {
        rating,
        feedback: " on time ".to_string(),
    };

    for bad in [0u8, 6] {
        assert_eq!(
            apply_transition(&delivered, &rate(bad), &c.donor, &ctx()).unwrap_err(),
            RejectReason::InvalidRating(bad)
        );
    }
    assert_eq!(
        apply_transition(&delivered, &rate(5), &c.volunteer, &ctx()).unwrap_err(),
        RejectReason::NotAParty
    );

    let t = apply_transition(&delivered, &rate(5), &c.donor, &ctx()).unwrap();
    assert_eq!(t.posting.ratings.len(), 1);
    assert_eq!(t.posting.ratings[0].feedback, "on time");
    assert_eq!(
        t.effects,
        vec![Effect::RecordVolunteerRating {
            volunteer_id: c.volunteer.id.clone(),
            rating: 5
        }]
    );

    assert_eq!(
        apply_transition(&t.posting, &rate(4), &c.donor, &ctx()).unwrap_err(),
        RejectReason::AlreadyRated
    );
    let by_requester = step(&t.posting, rate(4), &c.requester);
    assert_eq!(by_requester.ratings.len(), 2);
}

#[test]
fn test_rating_before_delivery_is_rejected() {
    let c = cast();
    let err = apply_transition(
        &in_transit(&c),
        &Event::Rate {
            rating: 5,
            feedback: String::new(),
        },
        &c.donor,
        &ctx(),
    )
    .unwrap_err();
    assert!(matches!(err, RejectReason::InvalidTransition { .. }));
}

#[test]
fn test_running_average_rating() {
    let mut volunteer = user("Ravi", Role::Volunteer);
    volunteer.average_rating = 4.0;
    volunteer.ratings_count = 3;

    volunteer.apply_rating(5);

    assert!((volunteer.average_rating - 4.25).abs() < 1e-9);
    assert_eq!(volunteer.ratings_count, 4);
}

#[test]
fn test_full_lifecycle_moves_forward_only() {
    let c = cast();
    let mut p = c.posting.clone();
    let steps = vec![
        (request_event(), c.requester.clone()),
        (
            Event::Accept {
                reported_location: None,
            },
            c.volunteer.clone(),
        ),
        (
            Event::VerifyPickup {
                proof: "pickup.jpg".to_string(),
            },
            c.volunteer.clone(),
        ),
        (
            Event::VerifyDelivery {
                proof: "drop.jpg".to_string(),
            },
            c.volunteer.clone(),
        ),
    ];

    let mut ranks = vec![p.status.rank()];
    for (event, actor) in steps {
        p = step(&p, event, &actor);
        ranks.push(p.status.rank());
    }

    assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(p.status, PostingStatus::Delivered);
    assert!(p.is_picked_up);
    assert_eq!(p.pickup_proof.as_deref(), Some("pickup.jpg"));
    assert_eq!(p.delivery_proof.as_deref(), Some("drop.jpg"));
}

#[test]
fn test_status_parse() {
    assert_eq!(PostingStatus::parse("in_transit"), Some(PostingStatus::InTransit));
    assert_eq!(PostingStatus::parse("In-Transit"), Some(PostingStatus::InTransit));
    assert_eq!(PostingStatus::parse("DELIVERED"), Some(PostingStatus::Delivered));
    assert_eq!(PostingStatus::parse("lost"), None);
}

#[test]
fn test_wire_names() {
    assert_eq!(
        serde_json::to_value(PostingStatus::InTransit).unwrap(),
        serde_json::json!("IN_TRANSIT")
    );
    assert_eq!(
        serde_json::to_value(EventKind::DeliveryConfirmed).unwrap(),
        serde_json::json!("delivery_confirmed")
    );
    assert_eq!(
        serde_json::from_value::<Role>(serde_json::json!("REQUESTER")).unwrap(),
        Role::Requester
    );
}
