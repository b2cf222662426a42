#![allow(dead_code)]

use crate::types::{Posting, PostingStatus, User};

/// Status only moves forward. Staying put is allowed for the side-flag
/// events (interest, pickup, rating).
pub fn assert_valid_status_transition(from: PostingStatus, to: PostingStatus) {
    let valid = from == to
        || matches!(
            (from, to),
            (PostingStatus::Available, PostingStatus::Requested)
                | (PostingStatus::Available, PostingStatus::InTransit)
                | (PostingStatus::Requested, PostingStatus::InTransit)
                | (PostingStatus::InTransit, PostingStatus::Delivered)
        );

    assert!(
        valid,
        "invalid status transition from {:?} to {:?}",
        from, to
    );
}

/// Fields fixed at creation never change.
pub fn assert_posting_immutable_fields(original: &Posting, current: &Posting) {
    assert_eq!(original.id, current.id, "posting id changed");
    assert_eq!(original.donor_id, current.donor_id, "donor changed");
    assert_eq!(original.donor_name, current.donor_name, "donor name changed");
    assert_eq!(original.location, current.location, "pickup location changed");
    assert_eq!(
        original.pickup_coordinates, current.pickup_coordinates,
        "pickup coordinates changed"
    );
    assert_eq!(original.created_at, current.created_at, "created_at changed");
}

/// Once a volunteer is attached, the interest list is empty.
pub fn assert_interest_cleared_on_assignment(posting: &Posting) {
    if posting.volunteer_id.is_some() {
        assert!(
            posting.interested_volunteers.is_empty(),
            "posting {} has a volunteer but {} interested entries remain",
            posting.id,
            posting.interested_volunteers.len()
        );
    }
}

/// Each volunteer appears at most once in the interest list.
pub fn assert_unique_interest(posting: &Posting) {
    for (i, a) in posting.interested_volunteers.iter().enumerate() {
        for b in &posting.interested_volunteers[i + 1..] {
            assert_ne!(
                a.user_id, b.user_id,
                "volunteer {} registered interest twice on {}",
                a.user_id, posting.id
            );
        }
    }
}

/// Ratings stay in range and each rater appears once.
pub fn assert_ratings_well_formed(posting: &Posting) {
    for (i, r) in posting.ratings.iter().enumerate() {
        assert!(
            (1..=5).contains(&r.rating),
            "rating {} out of range on {}",
            r.rating,
            posting.id
        );
        assert!(
            posting.ratings[i + 1..].iter().all(|o| o.rater_id != r.rater_id),
            "{} rated {} twice",
            r.rater_id,
            posting.id
        );
    }
}

/// Impact score moved by exactly `delta`.
pub fn assert_impact_delta(before: &User, after: &User, delta: u32) {
    assert_eq!(
        after.impact_score,
        before.impact_score + delta,
        "impact of {} moved from {} to {}, expected +{}",
        after.id,
        before.impact_score,
        after.impact_score,
        delta
    );
}

/// Delivered postings went through pickup or requester confirmation and
/// carry a volunteer.
pub fn assert_delivered_state(posting: &Posting) {
    if posting.status == PostingStatus::Delivered {
        assert!(
            posting.volunteer_id.is_some(),
            "delivered posting {} has no volunteer",
            posting.id
        );
    }
}

/// Run all stateless posting invariants.
pub fn assert_all_posting_invariants(posting: &Posting) {
    assert_interest_cleared_on_assignment(posting);
    assert_unique_interest(posting);
    assert_ratings_well_formed(posting);
    assert_delivered_state(posting);
}
