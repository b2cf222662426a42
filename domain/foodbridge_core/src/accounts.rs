//! User accounts, donor favorites and the notification inbox.

use chrono::Utc;
use tracing::info;

use crate::errors::{Error, RejectReason, Result};
use crate::storage::Store;
use crate::types::{Notification, PostalAddress, Role, User};

pub async fn register_user<S: Store + ?Sized>(
    store: &S,
    name: &str,
    role: Role,
    address: Option<PostalAddress>,
) -> Result<User> {
    if name.trim().is_empty() {
        return Err(RejectReason::EmptyField("name").into());
    }
    if let Some(address) = &address {
        if !PostalAddress::is_valid_pincode(&address.pincode) {
            return Err(RejectReason::InvalidPincode(address.pincode.clone()).into());
        }
    }

    let user = User::new(name, role, address, Utc::now());
    store.insert_user(&user).await?;
    info!("Registered {} {} ({})", user.role, user.name, user.id);
    Ok(user)
}

pub async fn user<S: Store + ?Sized>(store: &S, id: &str) -> Result<User> {
    store
        .get_user(id)
        .await?
        .ok_or_else(|| Error::UserNotFound(id.to_string()))
}

/// Flip `requester_id` in the donor's favorites. Returns whether it is now a favorite.
pub async fn toggle_favorite_requester<S: Store + ?Sized>(
    store: &S,
    donor_id: &str,
    requester_id: &str,
) -> Result<bool> {
    let donor = user(store, donor_id).await?;
    if donor.role != Role::Donor {
        return Err(RejectReason::RoleNotAllowed {
            role: donor.role,
            event: "keep favorite requesters",
        }
        .into());
    }
    let requester = user(store, requester_id).await?;
    if requester.role != Role::Requester {
        return Err(RejectReason::RoleNotAllowed {
            role: requester.role,
            event: "be a favorite requester",
        }
        .into());
    }

    let target = requester.id;
    let updated = store
        .modify_user(donor_id, &|u: &mut User| {
            if !u.favorite_requester_ids.remove(target.as_str()) {
                u.favorite_requester_ids.insert(target.clone());
            }
        })
        .await?;
    Ok(updated.favorite_requester_ids.contains(target.as_str()))
}

/// Newest first.
pub async fn notifications<S: Store + ?Sized>(store: &S, user_id: &str) -> Result<Vec<Notification>> {
    user(store, user_id).await?;
    Ok(store.notifications_for(user_id).await?)
}

pub async fn mark_notification_read<S: Store + ?Sized>(store: &S, id: &str) -> Result<()> {
    if store.mark_notification_read(id).await? {
        Ok(())
    } else {
        Err(Error::NotificationNotFound(id.to_string()))
    }
}

pub async fn unread_notification_count<S: Store + ?Sized>(store: &S, user_id: &str) -> Result<usize> {
    Ok(store
        .notifications_for(user_id)
        .await?
        .iter()
        .filter(|n| !n.is_read)
        .count())
}
