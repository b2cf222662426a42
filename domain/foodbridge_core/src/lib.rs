//! # FoodBridge Core
//!
//! Domain core of **FoodBridge**, a coordination service in which donors
//! post surplus food, volunteers pick it up and deliver it, and requester
//! organisations receive it.
//!
//! | Phase        | Entry Point(s)                                                   |
//! |--------------|------------------------------------------------------------------|
//! | Accounts     | [`accounts::register_user`], [`accounts::toggle_favorite_requester`] |
//! | Posting      | [`LifecycleManager::create_posting`]                             |
//! | Claiming     | `request`, `register_interest`, `assign`, `accept`               |
//! | Handover     | `verify_pickup`, `verify_delivery`, `confirm_delivery`           |
//! | Feedback     | `rate`                                                           |
//! | Tracking     | `simulate_tick`, `report_location`                               |
//! | Chat         | [`chat::send_message`], [`chat::messages`]                       |
//!
//! ## Architecture
//!
//! Transition guards live in one pure function, [`lifecycle::apply_transition`].
//! Persistence is reached only through the repository traits in [`storage`];
//! external services only through the traits in [`oracle`]. The manager
//! glues the three together and owns retry-on-conflict.

pub mod accounts;
pub mod chat;
pub mod errors;
pub mod lifecycle;
pub mod manager;
pub mod oracle;
pub mod storage;
pub mod tracking;
mod types;

#[cfg(test)]
mod invariants;
#[cfg(test)]
mod test_lifecycle;
#[cfg(test)]
mod test_tracking;

pub use errors::{Error, OracleError, RejectReason, Result, StoreError};
pub use manager::{LifecycleManager, TickReport};
pub use storage::{MemoryStore, Store};
pub use types::*;
