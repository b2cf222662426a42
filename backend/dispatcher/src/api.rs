//! Axum REST API handlers.
//!
//! The caller's identity travels as `actor_id` in the body (or query
//! string for reads); the lifecycle manager loads that user to decide what
//! they may do. Rejections come back as `422`, unknown ids as `404`, lost
//! write races as `409`, all with an `{ "error": … }` body. Malformed
//! bodies and query strings go through [`ApiJson`] and [`ApiQuery`] so they
//! answer in the same shape.

use std::sync::Arc;

use axum::{
    extract::{FromRequest, FromRequestParts, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use foodbridge_core::oracle::{Geocoder, RouteOracle, RoutePlan, Verdict};
use foodbridge_core::{
    accounts, chat, ChatMessage, Coordinates, LifecycleManager, NewPosting, Notification,
    PostalAddress, Posting, PostingEvent, PostingStatus, Role, User,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::SqliteStore;
use crate::errors::{DispatcherError, Result};
use crate::oracle_client::decode_data_url;

pub struct ApiState {
    pub manager: Arc<LifecycleManager<SqliteStore>>,
    pub geocoder: Arc<dyn Geocoder>,
    pub router: Arc<dyn RouteOracle>,
}

impl ApiState {
    fn store(&self) -> &SqliteStore {
        self.manager.store()
    }
}

type AppState = State<Arc<ApiState>>;

/// `Json` extractor whose rejection is a JSON [`DispatcherError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(DispatcherError))]
pub struct ApiJson<T>(pub T);

/// `Query` extractor whose rejection is a JSON [`DispatcherError`].
#[derive(FromRequestParts)]
#[from_request(via(Query), rejection(DispatcherError))]
pub struct ApiQuery<T>(pub T);

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct RegisterUserRequest {
    pub name: String,
    pub role: Role,
    pub address: Option<PostalAddress>,
}

#[derive(Deserialize)]
pub struct ActorRequest {
    pub actor_id: String,
}

#[derive(Deserialize)]
pub struct CreatePostingRequest {
    pub actor_id: String,
    #[serde(flatten)]
    pub posting: NewPosting,
}

#[derive(Deserialize)]
pub struct ListPostingsQuery {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct RequestPostingRequest {
    pub actor_id: String,
    /// Falls back to the requester's registered address.
    pub requester_address: Option<String>,
    pub destination: Option<Coordinates>,
}

#[derive(Deserialize)]
pub struct AcceptRequest {
    pub actor_id: String,
    pub location: Option<Coordinates>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub actor_id: String,
    pub volunteer_id: String,
}

#[derive(Deserialize)]
pub struct ProofRequest {
    pub actor_id: String,
    /// `data:` URL of the photo.
    pub image: String,
}

#[derive(Deserialize)]
pub struct RateRequest {
    pub actor_id: String,
    pub rating: u8,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Deserialize)]
pub struct LocationRequest {
    pub actor_id: String,
    pub location: Coordinates,
}

#[derive(Deserialize)]
pub struct MessageRequest {
    pub actor_id: String,
    pub text: String,
}

#[derive(Deserialize)]
pub struct GeocodeQuery {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
pub struct RouteRequest {
    pub origin: String,
    pub destination: String,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct PostingsResponse {
    pub count: usize,
    pub postings: Vec<Posting>,
}

#[derive(Serialize)]
pub struct ProofResponse {
    pub posting: Posting,
    pub verdict: Verdict,
}

#[derive(Serialize)]
pub struct FavoriteResponse {
    pub requester_id: String,
    pub favorite: bool,
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub count: usize,
    pub notifications: Vec<Notification>,
}

#[derive(Serialize)]
pub struct UnreadResponse {
    pub notifications: usize,
    pub messages: usize,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub posting_id: String,
    pub count: usize,
    pub events: Vec<PostingEvent>,
}

#[derive(Serialize)]
pub struct AllEventsResponse {
    pub count: usize,
    pub events: Vec<PostingEvent>,
}

#[derive(Serialize)]
pub struct MessagesResponse {
    pub posting_id: String,
    pub count: usize,
    pub messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
pub struct MarkedResponse {
    pub marked: usize,
}

#[derive(Serialize)]
pub struct AddressResponse {
    pub address: Option<PostalAddress>,
}

#[derive(Serialize)]
pub struct RouteResponse {
    pub route: Option<RoutePlan>,
}

// ─────────────────────────────────────────────────────────
// Handlers: health & users
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /users`
pub async fn register_user(
    State(state): AppState,
    ApiJson(body): ApiJson<RegisterUserRequest>,
) -> Result<impl IntoResponse> {
    let user = accounts::register_user(state.store(), &body.name, body.role, body.address).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// `GET /users/:id`
pub async fn get_user(State(state): AppState, Path(id): Path<String>) -> Result<Json<User>> {
    Ok(Json(accounts::user(state.store(), &id).await?))
}

/// `POST /users/:id/favorites/:requester_id`
///
/// Toggles the requester in the donor's favorites.
pub async fn toggle_favorite(
    State(state): AppState,
    Path((donor_id, requester_id)): Path<(String, String)>,
) -> Result<Json<FavoriteResponse>> {
    let favorite =
        accounts::toggle_favorite_requester(state.store(), &donor_id, &requester_id).await?;
    Ok(Json(FavoriteResponse {
        requester_id,
        favorite,
    }))
}

/// `GET /users/:id/notifications`
pub async fn list_notifications(
    State(state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<NotificationsResponse>> {
    let notifications = accounts::notifications(state.store(), &user_id).await?;
    Ok(Json(NotificationsResponse {
        count: notifications.len(),
        notifications,
    }))
}

/// `POST /notifications/:id/read`
pub async fn mark_notification_read(
    State(state): AppState,
    Path(id): Path<String>,
) -> Result<StatusCode> {
    accounts::mark_notification_read(state.store(), &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /users/:id/unread`
pub async fn unread_counts(
    State(state): AppState,
    Path(user_id): Path<String>,
) -> Result<Json<UnreadResponse>> {
    accounts::user(state.store(), &user_id).await?;
    Ok(Json(UnreadResponse {
        notifications: accounts::unread_notification_count(state.store(), &user_id).await?,
        messages: chat::unread_message_count(state.store(), &user_id).await?,
    }))
}

// ─────────────────────────────────────────────────────────
// Handlers: postings
// ─────────────────────────────────────────────────────────

/// `POST /postings`
pub async fn create_posting(
    State(state): AppState,
    ApiJson(body): ApiJson<CreatePostingRequest>,
) -> Result<impl IntoResponse> {
    let posting = state
        .manager
        .create_posting(&body.actor_id, body.posting)
        .await?;
    Ok((StatusCode::CREATED, Json(posting)))
}

/// `GET /postings?status=IN_TRANSIT`
pub async fn list_postings(
    State(state): AppState,
    ApiQuery(query): ApiQuery<ListPostingsQuery>,
) -> Result<Json<PostingsResponse>> {
    let status = query
        .status
        .as_deref()
        .map(|raw| {
            PostingStatus::parse(raw)
                .ok_or_else(|| DispatcherError::BadRequest(format!("unknown status {raw:?}")))
        })
        .transpose()?;
    let postings = state.manager.postings(status).await?;
    Ok(Json(PostingsResponse {
        count: postings.len(),
        postings,
    }))
}

/// `GET /postings/:id`
pub async fn get_posting(State(state): AppState, Path(id): Path<String>) -> Result<Json<Posting>> {
    Ok(Json(state.manager.posting(&id).await?))
}

/// `POST /postings/:id/request`
pub async fn request_posting(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RequestPostingRequest>,
) -> Result<Json<Posting>> {
    let address = match body.requester_address {
        Some(address) => address,
        None => accounts::user(state.store(), &body.actor_id)
            .await?
            .address
            .map(|a| a.one_line())
            .unwrap_or_default(),
    };
    let posting = state
        .manager
        .request(&id, &body.actor_id, address, body.destination)
        .await?;
    Ok(Json(posting))
}

/// `POST /postings/:id/accept`
pub async fn accept_posting(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AcceptRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state
            .manager
            .accept(&id, &body.actor_id, body.location)
            .await?,
    ))
}

/// `POST /postings/:id/interest`
pub async fn register_interest(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ActorRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state.manager.register_interest(&id, &body.actor_id).await?,
    ))
}

/// `POST /postings/:id/assign`
pub async fn assign_volunteer(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<AssignRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state
            .manager
            .assign(&id, &body.actor_id, &body.volunteer_id)
            .await?,
    ))
}

/// `POST /postings/:id/pickup`
pub async fn verify_pickup(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ProofRequest>,
) -> Result<Json<ProofResponse>> {
    let image = decode_data_url(&body.image)?;
    let (posting, verdict) = state
        .manager
        .verify_pickup(&id, &body.actor_id, &image, body.image)
        .await?;
    Ok(Json(ProofResponse { posting, verdict }))
}

/// `POST /postings/:id/deliver`
pub async fn verify_delivery(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ProofRequest>,
) -> Result<Json<ProofResponse>> {
    let image = decode_data_url(&body.image)?;
    let (posting, verdict) = state
        .manager
        .verify_delivery(&id, &body.actor_id, &image, body.image)
        .await?;
    Ok(Json(ProofResponse { posting, verdict }))
}

/// `POST /postings/:id/confirm`
pub async fn confirm_delivery(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<ActorRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state.manager.confirm_delivery(&id, &body.actor_id).await?,
    ))
}

/// `POST /postings/:id/rate`
pub async fn rate_posting(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<RateRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state
            .manager
            .rate(&id, &body.actor_id, body.rating, body.feedback)
            .await?,
    ))
}

/// `POST /postings/:id/location`
///
/// Live position from the assigned volunteer's device.
pub async fn report_location(
    State(state): AppState,
    Path(id): Path<String>,
    ApiJson(body): ApiJson<LocationRequest>,
) -> Result<Json<Posting>> {
    Ok(Json(
        state
            .manager
            .report_location(&id, &body.actor_id, body.location)
            .await?,
    ))
}

/// `GET /postings/:id/events`
pub async fn posting_events(
    State(state): AppState,
    Path(posting_id): Path<String>,
) -> Result<Json<EventsResponse>> {
    let events = state.manager.events(&posting_id).await?;
    Ok(Json(EventsResponse {
        posting_id,
        count: events.len(),
        events,
    }))
}

/// `GET /events`: audit trail across every posting, oldest first.
pub async fn all_events(State(state): AppState) -> Result<Json<AllEventsResponse>> {
    let events = state.manager.all_events().await?;
    Ok(Json(AllEventsResponse {
        count: events.len(),
        events,
    }))
}

// ─────────────────────────────────────────────────────────
// Handlers: chat
// ─────────────────────────────────────────────────────────

/// `GET /postings/:id/messages?actor_id=…`
pub async fn list_messages(
    State(state): AppState,
    Path(posting_id): Path<String>,
    ApiQuery(reader): ApiQuery<ActorRequest>,
) -> Result<Json<MessagesResponse>> {
    let messages = chat::messages(state.store(), &posting_id, &reader.actor_id).await?;
    Ok(Json(MessagesResponse {
        posting_id,
        count: messages.len(),
        messages,
    }))
}

/// `POST /postings/:id/messages`
pub async fn send_message(
    State(state): AppState,
    Path(posting_id): Path<String>,
    ApiJson(body): ApiJson<MessageRequest>,
) -> Result<impl IntoResponse> {
    let message = chat::send_message(state.store(), &posting_id, &body.actor_id, &body.text).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `POST /postings/:id/messages/read`
pub async fn mark_messages_read(
    State(state): AppState,
    Path(posting_id): Path<String>,
    ApiJson(body): ApiJson<ActorRequest>,
) -> Result<Json<MarkedResponse>> {
    let marked = chat::mark_messages_read(state.store(), &posting_id, &body.actor_id).await?;
    Ok(Json(MarkedResponse { marked }))
}

// ─────────────────────────────────────────────────────────
// Handlers: oracle passthroughs
// ─────────────────────────────────────────────────────────

/// `GET /geocode/reverse?lat=…&lng=…`
///
/// An unreachable geocoder yields `{ "address": null }`.
pub async fn reverse_geocode(
    State(state): AppState,
    ApiQuery(query): ApiQuery<GeocodeQuery>,
) -> impl IntoResponse {
    let address = match state.geocoder.reverse_geocode(query.lat, query.lng).await {
        Ok(address) => address,
        Err(e) => {
            warn!("Reverse geocoding ({}, {}) failed: {e}", query.lat, query.lng);
            None
        }
    };
    Json(AddressResponse { address })
}

/// `POST /route`
pub async fn optimize_route(
    State(state): AppState,
    ApiJson(body): ApiJson<RouteRequest>,
) -> impl IntoResponse {
    let route = match state
        .router
        .optimize_route(&body.origin, &body.destination)
        .await
    {
        Ok(route) => route,
        Err(e) => {
            warn!("Route optimisation failed: {e}");
            None
        }
    };
    Json(RouteResponse { route })
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
