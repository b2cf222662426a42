//! HTTP client for the verification / geocoding / routing oracle.
//!
//! All three oracle traits are served by one JSON endpoint family under
//! `ORACLE_URL`:
//!
//! | Path               | Request body                        | Response body                          |
//! |--------------------|-------------------------------------|----------------------------------------|
//! | `/verify`          | `{ kind, image }` (base64)          | `{ isValid, feedback }`                |
//! | `/geocode/reverse` | `{ lat, lng }`                      | `{ address }` or `{ line1, … }`        |
//! | `/eta`             | `{ origin: { lat, lng }, destination }` | `{ etaMinutes }` or `{ text }`     |
//! | `/route`           | `{ origin, destination }`           | `{ summary, estimatedDuration, … }`    |
//!
//! Each call is attempted once. Transport failures surface as
//! [`OracleError::Request`], unreadable bodies as [`OracleError::Decode`];
//! the lifecycle manager decides what a failure means.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use foodbridge_core::oracle::{Geocoder, ImageVerifier, ProofKind, RouteOracle, RoutePlan, Verdict};
use foodbridge_core::{Coordinates, OracleError, PostalAddress};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{DispatcherError, Result};

pub struct HttpOracle {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOracle {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> std::result::Result<T, OracleError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::Request(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Request(format!("{url} answered {status}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Decode(e.to_string()))?;
        debug!("Oracle {path} answered {value}");
        serde_json::from_value(value).map_err(|e| OracleError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ImageVerifier for HttpOracle {
    async fn verify(&self, image: &[u8], kind: ProofKind) -> std::result::Result<Verdict, OracleError> {
        self.post(
            "/verify",
            json!({ "kind": kind.as_str(), "image": STANDARD.encode(image) }),
        )
        .await
    }
}

#[async_trait]
impl Geocoder for HttpOracle {
    async fn reverse_geocode(
        &self,
        lat: f64,
        lng: f64,
    ) -> std::result::Result<Option<PostalAddress>, OracleError> {
        let value: Value = self
            .post("/geocode/reverse", json!({ "lat": lat, "lng": lng }))
            .await?;
        Ok(decode_address(&value))
    }
}

#[async_trait]
impl RouteOracle for HttpOracle {
    async fn calculate_eta(
        &self,
        origin: Coordinates,
        destination: &str,
    ) -> std::result::Result<Option<u32>, OracleError> {
        let value: Value = self
            .post(
                "/eta",
                json!({
                    "origin": { "lat": origin.lat, "lng": origin.lng },
                    "destination": destination,
                }),
            )
            .await?;
        Ok(decode_eta(&value))
    }

    async fn optimize_route(
        &self,
        origin: &str,
        destination: &str,
    ) -> std::result::Result<Option<RoutePlan>, OracleError> {
        let value: Value = self
            .post(
                "/route",
                json!({ "origin": origin, "destination": destination }),
            )
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| OracleError::Decode(e.to_string()))
    }
}

// ─────────────────────────────────────────────────────────
// Decoding
// ─────────────────────────────────────────────────────────

/// Accepts `{ "address": { … } }`, a bare address object, or `null`.
/// Partial addresses without a usable pincode are dropped.
fn decode_address(value: &Value) -> Option<PostalAddress> {
    let object = value.get("address").unwrap_or(value);
    let address: PostalAddress = serde_json::from_value(object.clone()).ok()?;
    PostalAddress::is_valid_pincode(&address.pincode).then_some(address)
}

/// Accepts `{ "etaMinutes": 12 }`, `{ "etaMinutes": "12" }`, or free text
/// such as `{ "text": "about 12 minutes" }`.
fn decode_eta(value: &Value) -> Option<u32> {
    let field = value
        .get("etaMinutes")
        .or_else(|| value.get("eta"))
        .or_else(|| value.get("text"))
        .unwrap_or(value);
    let minutes = match field {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => first_integer(s),
        _ => None,
    }?;
    (minutes > 0).then_some(minutes)
}

fn first_integer(text: &str) -> Option<u32> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// Split a `data:<mime>;base64,<payload>` URL into raw bytes. A bare
/// base64 string is accepted too.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let payload = match url.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest.split_once(',').ok_or_else(|| {
                DispatcherError::BadRequest("malformed data URL: missing ','".to_string())
            })?;
            if !meta.ends_with(";base64") {
                return Err(DispatcherError::BadRequest(
                    "data URL is not base64 encoded".to_string(),
                ));
            }
            payload
        }
        None => url,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| DispatcherError::BadRequest(format!("invalid base64 image: {e}")))?;
    if bytes.is_empty() {
        return Err(DispatcherError::BadRequest("image is empty".to_string()));
    }
    Ok(bytes)
}

// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
