//! External oracles seen from the core: image verification, reverse
//! geocoding and routing. Implementations live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::errors::OracleError;
use crate::types::{Coordinates, PostalAddress};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    Pickup,
    Delivery,
}

impl ProofKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Delivery => "delivery",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub is_valid: bool,
    pub feedback: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub summary: String,
    pub estimated_duration: String,
    pub steps: Vec<String>,
    pub traffic_tips: String,
}

#[async_trait]
pub trait ImageVerifier: Send + Sync {
    async fn verify(&self, image: &[u8], kind: ProofKind) -> Result<Verdict, OracleError>;
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, lng: f64)
        -> Result<Option<PostalAddress>, OracleError>;
}

#[async_trait]
pub trait RouteOracle: Send + Sync {
    async fn calculate_eta(
        &self,
        origin: Coordinates,
        destination: &str,
    ) -> Result<Option<u32>, OracleError>;

    async fn optimize_route(
        &self,
        origin: &str,
        destination: &str,
    ) -> Result<Option<RoutePlan>, OracleError>;
}

/// What to do when the image oracle cannot be reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerificationPolicy {
    /// Treat an unreachable oracle as a pass.
    FailOpen,
    /// Refuse until the oracle answers.
    #[default]
    FailClosed,
}

impl VerificationPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "open" | "fail_open" | "fail-open" => Some(Self::FailOpen),
            "closed" | "fail_closed" | "fail-closed" => Some(Self::FailClosed),
            _ => None,
        }
    }
}

pub const FAIL_OPEN_FEEDBACK: &str = "Photo accepted without automated verification";

/// Collapse an oracle outcome into a verdict under `policy`.
///
/// `None` means the oracle failed and the policy refuses to decide.
pub fn resolve_verdict(
    outcome: Result<Verdict, OracleError>,
    policy: VerificationPolicy,
) -> Option<Verdict> {
    match outcome {
        Ok(verdict) => Some(verdict),
        Err(e) => match policy {
            VerificationPolicy::FailOpen => {
                warn!("Image verification unavailable, approving under fail-open policy: {e}");
                Some(Verdict {
                    is_valid: true,
                    feedback: FAIL_OPEN_FEEDBACK.to_string(),
                })
            }
            VerificationPolicy::FailClosed => {
                warn!("Image verification unavailable, refusing under fail-closed policy: {e}");
                None
            }
        },
    }
}

/// Stand-in used when no oracle endpoint is configured. Every call fails
/// with [`OracleError::Unavailable`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Unconfigured;

#[async_trait]
impl ImageVerifier for Unconfigured {
    async fn verify(&self, _image: &[u8], _kind: ProofKind) -> Result<Verdict, OracleError> {
        Err(OracleError::Unavailable)
    }
}

#[async_trait]
impl Geocoder for Unconfigured {
    async fn reverse_geocode(
        &self,
        _lat: f64,
        _lng: f64,
    ) -> Result<Option<PostalAddress>, OracleError> {
        Err(OracleError::Unavailable)
    }
}

#[async_trait]
impl RouteOracle for Unconfigured {
    async fn calculate_eta(
        &self,
        _origin: Coordinates,
        _destination: &str,
    ) -> Result<Option<u32>, OracleError> {
        Err(OracleError::Unavailable)
    }

    async fn optimize_route(
        &self,
        _origin: &str,
        _destination: &str,
    ) -> Result<Option<RoutePlan>, OracleError> {
        Err(OracleError::Unavailable)
    }
}
