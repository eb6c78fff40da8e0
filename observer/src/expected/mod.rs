//! Predict what the protocol should report, independently of any notification.
//!
//! Every value here is derived from the parameters of the action that was issued (plus, where
//! the action left a choice to the protocol, a read-only lookup), so that comparing a
//! notification against it is never tautological.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::future::Future;

mod digest;
pub use digest::{request_message_hash, MessageDigest};
mod services;
pub use services::{ExpectedServices, ServiceRequest};

/// The identity a request is about.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub namespace: String,
    pub identifier: String,
}

/// Read-only lookup of the IdPs associated with an identity.
pub trait Registry: Send + Sync {
    /// Node ids of the IdPs able to answer for `identity` at the given assurance levels.
    fn idps(
        &self,
        identity: &Identity,
        min_ial: f64,
        min_aal: f64,
    ) -> impl Future<Output = Result<Vec<String>, Error>> + Send;
}

/// Resolve the IdPs a request is expected to reach.
///
/// A non-empty `declared` list is authoritative. Otherwise the IdPs associated with `identity`
/// are looked up in `registry` (and an identity is required).
pub async fn expected_idps<R: Registry>(
    declared: &[String],
    identity: Option<&Identity>,
    min_ial: f64,
    min_aal: f64,
    registry: &R,
) -> Result<Vec<String>, Error> {
    if !declared.is_empty() {
        return Ok(declared.to_vec());
    }
    let identity = identity.ok_or(Error::MissingIdentity)?;
    registry.idps(identity, min_ial, min_aal).await
}

/// Everything predicted for one request.
#[derive(Clone, Debug, PartialEq)]
pub struct ExpectedState {
    pub idp_id_list: Vec<String>,
    pub services: ExpectedServices,
    pub digest: MessageDigest,
}

impl ExpectedState {
    /// Create the prediction for a request reaching `idp_id_list` with `services` and `message`.
    pub fn new(
        idp_id_list: Vec<String>,
        services: &[ServiceRequest],
        message: impl Into<String>,
    ) -> Self {
        Self {
            idp_id_list,
            services: ExpectedServices::new(services),
            digest: MessageDigest::new(message),
        }
    }
}
