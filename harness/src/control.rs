//! Actions issued to the system under test.

use idex_observer::{expected::ServiceRequest, lifecycle::Answer, Error};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// HTTP status returned with every protocol-level rejection.
pub const REJECTED_STATUS: u16 = 400;

/// Code reported when an action targets a request that is already closed.
pub const REQUEST_CLOSED: u32 = 20081;

/// Code an IdP reports when it cannot answer.
pub const IDP_ERROR: u32 = 1000;

/// Parameters of a create request action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRequest {
    pub reference_id: String,
    pub mode: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Target IdPs (any IdP associated with the identity when empty).
    #[serde(default)]
    pub idp_id_list: Vec<String>,
    #[serde(default)]
    pub data_request_list: Vec<ServiceRequest>,
    pub request_message: String,
    pub min_ial: f64,
    pub min_aal: f64,
    pub min_idp: u32,
    pub request_timeout: u64,
}

/// The acknowledgement of a create request action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    pub request_id: String,
}

/// Parameters of an IdP answer.
#[derive(Clone, Debug, PartialEq)]
pub struct Respond {
    pub reference_id: String,
    pub request_id: String,
    pub answer: Answer,
    pub ial: f64,
    pub aal: f64,
}

/// Parameters of an AS delivering data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendData {
    pub reference_id: String,
    pub request_id: String,
    pub service_id: String,
    pub data: String,
}

/// Parameters of a close request action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseRequest {
    pub reference_id: String,
    pub request_id: String,
}

/// The control-plane API of every node.
///
/// An `Ok` result means the node accepted the action; its outcome is reported later through the
/// acting node's callbacks. A protocol-level refusal is returned as [Error::Rejected].
pub trait ControlPlane: Send + Sync {
    /// Create a request as `actor` (an RP).
    fn create_request(
        &self,
        actor: &str,
        request: &CreateRequest,
    ) -> impl Future<Output = Result<Created, Error>> + Send;

    /// Answer a request as `actor` (an IdP).
    fn respond(
        &self,
        actor: &str,
        response: &Respond,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Deliver data for a request as `actor` (an AS).
    fn send_data(
        &self,
        actor: &str,
        data: &SendData,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Close a request as `actor` (its RP).
    fn close_request(
        &self,
        actor: &str,
        close: &CloseRequest,
    ) -> impl Future<Output = Result<(), Error>> + Send;
}
