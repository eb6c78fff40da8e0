//! Notification payloads pushed to each actor's webhook.
//!
//! Every notification is a flat JSON object carrying the receiving `node_id` and a `type`
//! discriminant. Only the fields listed on each struct take part in decoding (and therefore in
//! equality); anything else the node sends, such as actor-only metadata, is ignored.

use crate::{lifecycle::Status, Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The discriminant of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    CreateRequestResult,
    CloseRequestResult,
    ResponseResult,
    SendDataResult,
    AddAccessorResult,
    RevokeAccessorResult,
    CreateIdentityResult,
    IncomingRequest,
    DataRequest,
    RequestStatus,
    IdentityModificationNotification,
    Error,
    Unknown,
}

impl Kind {
    /// Returns whether the notification reports the outcome of an action (and is therefore
    /// correlated by `reference_id` rather than `request_id`).
    pub fn is_action_result(self) -> bool {
        matches!(
            self,
            Kind::CreateRequestResult
                | Kind::CloseRequestResult
                | Kind::ResponseResult
                | Kind::SendDataResult
                | Kind::AddAccessorResult
                | Kind::RevokeAccessorResult
                | Kind::CreateIdentityResult
        )
    }

    /// The wire name of the discriminant.
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::CreateRequestResult => "create_request_result",
            Kind::CloseRequestResult => "close_request_result",
            Kind::ResponseResult => "response_result",
            Kind::SendDataResult => "send_data_result",
            Kind::AddAccessorResult => "add_accessor_result",
            Kind::RevokeAccessorResult => "revoke_accessor_result",
            Kind::CreateIdentityResult => "create_identity_result",
            Kind::IncomingRequest => "incoming_request",
            Kind::DataRequest => "data_request",
            Kind::RequestStatus => "request_status",
            Kind::IdentityModificationNotification => "identity_modification_notification",
            Kind::Error => "error",
            Kind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to a failed action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

/// The outcome of an action (create, respond, send data, close, ...).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub reference_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_block_height: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// A data request descriptor as echoed back to IdPs (action-only fields stripped).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequestDescriptor {
    pub service_id: String,
    #[serde(default)]
    pub as_id_list: Vec<String>,
    pub min_as: u32,
}

/// A request delivered to an IdP for consent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomingRequest {
    pub request_id: String,
    pub mode: u8,
    pub request_message: String,
    pub request_message_salt: String,
    pub request_message_hash: String,
    pub requester_node_id: String,
    pub min_ial: f64,
    pub min_aal: f64,
    #[serde(default)]
    pub data_request_list: Vec<DataRequestDescriptor>,
    pub creation_block_height: String,
    #[serde(default)]
    pub creation_time: u64,
    pub request_timeout: u64,
}

/// A request for data delivered to an AS.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataRequest {
    pub request_id: String,
    pub mode: u8,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub identifier: Option<String>,
    pub service_id: String,
    #[serde(default)]
    pub request_params: String,
    pub requester_node_id: String,
    pub min_ial: f64,
    pub min_aal: f64,
    #[serde(default)]
    pub response_signature_list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_message_hash: Option<String>,
    pub creation_block_height: String,
    #[serde(default)]
    pub creation_time: u64,
    pub request_timeout: u64,
}

/// An IdP answer as reported in a request status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdpResponse {
    pub idp_id: String,
    #[serde(default)]
    pub valid_signature: Option<bool>,
    #[serde(default)]
    pub valid_ial: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
}

/// Per-AS progress on a requested service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsResponse {
    pub as_id: String,
    pub signed: bool,
    #[serde(alias = "received")]
    pub received_data: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<u32>,
}

/// Progress on a requested service as reported in a request status.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service_id: String,
    #[serde(default)]
    pub as_id_list: Vec<String>,
    pub min_as: u32,
    #[serde(default)]
    pub response_list: Vec<AsResponse>,
}

impl ServiceStatus {
    /// Number of AS that have signed their answer.
    pub fn signed_data_count(&self) -> u32 {
        self.response_list.iter().filter(|r| r.signed).count() as u32
    }

    /// Number of AS whose data has been received by the RP.
    pub fn received_data_count(&self) -> u32 {
        self.response_list.iter().filter(|r| r.received_data).count() as u32
    }
}

/// A request status update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestStatus {
    pub request_id: String,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<u8>,
    pub min_idp: u32,
    pub answered_idp_count: u32,
    pub closed: bool,
    pub timed_out: bool,
    #[serde(default)]
    pub response_list: Vec<IdpResponse>,
    #[serde(default)]
    pub data_request_list: Vec<ServiceStatus>,
    pub block_height: String,
}

/// A change to an identity (accessor added/revoked, identity created).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityModification {
    #[serde(default)]
    pub reference_group_code: Option<String>,
    pub namespace: String,
    pub identifier: String,
    pub action: String,
    pub actor_node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// An asynchronous failure reported by a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub error: ErrorBody,
}

/// The type-specific body of a notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    CreateRequestResult(ActionResult),
    CloseRequestResult(ActionResult),
    ResponseResult(ActionResult),
    SendDataResult(ActionResult),
    AddAccessorResult(ActionResult),
    RevokeAccessorResult(ActionResult),
    CreateIdentityResult(ActionResult),
    IncomingRequest(IncomingRequest),
    DataRequest(DataRequest),
    RequestStatus(RequestStatus),
    IdentityModificationNotification(IdentityModification),
    Error(ErrorNotification),
    #[serde(other)]
    Unknown,
}

/// A notification received by an actor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The node that received the notification.
    pub node_id: String,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    /// Create a new [Envelope].
    pub fn new(node_id: impl Into<String>, payload: Payload) -> Self {
        Self {
            node_id: node_id.into(),
            payload,
        }
    }

    /// Decode an [Envelope] from a webhook body.
    pub fn from_json(body: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(body)?)
    }

    /// The discriminant of the payload.
    pub fn kind(&self) -> Kind {
        match &self.payload {
            Payload::CreateRequestResult(_) => Kind::CreateRequestResult,
            Payload::CloseRequestResult(_) => Kind::CloseRequestResult,
            Payload::ResponseResult(_) => Kind::ResponseResult,
            Payload::SendDataResult(_) => Kind::SendDataResult,
            Payload::AddAccessorResult(_) => Kind::AddAccessorResult,
            Payload::RevokeAccessorResult(_) => Kind::RevokeAccessorResult,
            Payload::CreateIdentityResult(_) => Kind::CreateIdentityResult,
            Payload::IncomingRequest(_) => Kind::IncomingRequest,
            Payload::DataRequest(_) => Kind::DataRequest,
            Payload::RequestStatus(_) => Kind::RequestStatus,
            Payload::IdentityModificationNotification(_) => Kind::IdentityModificationNotification,
            Payload::Error(_) => Kind::Error,
            Payload::Unknown => Kind::Unknown,
        }
    }

    /// The action result carried by the payload (if any).
    pub fn action_result(&self) -> Option<&ActionResult> {
        match &self.payload {
            Payload::CreateRequestResult(r)
            | Payload::CloseRequestResult(r)
            | Payload::ResponseResult(r)
            | Payload::SendDataResult(r)
            | Payload::AddAccessorResult(r)
            | Payload::RevokeAccessorResult(r)
            | Payload::CreateIdentityResult(r) => Some(r),
            _ => None,
        }
    }

    /// The `reference_id` of the action that produced this notification (if any).
    pub fn reference_id(&self) -> Option<&str> {
        if let Some(result) = self.action_result() {
            return Some(&result.reference_id);
        }
        match &self.payload {
            Payload::Error(e) => e.reference_id.as_deref(),
            _ => None,
        }
    }

    /// The `request_id` the notification refers to (if any).
    pub fn request_id(&self) -> Option<&str> {
        if let Some(result) = self.action_result() {
            return result.request_id.as_deref();
        }
        match &self.payload {
            Payload::IncomingRequest(r) => Some(&r.request_id),
            Payload::DataRequest(r) => Some(&r.request_id),
            Payload::RequestStatus(r) => Some(&r.request_id),
            Payload::IdentityModificationNotification(m) => m.request_id.as_deref(),
            Payload::Error(e) => e.request_id.as_deref(),
            _ => None,
        }
    }

    /// The request status carried by the payload (if any).
    pub fn request_status(&self) -> Option<&RequestStatus> {
        match &self.payload {
            Payload::RequestStatus(status) => Some(status),
            _ => None,
        }
    }
}
