//! Read-only access to the current state of a request.

use crate::{
    lifecycle::Status,
    wire::{IdpResponse, ServiceStatus},
    Error,
};
use serde::{Deserialize, Serialize};
use std::future::Future;

/// The full state of a request as reported by the read API.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request_id: String,
    pub mode: u8,
    pub min_idp: u32,
    pub min_ial: f64,
    pub min_aal: f64,
    pub request_timeout: u64,
    #[serde(default)]
    pub idp_id_list: Vec<String>,
    #[serde(default)]
    pub data_request_list: Vec<ServiceStatus>,
    pub request_message_hash: String,
    #[serde(default)]
    pub response_list: Vec<IdpResponse>,
    pub closed: bool,
    pub timed_out: bool,
    pub status: Status,
    pub requester_node_id: String,
    pub creation_block_height: String,
    #[serde(default)]
    pub creation_time: u64,
}

/// Read access to the system under test.
pub trait ReadApi: Send + Sync {
    /// Fetch the current state of `request_id`.
    fn request(
        &self,
        request_id: &str,
    ) -> impl Future<Output = Result<RequestDetail, Error>> + Send;
}
