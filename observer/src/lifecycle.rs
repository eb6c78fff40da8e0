//! The expected state of a request, as reconstructed from verified notifications.
//!
//! A [Request] starts from the immutable [Definition] of the create action and is only ever
//! advanced by [crate::verifier::Verifier] after a notification passed its checks. Everything
//! else gets read-only access, so orchestrator steps can never disagree about what the current
//! expected state is.

use crate::{
    height::BlockHeight,
    wire::{DataRequestDescriptor, IdpResponse, RequestStatus},
    Error,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The status of a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Confirmed,
    Rejected,
    Errored,
    Completed,
}

impl Status {
    /// Returns whether no further answers can change the status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Rejected | Status::Errored | Status::Completed)
    }

    /// The wire name of the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Confirmed => "confirmed",
            Status::Rejected => "rejected",
            Status::Errored => "errored",
            Status::Completed => "completed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an IdP answered. Never compared against wire payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Answer {
    Accept,
    Reject,
    Error(u32),
}

/// An IdP answer the protocol acknowledged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdpResponseRecord {
    pub idp_id: String,
    pub valid_signature: Option<bool>,
    pub valid_ial: Option<bool>,
    pub error_code: Option<u32>,
    pub answer: Answer,
}

impl IdpResponseRecord {
    /// An accepting answer with the validity the protocol is expected to report.
    pub fn accept(
        idp_id: impl Into<String>,
        valid_signature: Option<bool>,
        valid_ial: Option<bool>,
    ) -> Self {
        Self {
            idp_id: idp_id.into(),
            valid_signature,
            valid_ial,
            error_code: None,
            answer: Answer::Accept,
        }
    }

    /// A rejecting answer with the validity the protocol is expected to report.
    pub fn reject(
        idp_id: impl Into<String>,
        valid_signature: Option<bool>,
        valid_ial: Option<bool>,
    ) -> Self {
        Self {
            idp_id: idp_id.into(),
            valid_signature,
            valid_ial,
            error_code: None,
            answer: Answer::Reject,
        }
    }

    /// An error answer (validity is never evaluated for errors).
    pub fn error(idp_id: impl Into<String>, code: u32) -> Self {
        Self {
            idp_id: idp_id.into(),
            valid_signature: None,
            valid_ial: None,
            error_code: Some(code),
            answer: Answer::Error(code),
        }
    }

    /// Returns whether the answer counts towards `min_idp`.
    pub fn is_valid_accept(&self) -> bool {
        self.answer == Answer::Accept
            && self.valid_signature != Some(false)
            && self.valid_ial != Some(false)
    }

    /// The fields of the record that the protocol echoes back.
    pub fn wire(&self) -> IdpResponse {
        IdpResponse {
            idp_id: self.idp_id.clone(),
            valid_signature: self.valid_signature,
            valid_ial: self.valid_ial,
            error_code: self.error_code,
        }
    }
}

/// Progress on one requested service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRequestService {
    pub service_id: String,
    pub as_id_list: Vec<String>,
    pub min_as: u32,
    signed_data_count: u32,
    received_data_count: u32,
}

impl DataRequestService {
    fn new(descriptor: &DataRequestDescriptor) -> Self {
        Self {
            service_id: descriptor.service_id.clone(),
            as_id_list: descriptor.as_id_list.clone(),
            min_as: descriptor.min_as,
            signed_data_count: 0,
            received_data_count: 0,
        }
    }

    /// Number of AS that signed their answer.
    pub fn signed_data_count(&self) -> u32 {
        self.signed_data_count
    }

    /// Number of AS whose data reached the RP.
    pub fn received_data_count(&self) -> u32 {
        self.received_data_count
    }

    /// Returns whether enough data has been received.
    pub fn satisfied(&self) -> bool {
        self.received_data_count >= self.min_as
    }
}

/// The immutable attributes of a request, fixed by the create action.
#[derive(Clone, Debug, PartialEq)]
pub struct Definition {
    pub request_id: String,
    pub mode: u8,
    pub min_idp: u32,
    pub min_ial: f64,
    pub min_aal: f64,
    pub timeout: u64,
    pub requester_node_id: String,
    /// Resolved (never empty when the target IdPs are known) and ordered.
    pub idp_id_list: Vec<String>,
    pub data_request_list: Vec<DataRequestDescriptor>,
}

/// The evolving state of a request.
#[derive(Clone, Debug, PartialEq)]
pub struct Request {
    definition: Definition,
    services: Vec<DataRequestService>,
    status: Status,
    closed: bool,
    timed_out: bool,
    creation_block_height: Option<BlockHeight>,
    last_status_update_block_height: Option<BlockHeight>,
    responses: Vec<IdpResponseRecord>,
}

impl Request {
    /// Create a pending [Request] from its [Definition].
    pub fn new(definition: Definition) -> Self {
        let services = definition
            .data_request_list
            .iter()
            .map(DataRequestService::new)
            .collect();
        Self {
            definition,
            services,
            status: Status::Pending,
            closed: false,
            timed_out: false,
            creation_block_height: None,
            last_status_update_block_height: None,
            responses: Vec::new(),
        }
    }

    /// The id assigned at creation.
    pub fn request_id(&self) -> &str {
        &self.definition.request_id
    }

    /// The parameters the request was created with.
    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Progress of every requested service.
    pub fn services(&self) -> &[DataRequestService] {
        &self.services
    }

    /// The last verified status.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Returns whether a verified status reported the request closed.
    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Returns whether a verified status reported the request timed out.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Height of the block that created the request (once observed).
    pub fn creation_block_height(&self) -> Option<&BlockHeight> {
        self.creation_block_height.as_ref()
    }

    /// Height of the last verified status update.
    pub fn last_status_update_block_height(&self) -> Option<&BlockHeight> {
        self.last_status_update_block_height.as_ref()
    }

    /// Acknowledged IdP answers, in acknowledgement order.
    pub fn responses(&self) -> &[IdpResponseRecord] {
        &self.responses
    }

    /// Returns whether `idp_id` already answered.
    pub fn answered_by(&self, idp_id: &str) -> bool {
        self.responses.iter().any(|r| r.idp_id == idp_id)
    }

    /// Number of answers counting towards `min_idp`.
    pub fn valid_accepts(&self) -> u32 {
        self.responses.iter().filter(|r| r.is_valid_accept()).count() as u32
    }

    /// Number of rejecting answers.
    pub fn rejects(&self) -> u32 {
        self.responses
            .iter()
            .filter(|r| r.answer == Answer::Reject)
            .count() as u32
    }

    /// Number of error answers.
    pub fn errors(&self) -> u32 {
        self.responses
            .iter()
            .filter(|r| matches!(r.answer, Answer::Error(_)))
            .count() as u32
    }

    /// Number of targeted IdPs that have not answered, or `None` when any IdP may answer.
    pub fn remaining(&self) -> Option<u32> {
        if self.definition.idp_id_list.is_empty() {
            return None;
        }
        let targeted = self.definition.idp_id_list.len() as u32;
        Some(targeted.saturating_sub(self.responses.len() as u32))
    }

    /// Returns whether `min_idp` valid accepts can still be collected.
    pub fn reachable(&self) -> bool {
        match self.remaining() {
            Some(remaining) => self.valid_accepts() + remaining >= self.definition.min_idp,
            None => true,
        }
    }

    /// Returns whether every requested service received enough data.
    pub fn services_satisfied(&self) -> bool {
        self.services.iter().all(DataRequestService::satisfied)
    }

    /// Returns a failure unless the request is closed.
    pub fn assert_terminal(&self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        Err(Error::Mismatch {
            actor: self.definition.requester_node_id.clone(),
            request_id: self.definition.request_id.clone(),
            field: "closed".into(),
            expected: "true".into(),
            observed: format!("false (status={})", self.status),
        })
    }

    pub(crate) fn set_created(&mut self, height: BlockHeight) {
        self.creation_block_height = Some(height);
    }

    pub(crate) fn record_response(&mut self, record: IdpResponseRecord) {
        self.responses.push(record);
    }

    /// Apply a verified status update observed at `height`.
    pub(crate) fn advance(&mut self, observed: &RequestStatus, height: BlockHeight) -> &Request {
        self.status = observed.status;
        self.closed = observed.closed;
        self.timed_out = observed.timed_out;
        for service in self.services.iter_mut() {
            if let Some(update) = observed
                .data_request_list
                .iter()
                .find(|s| s.service_id == service.service_id)
            {
                service.signed_data_count = update.signed_data_count();
                service.received_data_count = update.received_data_count();
            }
        }
        self.last_status_update_block_height = Some(height);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{AsResponse, ServiceStatus};

    fn definition(min_idp: u32, idps: &[&str]) -> Definition {
        Definition {
            request_id: "req-1".into(),
            mode: 2,
            min_idp,
            min_ial: 2.3,
            min_aal: 1.0,
            timeout: 86_400,
            requester_node_id: "rp1".into(),
            idp_id_list: idps.iter().map(|s| s.to_string()).collect(),
            data_request_list: vec![DataRequestDescriptor {
                service_id: "bank_statement".into(),
                as_id_list: vec!["as1".into(), "as2".into()],
                min_as: 1,
            }],
        }
    }

    #[test]
    fn test_reachability() {
        let mut request = Request::new(definition(2, &["idp1", "idp2", "idp3"]));
        assert_eq!(request.remaining(), Some(3));
        assert!(request.reachable());

        request.record_response(IdpResponseRecord::accept("idp1", Some(true), Some(true)));
        request.record_response(IdpResponseRecord::error("idp2", 1000));
        assert_eq!(request.valid_accepts(), 1);
        assert_eq!(request.errors(), 1);
        assert_eq!(request.remaining(), Some(1));
        assert!(request.reachable());

        request.record_response(IdpResponseRecord::reject("idp3", Some(true), Some(true)));
        assert_eq!(request.rejects(), 1);
        assert!(!request.reachable());
    }

    #[test]
    fn test_invalid_accept_not_counted() {
        let mut request = Request::new(definition(1, &["idp1", "idp2"]));
        request.record_response(IdpResponseRecord::accept("idp1", Some(true), Some(false)));
        assert_eq!(request.valid_accepts(), 0);
        request.record_response(IdpResponseRecord::accept("idp2", None, None));
        assert_eq!(request.valid_accepts(), 1);
        assert!(request.answered_by("idp2"));
        assert!(!request.answered_by("idp3"));
    }

    #[test]
    fn test_open_idp_list_always_reachable() {
        let mut request = Request::new(definition(3, &[]));
        request.record_response(IdpResponseRecord::error("idp1", 1000));
        assert_eq!(request.remaining(), None);
        assert!(request.reachable());
    }

    #[test]
    fn test_advance() {
        let mut request = Request::new(definition(1, &["idp1"]));
        assert!(request.assert_terminal().is_err());
        assert!(!request.services_satisfied());

        let observed = RequestStatus {
            request_id: "req-1".into(),
            status: Status::Completed,
            mode: Some(2),
            min_idp: 1,
            answered_idp_count: 1,
            closed: true,
            timed_out: false,
            response_list: Vec::new(),
            data_request_list: vec![ServiceStatus {
                service_id: "bank_statement".into(),
                as_id_list: vec!["as1".into(), "as2".into()],
                min_as: 1,
                response_list: vec![AsResponse {
                    as_id: "as1".into(),
                    signed: true,
                    received_data: true,
                    error_code: None,
                }],
            }],
            block_height: "chain:9".into(),
        };
        let advanced = request.advance(&observed, BlockHeight::new("chain", 9));
        assert_eq!(advanced.status(), Status::Completed);
        assert!(advanced.closed());
        assert_eq!(advanced.services()[0].signed_data_count(), 1);
        assert_eq!(advanced.services()[0].received_data_count(), 1);
        assert!(advanced.services_satisfied());
        assert_eq!(
            advanced.last_status_update_block_height(),
            Some(&BlockHeight::new("chain", 9))
        );
        assert!(request.assert_terminal().is_ok());
    }

    #[test]
    fn test_error_record_wire() {
        let record = IdpResponseRecord::error("idp1", 1000);
        assert_eq!(
            record.wire(),
            IdpResponse {
                idp_id: "idp1".into(),
                valid_signature: None,
                valid_ial: None,
                error_code: Some(1000),
            }
        );
        assert!(!record.is_valid_accept());
    }
}
