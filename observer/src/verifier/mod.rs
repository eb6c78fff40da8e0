//! Verify notifications against the predicted and modeled state of a request.
//!
//! A [Verifier] owns the [Request] model and the [ExpectedState] of a single request. Each
//! operation checks one notification received by one actor and, only if every check passes,
//! advances the model. Block heights are tracked per actor: an observation must not precede the
//! previous observation of the same actor, and must strictly follow it when it reflects a new
//! action. Nothing is assumed about ordering across actors.
//!
//! Checks compare against the model's current state, so each actor's notification for a step is
//! expected to be verified once the action that caused it has been acknowledged (as scenario
//! orchestrators do).

use crate::{
    expected::ExpectedState,
    height::{Advance, BlockHeight},
    lifecycle::{Definition, IdpResponseRecord, Request, Status},
    read::RequestDetail,
    wire::{Envelope, IdpResponse, Kind, Payload, RequestStatus, ServiceStatus},
    Error,
};
use std::collections::HashMap;
use tracing::debug;

mod consistency;
mod scope;
use scope::Scope;


/// Label used for checks made against the read API rather than a notification stream.
pub const READ_API: &str = "read_api";

/// Label used for checks made against a control-plane reply.
pub const CONTROL_PLANE: &str = "control_plane";

/// What a status update is expected to report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusExpectation {
    pub status: Status,
    pub closed: bool,
    pub timed_out: bool,
    pub advance: Advance,
}

impl StatusExpectation {
    /// An open, non-timed-out `status` that must strictly advance the actor's block height.
    pub fn new(status: Status) -> Self {
        Self {
            status,
            closed: false,
            timed_out: false,
            advance: Advance::Strict,
        }
    }

    /// Expect the request to be closed.
    pub fn closed(mut self) -> Self {
        self.closed = true;
        self
    }

    /// Expect the request to have timed out (and therefore be closed).
    pub fn timed_out(mut self) -> Self {
        self.timed_out = true;
        self.closed = true;
        self
    }

    /// Allow the block height to equal the actor's previous observation.
    pub fn monotonic(mut self) -> Self {
        self.advance = Advance::Monotonic;
        self
    }
}

/// Verifies every notification about one request.
#[derive(Debug)]
pub struct Verifier {
    model: Request,
    expected: ExpectedState,
    floors: HashMap<String, BlockHeight>,
}

impl Verifier {
    /// Create a [Verifier] for the request described by `definition`.
    ///
    /// Fails if `definition` disagrees with `expected` (the request would be verified against a
    /// prediction of some other request).
    pub fn new(definition: Definition, expected: ExpectedState) -> Result<Self, Error> {
        let scope = Scope::new(&definition.requester_node_id, &definition.request_id);
        scope.ensure_eq(
            "idp_id_list",
            &expected.idp_id_list,
            &definition.idp_id_list,
        )?;
        scope.ensure_eq(
            "data_request_list",
            &expected.services.descriptors(),
            &definition.data_request_list,
        )?;
        Ok(Self {
            model: Request::new(definition),
            expected,
            floors: HashMap::new(),
        })
    }

    /// The current model of the request.
    pub fn model(&self) -> &Request {
        &self.model
    }

    /// The prediction the request is verified against.
    pub fn expected(&self) -> &ExpectedState {
        &self.expected
    }

    /// The last block height verified for `actor`.
    pub fn floor(&self, actor: &str) -> Option<&BlockHeight> {
        self.floors.get(actor)
    }

    /// Record that `as_id` signed its answer for `service_id`.
    pub fn mark_signed(&mut self, service_id: &str, as_id: &str) -> Result<(), Error> {
        self.expected.services.mark_signed(service_id, as_id)
    }

    /// Record that the data of `as_id` for `service_id` reached the RP.
    pub fn mark_received(&mut self, service_id: &str, as_id: &str) -> Result<(), Error> {
        self.expected.services.mark_received(service_id, as_id)
    }

    /// Verify the RP's `create_request_result`, returning the creation block height.
    pub fn create_result(&mut self, actor: &str, envelope: &Envelope) -> Result<BlockHeight, Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::CreateRequestResult)?;
        let Some(result) = envelope.action_result() else {
            return Err(scope.mismatch("type", Kind::CreateRequestResult, envelope.kind()));
        };
        self.succeeded(&scope, result.success, result.error.as_ref().map(|e| e.code))?;
        let Some(raw) = result.creation_block_height.as_deref() else {
            return Err(scope.mismatch("creation_block_height", "<chain>:<height>", "missing"));
        };
        let height = self.check_created(&scope, raw)?;
        self.check_floor(&scope, &height, Advance::Monotonic)?;

        // Apply
        self.pin_created(&height);
        self.raise_floor(actor, height.clone());
        debug!(actor, %request_id, %height, "verified creation");
        Ok(height)
    }

    /// Verify an IdP's `incoming_request`, pinning the request message salt if it is the first
    /// one observed. Returns the creation block height.
    pub fn incoming_request(
        &mut self,
        actor: &str,
        envelope: &Envelope,
    ) -> Result<BlockHeight, Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::IncomingRequest)?;
        let Payload::IncomingRequest(incoming) = &envelope.payload else {
            return Err(scope.mismatch("type", Kind::IncomingRequest, envelope.kind()));
        };

        // Only targeted IdPs may be asked
        let idps = &self.expected.idp_id_list;
        if !idps.is_empty() && !idps.iter().any(|idp| idp == actor) {
            return Err(scope.mismatch("idp_id_list", idps, actor));
        }

        // Echoed attributes
        let definition = self.model.definition();
        scope.ensure_eq("mode", &definition.mode, &incoming.mode)?;
        scope.ensure_eq(
            "requester_node_id",
            &definition.requester_node_id,
            &incoming.requester_node_id,
        )?;
        scope.ensure_eq("min_ial", &definition.min_ial, &incoming.min_ial)?;
        scope.ensure_eq("min_aal", &definition.min_aal, &incoming.min_aal)?;
        scope.ensure_eq(
            "request_timeout",
            &definition.timeout,
            &incoming.request_timeout,
        )?;
        scope.ensure_eq(
            "request_message",
            self.expected.digest.message(),
            incoming.request_message.as_str(),
        )?;
        scope.ensure_eq(
            "data_request_list",
            &self.expected.services.descriptors(),
            &incoming.data_request_list,
        )?;

        // Digest
        let salt = incoming.request_message_salt.as_str();
        if let Err(pinned) = self.expected.digest.check_salt(salt) {
            return Err(scope.mismatch("request_message_salt", pinned, salt));
        }
        scope.ensure_eq(
            "request_message_hash",
            self.expected.digest.digest_for(salt).as_str(),
            incoming.request_message_hash.as_str(),
        )?;

        // Ordering
        let height = self.check_created(&scope, &incoming.creation_block_height)?;
        self.check_floor(&scope, &height, Advance::Monotonic)?;

        // Apply
        self.expected.digest.pin_salt(salt);
        self.pin_created(&height);
        self.raise_floor(actor, height.clone());
        debug!(actor, %request_id, %height, "verified incoming request");
        Ok(height)
    }

    /// Verify an AS's `data_request`, returning the creation block height.
    pub fn data_request(&mut self, actor: &str, envelope: &Envelope) -> Result<BlockHeight, Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::DataRequest)?;
        let Payload::DataRequest(request) = &envelope.payload else {
            return Err(scope.mismatch("type", Kind::DataRequest, envelope.kind()));
        };

        // Only requested services (and listed AS) may be asked
        let Some(params) = self.expected.services.request_params(&request.service_id) else {
            return Err(scope.mismatch(
                "service_id",
                self.expected
                    .services
                    .descriptors()
                    .into_iter()
                    .map(|d| d.service_id)
                    .collect::<Vec<_>>(),
                &request.service_id,
            ));
        };
        scope.ensure_eq("request_params", params, request.request_params.as_str())?;
        if let Some(descriptor) = self
            .expected
            .services
            .descriptors()
            .into_iter()
            .find(|d| d.service_id == request.service_id)
        {
            if !descriptor.as_id_list.is_empty() && !descriptor.as_id_list.iter().any(|a| a == actor)
            {
                return Err(scope.mismatch("as_id_list", descriptor.as_id_list, actor));
            }
        }

        // Echoed attributes
        let definition = self.model.definition();
        scope.ensure_eq("mode", &definition.mode, &request.mode)?;
        scope.ensure_eq(
            "requester_node_id",
            &definition.requester_node_id,
            &request.requester_node_id,
        )?;
        scope.ensure_eq("min_ial", &definition.min_ial, &request.min_ial)?;
        scope.ensure_eq("min_aal", &definition.min_aal, &request.min_aal)?;
        scope.ensure_eq(
            "request_timeout",
            &definition.timeout,
            &request.request_timeout,
        )?;

        // Data is only requested once enough IdPs accepted
        let signatures = request.response_signature_list.len() as u32;
        if signatures < definition.min_idp {
            return Err(scope.mismatch(
                "response_signature_list",
                format!(">= {} signatures", definition.min_idp),
                signatures,
            ));
        }
        if let Some(hash) = &request.request_message_hash {
            self.digest_matches(&scope, hash)?;
        }

        // Ordering
        let height = self.check_created(&scope, &request.creation_block_height)?;
        self.check_floor(&scope, &height, Advance::Monotonic)?;

        // Apply
        self.pin_created(&height);
        self.raise_floor(actor, height.clone());
        debug!(actor, %request_id, service_id = %request.service_id, "verified data request");
        Ok(height)
    }

    /// Verify an IdP's `response_result` and, on success, record its answer.
    pub fn response_result(
        &mut self,
        actor: &str,
        envelope: &Envelope,
        record: IdpResponseRecord,
    ) -> Result<(), Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::ResponseResult)?;
        let Some(result) = envelope.action_result() else {
            return Err(scope.mismatch("type", Kind::ResponseResult, envelope.kind()));
        };
        scope.ensure_eq("idp_id", actor, record.idp_id.as_str())?;
        self.succeeded(&scope, result.success, result.error.as_ref().map(|e| e.code))?;

        // A closed request must not acknowledge answers
        if self.model.closed() {
            return Err(scope.mismatch("closed", "answer rejected", "answer acknowledged"));
        }
        if self.model.answered_by(actor) {
            return Err(scope.mismatch("response_list", "one answer per idp", "second answer"));
        }
        let idps = &self.model.definition().idp_id_list;
        if !idps.is_empty() && !idps.iter().any(|idp| idp == actor) {
            return Err(scope.mismatch("idp_id_list", idps, actor));
        }

        debug!(actor, %request_id, answer = ?record.answer, "recorded answer");
        self.model.record_response(record);
        Ok(())
    }

    /// Verify an AS's `send_data_result`.
    pub fn send_data_result(&mut self, actor: &str, envelope: &Envelope) -> Result<(), Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::SendDataResult)?;
        let Some(result) = envelope.action_result() else {
            return Err(scope.mismatch("type", Kind::SendDataResult, envelope.kind()));
        };
        self.succeeded(&scope, result.success, result.error.as_ref().map(|e| e.code))?;
        if self.model.closed() {
            return Err(scope.mismatch("closed", "data rejected", "data acknowledged"));
        }
        Ok(())
    }

    /// Verify an RP's `close_request_result`.
    pub fn close_result(&mut self, actor: &str, envelope: &Envelope) -> Result<(), Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::CloseRequestResult)?;
        let Some(result) = envelope.action_result() else {
            return Err(scope.mismatch("type", Kind::CloseRequestResult, envelope.kind()));
        };
        self.succeeded(&scope, result.success, result.error.as_ref().map(|e| e.code))?;
        if self.model.closed() {
            return Err(scope.mismatch("closed", "close rejected", "close acknowledged"));
        }
        Ok(())
    }

    /// Verify a `request_status` received by `actor` and advance the model, returning the
    /// verified block height (the floor for `actor`'s next observation).
    pub fn request_status(
        &mut self,
        actor: &str,
        envelope: &Envelope,
        expect: StatusExpectation,
    ) -> Result<BlockHeight, Error> {
        let request_id = self.model.request_id().to_string();
        let scope = Scope::new(actor, &request_id);
        self.addressed(&scope, envelope, Kind::RequestStatus)?;
        let Some(observed) = envelope.request_status() else {
            return Err(scope.mismatch("type", Kind::RequestStatus, envelope.kind()));
        };
        let height = parse_height(&scope, "block_height", &observed.block_height)?;

        // Nothing may change once closed
        if self.model.closed() {
            scope.ensure_eq("status", &expect.status, &observed.status)?;
            self.unchanged(&scope, observed)?;
            self.check_floor(&scope, &height, expect.advance)?;
            self.raise_floor(actor, height.clone());
            debug!(actor, %request_id, %height, "verified closed status");
            return Ok(height);
        }

        // Ordering
        if let Some(created) = self.model.creation_block_height() {
            if !height.follows(created, Advance::Monotonic) {
                return Err(scope.mismatch("block_height", format!(">= {created}"), &height));
            }
        }
        self.check_floor(&scope, &height, expect.advance)?;

        // Reported flags
        if observed.timed_out && !observed.closed {
            return Err(scope.mismatch("timed_out", "closed when timed out", "open"));
        }
        let definition = self.model.definition();
        scope.ensure_eq("min_idp", &definition.min_idp, &observed.min_idp)?;
        if let Some(mode) = observed.mode {
            scope.ensure_eq("mode", &definition.mode, &mode)?;
        }
        scope.ensure_eq("status", &expect.status, &observed.status)?;
        scope.ensure_eq("closed", &expect.closed, &observed.closed)?;
        scope.ensure_eq("timed_out", &expect.timed_out, &observed.timed_out)?;

        // Content
        scope.ensure_eq(
            "answered_idp_count",
            &(self.model.responses().len() as u32),
            &observed.answered_idp_count,
        )?;
        responses_match(&scope, self.model.responses(), &observed.response_list)?;
        self.services_match(&scope, &observed.data_request_list)?;
        consistency::check(
            &scope,
            &self.model,
            self.expected.services.satisfied(),
            observed.status,
        )?;

        // Advance
        self.raise_floor(actor, height.clone());
        let advanced = self.model.advance(observed, height.clone());
        debug!(
            actor,
            %request_id,
            status = %advanced.status(),
            closed = advanced.closed(),
            %height,
            "verified status"
        );
        Ok(height)
    }

    /// Cross-check the settled model against the read API.
    pub fn cross_check(&self, detail: &RequestDetail) -> Result<(), Error> {
        let scope = Scope::new(READ_API, self.model.request_id());
        let definition = self.model.definition();
        scope.ensure_eq(
            "request_id",
            definition.request_id.as_str(),
            detail.request_id.as_str(),
        )?;
        scope.ensure_eq("mode", &definition.mode, &detail.mode)?;
        scope.ensure_eq("min_idp", &definition.min_idp, &detail.min_idp)?;
        scope.ensure_eq("min_ial", &definition.min_ial, &detail.min_ial)?;
        scope.ensure_eq("min_aal", &definition.min_aal, &detail.min_aal)?;
        scope.ensure_eq(
            "request_timeout",
            &definition.timeout,
            &detail.request_timeout,
        )?;
        scope.ensure_eq(
            "requester_node_id",
            &definition.requester_node_id,
            &detail.requester_node_id,
        )?;
        scope.ensure_eq(
            "idp_id_list",
            &self.expected.idp_id_list,
            &detail.idp_id_list,
        )?;
        if let Some(expected) = self.expected.digest.expected() {
            scope.ensure_eq(
                "request_message_hash",
                expected.as_str(),
                detail.request_message_hash.as_str(),
            )?;
        }
        if let Some(created) = self.model.creation_block_height() {
            let observed =
                parse_height(&scope, "creation_block_height", &detail.creation_block_height)?;
            scope.ensure_eq("creation_block_height", created, &observed)?;
        }
        scope.ensure_eq("status", &self.model.status(), &detail.status)?;
        scope.ensure_eq("closed", &self.model.closed(), &detail.closed)?;
        scope.ensure_eq("timed_out", &self.model.timed_out(), &detail.timed_out)?;
        responses_match(&scope, self.model.responses(), &detail.response_list)?;
        self.services_match(&scope, &detail.data_request_list)
    }

    /// Verify that nothing changed for `actor` after it first observed the request closed.
    ///
    /// `journal` is every envelope `actor` received for the request, in arrival order.
    pub fn quiescent(&self, actor: &str, journal: &[Envelope]) -> Result<(), Error> {
        let scope = Scope::new(actor, self.model.request_id());
        let mut closed: Option<&RequestStatus> = None;
        for envelope in journal {
            if envelope.request_id() != Some(self.model.request_id()) {
                continue;
            }
            if let Some(status) = envelope.request_status() {
                match closed {
                    Some(first) if !same_state(first, status) => {
                        return Err(scope.mismatch(
                            "closed",
                            format!("no transition after close ({})", first.status),
                            format!("{} at {}", status.status, status.block_height),
                        ));
                    }
                    Some(_) => {}
                    None if status.closed => closed = Some(status),
                    None => {}
                }
                continue;
            }
            if closed.is_none() {
                continue;
            }
            if let Some(result) = envelope.action_result() {
                if result.success && envelope.kind() != Kind::CloseRequestResult {
                    return Err(scope.mismatch(
                        "closed",
                        "no acknowledged action after close",
                        envelope.kind(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Check the envelope's addressing and discriminant.
    fn addressed(&self, scope: &Scope<'_>, envelope: &Envelope, kind: Kind) -> Result<(), Error> {
        scope.ensure_eq("type", &kind, &envelope.kind())?;
        scope.ensure_eq("node_id", scope.actor, envelope.node_id.as_str())?;
        if let Some(request_id) = envelope.request_id() {
            scope.ensure_eq("request_id", self.model.request_id(), request_id)?;
        }
        Ok(())
    }

    /// Check that an action result reports success.
    fn succeeded(&self, scope: &Scope<'_>, success: bool, code: Option<u32>) -> Result<(), Error> {
        if success {
            return Ok(());
        }
        Err(scope.mismatch("success", true, format!("false (code={code:?})")))
    }

    /// Check the digest against the pinned salt.
    fn digest_matches(&self, scope: &Scope<'_>, observed: &str) -> Result<(), Error> {
        let Some(expected) = self.expected.digest.expected() else {
            return Err(scope.mismatch("request_message_salt", "pinned salt", "none observed"));
        };
        scope.ensure_eq("request_message_hash", expected.as_str(), observed)
    }

    /// Parse a creation block height and check it against the model (if already known).
    fn check_created(&self, scope: &Scope<'_>, raw: &str) -> Result<BlockHeight, Error> {
        let height = parse_height(scope, "creation_block_height", raw)?;
        if let Some(created) = self.model.creation_block_height() {
            scope.ensure_eq("creation_block_height", created, &height)?;
        }
        Ok(height)
    }

    /// Pin the creation block height on the model if none is known yet.
    fn pin_created(&mut self, height: &BlockHeight) {
        if self.model.creation_block_height().is_none() {
            self.model.set_created(height.clone());
        }
    }

    /// Check `height` against the actor's previous observation.
    fn check_floor(
        &self,
        scope: &Scope<'_>,
        height: &BlockHeight,
        advance: Advance,
    ) -> Result<(), Error> {
        let Some(previous) = self.floors.get(scope.actor) else {
            return Ok(());
        };
        if height.follows(previous, advance) {
            return Ok(());
        }
        let relation = match advance {
            Advance::Monotonic => ">=",
            Advance::Strict => ">",
        };
        Err(scope.mismatch(
            "block_height",
            format!("{relation} {previous}"),
            height.to_string(),
        ))
    }

    /// Record `height` as `actor`'s latest observation.
    fn raise_floor(&mut self, actor: &str, height: BlockHeight) {
        self.floors.insert(actor.to_string(), height);
    }

    /// Check that a status reported after close matches the closed model.
    fn unchanged(&self, scope: &Scope<'_>, observed: &RequestStatus) -> Result<(), Error> {
        let model = &self.model;
        if observed.status != model.status()
            || !observed.closed
            || observed.timed_out != model.timed_out()
        {
            return Err(scope.mismatch(
                "closed",
                format!(
                    "no transition after close (status={}, timed_out={})",
                    model.status(),
                    model.timed_out()
                ),
                format!(
                    "status={}, closed={}, timed_out={}",
                    observed.status, observed.closed, observed.timed_out
                ),
            ));
        }
        responses_match(scope, model.responses(), &observed.response_list)?;
        self.services_match(scope, &observed.data_request_list)
    }

    /// Check reported service progress against the expected counters.
    fn services_match(&self, scope: &Scope<'_>, observed: &[ServiceStatus]) -> Result<(), Error> {
        let expected = self.expected.services.descriptors();
        let observed_ids: Vec<&str> = observed.iter().map(|s| s.service_id.as_str()).collect();
        let expected_ids: Vec<&str> = expected.iter().map(|d| d.service_id.as_str()).collect();
        scope.ensure_eq("data_request_list", &expected_ids, &observed_ids)?;

        for (descriptor, service) in expected.iter().zip(observed) {
            let id = &descriptor.service_id;
            scope.ensure_eq(
                format!("data_request_list[{id}].min_as"),
                &descriptor.min_as,
                &service.min_as,
            )?;
            scope.ensure_eq(
                format!("data_request_list[{id}].as_id_list"),
                &descriptor.as_id_list,
                &service.as_id_list,
            )?;

            // Counters
            let (signed, received) = self.expected.services.counts(id).unwrap_or_default();
            scope.ensure_eq(
                format!("data_request_list[{id}].signed_data_count"),
                &signed,
                &service.signed_data_count(),
            )?;
            scope.ensure_eq(
                format!("data_request_list[{id}].received_data_count"),
                &received,
                &service.received_data_count(),
            )?;
            let bound = if service.as_id_list.is_empty() {
                u32::MAX
            } else {
                service.as_id_list.len() as u32
            };
            if service.received_data_count() > service.signed_data_count()
                || service.signed_data_count() > bound
            {
                return Err(scope.mismatch(
                    format!("data_request_list[{id}]"),
                    "received <= signed <= |as_id_list|",
                    format!(
                        "received={} signed={} as={}",
                        service.received_data_count(),
                        service.signed_data_count(),
                        service.as_id_list.len()
                    ),
                ));
            }

            // Per-AS flags
            for response in &service.response_list {
                let as_id = &response.as_id;
                scope.ensure_eq(
                    format!("data_request_list[{id}].response_list[{as_id}].signed"),
                    &self.expected.services.is_signed(id, as_id),
                    &response.signed,
                )?;
                scope.ensure_eq(
                    format!("data_request_list[{id}].response_list[{as_id}].received_data"),
                    &self.expected.services.is_received(id, as_id),
                    &response.received_data,
                )?;
            }
        }
        Ok(())
    }
}

/// Check a control-plane reply that must have been rejected with `status` and `code`.
///
/// Rejections with other statuses or codes are mismatches; failures other than rejections
/// (transport, decoding) propagate unchanged.
pub fn expect_rejection<T: std::fmt::Debug>(
    request_id: &str,
    result: Result<T, Error>,
    status: u16,
    code: u32,
) -> Result<(), Error> {
    let scope = Scope::new(CONTROL_PLANE, request_id);
    match result {
        Ok(value) => Err(scope.mismatch(
            "rejection",
            format!("status={status} code={code}"),
            format!("accepted: {value:?}"),
        )),
        Err(Error::Rejected {
            status: observed_status,
            code: observed_code,
            message,
        }) => {
            if observed_status == status && observed_code == code {
                debug!(request_id, status, code, %message, "observed expected rejection");
                return Ok(());
            }
            Err(scope.mismatch(
                "rejection",
                format!("status={status} code={code}"),
                format!("status={observed_status} code={observed_code} ({message})"),
            ))
        }
        Err(err) => Err(err),
    }
}

/// Parse a block height, reporting a malformed one as a mismatch of `field`.
fn parse_height(scope: &Scope<'_>, field: &str, raw: &str) -> Result<BlockHeight, Error> {
    raw.parse()
        .map_err(|_| scope.mismatch(field, "<chain>:<height>", raw))
}

/// Compare acknowledged answers with a reported response list (order-insensitive, allow-listed
/// fields only).
fn responses_match(
    scope: &Scope<'_>,
    records: &[IdpResponseRecord],
    observed: &[IdpResponse],
) -> Result<(), Error> {
    let mut expected: Vec<IdpResponse> = records.iter().map(IdpResponseRecord::wire).collect();
    expected.sort_by(|a, b| a.idp_id.cmp(&b.idp_id));
    let mut observed = observed.to_vec();
    observed.sort_by(|a, b| a.idp_id.cmp(&b.idp_id));
    scope.ensure_eq("response_list", &expected, &observed)
}

/// Returns whether two status reports describe the same state (block height aside).
fn same_state(a: &RequestStatus, b: &RequestStatus) -> bool {
    a.status == b.status
        && a.closed == b.closed
        && a.timed_out == b.timed_out
        && a.answered_idp_count == b.answered_idp_count
        && a.response_list == b.response_list
        && a.data_request_list == b.data_request_list
}
