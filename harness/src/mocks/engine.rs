use crate::control::{
    CloseRequest, ControlPlane, CreateRequest, Created, Respond, SendData, REJECTED_STATUS,
    REQUEST_CLOSED,
};
use futures::{channel::mpsc, StreamExt};
use idex_observer::{
    broker::Router,
    expected::{request_message_hash, Identity, Registry},
    lifecycle::{Answer, Status},
    read::{ReadApi, RequestDetail},
    wire::{
        ActionResult, AsResponse, DataRequest, DataRequestDescriptor, Envelope, IdpResponse,
        IncomingRequest, Payload, RequestStatus, ServiceStatus,
    },
    Error,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, warn};

/// Chain segment of every block height the engine reports.
pub const CHAIN: &str = "mock";

/// Height of the ledger before the first action.
const GENESIS: u64 = 100;

/// Codes the engine rejects actions with.
pub const INVALID_PARAMETERS: u32 = 20003;
pub const NO_IDP: u32 = 20005;
pub const UNKNOWN_REQUEST: u32 = 20012;
pub const DUPLICATE_RESPONSE: u32 = 20027;
pub const NOT_TARGETED: u32 = 20038;
pub const UNKNOWN_SERVICE: u32 = 20039;
pub const NOT_REQUESTER: u32 = 20040;

/// A protocol defect the engine can be told to exhibit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Every IdP receives a different request message salt.
    SaltPerIdp,
    /// Actions after creation are committed at the creation height.
    StaleHeight,
    /// Status updates are never delivered.
    DropStatus,
}

struct Service {
    descriptor: DataRequestDescriptor,
    request_params: String,
    responses: Vec<AsResponse>,
}

impl Service {
    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            service_id: self.descriptor.service_id.clone(),
            as_id_list: self.descriptor.as_id_list.clone(),
            min_as: self.descriptor.min_as,
            response_list: self.responses.clone(),
        }
    }

    fn satisfied(&self) -> bool {
        self.responses.iter().filter(|r| r.received_data).count() as u32 >= self.descriptor.min_as
    }
}

struct Tracked {
    request: CreateRequest,
    request_id: String,
    requester: String,
    salt: String,
    idp_id_list: Vec<String>,
    services: Vec<Service>,
    responses: Vec<(IdpResponse, Answer)>,
    status: Status,
    closed: bool,
    creation_block_height: String,
    creation_time: u64,
    data_requested: bool,
    /// Nodes receiving status updates (the requester and every IdP that answered).
    observers: Vec<String>,
}

impl Tracked {
    fn valid_accepts(&self) -> Vec<&str> {
        self.responses
            .iter()
            .filter(|(response, answer)| {
                *answer == Answer::Accept
                    && response.valid_signature != Some(false)
                    && response.valid_ial != Some(false)
            })
            .map(|(response, _)| response.idp_id.as_str())
            .collect()
    }

    /// Aggregate the recorded answers into a status.
    fn aggregate(&self) -> Status {
        let accepts = self.valid_accepts().len() as u32;
        let min_idp = self.request.min_idp;
        let remaining = (self.idp_id_list.len() - self.responses.len()) as u32;
        if accepts >= min_idp {
            if self.services.iter().all(Service::satisfied) {
                return Status::Completed;
            }
            return Status::Confirmed;
        }
        if accepts + remaining < min_idp {
            if self.responses.iter().any(|(_, a)| *a == Answer::Reject) {
                return Status::Rejected;
            }
            return Status::Errored;
        }
        if accepts > 0 {
            return Status::Confirmed;
        }
        Status::Pending
    }

    fn settle(&mut self) {
        self.status = self.aggregate();
        if self.status.is_terminal() {
            self.closed = true;
        }
    }

    fn status_update(&self, node: &str, block_height: &str) -> Envelope {
        Envelope::new(
            node,
            Payload::RequestStatus(RequestStatus {
                request_id: self.request_id.clone(),
                status: self.status,
                mode: Some(self.request.mode),
                min_idp: self.request.min_idp,
                answered_idp_count: self.responses.len() as u32,
                closed: self.closed,
                timed_out: false,
                response_list: self.responses.iter().map(|(r, _)| r.clone()).collect(),
                data_request_list: self.services.iter().map(Service::status).collect(),
                block_height: block_height.to_string(),
            }),
        )
    }

    fn detail(&self) -> RequestDetail {
        RequestDetail {
            request_id: self.request_id.clone(),
            mode: self.request.mode,
            min_idp: self.request.min_idp,
            min_ial: self.request.min_ial,
            min_aal: self.request.min_aal,
            request_timeout: self.request.request_timeout,
            idp_id_list: self.idp_id_list.clone(),
            data_request_list: self.services.iter().map(Service::status).collect(),
            request_message_hash: request_message_hash(&self.request.request_message, &self.salt),
            response_list: self.responses.iter().map(|(r, _)| r.clone()).collect(),
            closed: self.closed,
            timed_out: false,
            status: self.status,
            requester_node_id: self.requester.clone(),
            creation_block_height: self.creation_block_height.clone(),
            creation_time: self.creation_time,
        }
    }
}

struct State {
    height: u64,
    rng: StdRng,
    requests: HashMap<String, Tracked>,
    identities: HashMap<Identity, Vec<String>>,
    fault: Option<Fault>,
}

impl State {
    /// Commit a block, returning its height.
    fn commit(&mut self, creation: bool) -> String {
        if creation || self.fault != Some(Fault::StaleHeight) {
            self.height += 1;
        }
        format!("{CHAIN}:{}", self.height)
    }

    fn open(&mut self, request_id: &str) -> Result<&mut Tracked, Error> {
        let tracked = self.requests.get_mut(request_id).ok_or_else(|| {
            rejected(UNKNOWN_REQUEST, format!("unknown request: {request_id}"))
        })?;
        if tracked.closed {
            return Err(rejected(REQUEST_CLOSED, "request already closed"));
        }
        Ok(tracked)
    }

    fn statuses(&self, request_id: &str, block_height: &str, outbox: &mut Vec<Envelope>) {
        if self.fault == Some(Fault::DropStatus) {
            return;
        }
        let Some(tracked) = self.requests.get(request_id) else {
            return;
        };
        for node in &tracked.observers {
            outbox.push(tracked.status_update(node, block_height));
        }
    }
}

fn rejected(code: u32, message: impl Into<String>) -> Error {
    Error::Rejected {
        status: REJECTED_STATUS,
        code,
        message: message.into(),
    }
}

fn action_result(reference_id: &str, request_id: &str) -> ActionResult {
    ActionResult {
        reference_id: reference_id.to_string(),
        request_id: Some(request_id.to_string()),
        success: true,
        creation_block_height: None,
        error: None,
    }
}

/// A simulated protocol engine.
///
/// Actions are applied synchronously to an in-memory ledger. The notifications they cause are
/// queued and delivered to a [Router] by a background task, so they arrive only after the
/// caller yields (as they would from a real node).
///
/// IdP answers are aggregated as follows: once `min_idp` valid accepts are recorded the request
/// is confirmed (completed when every service received `min_as` answers); once the remaining
/// IdPs can no longer reach `min_idp` the request is rejected (if any IdP rejected) or errored;
/// otherwise it is confirmed after the first valid accept. Terminal requests close immediately,
/// and any later action against them is rejected with [REQUEST_CLOSED].
#[derive(Clone)]
pub struct Engine {
    state: Arc<Mutex<State>>,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl Engine {
    /// Start an [Engine] delivering to `router`, seeding request ids and salts with `seed`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(router: Router, seed: u64) -> Self {
        let (outbox, mut inbox) = mpsc::unbounded::<Envelope>();
        tokio::spawn(async move {
            while let Some(envelope) = inbox.next().await {
                let node = envelope.node_id.clone();
                if let Err(err) = router.dispatch(&node, envelope) {
                    warn!(%node, ?err, "could not deliver notification");
                }
            }
        });
        Self {
            state: Arc::new(Mutex::new(State {
                height: GENESIS,
                rng: StdRng::seed_from_u64(seed),
                requests: HashMap::new(),
                identities: HashMap::new(),
                fault: None,
            })),
            outbox,
        }
    }

    /// Associate `idps` with `identity`.
    pub fn with_identity(self, identity: Identity, idps: Vec<String>) -> Self {
        self.state.lock().unwrap().identities.insert(identity, idps);
        self
    }

    /// Exhibit `fault` from now on.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().unwrap().fault = Some(fault);
    }

    /// The current ledger height.
    pub fn height(&self) -> u64 {
        self.state.lock().unwrap().height
    }

    fn deliver(&self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            debug!(node = %envelope.node_id, kind = %envelope.kind(), "queued notification");
            if self.outbox.unbounded_send(envelope).is_err() {
                warn!("delivery task stopped");
            }
        }
    }

    fn create(&self, actor: &str, request: &CreateRequest) -> Result<(Created, Vec<Envelope>), Error> {
        let mut state = self.state.lock().unwrap();

        // Resolve the IdPs
        let idp_id_list = if request.idp_id_list.is_empty() {
            let identity = match (&request.namespace, &request.identifier) {
                (Some(namespace), Some(identifier)) => Identity {
                    namespace: namespace.clone(),
                    identifier: identifier.clone(),
                },
                _ => return Err(rejected(NO_IDP, "no idp and no identity")),
            };
            state
                .identities
                .get(&identity)
                .cloned()
                .ok_or_else(|| rejected(NO_IDP, "no idp associated with identity"))?
        } else {
            request.idp_id_list.clone()
        };
        if request.min_idp == 0 || request.min_idp as usize > idp_id_list.len() {
            return Err(rejected(INVALID_PARAMETERS, "min_idp exceeds idp count"));
        }
        if request.mode == 1 && !request.data_request_list.is_empty() {
            return Err(rejected(INVALID_PARAMETERS, "data requests need mode 2 or 3"));
        }

        // Commit
        let request_id = format!("{:016x}", state.rng.gen::<u64>());
        let salt = format!("{:016x}", state.rng.gen::<u64>());
        let creation_block_height = state.commit(true);
        let creation_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let services: Vec<Service> = request
            .data_request_list
            .iter()
            .map(|service| Service {
                descriptor: service.descriptor(),
                request_params: service.request_params.clone(),
                responses: Vec::new(),
            })
            .collect();

        // Notify
        let mut result = action_result(&request.reference_id, &request_id);
        result.creation_block_height = Some(creation_block_height.clone());
        let mut outbox = vec![Envelope::new(actor, Payload::CreateRequestResult(result))];
        for idp in &idp_id_list {
            let salt = if state.fault == Some(Fault::SaltPerIdp) {
                format!("{:016x}", state.rng.gen::<u64>())
            } else {
                salt.clone()
            };
            outbox.push(Envelope::new(
                idp.as_str(),
                Payload::IncomingRequest(IncomingRequest {
                    request_id: request_id.clone(),
                    mode: request.mode,
                    request_message: request.request_message.clone(),
                    request_message_hash: request_message_hash(&request.request_message, &salt),
                    request_message_salt: salt,
                    requester_node_id: actor.to_string(),
                    min_ial: request.min_ial,
                    min_aal: request.min_aal,
                    data_request_list: services.iter().map(|s| s.descriptor.clone()).collect(),
                    creation_block_height: creation_block_height.clone(),
                    creation_time,
                    request_timeout: request.request_timeout,
                }),
            ));
        }
        debug!(actor, %request_id, height = %creation_block_height, "created request");
        state.requests.insert(
            request_id.clone(),
            Tracked {
                request: request.clone(),
                request_id: request_id.clone(),
                requester: actor.to_string(),
                salt,
                idp_id_list,
                services,
                responses: Vec::new(),
                status: Status::Pending,
                closed: false,
                creation_block_height,
                creation_time,
                data_requested: false,
                observers: vec![actor.to_string()],
            },
        );
        Ok((Created { request_id }, outbox))
    }

    fn answer(&self, actor: &str, response: &Respond) -> Result<Vec<Envelope>, Error> {
        let mut state = self.state.lock().unwrap();
        let tracked = state.open(&response.request_id)?;
        if !tracked.idp_id_list.iter().any(|idp| idp == actor) {
            return Err(rejected(NOT_TARGETED, "idp not targeted by request"));
        }
        if tracked.responses.iter().any(|(r, _)| r.idp_id == actor) {
            return Err(rejected(DUPLICATE_RESPONSE, "idp already answered"));
        }

        // Record the answer
        let record = match response.answer {
            Answer::Error(code) => IdpResponse {
                idp_id: actor.to_string(),
                valid_signature: None,
                valid_ial: None,
                error_code: Some(code),
            },
            Answer::Accept | Answer::Reject => IdpResponse {
                idp_id: actor.to_string(),
                valid_signature: Some(true),
                valid_ial: Some(response.ial >= tracked.request.min_ial),
                error_code: None,
            },
        };
        tracked.responses.push((record, response.answer));
        tracked.observers.push(actor.to_string());
        tracked.settle();

        // Request data once enough IdPs accepted
        let mut outbox = vec![Envelope::new(
            actor,
            Payload::ResponseResult(action_result(
                &response.reference_id,
                &response.request_id,
            )),
        )];
        let signatures: Vec<String> = tracked
            .valid_accepts()
            .iter()
            .map(|idp| format!("signature-{idp}"))
            .collect();
        if !tracked.data_requested && signatures.len() as u32 >= tracked.request.min_idp {
            tracked.data_requested = true;
            for service in &tracked.services {
                for as_id in &service.descriptor.as_id_list {
                    outbox.push(Envelope::new(
                        as_id.as_str(),
                        Payload::DataRequest(DataRequest {
                            request_id: tracked.request_id.clone(),
                            mode: tracked.request.mode,
                            namespace: tracked.request.namespace.clone(),
                            identifier: tracked.request.identifier.clone(),
                            service_id: service.descriptor.service_id.clone(),
                            request_params: service.request_params.clone(),
                            requester_node_id: tracked.requester.clone(),
                            min_ial: tracked.request.min_ial,
                            min_aal: tracked.request.min_aal,
                            response_signature_list: signatures.clone(),
                            request_message_hash: Some(request_message_hash(
                                &tracked.request.request_message,
                                &tracked.salt,
                            )),
                            creation_block_height: tracked.creation_block_height.clone(),
                            creation_time: tracked.creation_time,
                            request_timeout: tracked.request.request_timeout,
                        }),
                    ));
                }
            }
        }
        debug!(
            actor,
            request_id = %response.request_id,
            status = %tracked.status,
            "recorded answer"
        );

        // Commit
        let height = state.commit(false);
        state.statuses(&response.request_id, &height, &mut outbox);
        Ok(outbox)
    }

    fn data(&self, actor: &str, data: &SendData) -> Result<Vec<Envelope>, Error> {
        let mut state = self.state.lock().unwrap();
        let tracked = state.open(&data.request_id)?;
        if !tracked.data_requested {
            return Err(rejected(INVALID_PARAMETERS, "data not requested yet"));
        }
        let service = tracked
            .services
            .iter_mut()
            .find(|s| s.descriptor.service_id == data.service_id)
            .filter(|s| s.descriptor.as_id_list.iter().any(|a| a == actor))
            .ok_or_else(|| rejected(UNKNOWN_SERVICE, "service not requested from this as"))?;
        if service.responses.iter().any(|r| r.as_id == actor) {
            return Err(rejected(DUPLICATE_RESPONSE, "data already sent"));
        }

        // Signed
        service.responses.push(AsResponse {
            as_id: actor.to_string(),
            signed: true,
            received_data: false,
            error_code: None,
        });
        let mut outbox = vec![Envelope::new(
            actor,
            Payload::SendDataResult(action_result(&data.reference_id, &data.request_id)),
        )];
        let height = state.commit(false);
        state.statuses(&data.request_id, &height, &mut outbox);

        // Received by the requester
        let tracked = state.open(&data.request_id)?;
        if let Some(response) = tracked
            .services
            .iter_mut()
            .find(|s| s.descriptor.service_id == data.service_id)
            .and_then(|s| s.responses.iter_mut().find(|r| r.as_id == actor))
        {
            response.received_data = true;
        }
        tracked.settle();
        let height = state.commit(false);
        state.statuses(&data.request_id, &height, &mut outbox);
        Ok(outbox)
    }

    fn close(&self, actor: &str, close: &CloseRequest) -> Result<Vec<Envelope>, Error> {
        let mut state = self.state.lock().unwrap();
        let tracked = state.open(&close.request_id)?;
        if tracked.requester != actor {
            return Err(rejected(NOT_REQUESTER, "only the requester may close"));
        }
        tracked.closed = true;
        let mut outbox = vec![Envelope::new(
            actor,
            Payload::CloseRequestResult(action_result(&close.reference_id, &close.request_id)),
        )];
        let height = state.commit(false);
        state.statuses(&close.request_id, &height, &mut outbox);
        Ok(outbox)
    }
}

impl ControlPlane for Engine {
    async fn create_request(&self, actor: &str, request: &CreateRequest) -> Result<Created, Error> {
        let (created, outbox) = self.create(actor, request)?;
        self.deliver(outbox);
        Ok(created)
    }

    async fn respond(&self, actor: &str, response: &Respond) -> Result<(), Error> {
        let outbox = self.answer(actor, response)?;
        self.deliver(outbox);
        Ok(())
    }

    async fn send_data(&self, actor: &str, data: &SendData) -> Result<(), Error> {
        let outbox = self.data(actor, data)?;
        self.deliver(outbox);
        Ok(())
    }

    async fn close_request(&self, actor: &str, close: &CloseRequest) -> Result<(), Error> {
        let outbox = self.close(actor, close)?;
        self.deliver(outbox);
        Ok(())
    }
}

impl ReadApi for Engine {
    async fn request(&self, request_id: &str) -> Result<RequestDetail, Error> {
        self.state
            .lock()
            .unwrap()
            .requests
            .get(request_id)
            .map(Tracked::detail)
            .ok_or_else(|| Error::Read(format!("unknown request: {request_id}")))
    }
}

impl Registry for Engine {
    async fn idps(
        &self,
        identity: &Identity,
        _min_ial: f64,
        _min_aal: f64,
    ) -> Result<Vec<String>, Error> {
        self.state
            .lock()
            .unwrap()
            .identities
            .get(identity)
            .cloned()
            .ok_or_else(|| Error::Read(format!("unknown identity: {}", identity.identifier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idex_macros::test_traced;
    use idex_observer::{broker::Broker, expected::ServiceRequest, wire::Kind};
    use std::future::Future;

    fn request(reference_id: &str, idps: &[&str], min_idp: u32) -> CreateRequest {
        CreateRequest {
            reference_id: reference_id.into(),
            mode: 2,
            namespace: Some("citizen_id".into()),
            identifier: Some("1234".into()),
            idp_id_list: idps.iter().map(|idp| idp.to_string()).collect(),
            data_request_list: Vec::new(),
            request_message: "hello".into(),
            min_ial: 1.1,
            min_aal: 1.0,
            min_idp,
            request_timeout: 3600,
        }
    }

    fn respond(reference_id: &str, request_id: &str, answer: Answer) -> Respond {
        Respond {
            reference_id: reference_id.into(),
            request_id: request_id.into(),
            answer,
            ial: 1.1,
            aal: 1.0,
        }
    }

    fn rejection_code(result: Result<(), Error>) -> u32 {
        match result {
            Err(Error::Rejected { status, code, .. }) => {
                assert_eq!(status, REJECTED_STATUS);
                code
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    /// Register for the next status update (before the action that causes it).
    fn status(broker: &Broker, request_id: &str) -> impl Future<Output = RequestStatus> {
        let expectation = broker.expect(Kind::RequestStatus, request_id);
        async move {
            let envelope = expectation.await.unwrap();
            envelope.request_status().unwrap().clone()
        }
    }

    #[test_traced]
    async fn test_create_notifies_requester_and_idps() {
        let router = Router::new(["rp1", "idp1", "idp2"]);
        let engine = Engine::start(router.clone(), 7);
        let rp = router.broker("rp1").unwrap();
        let idp = router.broker("idp2").unwrap();

        let created = rp.expect(Kind::CreateRequestResult, "ref-1");
        let request = request("ref-1", &["idp1", "idp2"], 1);
        let Created { request_id } = engine.create_request("rp1", &request).await.unwrap();
        let incoming = idp.expect(Kind::IncomingRequest, &request_id);

        let result = created.await.unwrap();
        let result = result.action_result().unwrap();
        assert_eq!(result.request_id.as_deref(), Some(request_id.as_str()));
        assert_eq!(
            result.creation_block_height.as_deref(),
            Some(format!("{CHAIN}:{}", GENESIS + 1).as_str())
        );
        let Payload::IncomingRequest(incoming) = incoming.await.unwrap().payload else {
            panic!("unexpected payload");
        };
        assert_eq!(
            incoming.request_message_hash,
            request_message_hash("hello", &incoming.request_message_salt)
        );

        // The read API reports the same request
        let detail = engine.request(&request_id).await.unwrap();
        assert_eq!(detail.status, Status::Pending);
        assert_eq!(detail.idp_id_list, vec!["idp1", "idp2"]);
        assert_eq!(detail.request_message_hash, incoming.request_message_hash);
    }

    #[test_traced]
    async fn test_idps_resolved_from_identity() {
        let router = Router::new(["rp1", "idp1"]);
        let identity = Identity {
            namespace: "citizen_id".into(),
            identifier: "1234".into(),
        };
        let engine =
            Engine::start(router, 7).with_identity(identity.clone(), vec!["idp1".to_string()]);
        assert_eq!(engine.idps(&identity, 1.1, 1.0).await.unwrap(), vec!["idp1"]);

        let Created { request_id } = engine
            .create_request("rp1", &request("ref-1", &[], 1))
            .await
            .unwrap();
        let detail = engine.request(&request_id).await.unwrap();
        assert_eq!(detail.idp_id_list, vec!["idp1"]);

        // Unknown identities have no IdP
        let mut orphan = request("ref-2", &[], 1);
        orphan.identifier = Some("9999".into());
        assert!(matches!(
            engine.create_request("rp1", &orphan).await,
            Err(Error::Rejected { code: NO_IDP, .. })
        ));
    }

    #[test_traced]
    async fn test_answers_aggregate() {
        let router = Router::new(["rp1", "idp1", "idp2", "idp3"]);
        let engine = Engine::start(router.clone(), 7);
        let rp = router.broker("rp1").unwrap();
        let Created { request_id } = engine
            .create_request("rp1", &request("ref-1", &["idp1", "idp2", "idp3"], 2))
            .await
            .unwrap();

        // First accept confirms
        let next = status(&rp, &request_id);
        engine
            .respond("idp1", &respond("ref-2", &request_id, Answer::Accept))
            .await
            .unwrap();
        let confirmed = next.await;
        assert_eq!(confirmed.status, Status::Confirmed);
        assert_eq!(confirmed.answered_idp_count, 1);
        assert!(!confirmed.closed);

        // An error still leaves min_idp reachable
        let next = status(&rp, &request_id);
        engine
            .respond("idp2", &respond("ref-3", &request_id, Answer::Error(1000)))
            .await
            .unwrap();
        let still = next.await;
        assert_eq!(still.status, Status::Confirmed);
        assert_eq!(still.response_list[1].error_code, Some(1000));
        assert_eq!(still.response_list[1].valid_signature, None);

        // A reject makes it unreachable
        let next = status(&rp, &request_id);
        engine
            .respond("idp3", &respond("ref-4", &request_id, Answer::Reject))
            .await
            .unwrap();
        let rejected = next.await;
        assert_eq!(rejected.status, Status::Rejected);
        assert!(rejected.closed);
        assert_eq!(still.block_height, format!("{CHAIN}:{}", GENESIS + 3));
        assert_eq!(rejected.block_height, format!("{CHAIN}:{}", GENESIS + 4));
    }

    #[test_traced]
    async fn test_invalid_actions_rejected() {
        let router = Router::new(["rp1", "idp1", "idp2"]);
        let engine = Engine::start(router, 7);

        // Unsatisfiable min_idp
        assert!(matches!(
            engine.create_request("rp1", &request("ref-1", &["idp1"], 2)).await,
            Err(Error::Rejected {
                code: INVALID_PARAMETERS,
                ..
            })
        ));

        let Created { request_id } = engine
            .create_request("rp1", &request("ref-2", &["idp1"], 1))
            .await
            .unwrap();
        let code = rejection_code(
            engine
                .respond("idp2", &respond("ref-3", &request_id, Answer::Accept))
                .await,
        );
        assert_eq!(code, NOT_TARGETED);
        let code = rejection_code(
            engine
                .respond("idp1", &respond("ref-4", "missing", Answer::Accept))
                .await,
        );
        assert_eq!(code, UNKNOWN_REQUEST);
        let close = CloseRequest {
            reference_id: "ref-5".into(),
            request_id: request_id.clone(),
        };
        assert_eq!(
            rejection_code(engine.close_request("idp1", &close).await),
            NOT_REQUESTER
        );

        // Everything after close is refused
        engine.close_request("rp1", &close).await.unwrap();
        assert_eq!(
            rejection_code(engine.close_request("rp1", &close).await),
            REQUEST_CLOSED
        );
        let code = rejection_code(
            engine
                .respond("idp1", &respond("ref-6", &request_id, Answer::Accept))
                .await,
        );
        assert_eq!(code, REQUEST_CLOSED);
        let detail = engine.request(&request_id).await.unwrap();
        assert!(detail.closed);
        assert_eq!(detail.status, Status::Pending);
    }

    #[test_traced]
    async fn test_data_completes_request() {
        let router = Router::new(["rp1", "idp1", "as1"]);
        let engine = Engine::start(router.clone(), 7);
        let rp = router.broker("rp1").unwrap();
        let accessor = router.broker("as1").unwrap();
        let mut create = request("ref-1", &["idp1"], 1);
        create.data_request_list = vec![ServiceRequest {
            service_id: "bank_statement".into(),
            as_id_list: vec!["as1".into()],
            min_as: 1,
            request_params: "{}".into(),
        }];
        let Created { request_id } = engine.create_request("rp1", &create).await.unwrap();
        let data = SendData {
            reference_id: "ref-2".into(),
            request_id: request_id.clone(),
            service_id: "bank_statement".into(),
            data: "statement".into(),
        };

        // Data is only accepted once requested
        assert_eq!(
            rejection_code(engine.send_data("as1", &data).await),
            INVALID_PARAMETERS
        );
        let requested = accessor.expect(Kind::DataRequest, &request_id);
        engine
            .respond("idp1", &respond("ref-3", &request_id, Answer::Accept))
            .await
            .unwrap();
        let Payload::DataRequest(requested) = requested.await.unwrap().payload else {
            panic!("unexpected payload");
        };
        assert_eq!(requested.response_signature_list, vec!["signature-idp1"]);
        assert_eq!(requested.request_params, "{}");

        // Signed, then received
        let received = rp.expect_status(&request_id, Status::Completed, true);
        engine.send_data("as1", &data).await.unwrap();
        let received = received.await.unwrap();
        let service = &received.request_status().unwrap().data_request_list[0];
        assert_eq!(service.signed_data_count(), 1);
        assert_eq!(service.received_data_count(), 1);
        assert_eq!(
            rejection_code(engine.send_data("as1", &data).await),
            REQUEST_CLOSED
        );
    }

    #[test_traced]
    async fn test_stale_height() {
        let router = Router::new(["rp1", "idp1"]);
        let engine = Engine::start(router.clone(), 7);
        engine.inject(Fault::StaleHeight);
        let rp = router.broker("rp1").unwrap();
        let Created { request_id } = engine
            .create_request("rp1", &request("ref-1", &["idp1"], 1))
            .await
            .unwrap();
        let next = status(&rp, &request_id);
        engine
            .respond("idp1", &respond("ref-2", &request_id, Answer::Accept))
            .await
            .unwrap();
        assert_eq!(next.await.block_height, format!("{CHAIN}:{}", GENESIS + 1));
        assert_eq!(engine.height(), GENESIS + 1);
    }
}
