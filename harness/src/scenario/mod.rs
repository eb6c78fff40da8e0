//! Orchestrated protocol runs.
//!
//! A scenario issues actions through a [ControlPlane] and verifies, with one [Verifier] per
//! request, every notification the action should cause. Registrations are always made before
//! the action that causes them (or, for notifications keyed by the `request_id` the action
//! returns, before yielding), and every awaited notification is bounded by the step timeout.
//!
//! Each scenario ends by checking that the request settled: the model is closed, the read API
//! agrees with it, and no participant observed a transition after close.

use crate::{
    config::{Config, Fixture, Role},
    control::{
        CloseRequest, ControlPlane, CreateRequest, Respond, SendData, REJECTED_STATUS,
        REQUEST_CLOSED,
    },
    Error,
};
use idex_observer::{
    broker::{Expectation, Router},
    expected::{expected_idps, ExpectedState, Identity, Registry, ServiceRequest},
    lifecycle::{Answer, Definition, IdpResponseRecord},
    read::ReadApi,
    verifier::{expect_rejection, StatusExpectation, Verifier},
    wire::{Envelope, Kind},
};
use rand::Rng;
use std::time::Duration;
use tracing::{debug, info};

mod close;
mod data;
mod idp;

/// Every scenario, in the order they run by default.
pub const ALL: [&str; 6] = [
    idp::IDP_ERROR,
    idp::FIRST_ACCEPT_COMPLETES,
    idp::ACCEPT_THEN_ERROR,
    idp::TWO_OF_THREE,
    data::DATA_EXCHANGE,
    close::CLOSE_PENDING,
];

/// Service requested when the fixture names none.
const DEFAULT_SERVICE: &str = "bank_statement";

/// Wait at most `timeout` for `expectation`, releasing its registration on timeout.
pub async fn within(
    timeout: Duration,
    expectation: Expectation,
) -> Result<Envelope, idex_observer::Error> {
    let actor = expectation.actor().to_string();
    let key = expectation.key().clone();
    match tokio::time::timeout(timeout, expectation).await {
        Ok(result) => result,
        Err(_) => Err(idex_observer::Error::Timeout { actor, key }),
    }
}

/// Registrations for one status update per actor.
type Pending = Vec<(String, Expectation)>;

/// One request being driven by a scenario.
pub struct Session {
    request_id: String,
    verifier: Verifier,
    /// Actors that receive status updates (the RP and every IdP that answered).
    observers: Vec<String>,
    /// Actors that were told about the request.
    participants: Vec<String>,
}

impl Session {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn verifier(&self) -> &Verifier {
        &self.verifier
    }

    fn observe(&mut self, actor: &str) {
        if !self.observers.iter().any(|o| o == actor) {
            self.observers.push(actor.to_string());
        }
    }

    fn participate(&mut self, actor: &str) {
        if !self.participants.iter().any(|p| p == actor) {
            self.participants.push(actor.to_string());
        }
    }
}

/// Everything a scenario needs to run against one deployment.
pub struct Context<C> {
    brokers: Router,
    control: C,
    step_timeout: Duration,
    rp: String,
    idps: Vec<String>,
    accessors: Vec<String>,
    fixture: Fixture,
}

impl<C: ControlPlane + ReadApi + Registry> Context<C> {
    /// Create a [Context] for the actors in `config`, acting through `control` and receiving
    /// notifications through `brokers`.
    pub fn new(brokers: Router, control: C, config: &Config) -> Result<Self, Error> {
        let rp = config
            .node_ids(Role::Rp)
            .into_iter()
            .next()
            .ok_or_else(|| Error::InvalidConfig("no rp actor".into()))?;
        Ok(Self {
            brokers,
            control,
            step_timeout: config.step_timeout(),
            rp,
            idps: config.node_ids(Role::Idp),
            accessors: config.node_ids(Role::As),
            fixture: config.fixture.clone(),
        })
    }

    pub fn brokers(&self) -> &Router {
        &self.brokers
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run the scenario called `name`, tearing down every registration afterwards.
    pub async fn run(&self, name: &str) -> Result<(), Error> {
        self.settle(name).await.map(drop)
    }

    /// Run the scenario called `name`, returning the settled request.
    pub async fn settle(&self, name: &str) -> Result<Session, Error> {
        info!(scenario = name, "starting scenario");
        let result = match name {
            idp::IDP_ERROR => idp::idp_error(self).await,
            idp::FIRST_ACCEPT_COMPLETES => idp::first_accept_completes(self).await,
            idp::ACCEPT_THEN_ERROR => idp::accept_then_error(self).await,
            idp::TWO_OF_THREE => idp::two_of_three(self).await,
            data::DATA_EXCHANGE => data::data_exchange(self).await,
            close::CLOSE_PENDING => close::close_pending(self).await,
            _ => Err(Error::UnknownScenario(name.to_string())),
        };
        let released = self.brokers.teardown();
        debug!(scenario = name, released, "tore down brokers");
        if result.is_ok() {
            info!(scenario = name, "scenario passed");
        }
        result
    }

    /// The first `count` configured actors with `role`.
    fn require(
        &self,
        scenario: &'static str,
        role: Role,
        count: usize,
    ) -> Result<&[String], Error> {
        let actors = match role {
            Role::Rp => std::slice::from_ref(&self.rp),
            Role::Idp => self.idps.as_slice(),
            Role::As => self.accessors.as_slice(),
        };
        if actors.len() < count {
            return Err(Error::NotEnoughActors {
                scenario,
                role,
                required: count,
                found: actors.len(),
            });
        }
        Ok(&actors[..count])
    }

    /// The service requested by data scenarios (always satisfiable by a single AS).
    fn service(&self, scenario: &'static str) -> Result<ServiceRequest, Error> {
        let mut service = match self.fixture.services.first() {
            Some(service) => service.clone(),
            None => ServiceRequest {
                service_id: DEFAULT_SERVICE.into(),
                as_id_list: Vec::new(),
                min_as: 1,
                request_params: String::new(),
            },
        };
        if service.as_id_list.is_empty() {
            service.as_id_list = self.require(scenario, Role::As, 1)?.to_vec();
        }
        service.min_as = 1;
        Ok(service)
    }

    fn reference(&self, action: &str) -> String {
        format!("{action}-{:016x}", rand::thread_rng().gen::<u64>())
    }

    /// Parameters of a create action for the fixture identity.
    fn request(
        &self,
        mode: u8,
        min_idp: u32,
        idps: &[String],
        services: Vec<ServiceRequest>,
    ) -> CreateRequest {
        CreateRequest {
            reference_id: self.reference("create"),
            mode,
            namespace: Some(self.fixture.namespace.clone()),
            identifier: Some(self.fixture.identifier.clone()),
            idp_id_list: idps.to_vec(),
            data_request_list: services,
            request_message: self.fixture.request_message.clone(),
            min_ial: self.fixture.min_ial,
            min_aal: self.fixture.min_aal,
            min_idp,
            request_timeout: self.fixture.request_timeout,
        }
    }

    /// Create a request as the RP and verify that the RP and every expected IdP learn about it.
    async fn create(&self, request: CreateRequest) -> Result<Session, Error> {
        let rp = self.rp.as_str();

        // Predict
        let identity = match (&request.namespace, &request.identifier) {
            (Some(namespace), Some(identifier)) => Some(Identity {
                namespace: namespace.clone(),
                identifier: identifier.clone(),
            }),
            _ => None,
        };
        let idps = expected_idps(
            &request.idp_id_list,
            identity.as_ref(),
            request.min_ial,
            request.min_aal,
            &self.control,
        )
        .await?;
        let expected = ExpectedState::new(
            idps.clone(),
            &request.data_request_list,
            request.request_message.clone(),
        );

        // Act
        let created = self
            .brokers
            .broker(rp)?
            .expect(Kind::CreateRequestResult, &request.reference_id);
        let request_id = self.control.create_request(rp, &request).await?.request_id;
        let incoming = idps
            .iter()
            .map(|idp| {
                let expectation = self
                    .brokers
                    .broker(idp)?
                    .expect(Kind::IncomingRequest, &request_id);
                Ok((idp.clone(), expectation))
            })
            .collect::<Result<Pending, idex_observer::Error>>()?;

        // Verify
        let definition = Definition {
            request_id: request_id.clone(),
            mode: request.mode,
            min_idp: request.min_idp,
            min_ial: request.min_ial,
            min_aal: request.min_aal,
            timeout: request.request_timeout,
            requester_node_id: rp.to_string(),
            idp_id_list: idps.clone(),
            data_request_list: expected.services.descriptors(),
        };
        let mut session = Session {
            request_id,
            verifier: Verifier::new(definition, expected)?,
            observers: vec![rp.to_string()],
            participants: vec![rp.to_string()],
        };
        let envelope = within(self.step_timeout, created).await?;
        let height = session.verifier.create_result(rp, &envelope)?;
        for (idp, expectation) in incoming {
            let envelope = within(self.step_timeout, expectation).await?;
            session.verifier.incoming_request(&idp, &envelope)?;
            session.participate(&idp);
        }
        info!(request_id = %session.request_id, %height, idps = ?idps, "created request");
        Ok(session)
    }

    /// Register for the next status update of every observer satisfying `predicate`.
    fn statuses(
        &self,
        session: &Session,
        predicate: impl Fn(&Envelope) -> bool + Clone + Send + 'static,
    ) -> Result<Pending, Error> {
        session
            .observers
            .iter()
            .map(|actor| {
                let expectation = self.brokers.broker(actor)?.expect_where(
                    Kind::RequestStatus,
                    &session.request_id,
                    predicate.clone(),
                );
                Ok((actor.clone(), expectation))
            })
            .collect()
    }

    async fn verify_statuses(
        &self,
        session: &mut Session,
        pending: Pending,
        expect: StatusExpectation,
    ) -> Result<(), Error> {
        for (actor, expectation) in pending {
            let envelope = within(self.step_timeout, expectation).await?;
            session.verifier.request_status(&actor, &envelope, expect)?;
        }
        Ok(())
    }

    /// Answer as `idp` and verify the acknowledgement and the resulting status updates.
    async fn respond(
        &self,
        session: &mut Session,
        idp: &str,
        answer: Answer,
        expect: StatusExpectation,
    ) -> Result<(), Error> {
        let reference_id = self.reference("respond");
        let result = self
            .brokers
            .broker(idp)?
            .expect(Kind::ResponseResult, &reference_id);
        session.observe(idp);
        let statuses = self.statuses(session, |_| true)?;
        let response = Respond {
            reference_id,
            request_id: session.request_id.clone(),
            answer,
            ial: self.fixture.min_ial,
            aal: self.fixture.min_aal,
        };
        self.control.respond(idp, &response).await?;

        let envelope = within(self.step_timeout, result).await?;
        let record = match answer {
            Answer::Accept => IdpResponseRecord::accept(idp, Some(true), Some(true)),
            Answer::Reject => IdpResponseRecord::reject(idp, Some(true), Some(true)),
            Answer::Error(code) => IdpResponseRecord::error(idp, code),
        };
        session.verifier.response_result(idp, &envelope, record)?;
        self.verify_statuses(session, statuses, expect).await?;
        info!(
            idp,
            request_id = %session.request_id,
            ?answer,
            status = %session.verifier.model().status(),
            "verified answer"
        );
        Ok(())
    }

    /// Register for the data request `as_id` receives once enough IdPs accepted.
    fn expect_data_request(&self, session: &Session, as_id: &str) -> Result<Expectation, Error> {
        Ok(self
            .brokers
            .broker(as_id)?
            .expect(Kind::DataRequest, &session.request_id))
    }

    async fn data_request(
        &self,
        session: &mut Session,
        as_id: &str,
        expectation: Expectation,
    ) -> Result<(), Error> {
        let envelope = within(self.step_timeout, expectation).await?;
        session.verifier.data_request(as_id, &envelope)?;
        session.participate(as_id);
        Ok(())
    }

    /// Deliver data as `as_id` and verify the signed and received status updates.
    async fn send_data(
        &self,
        session: &mut Session,
        as_id: &str,
        service_id: &str,
        signed: StatusExpectation,
        received: StatusExpectation,
    ) -> Result<(), Error> {
        let reference_id = self.reference("data");
        let result = self
            .brokers
            .broker(as_id)?
            .expect(Kind::SendDataResult, &reference_id);
        let signed_statuses = self.statuses(session, progress(service_id, as_id, false))?;
        let received_statuses = self.statuses(session, progress(service_id, as_id, true))?;
        let data = SendData {
            reference_id,
            request_id: session.request_id.clone(),
            service_id: service_id.to_string(),
            data: format!("{service_id} for {}", session.request_id),
        };
        self.control.send_data(as_id, &data).await?;

        let envelope = within(self.step_timeout, result).await?;
        session.verifier.send_data_result(as_id, &envelope)?;
        session.verifier.mark_signed(service_id, as_id)?;
        self.verify_statuses(session, signed_statuses, signed).await?;
        session.verifier.mark_received(service_id, as_id)?;
        self.verify_statuses(session, received_statuses, received)
            .await?;
        info!(as_id, request_id = %session.request_id, service_id, "verified data");
        Ok(())
    }

    /// Close the request as the RP and verify the acknowledgement and the final status.
    async fn close(&self, session: &mut Session, expect: StatusExpectation) -> Result<(), Error> {
        let rp = self.rp.as_str();
        let reference_id = self.reference("close");
        let result = self
            .brokers
            .broker(rp)?
            .expect(Kind::CloseRequestResult, &reference_id);
        let statuses = self.statuses(session, |_| true)?;
        let close = CloseRequest {
            reference_id,
            request_id: session.request_id.clone(),
        };
        self.control.close_request(rp, &close).await?;

        let envelope = within(self.step_timeout, result).await?;
        session.verifier.close_result(rp, &envelope)?;
        self.verify_statuses(session, statuses, expect).await?;
        info!(request_id = %session.request_id, "closed request");
        Ok(())
    }

    /// Answer as `idp` after close, expecting the control plane to refuse.
    async fn late_answer(
        &self,
        session: &Session,
        idp: &str,
        answer: Answer,
    ) -> Result<(), Error> {
        let response = Respond {
            reference_id: self.reference("respond"),
            request_id: session.request_id.clone(),
            answer,
            ial: self.fixture.min_ial,
            aal: self.fixture.min_aal,
        };
        let result = self.control.respond(idp, &response).await;
        expect_rejection(&session.request_id, result, REJECTED_STATUS, REQUEST_CLOSED)?;
        debug!(idp, request_id = %session.request_id, "late answer refused");
        Ok(())
    }

    /// Close the request again, expecting the control plane to refuse.
    async fn late_close(&self, session: &Session) -> Result<(), Error> {
        let close = CloseRequest {
            reference_id: self.reference("close"),
            request_id: session.request_id.clone(),
        };
        let result = self.control.close_request(&self.rp, &close).await;
        expect_rejection(&session.request_id, result, REJECTED_STATUS, REQUEST_CLOSED)?;
        debug!(request_id = %session.request_id, "late close refused");
        Ok(())
    }

    /// Check that the request settled.
    async fn finish(&self, session: Session) -> Result<Session, Error> {
        let model = session.verifier.model();
        model.assert_terminal()?;
        let detail = self.control.request(&session.request_id).await?;
        session.verifier.cross_check(&detail)?;
        for actor in &session.participants {
            let journal = self.brokers.broker(actor)?.journal(&session.request_id);
            session.verifier.quiescent(actor, &journal)?;
        }
        info!(
            request_id = %session.request_id,
            status = %model.status(),
            responses = model.responses().len(),
            "request settled"
        );
        Ok(session)
    }
}

/// Matches a status reporting that `as_id` signed its data for `service_id` (and, if `received`,
/// that the RP received it).
fn progress(
    service_id: &str,
    as_id: &str,
    received: bool,
) -> impl Fn(&Envelope) -> bool + Clone + Send + 'static {
    let service_id = service_id.to_string();
    let as_id = as_id.to_string();
    move |envelope| {
        envelope.request_status().is_some_and(|status| {
            status
                .data_request_list
                .iter()
                .filter(|service| service.service_id == service_id)
                .flat_map(|service| &service.response_list)
                .any(|r| r.as_id == as_id && r.signed && r.received_data == received)
        })
    }
}
