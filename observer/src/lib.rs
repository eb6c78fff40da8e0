//! Correlate identity-exchange notifications and verify the request lifecycle they describe.
//!
//! A request in the identity-exchange protocol is shared by a Requesting Party (RP), one or
//! more Identity Providers (IdP), and one or more Accessor Services (AS). Each actor learns about
//! the request only through webhook notifications pushed by its node. This crate reconstructs,
//! from those independently arriving streams, a single view of the request and checks it against
//! an independently computed prediction:
//!
//! - [broker]: per-actor [broker::Broker]s hand out one-shot [broker::Expectation]s that resolve on
//!   the first matching [wire::Envelope]. A [broker::Router] owns the brokers of one test run.
//! - [expected]: predictions derived from action parameters alone (IdP list, echoed data request
//!   descriptors, request message digest).
//! - [lifecycle]: the typed model of a [lifecycle::Request] that only the verifier may advance.
//! - [verifier]: checks each notification against the model and the prediction, enforcing
//!   block height ordering per actor, and advances the model.
//!
//! Nothing in this crate retries. A mismatch is returned as an [Error] naming the actor, request,
//! field, and both values, and is meant to abort the scenario step that observed it.

use thiserror::Error;

pub mod broker;
pub mod expected;
pub mod height;
pub mod lifecycle;
pub mod read;
pub mod verifier;
pub mod wire;

use broker::CorrelationKey;

/// Errors that can occur while correlating or verifying notifications.
#[derive(Error, Debug)]
pub enum Error {
    #[error("timed out waiting for {key} at {actor}")]
    Timeout { actor: String, key: CorrelationKey },
    #[error("expectation for {key} at {actor} canceled")]
    Canceled { actor: String, key: CorrelationKey },
    #[error("{actor}/{request_id}: {field} mismatch (expected={expected}, observed={observed})")]
    Mismatch {
        actor: String,
        request_id: String,
        field: String,
        expected: String,
        observed: String,
    },
    #[error("control plane rejected action: status={status} code={code} ({message})")]
    Rejected {
        status: u16,
        code: u32,
        message: String,
    },
    #[error("invalid block height: {0}")]
    InvalidBlockHeight(String),
    #[error("unknown actor: {0}")]
    UnknownActor(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("accessor {as_id} not requested for service {service_id}")]
    UnknownAccessor { service_id: String, as_id: String },
    #[error("{service_id}/{as_id}: {reason}")]
    Counter {
        service_id: String,
        as_id: String,
        reason: &'static str,
    },
    #[error("identity required to resolve idp list")]
    MissingIdentity,
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("read api failed: {0}")]
    Read(String),
    #[error("transport failed: {0}")]
    Transport(String),
}
