//! Drive identity-exchange scenarios and verify every notification each actor receives.
//!
//! The harness wires the [idex_observer] core to the outside world:
//!
//! - [config]: the YAML file describing actors, listeners, and scenario fixtures.
//! - [webhook]: an HTTP receiver that decodes each callback and routes it to the actor's broker.
//! - [control] and [client]: the typed control plane (create, respond, send data, close) and its
//!   HTTP implementation (which also serves the read API and the identity registry).
//! - [scenario]: orchestrated protocol runs built from actions and verified notifications.
//! - [mocks]: a simulated protocol engine for exercising scenarios without a deployment.
//! - [telemetry]: logging and the metrics endpoint.

use thiserror::Error;

pub mod client;
pub mod config;
pub mod control;
pub mod mocks;
pub mod scenario;
pub mod telemetry;
pub mod webhook;

/// Errors that can occur while running the harness.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Observer(#[from] idex_observer::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("scenario {scenario} requires {required} {role} actor(s), found {found}")]
    NotEnoughActors {
        scenario: &'static str,
        role: config::Role,
        required: usize,
        found: usize,
    },
    #[error("telemetry error: {0}")]
    Telemetry(String),
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("invalid url for {actor}: {url}")]
    InvalidUrl { actor: String, url: String },
}
