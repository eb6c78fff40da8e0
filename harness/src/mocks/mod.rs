//! Simulated nodes for exercising scenarios without a deployment.

mod engine;
pub use engine::{
    Engine, Fault, CHAIN, DUPLICATE_RESPONSE, INVALID_PARAMETERS, NOT_REQUESTER, NOT_TARGETED,
    NO_IDP, UNKNOWN_REQUEST, UNKNOWN_SERVICE,
};
