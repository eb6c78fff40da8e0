//! Necessary conditions relating a reported status to the acknowledged answers.
//!
//! How the protocol aggregates interleaved accepts, rejects, and errors is not re-derived here.
//! Each status is only checked against conditions any aggregation must satisfy, so a violation
//! always points at either the protocol or the scenario's model of it.

use super::scope::Scope;
use crate::{lifecycle::Request, lifecycle::Status, Error};

/// Check that `observed` is possible given the answers recorded in `model` and whether every
/// service is `satisfied`.
pub(crate) fn check(
    scope: &Scope<'_>,
    model: &Request,
    satisfied: bool,
    observed: Status,
) -> Result<(), Error> {
    let accepts = model.valid_accepts();
    let min_idp = model.definition().min_idp;
    let reachable = model.reachable();

    let requirement = match observed {
        Status::Pending if accepts > 0 => Some("no valid accept"),
        Status::Confirmed if accepts == 0 => Some("at least one valid accept"),
        Status::Confirmed if !reachable => Some("min_idp still reachable"),
        Status::Rejected if reachable => Some("min_idp unreachable"),
        Status::Rejected if model.rejects() == 0 => Some("a recorded reject"),
        Status::Errored if reachable => Some("min_idp unreachable"),
        Status::Errored if model.errors() == 0 => Some("a recorded error"),
        Status::Completed if accepts < min_idp => Some("min_idp valid accepts"),
        Status::Completed if !satisfied => Some("every service satisfied"),
        _ => None,
    };
    let Some(requirement) = requirement else {
        return Ok(());
    };
    Err(scope.mismatch(
        "status",
        format!("{observed} requires {requirement}"),
        format!(
            "accepts={accepts} rejects={} errors={} remaining={:?} min_idp={min_idp} satisfied={satisfied}",
            model.rejects(),
            model.errors(),
            model.remaining(),
        ),
    ))
}
