//! Runs that only involve IdP answers.

use super::{Context, Session};
use crate::{
    config::Role,
    control::{ControlPlane, IDP_ERROR as ERROR_CODE},
    Error,
};
use idex_observer::{
    expected::Registry,
    lifecycle::{Answer, Status},
    read::ReadApi,
    verifier::StatusExpectation,
};

pub const IDP_ERROR: &str = "idp_error";
pub const FIRST_ACCEPT_COMPLETES: &str = "first_accept_completes";
pub const ACCEPT_THEN_ERROR: &str = "accept_then_error";
pub const TWO_OF_THREE: &str = "two_of_three";

/// Mode of requests that carry no data request.
const IDENTITY_MODE: u8 = 1;

/// A single IdP errors, so `min_idp = 1` can no longer be met.
pub(super) async fn idp_error<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idps = ctx.require(IDP_ERROR, Role::Idp, 1)?;
    let mut session = ctx
        .create(ctx.request(IDENTITY_MODE, 1, idps, Vec::new()))
        .await?;
    ctx.respond(
        &mut session,
        &idps[0],
        Answer::Error(ERROR_CODE),
        StatusExpectation::new(Status::Errored).closed(),
    )
    .await?;
    ctx.finish(session).await
}

/// The first of two IdPs accepts and completes the request; the second is turned away.
pub(super) async fn first_accept_completes<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idps = ctx.require(FIRST_ACCEPT_COMPLETES, Role::Idp, 2)?;
    let mut session = ctx
        .create(ctx.request(IDENTITY_MODE, 1, idps, Vec::new()))
        .await?;
    ctx.respond(
        &mut session,
        &idps[0],
        Answer::Accept,
        StatusExpectation::new(Status::Completed).closed(),
    )
    .await?;
    ctx.late_answer(&session, &idps[1], Answer::Error(ERROR_CODE))
        .await?;
    ctx.finish(session).await
}

/// With `min_idp = 2`, one accept confirms the request and an error then makes it unreachable.
pub(super) async fn accept_then_error<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idps = ctx.require(ACCEPT_THEN_ERROR, Role::Idp, 2)?;
    let mut session = ctx
        .create(ctx.request(IDENTITY_MODE, 2, idps, Vec::new()))
        .await?;
    ctx.respond(
        &mut session,
        &idps[0],
        Answer::Accept,
        StatusExpectation::new(Status::Confirmed),
    )
    .await?;
    ctx.respond(
        &mut session,
        &idps[1],
        Answer::Error(ERROR_CODE),
        StatusExpectation::new(Status::Errored).closed(),
    )
    .await?;
    ctx.finish(session).await
}

/// Two of three IdPs accept; the third answers after the request completed.
pub(super) async fn two_of_three<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idps = ctx.require(TWO_OF_THREE, Role::Idp, 3)?;
    let mut session = ctx
        .create(ctx.request(IDENTITY_MODE, 2, idps, Vec::new()))
        .await?;
    ctx.respond(
        &mut session,
        &idps[0],
        Answer::Accept,
        StatusExpectation::new(Status::Confirmed),
    )
    .await?;
    ctx.respond(
        &mut session,
        &idps[1],
        Answer::Accept,
        StatusExpectation::new(Status::Completed).closed(),
    )
    .await?;
    ctx.late_answer(&session, &idps[2], Answer::Error(ERROR_CODE))
        .await?;
    ctx.finish(session).await
}
