//! Runs in which the RP closes a request.

use super::{Context, Session};
use crate::{config::Role, control::ControlPlane, Error};
use idex_observer::{
    expected::Registry,
    lifecycle::{Answer, Status},
    read::ReadApi,
    verifier::StatusExpectation,
};

pub const CLOSE_PENDING: &str = "close_pending";

/// The RP closes a request nobody answered; closing again and answering are both refused.
pub(super) async fn close_pending<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idps = ctx.require(CLOSE_PENDING, Role::Idp, 1)?;
    let mut session = ctx.create(ctx.request(1, 1, idps, Vec::new())).await?;
    ctx.close(&mut session, StatusExpectation::new(Status::Pending).closed())
        .await?;
    ctx.late_close(&session).await?;
    ctx.late_answer(&session, &idps[0], Answer::Accept).await?;
    ctx.finish(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, mocks::Engine};
    use idex_macros::test_traced;
    use idex_observer::broker::Router;

    #[test_traced]
    async fn test_close_pending() {
        let config: Config = serde_yaml::from_str(
            r#"
callback: 127.0.0.1:8090
actors:
  - {node_id: rp1, role: rp, api: "http://127.0.0.1:8200"}
  - {node_id: idp1, role: idp, api: "http://127.0.0.1:8100"}
"#,
        )
        .unwrap();
        let brokers = Router::new(["rp1", "idp1"]);
        let engine = Engine::start(brokers.clone(), 5);
        let ctx = Context::new(brokers, engine, &config).unwrap();

        let session = close_pending(&ctx).await.unwrap();
        let model = session.verifier().model();
        assert_eq!(model.status(), Status::Pending);
        assert!(model.closed());
        assert!(model.responses().is_empty());
    }
}
