//! Runs in which an AS delivers data.

use super::{Context, Session};
use crate::{config::Role, control::ControlPlane, Error};
use idex_observer::{
    expected::Registry,
    lifecycle::{Answer, Status},
    read::ReadApi,
    verifier::StatusExpectation,
};

pub const DATA_EXCHANGE: &str = "data_exchange";

/// One IdP accepts, the AS is asked for data, signs it, and the RP receives it.
///
/// The request is confirmed after the answer, stays confirmed once the data is signed, and
/// completes when the RP receives the data.
pub(super) async fn data_exchange<C>(ctx: &Context<C>) -> Result<Session, Error>
where
    C: ControlPlane + ReadApi + Registry,
{
    let idp = ctx.require(DATA_EXCHANGE, Role::Idp, 1)?[0].clone();
    let service = ctx.service(DATA_EXCHANGE)?;
    let as_id = service.as_id_list[0].clone();
    let mut session = ctx
        .create(ctx.request(
            ctx.fixture.data_mode,
            1,
            &[idp.clone()],
            vec![service.clone()],
        ))
        .await?;

    // Data is requested once the IdP accepts
    let requested = ctx.expect_data_request(&session, &as_id)?;
    ctx.respond(
        &mut session,
        &idp,
        Answer::Accept,
        StatusExpectation::new(Status::Confirmed),
    )
    .await?;
    ctx.data_request(&mut session, &as_id, requested).await?;

    ctx.send_data(
        &mut session,
        &as_id,
        &service.service_id,
        StatusExpectation::new(Status::Confirmed),
        StatusExpectation::new(Status::Completed).closed(),
    )
    .await?;
    ctx.finish(session).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, mocks::Engine};
    use idex_macros::test_traced;
    use idex_observer::broker::Router;

    const CONFIG: &str = r#"
callback: 127.0.0.1:8090
step_timeout_ms: 1000
actors:
  - {node_id: rp1, role: rp, api: "http://127.0.0.1:8200"}
  - {node_id: idp1, role: idp, api: "http://127.0.0.1:8100"}
  - {node_id: as1, role: as, api: "http://127.0.0.1:8300"}
  - {node_id: as2, role: as, api: "http://127.0.0.1:8301"}
fixture:
  namespace: citizen_id
  identifier: "1234"
  services:
    - service_id: bank_statement
      as_id_list: [as2]
      min_as: 1
      request_params: '{"format":"pdf"}'
"#;

    #[test_traced]
    async fn test_data_exchange_completes() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        let brokers = Router::new(["rp1", "idp1", "as1", "as2"]);
        let engine = Engine::start(brokers.clone(), 3);
        let ctx = Context::new(brokers, engine, &config).unwrap();

        let session = data_exchange(&ctx).await.unwrap();
        let model = session.verifier().model();
        assert_eq!(model.status(), Status::Completed);
        assert!(model.services_satisfied());

        // Only the listed AS took part
        assert_eq!(session.participants, vec!["rp1", "idp1", "as2"]);
        assert!(session.verifier().floor("as1").is_none());
        let detail = ctx.control().request(session.request_id()).await.unwrap();
        assert_eq!(detail.data_request_list[0].received_data_count(), 1);
    }
}
