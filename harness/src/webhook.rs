//! Receive webhook callbacks and route them to each actor's broker.
//!
//! Every node is configured to deliver its callbacks to `POST /callback/{actor}`. The body is
//! decoded into an [Envelope] and dispatched to the actor's [Broker](idex_observer::broker::Broker).

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use idex_observer::{broker::Router, wire::Envelope};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, warn};

/// Errors returned to a node delivering a callback.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unknown actor: {0}")]
    UnknownActor(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl DeliveryError {
    /// Returns the HTTP status code for this error.
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownActor(_) => StatusCode::NOT_FOUND,
            Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// The callback receiver for every actor known to `brokers`.
pub fn router(brokers: Router) -> axum::Router {
    axum::Router::new()
        .route("/callback/{actor}", post(callback))
        .with_state(brokers)
}

/// Serve callbacks on `listener` until the server fails.
pub async fn serve(listener: TcpListener, brokers: Router) -> Result<(), crate::Error> {
    axum::serve(listener, router(brokers)).await?;
    Ok(())
}

async fn callback(
    State(brokers): State<Router>,
    Path(actor): Path<String>,
    body: Bytes,
) -> Result<StatusCode, DeliveryError> {
    let broker = brokers
        .broker(&actor)
        .map_err(|_| DeliveryError::UnknownActor(actor.clone()))?;
    let envelope = Envelope::from_json(&body).map_err(|err| {
        warn!(actor, ?err, "undecodable callback");
        DeliveryError::InvalidPayload(err.to_string())
    })?;
    if envelope.node_id != actor {
        warn!(actor, node_id = %envelope.node_id, "callback addressed to a different node");
    }
    let kind = envelope.kind();
    let resolved = broker.dispatch(envelope);
    debug!(actor, %kind, resolved, "delivered callback");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use idex_macros::test_traced;
    use idex_observer::wire::Kind;

    #[test_traced]
    async fn test_callback_routing() {
        let brokers = Router::new(["rp1", "idp1"]);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, brokers.clone()));
        let client = reqwest::Client::new();

        // Delivered to a waiting expectation
        let expectation = brokers
            .broker("rp1")
            .unwrap()
            .expect(Kind::CreateRequestResult, "ref-1");
        let response = client
            .post(format!("http://{address}/callback/rp1"))
            .body(
                r#"{"node_id":"rp1","type":"create_request_result","reference_id":"ref-1",
                "request_id":"req-1","success":true,"creation_block_height":"chain:4"}"#,
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        let envelope = expectation.await.unwrap();
        assert_eq!(envelope.request_id(), Some("req-1"));

        // Unknown actor
        let response = client
            .post(format!("http://{address}/callback/as9"))
            .body(r#"{"node_id":"as9","type":"error"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        // Undecodable body
        let response = client
            .post(format!("http://{address}/callback/idp1"))
            .body("not json")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        // Unknown types are accepted (and journaled)
        let response = client
            .post(format!("http://{address}/callback/idp1"))
            .body(r#"{"node_id":"idp1","type":"message_queue_send_success","request_id":"req-1"}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);
        assert_eq!(brokers.teardown(), 0);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DeliveryError::UnknownActor("as9".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            DeliveryError::InvalidPayload("eof".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }
}
