//! HTTP client for the control-plane and read APIs of each node.

use crate::{
    config::{Config, Role},
    control::{CloseRequest, ControlPlane, CreateRequest, Created, Respond, SendData},
};
use idex_observer::{
    expected::{Identity, Registry},
    lifecycle::Answer,
    read::{ReadApi, RequestDetail},
    wire::ErrorBody,
    Error,
};
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::{collections::HashMap, time::Duration};
use tracing::debug;

/// Timeout applied to every control-plane call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Deserialize)]
struct Rejection {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct IdpNode {
    node_id: String,
}

/// An action body sent as `node_id`, asking for its outcome at `callback_url`.
#[derive(Serialize)]
struct Addressed<'a, B> {
    node_id: &'a str,
    callback_url: String,
    #[serde(flatten)]
    body: &'a B,
}

/// Issues actions against each actor's API and reads request state through the RP's API.
pub struct HttpClient {
    client: Client,
    apis: HashMap<String, String>,
    callback: String,
    reader: String,
}

impl HttpClient {
    /// Create a client for the actors in `config`, asking nodes to deliver callbacks under
    /// `callback` (the externally reachable base URL of the webhook receiver).
    pub fn new(config: &Config, callback: impl Into<String>) -> Result<Self, crate::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let apis = config
            .actors
            .iter()
            .map(|actor| (actor.node_id.clone(), actor.api.trim_end_matches('/').to_string()))
            .collect();
        let reader = config
            .node_ids(Role::Rp)
            .into_iter()
            .next()
            .ok_or_else(|| crate::Error::InvalidConfig("no rp actor".into()))?;
        Ok(Self {
            client,
            apis,
            callback: callback.into().trim_end_matches('/').to_string(),
            reader,
        })
    }

    fn api(&self, actor: &str) -> Result<&str, Error> {
        self.apis
            .get(actor)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownActor(actor.to_string()))
    }

    fn callback_url(&self, actor: &str) -> String {
        format!("{}/callback/{actor}", self.callback)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        actor: &str,
        path: &str,
        body: &B,
    ) -> Result<Response, Error> {
        let url = format!("{}{path}", self.api(actor)?);
        debug!(actor, %url, "posting action");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        accepted(response).await
    }

    async fn get<T: DeserializeOwned>(&self, actor: &str, path: &str) -> Result<T, Error> {
        let url = format!("{}{path}", self.api(actor)?);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| Error::Transport(err.to_string()))?;
        accepted(response)
            .await?
            .json()
            .await
            .map_err(|err| Error::Read(err.to_string()))
    }
}

/// Map a non-2xx response to [Error::Rejected].
async fn accepted(response: Response) -> Result<Response, Error> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .map_err(|err| Error::Transport(err.to_string()))?;
    let (code, message) = match serde_json::from_str::<Rejection>(&body) {
        Ok(rejection) => (rejection.error.code, rejection.error.message),
        Err(_) => (0, body),
    };
    Err(Error::Rejected {
        status: status.as_u16(),
        code,
        message,
    })
}

impl ControlPlane for HttpClient {
    async fn create_request(&self, actor: &str, request: &CreateRequest) -> Result<Created, Error> {
        let path = match (&request.namespace, &request.identifier) {
            (Some(namespace), Some(identifier)) => {
                format!("/rp/requests/{namespace}/{identifier}")
            }
            _ => "/rp/requests".to_string(),
        };
        let body = Addressed {
            node_id: actor,
            callback_url: self.callback_url(actor),
            body: request,
        };
        self.post(actor, &path, &body)
            .await?
            .json()
            .await
            .map_err(|err| Error::Transport(err.to_string()))
    }

    async fn respond(&self, actor: &str, response: &Respond) -> Result<(), Error> {
        let callback_url = self.callback_url(actor);
        let (path, body) = match response.answer {
            Answer::Error(code) => (
                "/idp/error_response",
                json!({
                    "node_id": actor,
                    "reference_id": response.reference_id,
                    "callback_url": callback_url,
                    "request_id": response.request_id,
                    "error_code": code,
                }),
            ),
            answer => {
                let status = if answer == Answer::Accept {
                    "accept"
                } else {
                    "reject"
                };
                (
                    "/idp/response",
                    json!({
                        "node_id": actor,
                        "reference_id": response.reference_id,
                        "callback_url": callback_url,
                        "request_id": response.request_id,
                        "ial": response.ial,
                        "aal": response.aal,
                        "status": status,
                    }),
                )
            }
        };
        self.post(actor, path, &body).await?;
        Ok(())
    }

    async fn send_data(&self, actor: &str, data: &SendData) -> Result<(), Error> {
        let path = format!("/as/data/{}/{}", data.request_id, data.service_id);
        let body = json!({
            "node_id": actor,
            "reference_id": data.reference_id,
            "callback_url": self.callback_url(actor),
            "data": data.data,
        });
        self.post(actor, &path, &body).await?;
        Ok(())
    }

    async fn close_request(&self, actor: &str, close: &CloseRequest) -> Result<(), Error> {
        let body = json!({
            "node_id": actor,
            "reference_id": close.reference_id,
            "callback_url": self.callback_url(actor),
            "request_id": close.request_id,
        });
        self.post(actor, "/rp/requests/close", &body).await?;
        Ok(())
    }
}

impl ReadApi for HttpClient {
    async fn request(&self, request_id: &str) -> Result<RequestDetail, Error> {
        self.get(&self.reader, &format!("/utility/requests/{request_id}"))
            .await
    }
}

impl Registry for HttpClient {
    async fn idps(
        &self,
        identity: &Identity,
        min_ial: f64,
        min_aal: f64,
    ) -> Result<Vec<String>, Error> {
        let path = format!(
            "/utility/idp/{}/{}?min_ial={min_ial}&min_aal={min_aal}",
            identity.namespace, identity.identifier
        );
        let nodes: Vec<IdpNode> = self.get(&self.reader, &path).await?;
        Ok(nodes.into_iter().map(|node| node.node_id).collect())
    }
}
