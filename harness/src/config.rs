//! Harness configuration.
//!
//! ```yaml
//! callback: 0.0.0.0:8090
//! callback_url: http://harness:8090
//! metrics: 0.0.0.0:9090
//! log_level: info
//! step_timeout_ms: 15000
//! actors:
//!   - node_id: rp1
//!     role: rp
//!     api: http://localhost:8200
//!   - node_id: idp1
//!     role: idp
//!     api: http://localhost:8100
//!   - node_id: as1
//!     role: as
//!     api: http://localhost:8300
//! fixture:
//!   namespace: citizen_id
//!   identifier: "1234567890123"
//!   services:
//!     - service_id: bank_statement
//!       as_id_list: [as1]
//!       min_as: 1
//!       request_params: '{"format":"pdf"}'
//! ```

use crate::Error;
use idex_observer::expected::{Identity, ServiceRequest};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt, fs::File, net::SocketAddr, path::Path, time::Duration};
use tracing::Level;

/// The part an actor plays in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Requesting Party.
    Rp,
    /// Identity Provider.
    Idp,
    /// Accessor Service.
    As,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Rp => "rp",
            Role::Idp => "idp",
            Role::As => "as",
        })
    }
}

/// A node taking part in scenarios.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub node_id: String,
    pub role: Role,
    /// Base URL of the node's control-plane API.
    pub api: String,
}

/// Inputs shared by every scenario.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub namespace: String,
    pub identifier: String,
    #[serde(default = "default_request_message")]
    pub request_message: String,
    #[serde(default = "default_min_ial")]
    pub min_ial: f64,
    #[serde(default = "default_min_aal")]
    pub min_aal: f64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// Mode used when data is requested (2 or 3).
    #[serde(default = "default_data_mode")]
    pub data_mode: u8,
    #[serde(default)]
    pub services: Vec<ServiceRequest>,
}

fn default_request_message() -> String {
    "Do you consent to share your identity with the requester?".into()
}

fn default_min_ial() -> f64 {
    1.1
}

fn default_min_aal() -> f64 {
    1.0
}

fn default_request_timeout() -> u64 {
    86_400
}

fn default_data_mode() -> u8 {
    2
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            namespace: "citizen_id".into(),
            identifier: "1234567890123".into(),
            request_message: default_request_message(),
            min_ial: default_min_ial(),
            min_aal: default_min_aal(),
            request_timeout: default_request_timeout(),
            data_mode: default_data_mode(),
            services: Vec::new(),
        }
    }
}

impl Fixture {
    /// The identity requests are made about.
    pub fn identity(&self) -> Identity {
        Identity {
            namespace: self.namespace.clone(),
            identifier: self.identifier.clone(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_step_timeout_ms() -> u64 {
    15_000
}

/// Configuration of one harness run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the webhook receiver listens on.
    pub callback: SocketAddr,
    /// Base URL nodes deliver callbacks to (`http://{callback}` if omitted).
    #[serde(default)]
    pub callback_url: Option<String>,
    /// Address the metrics endpoint listens on (disabled if omitted).
    #[serde(default)]
    pub metrics: Option<SocketAddr>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// How long a scenario step waits for a notification.
    #[serde(default = "default_step_timeout_ms")]
    pub step_timeout_ms: u64,
    pub actors: Vec<Actor>,
    #[serde(default)]
    pub fixture: Fixture,
}

impl Config {
    /// Load and validate a [Config] from a YAML file.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let config: Config = {
            let config_file = File::open(path)?;
            serde_yaml::from_reader(config_file)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Ensure the actor table and log level are usable.
    pub fn validate(&self) -> Result<(), Error> {
        self.level()?;
        if let Some(url) = &self.callback_url {
            ensure_http("callback", url)?;
        }
        let mut seen = HashSet::new();
        for actor in &self.actors {
            ensure_http(&actor.node_id, &actor.api)?;
            if !seen.insert(actor.node_id.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate node_id: {}",
                    actor.node_id
                )));
            }
        }
        if self.node_ids(Role::Rp).is_empty() {
            return Err(Error::InvalidConfig("no rp actor".into()));
        }
        Ok(())
    }

    /// The configured log level.
    pub fn level(&self) -> Result<Level, Error> {
        self.log_level
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid log level: {}", self.log_level)))
    }

    /// How long a scenario step waits for a notification.
    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    /// Node ids of every actor playing `role`, in configuration order.
    pub fn node_ids(&self, role: Role) -> Vec<String> {
        self.actors
            .iter()
            .filter(|actor| actor.role == role)
            .map(|actor| actor.node_id.clone())
            .collect()
    }

    /// The base URL nodes deliver callbacks to.
    pub fn callback_url(&self) -> String {
        self.callback_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.callback))
    }

    /// The actor with `node_id`.
    pub fn actor(&self, node_id: &str) -> Option<&Actor> {
        self.actors.iter().find(|actor| actor.node_id == node_id)
    }
}

fn ensure_http(actor: &str, url: &str) -> Result<(), Error> {
    if url.starts_with("http://") || url.starts_with("https://") {
        return Ok(());
    }
    Err(Error::InvalidUrl {
        actor: actor.to_string(),
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONFIG: &str = r#"
callback: 127.0.0.1:8090
step_timeout_ms: 500
actors:
  - node_id: rp1
    role: rp
    api: http://localhost:8200
  - node_id: idp1
    role: idp
    api: http://localhost:8100
  - node_id: idp2
    role: idp
    api: http://localhost:8101
  - node_id: as1
    role: as
    api: http://localhost:8300
fixture:
  namespace: citizen_id
  identifier: "1234"
  services:
    - service_id: bank_statement
      as_id_list: [as1]
      min_as: 1
"#;

    #[test]
    fn test_parse() {
        let config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.validate().unwrap();
        assert_eq!(config.metrics, None);
        assert_eq!(config.level().unwrap(), Level::INFO);
        assert_eq!(config.step_timeout(), Duration::from_millis(500));
        assert_eq!(config.node_ids(Role::Idp), vec!["idp1", "idp2"]);
        assert_eq!(config.node_ids(Role::As), vec!["as1"]);
        assert_eq!(config.actor("rp1").unwrap().api, "http://localhost:8200");
        assert_eq!(config.callback_url(), "http://127.0.0.1:8090");

        // Fixture defaults
        let fixture = &config.fixture;
        assert_eq!(fixture.data_mode, 2);
        assert_eq!(fixture.min_ial, 1.1);
        assert_eq!(fixture.services[0].request_params, "");
        assert_eq!(fixture.identity().identifier, "1234");
    }

    #[test]
    fn test_load() {
        let path = std::env::temp_dir().join(format!("idex-config-{}.yaml", std::process::id()));
        File::create(&path)
            .unwrap()
            .write_all(CONFIG.as_bytes())
            .unwrap();
        let config = Config::load(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(config.actors.len(), 4);
        assert!(matches!(Config::load(&path), Err(Error::Io(_))));
    }

    #[test]
    fn test_invalid() {
        let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.log_level = "loud".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.actors[1].node_id = "rp1".into();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.actors.retain(|actor| actor.role != Role::Rp);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));

        let mut config: Config = serde_yaml::from_str(CONFIG).unwrap();
        config.actors[2].api = "localhost:8101".into();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidUrl { actor, .. }) if actor == "idp2"
        ));

        // Unknown role
        let invalid = CONFIG.replace("role: as", "role: bank");
        assert!(serde_yaml::from_str::<Config>(&invalid).is_err());
    }
}
