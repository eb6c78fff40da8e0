use super::{Broker, Metrics};
use crate::{wire::Envelope, Error};
use prometheus_client::registry::Registry;
use std::{collections::BTreeMap, sync::Arc};
use tracing::warn;

/// The brokers of every actor taking part in one test run.
///
/// A [Router] is created when a run starts and handed to whatever feeds it (a webhook server, a
/// simulated node). Scenarios obtain brokers from it and call [Router::teardown] once they finish
/// so registrations never outlive the scenario that made them.
#[derive(Clone)]
pub struct Router {
    brokers: Arc<BTreeMap<String, Broker>>,
}

impl Router {
    /// Create a [Router] for `actors` with unregistered metrics.
    pub fn new<I, S>(actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let brokers = actors
            .into_iter()
            .map(|actor| {
                let actor = actor.into();
                (actor.clone(), Broker::new(actor))
            })
            .collect();
        Self {
            brokers: Arc::new(brokers),
        }
    }

    /// Create a [Router] for `actors`, registering each broker's metrics on `registry`.
    pub fn with_registry<I, S>(actors: I, registry: &mut Registry) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let brokers = actors
            .into_iter()
            .map(|actor| {
                let actor = actor.into();
                let metrics = Metrics::init(registry, &actor);
                (actor.clone(), Broker::with_metrics(actor, metrics))
            })
            .collect();
        Self {
            brokers: Arc::new(brokers),
        }
    }

    /// The broker receiving `actor`'s notifications.
    pub fn broker(&self, actor: &str) -> Result<Broker, Error> {
        self.brokers
            .get(actor)
            .cloned()
            .ok_or_else(|| Error::UnknownActor(actor.to_string()))
    }

    /// All actors known to this router.
    pub fn actors(&self) -> impl Iterator<Item = &str> {
        self.brokers.keys().map(String::as_str)
    }

    /// Deliver `envelope` to `actor`'s broker, returning the number of registrations resolved.
    pub fn dispatch(&self, actor: &str, envelope: Envelope) -> Result<usize, Error> {
        let broker = self
            .brokers
            .get(actor)
            .ok_or_else(|| Error::UnknownActor(actor.to_string()))?;
        if envelope.node_id != actor {
            warn!(
                actor,
                node_id = %envelope.node_id,
                kind = %envelope.kind(),
                "envelope addressed to a different node"
            );
        }
        Ok(broker.dispatch(envelope))
    }

    /// Release every registration held by every broker, returning the number released.
    pub fn teardown(&self) -> usize {
        self.brokers.values().map(Broker::teardown).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{ActionResult, Kind, Payload};

    fn response_result(node_id: &str, reference_id: &str) -> Envelope {
        Envelope::new(
            node_id,
            Payload::ResponseResult(ActionResult {
                reference_id: reference_id.into(),
                request_id: Some("req-1".into()),
                success: true,
                creation_block_height: None,
                error: None,
            }),
        )
    }

    #[test]
    fn test_dispatch_by_actor() {
        let router = Router::new(["rp1", "idp1", "idp2"]);
        assert_eq!(router.actors().collect::<Vec<_>>(), vec!["idp1", "idp2", "rp1"]);

        // Same reference at two IdPs is routed independently
        let idp1 = router.broker("idp1").unwrap();
        let idp2 = router.broker("idp2").unwrap();
        let _first = idp1.expect(Kind::ResponseResult, "ref-1");
        let _second = idp2.expect(Kind::ResponseResult, "ref-1");
        assert_eq!(
            router
                .dispatch("idp1", response_result("idp1", "ref-1"))
                .unwrap(),
            1
        );
        assert_eq!(idp1.pending(), 0);
        assert_eq!(idp2.pending(), 1);

        // Unknown actor
        assert!(matches!(
            router.dispatch("as9", response_result("as9", "ref-1")),
            Err(Error::UnknownActor(actor)) if actor == "as9"
        ));
        assert!(matches!(router.broker("as9"), Err(Error::UnknownActor(_))));
    }

    #[test]
    fn test_mismatched_node_still_delivered() {
        let router = Router::new(["idp1"]);
        let broker = router.broker("idp1").unwrap();
        let _expectation = broker.expect(Kind::ResponseResult, "ref-1");
        assert_eq!(
            router
                .dispatch("idp1", response_result("idp2", "ref-1"))
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_teardown_all() {
        let router = Router::new(["rp1", "idp1"]);
        let _a = router.broker("rp1").unwrap().expect(Kind::RequestStatus, "req-1");
        let _b = router
            .broker("idp1")
            .unwrap()
            .expect(Kind::IncomingRequest, "req-1");
        assert_eq!(router.teardown(), 2);
        assert_eq!(router.teardown(), 0);
    }
}
