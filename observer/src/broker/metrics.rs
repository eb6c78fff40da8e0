use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};
use std::borrow::Cow;

/// Metrics for a [super::Broker].
#[derive(Clone, Default)]
pub struct Metrics {
    /// Registrations awaiting a matching envelope.
    pub pending: Gauge,
    /// Envelopes handed to the broker.
    pub dispatched: Counter,
    /// Registrations resolved by an envelope.
    pub resolved: Counter,
    /// Envelopes that resolved no registration.
    pub dropped: Counter,
    /// Registrations released before resolving (dropped or torn down).
    pub canceled: Counter,
}

impl Metrics {
    /// Create and register metrics for `actor`.
    pub fn init(registry: &mut Registry, actor: &str) -> Self {
        let metrics = Self::default();
        let registry =
            registry.sub_registry_with_label((Cow::Borrowed("actor"), Cow::Owned(actor.into())));
        registry.register(
            "pending",
            "registrations awaiting a matching envelope",
            metrics.pending.clone(),
        );
        registry.register(
            "dispatched",
            "envelopes handed to the broker",
            metrics.dispatched.clone(),
        );
        registry.register(
            "resolved",
            "registrations resolved by an envelope",
            metrics.resolved.clone(),
        );
        registry.register(
            "dropped",
            "envelopes that resolved no registration",
            metrics.dropped.clone(),
        );
        registry.register(
            "canceled",
            "registrations released before resolving",
            metrics.canceled.clone(),
        );
        metrics
    }
}
