use crate::{wire::DataRequestDescriptor, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A service requested by the create action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub service_id: String,
    #[serde(default)]
    pub as_id_list: Vec<String>,
    pub min_as: u32,
    /// Opaque parameters forwarded to the AS. Never echoed to IdPs.
    #[serde(default)]
    pub request_params: String,
}

impl ServiceRequest {
    /// The shape the protocol echoes back for this service.
    pub fn descriptor(&self) -> DataRequestDescriptor {
        DataRequestDescriptor {
            service_id: self.service_id.clone(),
            as_id_list: self.as_id_list.clone(),
            min_as: self.min_as,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Tracked {
    descriptor: DataRequestDescriptor,
    request_params: String,
    signed: BTreeSet<String>,
    received: BTreeSet<String>,
}

/// Expected data request descriptors and per-AS progress for one request.
///
/// Orchestrators call [ExpectedServices::mark_signed] and [ExpectedServices::mark_received] as AS
/// actions complete; the verifier compares the reported counters against these.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExpectedServices {
    services: Vec<Tracked>,
}

impl ExpectedServices {
    /// Derive expectations from the requested services.
    pub fn new(requests: &[ServiceRequest]) -> Self {
        let services = requests
            .iter()
            .map(|request| Tracked {
                descriptor: request.descriptor(),
                request_params: request.request_params.clone(),
                signed: BTreeSet::new(),
                received: BTreeSet::new(),
            })
            .collect();
        Self { services }
    }

    /// The canonical descriptors, in request order.
    pub fn descriptors(&self) -> Vec<DataRequestDescriptor> {
        self.services.iter().map(|s| s.descriptor.clone()).collect()
    }

    /// Record that `as_id` signed its answer for `service_id`.
    pub fn mark_signed(&mut self, service_id: &str, as_id: &str) -> Result<(), Error> {
        let tracked = self.tracked_mut(service_id, as_id)?;
        if !tracked.signed.insert(as_id.to_string()) {
            return Err(Error::Counter {
                service_id: service_id.to_string(),
                as_id: as_id.to_string(),
                reason: "already signed",
            });
        }
        Ok(())
    }

    /// Record that the data of `as_id` for `service_id` reached the RP.
    pub fn mark_received(&mut self, service_id: &str, as_id: &str) -> Result<(), Error> {
        let tracked = self.tracked_mut(service_id, as_id)?;
        if !tracked.signed.contains(as_id) {
            return Err(Error::Counter {
                service_id: service_id.to_string(),
                as_id: as_id.to_string(),
                reason: "received before signed",
            });
        }
        if !tracked.received.insert(as_id.to_string()) {
            return Err(Error::Counter {
                service_id: service_id.to_string(),
                as_id: as_id.to_string(),
                reason: "already received",
            });
        }
        Ok(())
    }

    /// The parameters an AS is expected to receive for `service_id`.
    pub fn request_params(&self, service_id: &str) -> Option<&str> {
        self.tracked(service_id).map(|t| t.request_params.as_str())
    }

    /// Expected `(signed_data_count, received_data_count)` for `service_id`.
    pub fn counts(&self, service_id: &str) -> Option<(u32, u32)> {
        self.tracked(service_id)
            .map(|t| (t.signed.len() as u32, t.received.len() as u32))
    }

    /// Returns whether `as_id` is expected to have signed for `service_id`.
    pub fn is_signed(&self, service_id: &str, as_id: &str) -> bool {
        self.tracked(service_id)
            .is_some_and(|t| t.signed.contains(as_id))
    }

    /// Returns whether the data of `as_id` is expected to have reached the RP for `service_id`.
    pub fn is_received(&self, service_id: &str, as_id: &str) -> bool {
        self.tracked(service_id)
            .is_some_and(|t| t.received.contains(as_id))
    }

    /// Returns whether every service is expected to have received `min_as` answers.
    pub fn satisfied(&self) -> bool {
        self.services
            .iter()
            .all(|t| t.received.len() as u32 >= t.descriptor.min_as)
    }

    fn tracked(&self, service_id: &str) -> Option<&Tracked> {
        self.services
            .iter()
            .find(|t| t.descriptor.service_id == service_id)
    }

    fn tracked_mut(&mut self, service_id: &str, as_id: &str) -> Result<&mut Tracked, Error> {
        let tracked = self
            .services
            .iter_mut()
            .find(|t| t.descriptor.service_id == service_id)
            .ok_or_else(|| Error::UnknownService(service_id.to_string()))?;

        // An empty list lets any AS answer
        let as_id_list = &tracked.descriptor.as_id_list;
        if !as_id_list.is_empty() && !as_id_list.iter().any(|a| a == as_id) {
            return Err(Error::UnknownAccessor {
                service_id: service_id.to_string(),
                as_id: as_id.to_string(),
            });
        }
        Ok(tracked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn services() -> ExpectedServices {
        ExpectedServices::new(&[
            ServiceRequest {
                service_id: "bank_statement".into(),
                as_id_list: vec!["as1".into(), "as2".into()],
                min_as: 1,
                request_params: "{\"format\":\"pdf\"}".into(),
            },
            ServiceRequest {
                service_id: "customer_info".into(),
                as_id_list: Vec::new(),
                min_as: 1,
                request_params: String::new(),
            },
        ])
    }

    #[test]
    fn test_descriptors_strip_params() {
        let descriptors = services().descriptors();
        assert_eq!(
            descriptors,
            vec![
                DataRequestDescriptor {
                    service_id: "bank_statement".into(),
                    as_id_list: vec!["as1".into(), "as2".into()],
                    min_as: 1,
                },
                DataRequestDescriptor {
                    service_id: "customer_info".into(),
                    as_id_list: Vec::new(),
                    min_as: 1,
                },
            ]
        );
    }

    #[test]
    fn test_counters() {
        let mut services = services();
        assert_eq!(services.counts("bank_statement"), Some((0, 0)));
        assert_eq!(
            services.request_params("bank_statement"),
            Some("{\"format\":\"pdf\"}")
        );
        assert_eq!(services.counts("unknown"), None);
        assert!(!services.satisfied());

        services.mark_signed("bank_statement", "as1").unwrap();
        assert_eq!(services.counts("bank_statement"), Some((1, 0)));
        assert!(services.is_signed("bank_statement", "as1"));
        assert!(!services.is_received("bank_statement", "as1"));

        services.mark_received("bank_statement", "as1").unwrap();
        assert_eq!(services.counts("bank_statement"), Some((1, 1)));

        // Any AS may answer an open service
        services.mark_signed("customer_info", "as7").unwrap();
        services.mark_received("customer_info", "as7").unwrap();
        assert!(services.satisfied());
    }

    #[test]
    fn test_counter_violations() {
        let mut services = services();
        assert!(matches!(
            services.mark_signed("unknown", "as1"),
            Err(Error::UnknownService(s)) if s == "unknown"
        ));
        assert!(matches!(
            services.mark_signed("bank_statement", "as3"),
            Err(Error::UnknownAccessor { .. })
        ));
        assert!(matches!(
            services.mark_received("bank_statement", "as1"),
            Err(Error::Counter { reason: "received before signed", .. })
        ));
        services.mark_signed("bank_statement", "as1").unwrap();
        assert!(matches!(
            services.mark_signed("bank_statement", "as1"),
            Err(Error::Counter { reason: "already signed", .. })
        ));
        services.mark_received("bank_statement", "as1").unwrap();
        assert!(matches!(
            services.mark_received("bank_statement", "as1"),
            Err(Error::Counter { reason: "already received", .. })
        ));
        assert_eq!(services.counts("bank_statement"), Some((1, 1)));
    }
}
