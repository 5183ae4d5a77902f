use crate::message::msg_key::{DomainType, MsgKey};
use crate::message::qos::Qos;

/// Requests with equal aggregation keys can share a physical stream. The key's service id is
///  always the numeric id, even if the request addressed the service by name, so that requests
///  for the same service by name and by id aggregate.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct AggregationKey {
    pub key: MsgKey,
    pub domain: DomainType,
    /// `None` for domains that are not QoS-negotiated (i.e. dictionary)
    pub qos: Option<Qos>,
}

impl AggregationKey {
    pub fn new(key: &MsgKey, service_id: u16, domain: DomainType, qos: Option<Qos>) -> AggregationKey {
        AggregationKey {
            key: key.clone().with_service_id(service_id),
            domain,
            qos,
        }
    }
}
