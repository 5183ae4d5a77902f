use bytes::Bytes;

/// Identifies the kind of data on a stream. The well-known values are associated constants, but
///  any other value is a legal (custom) domain.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DomainType(pub u8);

impl DomainType {
    pub const LOGIN: DomainType = DomainType(1);
    pub const SOURCE: DomainType = DomainType(4);
    pub const DICTIONARY: DomainType = DomainType(5);
    pub const MARKET_PRICE: DomainType = DomainType(6);
    pub const MARKET_BY_ORDER: DomainType = DomainType(7);
    pub const MARKET_BY_PRICE: DomainType = DomainType(8);
    pub const SYMBOL_LIST: DomainType = DomainType(10);

    /// Login, directory and dictionary streams are session infrastructure rather than item data.
    pub fn is_administrative(&self) -> bool {
        matches!(*self, DomainType::LOGIN | DomainType::SOURCE | DomainType::DICTIONARY)
    }
}

/// The key identifying an item within a domain. Every part is optional on the wire, and two keys
///  are the same item iff all parts are equal.
#[derive(Debug, Clone, Default, Eq, PartialEq, Hash)]
pub struct MsgKey {
    pub name: Option<Bytes>,
    pub name_type: Option<u8>,
    pub service_id: Option<u16>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
    pub attrib: Option<Bytes>,
}

impl MsgKey {
    pub fn for_name(name: &str) -> MsgKey {
        MsgKey {
            name: Some(Bytes::copy_from_slice(name.as_bytes())),
            ..Default::default()
        }
    }

    pub fn with_service_id(mut self, service_id: u16) -> MsgKey {
        self.service_id = Some(service_id);
        self
    }

    pub fn with_filter(mut self, filter: u32) -> MsgKey {
        self.filter = Some(filter);
        self
    }

    pub fn name_lossy(&self) -> String {
        self.name.as_ref()
            .map(|n| String::from_utf8_lossy(n).into_owned())
            .unwrap_or_default()
    }
}
