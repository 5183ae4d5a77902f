use std::fmt::{Display, Formatter};
use rustc_hash::FxHashMap;
use tracing::trace;

/// How a request addresses its service: by name (resolved through the directory) or by the
///  numeric id in its key.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum ServiceTarget {
    Name(String),
    Id(u16),
}
impl Display for ServiceTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceTarget::Name(name) => write!(f, "'{}'", name),
            ServiceTarget::Id(id) => write!(f, "#{}", id),
        }
    }
}

/// Requests that can not be sent yet because their service is unknown, down or unable to serve
///  them. They are released as a whole when the service is added or updated.
#[derive(Debug, Default)]
pub struct PendingRequestIndex {
    by_name: FxHashMap<String, Vec<i32>>,
    by_id: FxHashMap<u16, Vec<i32>>,
}

impl PendingRequestIndex {
    /// Adding a request that is already present has no effect.
    pub fn insert(&mut self, target: &ServiceTarget, request_id: i32) {
        let list = match target {
            ServiceTarget::Name(name) => self.by_name.entry(name.clone()).or_default(),
            ServiceTarget::Id(id) => self.by_id.entry(*id).or_default(),
        };
        if !list.contains(&request_id) {
            trace!("parking request {} for service {}", request_id, target);
            list.push(request_id);
        }
    }

    pub fn remove(&mut self, target: &ServiceTarget, request_id: i32) -> bool {
        fn remove_from<K: Eq + std::hash::Hash>(map: &mut FxHashMap<K, Vec<i32>>, key: &K, request_id: i32) -> bool {
            let Some(list) = map.get_mut(key) else {
                return false;
            };
            let Some(idx) = list.iter().position(|&r| r == request_id) else {
                return false;
            };
            list.remove(idx);
            if list.is_empty() {
                map.remove(key);
            }
            true
        }

        match target {
            ServiceTarget::Name(name) => remove_from(&mut self.by_name, name, request_id),
            ServiceTarget::Id(id) => remove_from(&mut self.by_id, id, request_id),
        }
    }

    pub fn contains(&self, target: &ServiceTarget, request_id: i32) -> bool {
        let list = match target {
            ServiceTarget::Name(name) => self.by_name.get(name),
            ServiceTarget::Id(id) => self.by_id.get(id),
        };
        list.map(|l| l.contains(&request_id)).unwrap_or(false)
    }

    /// Removes and returns all requests waiting for the service, those addressing it by id first.
    pub fn take_for_service(&mut self, service_id: u16, service_name: &str) -> Vec<i32> {
        let mut result = self.by_id.remove(&service_id).unwrap_or_default();
        result.extend(self.by_name.remove(service_name).unwrap_or_default());
        result
    }

    pub fn len(&self) -> usize {
        self.by_name.values().map(|l| l.len()).sum::<usize>()
            + self.by_id.values().map(|l| l.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty() && self.by_id.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = PendingRequestIndex::default();
        index.insert(&ServiceTarget::Name("ELEKTRON".to_string()), 3);
        index.insert(&ServiceTarget::Name("ELEKTRON".to_string()), 3);
        index.insert(&ServiceTarget::Id(7), 3);

        assert_eq!(index.len(), 2);
        assert!(index.contains(&ServiceTarget::Name("ELEKTRON".to_string()), 3));
        assert!(index.contains(&ServiceTarget::Id(7), 3));
        assert!(!index.contains(&ServiceTarget::Id(8), 3));
    }

    #[test]
    fn test_take_for_service() {
        let mut index = PendingRequestIndex::default();
        index.insert(&ServiceTarget::Name("ELEKTRON".to_string()), 3);
        index.insert(&ServiceTarget::Id(7), 4);
        index.insert(&ServiceTarget::Name("ELEKTRON".to_string()), 5);
        index.insert(&ServiceTarget::Name("OTHER".to_string()), 6);
        index.insert(&ServiceTarget::Id(8), 9);

        assert_eq!(index.take_for_service(7, "ELEKTRON"), vec![4, 3, 5]);
        assert_eq!(index.len(), 2);
        assert!(index.take_for_service(7, "ELEKTRON").is_empty());
    }

    #[test]
    fn test_remove() {
        let mut index = PendingRequestIndex::default();
        index.insert(&ServiceTarget::Id(7), 4);
        index.insert(&ServiceTarget::Id(7), 5);

        assert!(index.remove(&ServiceTarget::Id(7), 4));
        assert!(!index.remove(&ServiceTarget::Id(7), 4));
        assert!(!index.remove(&ServiceTarget::Name("x".to_string()), 5));
        assert!(index.remove(&ServiceTarget::Id(7), 5));
        assert!(index.is_empty());
    }
}
