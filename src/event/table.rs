//! Event Table
//!
//! Scan-wide registry of distributed events. Parent links are stored as
//! [`EventId`]s and resolved here, so a child never keeps its parent alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use super::model::{Event, EventId};

/// Concurrent id → event lookup.
///
/// Entries live until the scan is dropped: any later event may name one as
/// its source, so nothing is evicted while the scan runs.
#[derive(Debug, Default)]
pub struct EventTable {
    events: DashMap<EventId, Arc<Event>>,
    next_id: AtomicU64,
}

impl EventTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next event id
    pub fn next_id(&self) -> EventId {
        EventId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn insert(&self, event: Arc<Event>) {
        self.events.insert(event.id(), event);
    }

    pub fn get(&self, id: EventId) -> Option<Arc<Event>> {
        self.events.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Resolve the parent of `event`, if it was registered
    pub fn source_of(&self, event: &Event) -> Option<Arc<Event>> {
        event.source().and_then(|id| self.get(id))
    }

    /// Type of the parent event, if known
    pub fn source_type(&self, event: &Event) -> Option<String> {
        event
            .source()
            .and_then(|id| self.events.get(&id).map(|e| e.event_type().to_string()))
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.events.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::types;

    #[test]
    fn test_parent_lookup_by_id() {
        let table = EventTable::new();
        let root = Arc::new(Event::new(table.next_id(), types::SCAN, "scan", None));
        table.insert(Arc::clone(&root));

        let child = Event::new(table.next_id(), types::IP_RANGE, "10.0.0.0/24", Some(&root));
        assert_eq!(table.source_of(&child).map(|e| e.id()), Some(root.id()));
        assert_eq!(table.source_type(&child).as_deref(), Some(types::SCAN));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_ancestors_stay_resolvable() {
        let table = EventTable::new();
        let root = Arc::new(Event::new(table.next_id(), types::SCAN, "scan", None));
        table.insert(Arc::clone(&root));

        let mut parent = Arc::clone(&root);
        for i in 0..100 {
            let child = Arc::new(Event::new(table.next_id(), types::DNS_NAME, format!("h{i}.example.com"), Some(&parent)));
            table.insert(Arc::clone(&child));
            parent = child;
        }
        drop(parent);

        assert_eq!(table.len(), 101);
        assert!(table.get(root.id()).is_some());
    }

    #[test]
    fn test_ids_are_unique_and_increasing() {
        let table = EventTable::new();
        let first = table.next_id();
        let second = table.next_id();
        assert!(second > first);
    }

    #[test]
    fn test_unregistered_parent_is_none() {
        let table = EventTable::new();
        let orphan_parent = Event::new(EventId::new(100), types::SCAN, "scan", None);
        let child = Event::new(table.next_id(), types::DNS_NAME, "example.com", Some(&orphan_parent));
        assert!(table.source_of(&child).is_none());
        assert!(!table.contains(orphan_parent.id()));
    }
}
