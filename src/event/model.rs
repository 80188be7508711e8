//! Scan Event
//!
//! An event is a typed, timestamped fact discovered during a scan. Identity,
//! type, data and attribution are fixed at construction; scope distance, tags
//! and the resolution signal change while the event moves through the engine.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Well-known event types
pub mod types {
    /// End-of-stream marker delivered to every module
    pub const FINISHED: &str = "FINISHED";
    /// Root event of a scan
    pub const SCAN: &str = "SCAN";
    pub const IP_ADDRESS: &str = "IP_ADDRESS";
    pub const IP_RANGE: &str = "IP_RANGE";
    pub const DNS_NAME: &str = "DNS_NAME";
    pub const URL: &str = "URL";
    pub const EMAIL_ADDRESS: &str = "EMAIL_ADDRESS";

    /// Wildcard accepted in `watched_events`
    pub const ANY: &str = "*";
}

/// Tag carried by events seeded from the scan targets
pub const TARGET_TAG: &str = "target";

/// Default priority of events raised by modules
pub const DEFAULT_PRIORITY: u8 = 3;

/// Identifier of an event within its scan's [`EventTable`](super::EventTable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(u64);

impl EventId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A discovered fact flowing between modules.
///
/// The parent link is an [`EventId`], never an owning reference. Use the scan's
/// event table to resolve it.
#[derive(Debug)]
pub struct Event {
    id: EventId,
    event_type: String,
    data: String,
    source: Option<EventId>,
    module: Option<String>,
    module_priority: u8,
    timestamp: DateTime<Utc>,
    scope_distance: AtomicI32,
    tags: RwLock<BTreeSet<String>>,
    resolved: watch::Sender<bool>,
}

impl Event {
    /// Create an event caused by `source`.
    ///
    /// The scope distance is seeded as one hop beyond the source; it is
    /// finalized once the source resolves.
    pub fn new(
        id: EventId,
        event_type: impl Into<String>,
        data: impl Into<String>,
        source: Option<&Event>,
    ) -> Self {
        let scope_distance = source
            .map(|s| s.scope_distance().saturating_add(1))
            .unwrap_or(0);
        let (resolved, _) = watch::channel(false);
        Self {
            id,
            event_type: event_type.into(),
            data: data.into(),
            source: source.map(|s| s.id),
            module: None,
            module_priority: DEFAULT_PRIORITY,
            timestamp: Utc::now(),
            scope_distance: AtomicI32::new(scope_distance),
            tags: RwLock::new(BTreeSet::new()),
            resolved,
        }
    }

    /// Create the synthetic end-of-stream event
    pub fn finished(id: EventId, source: &Event) -> Self {
        let event = Self::new(id, types::FINISHED, types::FINISHED, Some(source));
        event.set_scope_distance(0);
        event.mark_resolved();
        event
    }

    /// Attribute the event to a module
    pub fn with_module(mut self, module: impl Into<String>, priority: u8) -> Self {
        self.module = Some(module.into());
        self.module_priority = priority;
        self
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        self.add_tag(tag);
        self
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn source(&self) -> Option<EventId> {
        self.source
    }

    pub fn module(&self) -> Option<&str> {
        self.module.as_deref()
    }

    pub fn set_module(&mut self, module: impl Into<String>) {
        self.module = Some(module.into());
    }

    pub fn module_priority(&self) -> u8 {
        self.module_priority
    }

    pub fn set_module_priority(&mut self, priority: u8) {
        self.module_priority = priority;
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_finished(&self) -> bool {
        self.event_type == types::FINISHED
    }

    pub fn scope_distance(&self) -> i32 {
        self.scope_distance.load(Ordering::Acquire)
    }

    pub fn set_scope_distance(&self, distance: i32) {
        self.scope_distance.store(distance, Ordering::Release);
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.read().contains(tag)
    }

    pub fn add_tag(&self, tag: impl Into<String>) {
        self.tags.write().insert(tag.into());
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.read().iter().cloned().collect()
    }

    /// Key used for duplicate detection
    pub fn dedupe_key(&self) -> String {
        format!("{}:{}", self.event_type, self.data)
    }

    /// Whether the scope distance has stabilized
    pub fn is_resolved(&self) -> bool {
        *self.resolved.borrow()
    }

    /// Fire the resolution signal. Idempotent.
    pub fn mark_resolved(&self) {
        self.resolved.send_replace(true);
    }

    /// Wait up to `timeout` for the resolution signal.
    ///
    /// Returns `true` if the event is resolved.
    pub async fn wait_resolved(&self, timeout: Duration) -> bool {
        let mut receiver = self.resolved.subscribe();
        let outcome = tokio::time::timeout(timeout, receiver.wait_for(|resolved| *resolved)).await;
        matches!(outcome, Ok(Ok(_)))
    }

    /// Host portion of the event data, if it has one
    pub fn host(&self) -> Option<String> {
        match self.event_type.as_str() {
            types::IP_ADDRESS | types::IP_RANGE | types::DNS_NAME => Some(self.data.clone()),
            types::EMAIL_ADDRESS => self
                .data
                .rsplit_once('@')
                .map(|(_, host)| host.to_lowercase()),
            types::URL => host_from_url(&self.data),
            _ => None,
        }
    }

    /// Serializable snapshot for output and status reporting
    pub fn record(&self) -> EventRecord {
        EventRecord {
            id: self.id,
            event_type: self.event_type.clone(),
            data: self.data.clone(),
            scope_distance: self.scope_distance(),
            source: self.source,
            module: self.module.clone(),
            tags: self.tags(),
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = if self.data.len() > 80 {
            let mut end = 77;
            while !self.data.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...", &self.data[..end])
        } else {
            self.data.clone()
        };
        write!(
            f,
            "{}(\"{}\", module={}, scope_distance={})",
            self.event_type,
            data,
            self.module.as_deref().unwrap_or("-"),
            self.scope_distance()
        )
    }
}

/// Extract the host from a URL without a full URL parser
fn host_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if let Some(stripped) = authority.strip_prefix('[') {
        stripped.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// Serializable view of an [`Event`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: String,
    pub scope_distance: i32,
    pub source: Option<EventId>,
    pub module: Option<String>,
    pub tags: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Event {
        let event = Event::new(EventId::new(0), types::SCAN, "test-scan", None);
        event.mark_resolved();
        event
    }

    #[test]
    fn test_child_scope_distance_is_seeded_from_source() {
        let root = root();
        let child = Event::new(EventId::new(1), types::DNS_NAME, "example.com", Some(&root));
        assert_eq!(child.scope_distance(), 1);
        assert_eq!(child.source(), Some(root.id()));

        let grandchild = Event::new(EventId::new(2), types::IP_ADDRESS, "1.2.3.4", Some(&child));
        assert_eq!(grandchild.scope_distance(), 2);
    }

    #[test]
    fn test_finished_event_is_resolved() {
        let root = root();
        let finished = Event::finished(EventId::new(9), &root);
        assert!(finished.is_finished());
        assert!(finished.is_resolved());
        assert_eq!(finished.scope_distance(), 0);
    }

    #[test]
    fn test_event_host_extraction() {
        let root = root();
        let url = Event::new(EventId::new(1), types::URL, "https://user@WWW.Example.com:8443/path?q=1", Some(&root));
        assert_eq!(url.host().as_deref(), Some("www.example.com"));

        let ipv6 = Event::new(EventId::new(2), types::URL, "http://[::1]:80/", Some(&root));
        assert_eq!(ipv6.host().as_deref(), Some("::1"));

        let email = Event::new(EventId::new(3), types::EMAIL_ADDRESS, "bob@Example.com", Some(&root));
        assert_eq!(email.host().as_deref(), Some("example.com"));

        let finding = Event::new(EventId::new(4), "FINDING", "something", Some(&root));
        assert_eq!(finding.host(), None);
    }

    #[test]
    fn test_tags_and_dedupe_key() {
        let root = root();
        let event = Event::new(EventId::new(1), types::DNS_NAME, "example.com", Some(&root))
            .with_tag(TARGET_TAG);
        assert!(event.has_tag(TARGET_TAG));
        assert!(!event.has_tag("other"));
        assert_eq!(event.dedupe_key(), "DNS_NAME:example.com");
    }

    #[tokio::test]
    async fn test_wait_resolved_times_out_until_marked() {
        let root = root();
        let child = Event::new(EventId::new(1), types::DNS_NAME, "example.com", Some(&root));
        assert!(!child.wait_resolved(Duration::from_millis(10)).await);
        child.mark_resolved();
        assert!(child.wait_resolved(Duration::from_millis(10)).await);
        // marking twice is harmless
        child.mark_resolved();
        assert!(child.is_resolved());
    }

    #[test]
    fn test_display_truncates_long_data() {
        let root = root();
        let long = "a".repeat(200);
        let event = Event::new(EventId::new(1), "FINDING", long, Some(&root));
        let shown = event.to_string();
        assert!(shown.starts_with("FINDING(\""));
        assert!(shown.contains("..."));
        assert!(shown.len() < 150);
    }
}
