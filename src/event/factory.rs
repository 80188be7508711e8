//! Event Factory
//!
//! Modules never construct events directly. They describe the event they want
//! with an [`EventRequest`] and the scan's [`EventFactory`] validates the data,
//! infers a missing type and seeds the scope distance from the source.

use std::net::IpAddr;
use std::sync::OnceLock;

use log::error;

use regex::{Regex, RegexBuilder};

use super::error::{ValidationError, ValidationResult};
use super::model::{types, Event, EventId};
use crate::net;

/// Description of an event a module wants to raise
#[derive(Debug, Clone, Default)]
pub struct EventRequest {
    pub data: String,
    /// Requested type; inferred from the data when `None`
    pub event_type: Option<String>,
    pub tags: Vec<String>,
    /// Return validation failures to the caller instead of logging them
    pub raise_error: bool,
}

impl EventRequest {
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Shorthand for a request with an explicit type
    pub fn typed(data: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self::new(data).with_type(event_type)
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn raise_error(mut self) -> Self {
        self.raise_error = true;
        self
    }
}

/// Collaborator responsible for event validation and construction
pub trait EventFactory: Send + Sync {
    /// Build an event with identity `id`, caused by `source`
    fn make_event(&self, id: EventId, request: &EventRequest, source: &Event) -> ValidationResult<Event>;
}

/// Regex and `std::net` based validation of the common event types.
///
/// Unknown types are accepted as long as they carry data.
pub struct DefaultEventFactory {
    /// `None` if the built-in patterns failed to compile; pattern-checked
    /// types are then rejected
    patterns: Option<&'static Patterns>,
}

impl Default for DefaultEventFactory {
    fn default() -> Self {
        Self::new()
    }
}

// ASCII classes only: Unicode `\w` under case folding blows past the regex
// size limit with these repeat counts
const WORD: &str = "A-Za-z0-9_";
const IPV6_PATTERN: &str = r"[A-F0-9:]*:[A-F0-9:]*:[A-F0-9:]*";

fn dns_name_pattern() -> String {
    format!(r"(?:(?:[{WORD}-]+)\.)+(?:[A-Za-z]{{2,20}})")
}

fn email_pattern() -> String {
    format!(r"(?:[A-Za-z0-9][{WORD}\-\.\+]{{0,100}})@(?:[{WORD}][{WORD}\-\.]{{0,100}})\.(?:[A-Za-z]{{2,8}})")
}

fn host_pattern() -> String {
    format!(r"((?:[{WORD}]|[{WORD}][{WORD}\-]*[{WORD}])[\.]?)+(?:[{WORD}][{WORD}\-]*[{WORD}]|[{WORD}])")
}

/// Compiled validation patterns, shared by every factory
struct Patterns {
    dns_name: Regex,
    email: Regex,
    open_tcp_port: Vec<Regex>,
    url: Vec<Regex>,
}

static PATTERNS: OnceLock<Result<Patterns, regex::Error>> = OnceLock::new();

impl Patterns {
    fn compile() -> Result<Self, regex::Error> {
        let url_patterns = [
            format!(r"^https?://{}(?::[0-9]{{1,5}})?.*$", host_pattern()),
            format!(r"^https?://\[{}\](?::[0-9]{{1,5}})?.*$", IPV6_PATTERN),
        ];
        let port_patterns = [
            format!(r"^{}:[0-9]{{1,5}}$", host_pattern()),
            format!(r"^\[{}\]:[0-9]{{1,5}}$", IPV6_PATTERN),
        ];
        Ok(Self {
            dns_name: Self::build(&format!("^{}$", dns_name_pattern()))?,
            email: Self::build(&format!("^{}$", email_pattern()))?,
            open_tcp_port: port_patterns.iter().map(|p| Self::build(p)).collect::<Result<_, _>>()?,
            url: url_patterns.iter().map(|p| Self::build(p)).collect::<Result<_, _>>()?,
        })
    }

    fn build(pattern: &str) -> Result<Regex, regex::Error> {
        RegexBuilder::new(pattern).case_insensitive(true).build()
    }
}

impl DefaultEventFactory {
    pub fn new() -> Self {
        let patterns = match PATTERNS.get_or_init(Patterns::compile) {
            Ok(patterns) => Some(patterns),
            Err(e) => {
                error!("Built-in event patterns failed to compile: {}", e);
                None
            }
        };
        Self { patterns }
    }

    fn is_dns_name(&self, data: &str) -> bool {
        self.patterns.is_some_and(|p| p.dns_name.is_match(data))
    }

    fn is_email(&self, data: &str) -> bool {
        self.patterns.is_some_and(|p| p.email.is_match(data))
    }

    fn is_open_tcp_port(&self, data: &str) -> bool {
        self.patterns.is_some_and(|p| p.open_tcp_port.iter().any(|r| r.is_match(data)))
    }

    fn is_url(&self, data: &str) -> bool {
        self.patterns.is_some_and(|p| p.url.iter().any(|r| r.is_match(data)))
    }

    /// Infer the type of raw data, in order of specificity
    pub fn infer_type(&self, data: &str) -> Option<&'static str> {
        let data = data.trim().trim_end_matches('.');
        if data.parse::<IpAddr>().is_ok() {
            return Some(types::IP_ADDRESS);
        }
        if data.contains('/') && net::parse_network(data).is_ok() {
            return Some(types::IP_RANGE);
        }
        if self.is_url(data) {
            return Some(types::URL);
        }
        if self.is_email(data) {
            return Some(types::EMAIL_ADDRESS);
        }
        if self.is_open_tcp_port(data) {
            return Some("OPEN_TCP_PORT");
        }
        if self.is_dns_name(data) {
            return Some(types::DNS_NAME);
        }
        None
    }

    /// Validate `data` against `event_type` and return its normalized form
    pub fn normalize(&self, event_type: &str, data: &str) -> ValidationResult<String> {
        let data = data.trim();
        if data.is_empty() {
            return Err(ValidationError::EmptyData {
                event_type: event_type.to_string(),
            });
        }
        let invalid = || ValidationError::invalid_data(event_type, data);
        match event_type {
            types::IP_ADDRESS => data
                .parse::<IpAddr>()
                .map(|ip| ip.to_string())
                .map_err(|_| invalid()),
            types::IP_RANGE => net::parse_network(data)
                .map(|network| network.to_string())
                .map_err(|_| invalid()),
            types::DNS_NAME => {
                let name = data.trim_end_matches('.').to_lowercase();
                if self.is_dns_name(&name) {
                    Ok(name)
                } else {
                    Err(invalid())
                }
            }
            types::EMAIL_ADDRESS => {
                if self.is_email(data) {
                    Ok(data.to_lowercase())
                } else {
                    Err(invalid())
                }
            }
            types::URL => {
                if self.is_url(data) {
                    Ok(data.to_string())
                } else {
                    Err(invalid())
                }
            }
            _ => Ok(data.to_string()),
        }
    }
}

impl EventFactory for DefaultEventFactory {
    fn make_event(&self, id: EventId, request: &EventRequest, source: &Event) -> ValidationResult<Event> {
        let event_type = match &request.event_type {
            Some(event_type) => event_type.clone(),
            None => self
                .infer_type(&request.data)
                .ok_or_else(|| ValidationError::UnknownType {
                    data: request.data.clone(),
                })?
                .to_string(),
        };
        if event_type == types::FINISHED || event_type == types::SCAN {
            return Err(ValidationError::ReservedType { event_type });
        }
        let data = self.normalize(&event_type, &request.data)?;
        let event = Event::new(id, event_type, data, Some(source));
        for tag in &request.tags {
            event.add_tag(tag.clone());
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Event {
        let event = Event::new(EventId::new(0), types::SCAN, "scan", None);
        event.mark_resolved();
        event
    }

    #[test]
    fn test_builtin_patterns_compile() {
        assert!(Patterns::compile().is_ok());
        assert!(DefaultEventFactory::new().patterns.is_some());
    }

    #[test]
    fn test_email_inference() {
        let factory = DefaultEventFactory::new();
        assert_eq!(factory.infer_type("Bob.Smith+scan@mail.example.co"), Some(types::EMAIL_ADDRESS));
        assert_eq!(factory.infer_type("@example.com"), None);

        let request = EventRequest::new("Admin@Example.COM");
        let event = factory.make_event(EventId::new(1), &request, &root()).unwrap();
        assert_eq!(event.event_type(), types::EMAIL_ADDRESS);
        assert_eq!(event.data(), "admin@example.com");
    }

    #[test]
    fn test_type_inference() {
        let factory = DefaultEventFactory::new();
        assert_eq!(factory.infer_type("1.2.3.4"), Some(types::IP_ADDRESS));
        assert_eq!(factory.infer_type("dead::beef"), Some(types::IP_ADDRESS));
        assert_eq!(factory.infer_type("10.0.0.0/8"), Some(types::IP_RANGE));
        assert_eq!(factory.infer_type("https://www.example.com/login"), Some(types::URL));
        assert_eq!(factory.infer_type("admin@example.com"), Some(types::EMAIL_ADDRESS));
        assert_eq!(factory.infer_type("www.example.com:443"), Some("OPEN_TCP_PORT"));
        assert_eq!(factory.infer_type("www.Example.com"), Some(types::DNS_NAME));
        assert_eq!(factory.infer_type("not a host"), None);
    }

    #[test]
    fn test_make_event_normalizes_and_seeds_distance() {
        let factory = DefaultEventFactory::new();
        let root = root();
        let request = EventRequest::new("WWW.Example.COM.").with_tag("target");
        let event = factory.make_event(EventId::new(1), &request, &root).unwrap();
        assert_eq!(event.event_type(), types::DNS_NAME);
        assert_eq!(event.data(), "www.example.com");
        assert_eq!(event.scope_distance(), 1);
        assert!(event.has_tag("target"));
    }

    #[test]
    fn test_make_event_rejects_invalid_data() {
        let factory = DefaultEventFactory::new();
        let root = root();

        let request = EventRequest::typed("999.1.1.1", types::IP_ADDRESS);
        let error = factory.make_event(EventId::new(1), &request, &root).unwrap_err();
        assert_eq!(error, ValidationError::invalid_data(types::IP_ADDRESS, "999.1.1.1"));

        let request = EventRequest::typed("   ", "FINDING");
        assert!(matches!(
            factory.make_event(EventId::new(2), &request, &root),
            Err(ValidationError::EmptyData { .. })
        ));

        let request = EventRequest::typed("x", types::FINISHED);
        assert!(matches!(
            factory.make_event(EventId::new(3), &request, &root),
            Err(ValidationError::ReservedType { .. })
        ));
    }

    #[test]
    fn test_custom_types_pass_through() {
        let factory = DefaultEventFactory::new();
        let root = root();
        let request = EventRequest::typed("country: NZ", "GEOLOCATION");
        let event = factory.make_event(EventId::new(1), &request, &root).unwrap();
        assert_eq!(event.event_type(), "GEOLOCATION");
        assert_eq!(event.data(), "country: NZ");
    }
}
