//! Component E: [`EndpointRouter`] — maps a configurable key inside each
//! incoming message to a named destination, holding at most one message in
//! flight while the destination is resolved (spec.md §4.E).

use std::collections::HashSet;

use crate::value::Message;

const DEFAULT_ENDPOINT_KEY: &str = "endpoint";

/// The default endpoint's name in the routing table: empty, per spec.md
/// §3 ("the empty-named endpoint is the default endpoint... never visible
/// in the name table").
pub const DEFAULT_ENDPOINT: &str = "";

/// Routes messages to named endpoints based on a configurable key, holding
/// at most one undelivered object at a time (spec.md §4.E). A destination
/// named by the key but not registered on this Connection falls back to
/// the default endpoint rather than being dropped.
pub struct EndpointRouter {
    endpoint_key: String,
    known: HashSet<String>,
    /// Single-slot handoff: `(current_destination, pending_object)`.
    pending: Option<(String, Message)>,
}

impl Default for EndpointRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRouter {
    pub fn new() -> Self {
        EndpointRouter { endpoint_key: DEFAULT_ENDPOINT_KEY.to_owned(), known: HashSet::new(), pending: None }
    }

    pub fn set_endpoint_key(&mut self, key: impl Into<String>) {
        self.endpoint_key = key.into();
    }

    pub fn endpoint_key(&self) -> &str {
        &self.endpoint_key
    }

    pub fn register(&mut self, name: impl Into<String>) {
        self.known.insert(name.into());
    }

    pub fn unregister(&mut self, name: &str) {
        self.known.remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        name == DEFAULT_ENDPOINT || self.known.contains(name)
    }

    /// Resolve `message`'s destination via the configured key (falling back
    /// to the default endpoint when the key is absent, non-string, or names
    /// an unregistered endpoint), fill the single slot, and return the
    /// resolved destination so the caller can notify it exactly once.
    ///
    /// Only call this when the slot is empty; spec.md §4.E reads one object
    /// from Stream "while the slot is empty."
    pub fn fill(&mut self, message: Message) -> String {
        let destination = message
            .get(&self.endpoint_key)
            .and_then(|v| v.as_str())
            .filter(|name| self.known.contains(*name))
            .unwrap_or(DEFAULT_ENDPOINT)
            .to_owned();
        self.pending = Some((destination.clone(), message));
        destination
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_destination(&self) -> Option<&str> {
        self.pending.as_ref().map(|(dest, _)| dest.as_str())
    }

    /// True if the slot holds a message for `endpoint` (spec.md §4.E
    /// `message_available(endpoint)`, minus the "pull from Stream" half,
    /// which is the caller's responsibility — see [`crate::connection::Connection`]).
    pub fn message_available(&self, endpoint: &str) -> bool {
        matches!(&self.pending, Some((dest, _)) if dest == endpoint)
    }

    /// Return and clear the slot iff it holds a message for `endpoint`.
    pub fn take_if(&mut self, endpoint: &str) -> Option<Message> {
        match &self.pending {
            Some((dest, _)) if dest == endpoint => self.pending.take().map(|(_, msg)| msg),
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> Message {
        match v {
            serde_json::Value::Object(m) => m,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn routes_to_registered_destination() {
        let mut router = EndpointRouter::new();
        router.register("chat");
        let dest = router.fill(obj(json!({"endpoint": "chat", "text": "hi"})));
        assert_eq!(dest, "chat");
        assert!(router.has_pending());
        let routed = router.take_if("chat").expect("routed message");
        assert_eq!(routed.get("text").unwrap(), "hi");
        assert!(!router.has_pending());
    }

    #[test]
    fn unknown_destination_falls_back_to_default() {
        let mut router = EndpointRouter::new();
        router.register("chat");
        let dest = router.fill(obj(json!({"endpoint": "metrics"})));
        assert_eq!(dest, DEFAULT_ENDPOINT);
        assert!(router.take_if(DEFAULT_ENDPOINT).is_some());
    }

    #[test]
    fn missing_key_falls_back_to_default() {
        let mut router = EndpointRouter::new();
        router.register("chat");
        let dest = router.fill(obj(json!({"text": "hi"})));
        assert_eq!(dest, DEFAULT_ENDPOINT);
    }

    #[test]
    fn custom_endpoint_key_is_honored() {
        let mut router = EndpointRouter::new();
        router.set_endpoint_key("dest");
        router.register("chat");
        let dest = router.fill(obj(json!({"dest": "chat"})));
        assert_eq!(dest, "chat");
        assert!(router.take_if("chat").is_some());
    }

    #[test]
    fn take_if_wrong_name_leaves_pending() {
        let mut router = EndpointRouter::new();
        router.register("chat");
        router.fill(obj(json!({"endpoint": "chat"})));
        assert!(router.take_if("other").is_none());
        assert!(router.has_pending());
    }
}
