//! Topic router: namespace mapping, subscription bookkeeping, alias/name
//! state and presence capability flags
//!
//! The router owns no I/O. The client actor asks it which wire topics to
//! subscribe or publish and how to classify each inbound delivery.

use crate::protocol::{ControlMessage, TopicBuilder};
use bytes::Bytes;

/// Ordered set of wire topics, replayed after every reconnect
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionSet {
    topics: Vec<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `topic` unless already tracked. Returns true if it was added.
    pub fn insert(&mut self, topic: impl Into<String>) -> bool {
        let topic = topic.into();
        if self.contains(&topic) {
            return false;
        }
        self.topics.push(topic);
        true
    }

    /// Remove `topic`. Returns false if it was not tracked.
    pub fn remove(&mut self, topic: &str) -> bool {
        match self.topics.iter().position(|t| t == topic) {
            Some(index) => {
                self.topics.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.iter().any(|t| t == topic)
    }

    /// Topics in the order they were first subscribed
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}

/// Classification of one inbound delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Consumed internally, never surfaced as a message
    Control(ControlMessage),
    /// Application message; `topic` is in public form when inside the namespace
    Public { topic: String, payload: Bytes },
}

/// Per-client topic state
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    appid: String,
    subscriptions: SubscriptionSet,
    alias: Option<String>,
    name: Option<String>,
    track_presence: bool,
    track_absence: bool,
}

impl TopicRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_presence(mut self, presence: bool, absence: bool) -> Self {
        self.track_presence = presence;
        self.track_absence = absence;
        self
    }

    pub fn set_appid(&mut self, appid: impl Into<String>) {
        self.appid = appid.into();
    }

    pub fn appid(&self) -> &str {
        &self.appid
    }

    /// Wire topic for a public topic
    pub fn wire(&self, topic: &str) -> String {
        TopicBuilder::namespaced(&self.appid, topic)
    }

    pub fn subscriptions(&self) -> &SubscriptionSet {
        &self.subscriptions
    }

    /// Record an accepted subscription; returns its wire topic
    pub fn track(&mut self, topic: &str) -> String {
        let wire = self.wire(topic);
        self.subscriptions.insert(wire.clone());
        wire
    }

    /// Forget a subscription; returns false when it was not tracked
    pub fn untrack(&mut self, topic: &str) -> bool {
        let wire = self.wire(topic);
        self.subscriptions.remove(&wire)
    }

    pub fn is_tracked(&self, topic: &str) -> bool {
        self.subscriptions.contains(&self.wire(topic))
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn set_alias(&mut self, alias: Option<String>) {
        self.alias = alias;
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    /// Returns true if presence tracking was newly enabled
    pub fn enable_presence(&mut self) -> bool {
        !std::mem::replace(&mut self.track_presence, true)
    }

    /// Returns true if absence tracking was newly enabled
    pub fn enable_absence(&mut self) -> bool {
        !std::mem::replace(&mut self.track_absence, true)
    }

    /// Wire topics of the enabled presence channels
    pub fn presence_topics(&self) -> Vec<String> {
        let mut topics = Vec::new();
        if self.track_presence {
            topics.push(self.wire(&TopicBuilder::present()));
        }
        if self.track_absence {
            topics.push(self.wire(&TopicBuilder::absent()));
        }
        topics
    }

    /// Everything to subscribe after a (re)connect, in replay order
    pub fn replay_topics(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(str::to_string)
            .chain(self.presence_topics())
            .collect()
    }

    /// Classify an inbound delivery by its wire topic
    pub fn route_inbound(&self, wire_topic: &str, payload: Bytes) -> Inbound {
        let public = TopicBuilder::strip_namespace(&self.appid, wire_topic);
        let path = public.unwrap_or(wire_topic);

        if TopicBuilder::is_control(path) {
            if let Some(control) = ControlMessage::parse(path, &payload) {
                return Inbound::Control(control);
            }
        }

        Inbound::Public {
            topic: path.to_string(),
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn router() -> TopicRouter {
        let mut router = TopicRouter::new();
        router.set_appid("demo");
        router
    }

    #[test]
    fn test_track_ignores_duplicates() {
        let mut router = router();
        router.track("/a");
        router.track("/b");
        router.track("/a");

        let topics: Vec<&str> = router.subscriptions().iter().collect();
        assert_eq!(topics, vec!["/demo/a", "/demo/b"]);
    }

    #[test]
    fn test_untrack_unknown_topic_is_noop() {
        let mut router = router();
        router.track("/a");
        router.track("/b");

        assert!(!router.untrack("/zzz"));
        let topics: Vec<&str> = router.subscriptions().iter().collect();
        assert_eq!(topics, vec!["/demo/a", "/demo/b"]);

        assert!(router.untrack("/a"));
        assert_eq!(router.subscriptions().len(), 1);
    }

    #[test]
    fn test_replay_includes_enabled_presence_topics() {
        let mut router = router();
        router.track("/a");
        assert_eq!(router.replay_topics(), vec!["/demo/a"]);

        assert!(router.enable_absence());
        assert!(!router.enable_absence());
        assert_eq!(router.replay_topics(), vec!["/demo/a", "/demo/&absent"]);
    }

    #[test]
    fn test_route_public_message_in_public_form() {
        let inbound = router().route_inbound("/demo/room/temp", Bytes::from_static(b"21"));
        assert_eq!(
            inbound,
            Inbound::Public {
                topic: "/room/temp".to_string(),
                payload: Bytes::from_static(b"21"),
            }
        );
    }

    #[test]
    fn test_route_presence_control() {
        let inbound =
            router().route_inbound("/demo/&present", Bytes::from_static(br#"{"status":"online"}"#));
        assert_eq!(
            inbound,
            Inbound::Control(ControlMessage::Present(json!({"status": "online"})))
        );
    }

    #[test]
    fn test_route_client_control_outside_namespace() {
        let inbound = router().route_inbound("/&id/tok/resetendpoint", Bytes::new());
        assert_eq!(inbound, Inbound::Control(ControlMessage::ResetEndpoint));
    }

    #[test]
    fn test_foreign_topic_passes_through() {
        let inbound = router().route_inbound("/other/x", Bytes::from_static(b"1"));
        assert!(matches!(inbound, Inbound::Public { topic, .. } if topic == "/other/x"));
    }

    proptest! {
        #[test]
        fn subscription_set_never_holds_duplicates(ops in proptest::collection::vec((any::<bool>(), 0u8..5), 0..40)) {
            let mut set = SubscriptionSet::new();
            for (insert, id) in ops {
                let topic = format!("/t{id}");
                if insert { set.insert(topic); } else { set.remove(&topic); }
                let mut seen: Vec<&str> = set.iter().collect();
                let total = seen.len();
                seen.sort_unstable();
                seen.dedup();
                prop_assert_eq!(seen.len(), total);
            }
        }
    }
}
