//! Topic construction for the application namespace
//!
//! Public topics such as `/room/temp` live on the wire as `/{appid}/room/temp`.
//! The mapping is textual and reversed by stripping the `/{appid}` prefix.

/// Reserved prefix of control topics
pub const CONTROL_PREFIX: &str = "/&";

/// Topic construction functions
pub struct TopicBuilder;

impl TopicBuilder {
    /// Wire topic for a public topic: `/{appid}{topic}`
    pub fn namespaced(appid: &str, topic: &str) -> String {
        format!("/{appid}{topic}")
    }

    /// Public form of a wire topic, or `None` if it is outside the namespace
    pub fn strip_namespace<'a>(appid: &str, wire_topic: &'a str) -> Option<&'a str> {
        let rest = wire_topic.strip_prefix('/')?.strip_prefix(appid)?;
        (rest.is_empty() || rest.starts_with('/')).then_some(rest)
    }

    /// Topic a gear subscribes to in order to receive messages addressed to `name`
    pub fn gearname(name: &str) -> String {
        format!("/gearname/{name}")
    }

    /// Announces a new alias for this gear
    pub fn set_alias(alias: &str) -> String {
        format!("/@setalias/{alias}")
    }

    pub fn readstream(stream: &str) -> String {
        format!("/@readstream/{stream}")
    }

    pub fn writestream(stream: &str) -> String {
        format!("/@writestream/{stream}")
    }

    pub fn readpostbox(box_name: &str) -> String {
        format!("/@readpostbox/{box_name}")
    }

    pub fn writepostbox(box_name: &str) -> String {
        format!("/@writepostbox/{box_name}")
    }

    /// `/&present`
    pub fn present() -> String {
        format!("{CONTROL_PREFIX}present")
    }

    /// `/&absent`
    pub fn absent() -> String {
        format!("{CONTROL_PREFIX}absent")
    }

    /// Per-client control channel, subscribed outside the application namespace
    pub fn client_control(client_id: &str) -> String {
        format!("{CONTROL_PREFIX}id/{client_id}/#")
    }

    pub fn is_control(topic: &str) -> bool {
        topic.starts_with(CONTROL_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn namespacing_is_reversible(appid in "[a-zA-Z0-9]{1,12}", path in "(/[a-z0-9@&]{1,8}){0,4}") {
            let wire = TopicBuilder::namespaced(&appid, &path);
            prop_assert_eq!(TopicBuilder::strip_namespace(&appid, &wire), Some(path.as_str()));
        }
    }

    #[test]
    fn test_namespaced_topics() {
        assert_eq!(TopicBuilder::namespaced("demo", "/room/temp"), "/demo/room/temp");
        assert_eq!(
            TopicBuilder::namespaced("demo", &TopicBuilder::gearname("peer")),
            "/demo/gearname/peer"
        );
        assert_eq!(
            TopicBuilder::namespaced("demo", &TopicBuilder::present()),
            "/demo/&present"
        );
    }

    #[test]
    fn test_strip_namespace_requires_segment_boundary() {
        assert_eq!(
            TopicBuilder::strip_namespace("demo", "/demo/room"),
            Some("/room")
        );
        assert_eq!(TopicBuilder::strip_namespace("demo", "/demo2/room"), None);
        assert_eq!(TopicBuilder::strip_namespace("demo", "/other/room"), None);
        assert_eq!(TopicBuilder::strip_namespace("demo", "demo/room"), None);
    }

    #[test]
    fn test_helper_topics() {
        assert_eq!(TopicBuilder::set_alias("kitchen"), "/@setalias/kitchen");
        assert_eq!(TopicBuilder::readstream("s1"), "/@readstream/s1");
        assert_eq!(TopicBuilder::writestream("s1"), "/@writestream/s1");
        assert_eq!(TopicBuilder::readpostbox("b"), "/@readpostbox/b");
        assert_eq!(TopicBuilder::writepostbox("b"), "/@writepostbox/b");
        assert_eq!(TopicBuilder::client_control("tok"), "/&id/tok/#");
    }

    #[test]
    fn test_is_control() {
        assert!(TopicBuilder::is_control("/&present"));
        assert!(TopicBuilder::is_control("/&resetendpoint"));
        assert!(!TopicBuilder::is_control("/room/&x"));
        assert!(!TopicBuilder::is_control("/@setalias/a"));
    }
}
