//! Property-based tests for attribute precedence and resource idempotence.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use converge_engine::providers::{File, Template};
use converge_engine::{
    Action, ApplyContext, AttributeStore, InMemoryHost, Lazy, Precedence, Provider,
};
use proptest::prelude::*;
use serde_json::json;

fn precedence() -> impl Strategy<Value = Precedence> {
    prop_oneof![
        Just(Precedence::Default),
        Just(Precedence::Normal),
        Just(Precedence::Override),
    ]
}

proptest! {
    /// Property: an override value wins regardless of the lower layers.
    #[test]
    fn prop_override_wins(
        key in "[a-z]{1,8}(\\.[a-z]{1,8}){0,2}",
        default in "[a-zA-Z0-9 ]{0,20}",
        normal in proptest::option::of("[a-zA-Z0-9 ]{0,20}"),
        overridden in "[a-zA-Z0-9 ]{0,20}",
    ) {
        let mut attrs = AttributeStore::new();
        attrs.merge_defaults(key.as_str(), json!(default));
        if let Some(normal) = &normal {
            attrs.set_normal(key.as_str(), json!(normal));
        }
        attrs.set_override(key.as_str(), json!(overridden.clone()));

        prop_assert_eq!(attrs.get_str(key.as_str()), Some(overridden));
    }

    /// Property: the highest layer written is the one read back.
    #[test]
    fn prop_highest_layer_wins(
        writes in proptest::collection::vec((precedence(), 0u32..1000), 1..8),
    ) {
        let mut attrs = AttributeStore::new();
        for (layer, value) in &writes {
            attrs.set(*layer, "port", json!(value));
        }

        let expected = writes
            .iter()
            .max_by_key(|(layer, _)| *layer)
            .map(|(_, value)| json!(value));
        prop_assert_eq!(attrs.get("port"), expected);
    }

    /// Property: map values merge across layers without hiding siblings.
    #[test]
    fn prop_maps_merge_across_layers(
        low in "[a-z]{1,6}",
        high in "[a-z]{1,6}",
    ) {
        prop_assume!(low != high);
        let mut attrs = AttributeStore::new();
        attrs.merge_defaults("config_block", json!({ low.clone(): "default" }));
        attrs.set_override("config_block", json!({ high.clone(): "override" }));

        let merged = attrs.get("config_block");
        prop_assert_eq!(merged.as_ref().and_then(|m| m.get(&low)), Some(&json!("default")));
        prop_assert_eq!(merged.as_ref().and_then(|m| m.get(&high)), Some(&json!("override")));
    }

    /// Property: converging a file twice reports no change the second time.
    #[test]
    fn prop_file_idempotent(
        content in "[ -~]{0,64}",
        mode in prop_oneof![Just(0o600u32), Just(0o640), Just(0o644), Just(0o755)],
        seeded in proptest::option::of("[ -~]{0,64}"),
    ) {
        let host = match seeded {
            Some(existing) => InMemoryHost::new().with_file("/etc/app.conf", existing),
            None => InMemoryHost::new(),
        };
        let mut attrs = AttributeStore::new();
        let file = File::new("/etc/app.conf").content(content.clone()).mode(mode);

        let mut ctx = ApplyContext { host: &host, attributes: &mut attrs };
        let first = file.converge(Action::Create, &mut ctx);
        let second = file.converge(Action::Create, &mut ctx);

        prop_assert!(first.is_ok());
        prop_assert_eq!(second.map(|o| o.changed).ok(), Some(false));
        prop_assert_eq!(host.file_string("/etc/app.conf"), Some(content));
    }

    /// Property: rendering a template twice reports no change the second time.
    #[test]
    fn prop_template_idempotent(user in "[a-z]{1,12}", org in "[a-z]{1,12}") {
        let host = InMemoryHost::new();
        let mut attrs = AttributeStore::new();
        attrs.set_normal("user", json!(user));
        let template = Template::new("/tmp/knife.rb", "knife.rb", "node_name '{{ user }}' # {{ org }}")
            .variable("user", Lazy::deferred(|attrs| attrs.require_str("user")))
            .variable("org", org.clone());

        let mut ctx = ApplyContext { host: &host, attributes: &mut attrs };
        prop_assert_eq!(template.converge(Action::Create, &mut ctx).map(|o| o.changed).ok(), Some(true));
        prop_assert_eq!(template.converge(Action::Create, &mut ctx).map(|o| o.changed).ok(), Some(false));
        prop_assert_eq!(
            host.file_string("/tmp/knife.rb"),
            Some(format!("node_name '{user}' # {org}"))
        );
    }
}
