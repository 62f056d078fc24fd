//! Recipe attributes under the `chef_server_wrapper` namespace.
//!
//! Defaults are merged into the store's default layer by [`apply_defaults`];
//! [`WrapperAttributes`] is the typed view of the merged subtree.

use std::collections::BTreeMap;

use converge_engine::{AttributeError, AttributePath, AttributeStore};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Attribute namespace of the recipe.
pub const NAMESPACE: &str = "chef_server_wrapper";

/// Path of a key inside the recipe namespace.
///
/// Keys are single segments, so hostnames with dots stay intact.
pub fn attribute_path(key: &str) -> AttributePath {
    AttributePath::from(NAMESPACE).child(key)
}

/// Upgrade migration level written for new frontends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationLevel {
    pub major: u32,
    pub minor: u32,
}

impl Default for MigrationLevel {
    fn default() -> Self {
        Self { major: 1, minor: 0 }
    }
}

/// An addon product installed next to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Addon {
    /// Falls back to the wrapper channel.
    pub channel: Option<String>,
    pub version: Option<String>,
    pub config: String,
}

/// A server user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAttributes {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    #[serde(deserialize_with = "flexible_bool")]
    pub serveradmin: bool,
}

/// A server organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrgAttributes {
    pub org_full_name: String,
    pub admins: Vec<String>,
}

/// Typed recipe attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperAttributes {
    pub channel: String,
    pub version: String,
    #[serde(deserialize_with = "flexible_bool")]
    pub accept_license: bool,
    pub supermarket_url: String,
    pub data_collector_url: String,
    pub data_collector_token: String,
    pub addons: BTreeMap<String, Addon>,
    pub config: String,
    /// Extra config text keyed by hostname.
    pub config_block: BTreeMap<String, String>,
    pub chef_users: BTreeMap<String, UserAttributes>,
    pub chef_orgs: BTreeMap<String, OrgAttributes>,
    pub starter_pack_knife_rb_path: String,
    pub starter_pack_user: String,
    pub starter_pack_org: String,
    pub fqdn: String,
    pub jq_url: String,
    #[serde(deserialize_with = "flexible_bool")]
    pub cloud_public_address: bool,
    pub cert: String,
    pub cert_key: String,
    pub cert_directory: String,
    /// Only set when bootstrapping an additional frontend.
    pub frontend_secrets: BTreeMap<String, Value>,
    pub migration_level: MigrationLevel,
    pub client_helper_path: String,
}

impl Default for WrapperAttributes {
    fn default() -> Self {
        Self {
            channel: "stable".to_string(),
            version: "13.0.17".to_string(),
            accept_license: true,
            supermarket_url: String::new(),
            data_collector_url: String::new(),
            data_collector_token: String::new(),
            addons: BTreeMap::new(),
            config: String::new(),
            config_block: BTreeMap::new(),
            chef_users: BTreeMap::new(),
            chef_orgs: BTreeMap::new(),
            starter_pack_knife_rb_path: "/tmp/knife.rb".to_string(),
            starter_pack_user: String::new(),
            starter_pack_org: String::new(),
            fqdn: String::new(),
            jq_url: "https://github.com/stedolan/jq/releases/download/jq-1.6/jq-linux64"
                .to_string(),
            cloud_public_address: false,
            cert: String::new(),
            cert_key: String::new(),
            cert_directory: "/etc/ssl/private".to_string(),
            frontend_secrets: BTreeMap::new(),
            migration_level: MigrationLevel::default(),
            client_helper_path: "/usr/local/bin/chef-server-client".to_string(),
        }
    }
}

impl WrapperAttributes {
    /// Read the merged `chef_server_wrapper` subtree.
    ///
    /// # Errors
    ///
    /// Returns [`AttributeError::Invalid`] when a key has the wrong shape.
    pub fn from_store(store: &AttributeStore) -> Result<Self, AttributeError> {
        if store.get(NAMESPACE).is_none() {
            return Ok(Self::default());
        }
        store.get_as(NAMESPACE)
    }

    /// Whether both halves of the TLS certificate are set.
    pub fn has_certificate(&self) -> bool {
        !self.cert.is_empty() && !self.cert_key.is_empty()
    }
}

/// The defaults as an attribute tree.
///
/// # Errors
///
/// Returns [`AttributeError::Invalid`] if the defaults cannot be serialized.
pub fn defaults() -> Result<Value, AttributeError> {
    serde_json::to_value(WrapperAttributes::default())
        .map_err(|e| AttributeError::invalid(NAMESPACE, e.to_string()))
}

/// Merge the recipe defaults into the store's default layer.
///
/// # Errors
///
/// See [`defaults`].
pub fn apply_defaults(store: &mut AttributeStore) -> Result<(), AttributeError> {
    store.merge_defaults(NAMESPACE, defaults()?);
    Ok(())
}

/// Booleans may arrive as `true` or as the string `"true"`; anything else is
/// false.
fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        Bool(bool),
        Text(String),
        Other(Value),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::Bool(value) => value,
        Flexible::Text(text) => text.trim() == "true",
        Flexible::Other(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_round_into_store() -> Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        apply_defaults(&mut store)?;

        assert_eq!(store.get_str("chef_server_wrapper.version").as_deref(), Some("13.0.17"));
        assert_eq!(
            store.get_str("chef_server_wrapper.cert_directory").as_deref(),
            Some("/etc/ssl/private")
        );
        assert_eq!(WrapperAttributes::from_store(&store)?, WrapperAttributes::default());
        Ok(())
    }

    #[test]
    fn test_normal_layer_overrides_defaults() -> Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        apply_defaults(&mut store)?;
        store.set_normal("chef_server_wrapper.channel", json!("current"));
        store.set_normal(
            "chef_server_wrapper.addons",
            json!({ "manage": { "version": "3.2.20" } }),
        );

        let attrs = WrapperAttributes::from_store(&store)?;
        assert_eq!(attrs.channel, "current");
        assert_eq!(attrs.version, "13.0.17");
        assert_eq!(
            attrs.addons.get("manage").and_then(|a| a.version.as_deref()),
            Some("3.2.20")
        );
        Ok(())
    }

    #[test]
    fn test_accept_license_as_string() -> Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        store.set_normal("chef_server_wrapper.accept_license", json!("false"));
        assert!(!WrapperAttributes::from_store(&store)?.accept_license);

        store.set_normal("chef_server_wrapper.accept_license", json!("true"));
        assert!(WrapperAttributes::from_store(&store)?.accept_license);
        Ok(())
    }

    #[test]
    fn test_wrong_shape_is_invalid() {
        let mut store = AttributeStore::new();
        store.set_normal("chef_server_wrapper.chef_users", json!("jane"));
        assert!(matches!(
            WrapperAttributes::from_store(&store),
            Err(AttributeError::Invalid { .. })
        ));
    }

    #[test]
    fn test_hostname_keys_stay_single_segment() {
        assert_eq!(
            attribute_path("config_block")
                .child("host.example.com")
                .segments()
                .len(),
            3
        );
    }
}
