//! Server identity and configuration text.

use std::path::PathBuf;

use converge_engine::{AttributeError, AttributeStore};

use crate::attributes::WrapperAttributes;

/// Name the server is reached by.
///
/// The configured `fqdn` wins; then the first public cloud address when
/// `cloud_public_address` is set; then the node's `ipaddress`.
///
/// # Errors
///
/// Returns [`AttributeError::Missing`] for `ipaddress` when nothing fits.
pub fn hostname(store: &AttributeStore, attrs: &WrapperAttributes) -> Result<String, AttributeError> {
    if !attrs.fqdn.is_empty() {
        return Ok(attrs.fqdn.clone());
    }

    if attrs.cloud_public_address {
        let public = store
            .get("cloud.public_ipv4_addrs")
            .and_then(|addrs| addrs.as_array()?.first()?.as_str().map(str::to_string))
            .filter(|addr| !addr.is_empty());
        if let Some(addr) = public {
            return Ok(addr);
        }
    }

    store
        .get_str("ipaddress")
        .filter(|addr| !addr.is_empty())
        .ok_or_else(|| AttributeError::missing("ipaddress"))
}

/// Where the TLS certificate and key are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertPaths {
    pub directory: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertPaths {
    /// Paths for `hostname` under `directory`.
    pub fn new(directory: &str, hostname: &str) -> Self {
        let directory = PathBuf::from(directory);
        Self {
            cert: directory.join(format!("{hostname}.crt")),
            key: directory.join(format!("{hostname}.key")),
            directory,
        }
    }
}

/// Certificate paths, when a certificate is configured.
pub fn cert_paths(attrs: &WrapperAttributes, hostname: &str) -> Option<CertPaths> {
    attrs
        .has_certificate()
        .then(|| CertPaths::new(&attrs.cert_directory, hostname))
}

/// Assemble the server configuration text.
///
/// Base config, then the block for this host, then the lines derived from
/// certificates, the data collector and Supermarket.
pub fn server_config(attrs: &WrapperAttributes, hostname: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    let base = attrs.config.trim_end();
    if !base.is_empty() {
        lines.push(base.to_string());
    }

    if let Some(block) = attrs
        .config_block
        .get(hostname)
        .map(|block| block.trim_end())
        .filter(|block| !block.is_empty())
    {
        lines.push(block.to_string());
    }

    if let Some(paths) = cert_paths(attrs, hostname) {
        lines.push(format!(
            "nginx['ssl_certificate'] = \"{}\"",
            paths.cert.display()
        ));
        lines.push(format!(
            "nginx['ssl_certificate_key'] = \"{}\"",
            paths.key.display()
        ));
        lines.push("rabbitmq['management_enabled'] = false".to_string());
    }

    if !attrs.data_collector_url.is_empty() {
        lines.push(format!(
            "data_collector['root_url'] = '{}'",
            attrs.data_collector_url
        ));
    }

    if !attrs.supermarket_url.is_empty() {
        let url = attrs.supermarket_url.trim_end_matches('/');
        lines.push("oc_id['applications'] ||= {}".to_string());
        lines.push(format!(
            "oc_id['applications']['supermarket'] = {{ 'redirect_uri' => '{url}/auth/chef_oauth2/callback' }}"
        ));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs() -> WrapperAttributes {
        WrapperAttributes::default()
    }

    #[test]
    fn test_hostname_prefers_fqdn() -> Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        store.set_normal("ipaddress", json!("10.0.0.5"));
        let attrs = WrapperAttributes {
            fqdn: "host.example.com".into(),
            ..attrs()
        };
        assert_eq!(hostname(&store, &attrs)?, "host.example.com");
        Ok(())
    }

    #[test]
    fn test_hostname_uses_cloud_address_when_enabled() -> Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        store.set_normal("ipaddress", json!("10.0.0.5"));
        store.set_normal("cloud.public_ipv4_addrs", json!(["203.0.113.9"]));

        assert_eq!(hostname(&store, &attrs())?, "10.0.0.5");

        let cloud = WrapperAttributes {
            cloud_public_address: true,
            ..attrs()
        };
        assert_eq!(hostname(&store, &cloud)?, "203.0.113.9");
        Ok(())
    }

    #[test]
    fn test_hostname_missing() {
        let store = AttributeStore::new();
        assert_eq!(
            hostname(&store, &attrs()),
            Err(AttributeError::missing("ipaddress"))
        );
    }

    #[test]
    fn test_config_with_certificate() {
        let attrs = WrapperAttributes {
            config: "topology 'standalone'\n".into(),
            cert: "CERT".into(),
            cert_key: "KEY".into(),
            ..attrs()
        };

        let config = server_config(&attrs, "host.example.com");
        assert_eq!(
            config.lines().collect::<Vec<_>>(),
            vec![
                "topology 'standalone'",
                "nginx['ssl_certificate'] = \"/etc/ssl/private/host.example.com.crt\"",
                "nginx['ssl_certificate_key'] = \"/etc/ssl/private/host.example.com.key\"",
                "rabbitmq['management_enabled'] = false",
            ]
        );
    }

    #[test]
    fn test_config_block_for_this_host_only() {
        let attrs = WrapperAttributes {
            config_block: [
                ("host.example.com".to_string(), "api_fqdn 'host'".to_string()),
                ("other.example.com".to_string(), "api_fqdn 'other'".to_string()),
            ]
            .into(),
            ..attrs()
        };

        assert_eq!(server_config(&attrs, "host.example.com"), "api_fqdn 'host'");
    }

    #[test]
    fn test_config_integrations() {
        let attrs = WrapperAttributes {
            data_collector_url: "https://automate.example.com/data-collector/v0/".into(),
            supermarket_url: "https://supermarket.example.com/".into(),
            ..attrs()
        };

        let config = server_config(&attrs, "host");
        assert!(config.contains(
            "data_collector['root_url'] = 'https://automate.example.com/data-collector/v0/'"
        ));
        assert!(config.contains("oc_id['applications'] ||= {}"));
        assert!(config.contains(
            "oc_id['applications']['supermarket'] = { 'redirect_uri' => 'https://supermarket.example.com/auth/chef_oauth2/callback' }"
        ));
    }

    #[test]
    fn test_no_certificate_without_key() {
        let attrs = WrapperAttributes {
            cert: "CERT".into(),
            ..attrs()
        };
        assert!(cert_paths(&attrs, "host").is_none());
        assert!(server_config(&attrs, "host").is_empty());
    }
}
