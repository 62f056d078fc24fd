//! Template bodies shipped with the recipe.

/// Starter-pack `knife.rb`. Binds `user`, `org` and `fqdn`.
pub const KNIFE_RB: &str = include_str!("../templates/knife.rb.tmpl");

/// Helper that creates a client and prints its key. Binds `org`, `fqdn`,
/// `knife_rb` and `jq`.
pub const CLIENT_HELPER: &str = include_str!("../templates/client-helper.sh.tmpl");

/// Frontend secrets. Binds `secrets`.
pub const PRIVATE_CHEF_SECRETS: &str = include_str!("../templates/private-chef-secrets.json.tmpl");

/// Upgrade migration level. Binds `major` and `minor`.
pub const MIGRATION_LEVEL: &str = include_str!("../templates/migration-level.tmpl");

#[cfg(test)]
mod tests {
    use super::*;
    use converge_engine::providers::render_template;
    use std::collections::BTreeMap;

    fn bind(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_knife_rb_renders() -> Result<(), converge_engine::AttributeError> {
        let vars = bind(&[("user", "pivotal"), ("org", "acme"), ("fqdn", "host.example.com")]);
        let rendered = render_template("knife.rb", KNIFE_RB, &vars)?;
        assert!(rendered.contains("node_name                'pivotal'"));
        assert!(rendered.contains("'https://host.example.com/organizations/acme'"));
        assert!(rendered.contains("\"#{current_dir}/pivotal.pem\""));
        Ok(())
    }

    #[test]
    fn test_client_helper_renders() -> Result<(), converge_engine::AttributeError> {
        let vars = bind(&[
            ("org", "acme"),
            ("fqdn", "host.example.com"),
            ("knife_rb", "/tmp/knife.rb"),
            ("jq", "/bin/jq"),
        ]);
        let rendered = render_template("client-helper", CLIENT_HELPER, &vars)?;
        assert!(rendered.starts_with("#!/bin/sh\n"));
        assert!(rendered.contains("org=\"${2:-acme}\""));
        assert!(rendered.contains("'/bin/jq' -r '.private_key'"));
        Ok(())
    }

    #[test]
    fn test_migration_level_renders() -> Result<(), converge_engine::AttributeError> {
        let rendered = render_template(
            "migration-level",
            MIGRATION_LEVEL,
            &bind(&[("major", "1"), ("minor", "0")]),
        )?;
        assert_eq!(rendered, "{\n  \"major\": 1,\n  \"minor\": 0\n}\n");
        Ok(())
    }
}
