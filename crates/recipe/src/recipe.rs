//! The chef-server wrapper recipe as a resource graph.
//!
//! Values a resource needs at its turn are read lazily from the attribute
//! store; the shape of the graph (which users, orgs and addons exist, whether
//! a certificate is installed) is fixed when the graph is built.

use converge_engine::providers::{
    ChefOrg, ChefUser, Directory, Execute, File, Ingredient, IngredientConfig, RemoteFile,
    Template,
};
use converge_engine::{
    Action, AttributeError, AttributeStore, GuardError, Lazy, Predicate, Resource, ResourceGraph,
    ResourceId, Timing,
};
use tracing::{debug, info};

use crate::attributes::{WrapperAttributes, attribute_path};
use crate::error::Result;
use crate::server::{cert_paths, hostname, server_config};
use crate::templates;

pub const JQ_PATH: &str = "/bin/jq";
pub const PIVOTAL_KEY: &str = "/etc/opscode/pivotal.rb";
pub const OPSCODE_DIR: &str = "/etc/opscode";
pub const SECRETS_PATH: &str = "/etc/opscode/private-chef-secrets.json";
pub const UPGRADES_DIR: &str = "/var/opt/opscode/upgrades";
pub const MIGRATION_LEVEL_PATH: &str = "/var/opt/opscode/upgrades/migration-level";
pub const BOOTSTRAP_MARKER: &str = "/var/opt/opscode/bootstrapped";

const SERVER: &str = "chef-server";
const SHOW_TOKEN: &str = "chef-server-ctl show-secret data_collector token";

fn setting(key: &'static str) -> Lazy<String> {
    Lazy::deferred(move |store| store.require_str(attribute_path(key)))
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build the recipe's resource graph from the current attributes.
///
/// # Errors
///
/// Fails with a missing attribute when no hostname can be determined, with
/// an invalid attribute when the `chef_server_wrapper` subtree is malformed,
/// and with a graph error when two entries expand to the same resource.
pub fn build(store: &AttributeStore) -> Result<ResourceGraph> {
    let attrs = WrapperAttributes::from_store(store)?;
    let host = hostname(store, &attrs)?;
    info!(
        hostname = %host,
        addons = attrs.addons.len(),
        users = attrs.chef_users.len(),
        orgs = attrs.chef_orgs.len(),
        "Building chef-server recipe"
    );

    let mut graph = ResourceGraph::new();
    graph.add(Resource::new(
        RemoteFile::new(JQ_PATH, setting("jq_url")).mode(0o755),
    ))?;
    add_certificates(&mut graph, &attrs, &host)?;
    add_frontend_bootstrap(&mut graph)?;
    add_server(&mut graph, &host)?;
    add_data_collector_token(&mut graph, &attrs)?;
    add_accounts(&mut graph, &attrs)?;
    add_addons(&mut graph, &attrs)?;
    add_starter_pack(&mut graph, &attrs, &host)?;

    debug!(resources = graph.len(), "Recipe built");
    Ok(graph)
}

fn add_certificates(graph: &mut ResourceGraph, attrs: &WrapperAttributes, host: &str) -> Result<()> {
    let Some(paths) = cert_paths(attrs, host) else {
        return Ok(());
    };
    graph.add(Resource::new(Directory::new(paths.directory).recursive()))?;
    graph.add(Resource::new(
        File::new(paths.cert).content(setting("cert")).mode(0o644),
    ))?;
    graph.add(Resource::new(
        File::new(paths.key).content(setting("cert_key")).mode(0o600),
    ))?;
    Ok(())
}

/// Secrets and markers that let an additional frontend join an existing
/// cluster without a fresh bootstrap.
fn add_frontend_bootstrap(graph: &mut ResourceGraph) -> Result<()> {
    let has_secrets =
        || Predicate::AttributePresent(attribute_path("frontend_secrets").to_string());

    let secrets = Lazy::deferred(|store| {
        let secrets = store.require(attribute_path("frontend_secrets"))?;
        serde_json::to_string_pretty(&secrets)
            .map_err(|e| AttributeError::invalid("chef_server_wrapper.frontend_secrets", e.to_string()))
    });
    let major = Lazy::deferred(|store| {
        Ok(WrapperAttributes::from_store(store)?.migration_level.major.to_string())
    });
    let minor = Lazy::deferred(|store| {
        Ok(WrapperAttributes::from_store(store)?.migration_level.minor.to_string())
    });

    graph.add(Resource::new(Directory::new(OPSCODE_DIR).recursive()).only_if(has_secrets()))?;
    graph.add(
        Resource::new(
            Template::new(SECRETS_PATH, "private-chef-secrets.json", templates::PRIVATE_CHEF_SECRETS)
                .variable("secrets", secrets)
                .mode(0o600),
        )
        .only_if(has_secrets()),
    )?;
    graph.add(Resource::new(Directory::new(UPGRADES_DIR).recursive()).only_if(has_secrets()))?;
    graph.add(
        Resource::new(
            Template::new(MIGRATION_LEVEL_PATH, "migration-level", templates::MIGRATION_LEVEL)
                .variable("major", major)
                .variable("minor", minor),
        )
        .only_if(has_secrets()),
    )?;
    graph.add(Resource::new(File::new(BOOTSTRAP_MARKER)).only_if(has_secrets()))?;
    Ok(())
}

fn add_server(graph: &mut ResourceGraph, host: &str) -> Result<()> {
    let server = ResourceId::new("ingredient", SERVER);

    graph.add(Resource::new(
        Ingredient::new(SERVER)
            .channel(setting("channel"))
            .version(Lazy::deferred(|store| {
                Ok(Some(WrapperAttributes::from_store(store)?.version))
            }))
            .accept_license(Lazy::deferred(|store| {
                Ok(WrapperAttributes::from_store(store)?.accept_license)
            })),
    ))?;

    let host = host.to_string();
    graph.add(
        Resource::new(IngredientConfig::new(
            SERVER,
            Lazy::deferred(move |store| {
                Ok(server_config(&WrapperAttributes::from_store(store)?, &host))
            }),
        ))
        .notifies(server, Action::Reconfigure, Timing::Delayed),
    )?;

    graph.add(
        Resource::new(Execute::new(
            "chef-server-reconfigure-first-boot",
            "chef-server-ctl reconfigure",
        ))
        .not_if(Predicate::PathExists(PIVOTAL_KEY.into())),
    )?;
    Ok(())
}

fn add_data_collector_token(graph: &mut ResourceGraph, attrs: &WrapperAttributes) -> Result<()> {
    if attrs.data_collector_token.is_empty() {
        return Ok(());
    }

    let command = Lazy::deferred(|store| {
        let token = store.require_str(attribute_path("data_collector_token"))?;
        Ok(format!(
            "chef-server-ctl set-secret data_collector token {}",
            single_quote(&token)
        ))
    });
    let already_set = Predicate::check(|ctx| {
        let token = ctx
            .attributes
            .require_str(attribute_path("data_collector_token"))
            .map_err(GuardError::from)?;
        let current = ctx.host.run_command(SHOW_TOKEN)?;
        Ok(current.success() && current.stdout.trim() == token)
    });

    graph.add(
        Resource::new(Execute::new("data-collector-token", command).sensitive())
            .not_if(already_set)
            .notifies(
                ResourceId::new("ingredient", SERVER),
                Action::Reconfigure,
                Timing::Delayed,
            ),
    )?;
    Ok(())
}

fn add_accounts(graph: &mut ResourceGraph, attrs: &WrapperAttributes) -> Result<()> {
    for (name, user) in &attrs.chef_users {
        graph.add(Resource::new(ChefUser {
            username: name.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            password: user.password.clone(),
            serveradmin: user.serveradmin,
        }))?;
    }

    for (name, org) in &attrs.chef_orgs {
        let full_name = if org.org_full_name.is_empty() {
            name.clone()
        } else {
            org.org_full_name.clone()
        };
        graph.add(Resource::new(ChefOrg {
            name: name.clone(),
            full_name,
            admins: org.admins.clone(),
        }))?;
    }
    Ok(())
}

fn add_addons(graph: &mut ResourceGraph, attrs: &WrapperAttributes) -> Result<()> {
    for (name, addon) in &attrs.addons {
        let channel = addon
            .channel
            .clone()
            .filter(|channel| !channel.is_empty())
            .unwrap_or_else(|| attrs.channel.clone());

        graph.add(Resource::new(
            Ingredient::new(name)
                .channel(channel)
                .version(Lazy::Value(addon.version.clone()))
                .accept_license(Lazy::Value(attrs.accept_license)),
        ))?;
        graph.add(
            Resource::new(IngredientConfig::new(name, addon.config.clone())).notifies(
                ResourceId::new("ingredient", name.as_str()),
                Action::Reconfigure,
                Timing::Immediate,
            ),
        )?;
    }
    Ok(())
}

fn add_starter_pack(graph: &mut ResourceGraph, attrs: &WrapperAttributes, host: &str) -> Result<()> {
    graph.add(Resource::new(
        Template::new(&attrs.starter_pack_knife_rb_path, "knife.rb", templates::KNIFE_RB)
            .variable("user", setting("starter_pack_user"))
            .variable("org", setting("starter_pack_org"))
            .variable("fqdn", host),
    ))?;
    graph.add(Resource::new(
        Template::new(&attrs.client_helper_path, "client-helper", templates::CLIENT_HELPER)
            .variable("org", setting("starter_pack_org"))
            .variable("fqdn", host)
            .variable("knife_rb", attrs.starter_pack_knife_rb_path.as_str())
            .variable("jq", JQ_PATH)
            .mode(0o755),
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::apply_defaults;
    use itertools::Itertools;
    use serde_json::json;

    fn store() -> std::result::Result<AttributeStore, AttributeError> {
        let mut store = AttributeStore::new();
        apply_defaults(&mut store)?;
        store.set_normal("chef_server_wrapper.fqdn", json!("host.example.com"));
        Ok(store)
    }

    #[test]
    fn test_minimal_graph_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let graph = build(&store()?)?;
        let ids = graph.ids().into_iter().map(ToString::to_string).collect_vec();
        assert_eq!(
            ids,
            vec![
                "remote_file[/bin/jq]",
                "directory[/etc/opscode]",
                "template[/etc/opscode/private-chef-secrets.json]",
                "directory[/var/opt/opscode/upgrades]",
                "template[/var/opt/opscode/upgrades/migration-level]",
                "file[/var/opt/opscode/bootstrapped]",
                "ingredient[chef-server]",
                "ingredient_config[chef-server]",
                "execute[chef-server-reconfigure-first-boot]",
                "template[/tmp/knife.rb]",
                "template[/usr/local/bin/chef-server-client]",
            ]
        );
        graph.validate()?;
        Ok(())
    }

    #[test]
    fn test_token_resource_only_with_token() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut store = store()?;
        store.set_normal("chef_server_wrapper.data_collector_token", json!("abc"));
        let graph = build(&store)?;
        let token = ResourceId::new("execute", "data-collector-token");
        assert!(graph.get(&token).is_some());
        assert_eq!(graph.notifications_from(&token, Timing::Delayed).count(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_hostname_fails_build() -> std::result::Result<(), AttributeError> {
        let mut store = AttributeStore::new();
        apply_defaults(&mut store)?;
        let err = build(&store).err();
        assert!(err.is_some_and(|e| e.is_missing_attribute()));
        Ok(())
    }

    #[test]
    fn test_single_quote() {
        assert_eq!(single_quote("abc"), "'abc'");
        assert_eq!(single_quote("a'b"), r"'a'\''b'");
    }
}
