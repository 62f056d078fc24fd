//! CLI command handlers.
//!
//! Attribute layering for every command:
//! - recipe defaults in the default layer
//! - the attribute document in the normal layer
//! - `--set` assignments in the override layer
//! - `--replace` assignments in the override layer, masking the layers below

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chef_server_wrapper::{WrapperAttributes, apply_defaults, build, hostname, server_config};
use converge_core::{ResultExt, load_document, parse_assignment};
use converge_engine::{
    AttributeStore, ConvergenceExecutor, Host, LocalHost, Precedence, ResourceGraph, RunReport,
    Timing,
};
use tracing::{debug, info, warn};

use crate::cli::{AttributeArgs, Commands};

/// Execute a CLI command.
///
/// This is the main command dispatcher that routes to the appropriate handler.
pub fn execute_command(command: Commands) -> Result<()> {
    match command {
        Commands::Run {
            attributes,
            root,
            max_notifications,
            json,
        } => cmd_run(&attributes, root, max_notifications, json),

        Commands::ShowConfig { attributes } => cmd_show_config(&attributes),

        Commands::Plan { attributes } => cmd_plan(&attributes),
    }
}

/// Converge the host.
fn cmd_run(args: &AttributeArgs, root: PathBuf, max_notifications: u32, json: bool) -> Result<()> {
    let host = LocalHost::new(root);
    let mut store = load_attributes(args, &host)?;
    let graph = build(&store).context("Failed to build the recipe")?;

    info!(
        root = %host.root().display(),
        resources = graph.len(),
        "Converging"
    );
    let started = Instant::now();
    let executor = ConvergenceExecutor::builder()
        .max_notifications(max_notifications)
        .build();

    match executor.run(&graph, &mut store, &host) {
        Ok(report) => {
            print_report(&report, json)?;
            info!(elapsed = ?started.elapsed(), "Done");
            Ok(())
        }
        Err(failure) => {
            print_report(&failure.report, json).or_default_logged("Printing the partial report");
            Err(anyhow::Error::new(failure.error)).context("Convergence run aborted")
        }
    }
}

/// Print the resolved hostname and server configuration.
fn cmd_show_config(args: &AttributeArgs) -> Result<()> {
    let store = load_attributes(args, &LocalHost::new("/"))?;
    let attrs = WrapperAttributes::from_store(&store).context("Invalid recipe attributes")?;
    let host = hostname(&store, &attrs).context("Cannot determine the server hostname")?;

    println!("# hostname: {host}");
    println!("{}", server_config(&attrs, &host));
    Ok(())
}

/// List the resources a run would visit.
fn cmd_plan(args: &AttributeArgs) -> Result<()> {
    let store = load_attributes(args, &LocalHost::new("/"))?;
    let graph = build(&store).context("Failed to build the recipe")?;
    for line in plan_lines(&graph) {
        println!("{line}");
    }
    Ok(())
}

/// Layer defaults, the attribute document and command line overrides.
fn load_attributes(args: &AttributeArgs, host: &dyn Host) -> Result<AttributeStore> {
    let mut store = AttributeStore::new();
    apply_defaults(&mut store).context("Failed to load recipe defaults")?;

    if let Some(path) = &args.attributes {
        let document = load_document(path)
            .with_context(|| format!("Failed to load attributes from {}", path.display()))?;
        store.merge(Precedence::Normal, "", document);
    }

    for assignment in &args.set {
        let (path, value) = parse_assignment(assignment)?;
        debug!(path = %path, "Attribute override");
        store.set_override(path.as_str(), value);
    }

    for assignment in &args.replace {
        let (path, value) = parse_assignment(assignment)?;
        debug!(path = %path, "Attribute replacement");
        store.replace_override(path.as_str(), value);
    }

    if store.is_blank("ipaddress") {
        match detect_ipaddress(host) {
            Some(address) => {
                debug!(ipaddress = %address, "Detected ipaddress");
                store.merge_defaults("ipaddress", serde_json::Value::String(address));
            }
            None => warn!("Could not detect ipaddress"),
        }
    }

    Ok(store)
}

/// First address reported by `hostname -I`.
fn detect_ipaddress(host: &dyn Host) -> Option<String> {
    let output = host
        .run_command("hostname -I")
        .ok_logged("Detecting ipaddress")?;
    if !output.success() {
        return None;
    }
    output.stdout.split_whitespace().next().map(str::to_string)
}

fn plan_lines(graph: &ResourceGraph) -> Vec<String> {
    let mut lines = Vec::new();
    for (position, resource) in (1..).zip(graph.resources()) {
        lines.push(format!(
            "{position:>3}. {} ({})",
            resource.id(),
            resource.declared_action()
        ));
        for guard in resource.guards() {
            lines.push(format!("       {}", guard.describe()));
        }
        for timing in [Timing::Immediate, Timing::Delayed] {
            for notification in graph.notifications_from(resource.id(), timing) {
                lines.push(format!(
                    "       notifies {} {} ({})",
                    notification.action, notification.target, timing
                ));
            }
        }
    }
    lines
}

fn summary_lines(report: &RunReport) -> Vec<String> {
    let mut lines = report
        .updated()
        .map(|applied| {
            format!(
                "  * {} {}: {}",
                applied.resource,
                applied.action,
                applied.summary.as_deref().unwrap_or("updated")
            )
        })
        .collect::<Vec<_>>();
    lines.extend(
        report
            .errors
            .iter()
            .map(|failure| format!("  ! {} {}: {}", failure.resource, failure.action, failure.error)),
    );
    lines.push(format!(
        "{} resources updated, {} up to date, {} skipped, {} notifications, {} errors",
        report.resources_updated,
        report
            .resources_applied
            .len()
            .saturating_sub(report.resources_updated),
        report.resources_skipped.len(),
        report.notifications_fired.len(),
        report.errors.len()
    ));
    lines
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        let rendered = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
        println!("{rendered}");
    } else {
        for line in summary_lines(report) {
            println!("{line}");
        }
    }
    Ok(())
}
