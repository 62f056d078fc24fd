//! Convergence executor.
//!
//! Walks the graph once in declaration order, runs immediate notification
//! targets as soon as their source changes, and drains the delayed queue at
//! the end. The first fatal error stops the run; whatever was applied before
//! it stays applied.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use thiserror::Error as ThisError;
use tracing::{debug, error, info, warn};
use ulid::Ulid;

use crate::attributes::AttributeStore;
use crate::error::{Error, ProviderError, Result};
use crate::graph::{Notification, ResourceGraph, Timing};
use crate::host::Host;
use crate::resource::{Action, ApplyContext, GuardContext, Resource, ResourceId};

/// Default bound on notification-triggered runs of one resource.
pub const DEFAULT_MAX_NOTIFICATIONS: u32 = 10;

/// Configuration for the executor.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How often one resource may be re-run by notifications in a run.
    pub max_notifications: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_notifications: DEFAULT_MAX_NOTIFICATIONS,
        }
    }
}

/// Builder for [`ConvergenceExecutor`].
#[derive(Debug, Default)]
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl ExecutorBuilder {
    /// Create a builder with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a complete configuration.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the notification bound.
    #[must_use]
    pub fn max_notifications(mut self, max: u32) -> Self {
        self.config.max_notifications = max;
        self
    }

    /// Build the executor.
    pub fn build(self) -> ConvergenceExecutor {
        ConvergenceExecutor::new(self.config)
    }
}

/// Why a resource ran.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Main pass, in declaration order.
    Declared,
    /// Notification from `source`.
    Notified { source: ResourceId, timing: Timing },
}

/// A resource whose action was carried out.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedResource {
    pub resource: ResourceId,
    pub action: Action,
    pub changed: bool,
    pub summary: Option<String>,
    pub trigger: Trigger,
}

/// A resource that did not run.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedResource {
    pub resource: ResourceId,
    pub action: Action,
    pub reason: String,
}

/// A best-effort resource whose apply failed.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceFailure {
    pub resource: ResourceId,
    pub action: Action,
    pub error: String,
}

/// What happened during one convergence run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub resources_applied: Vec<AppliedResource>,
    /// Number of applications that changed the host.
    pub resources_updated: usize,
    pub resources_skipped: Vec<SkippedResource>,
    pub notifications_fired: Vec<Notification>,
    pub errors: Vec<ResourceFailure>,
}

impl RunReport {
    fn start() -> Self {
        Self {
            run_id: Ulid::new().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            resources_applied: Vec::new(),
            resources_updated: 0,
            resources_skipped: Vec::new(),
            notifications_fired: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// True when the host already matched: nothing changed and nothing failed.
    pub fn is_converged(&self) -> bool {
        self.resources_updated == 0 && self.errors.is_empty()
    }

    /// Applications that changed the host.
    pub fn updated(&self) -> impl Iterator<Item = &AppliedResource> {
        self.resources_applied.iter().filter(|r| r.changed)
    }

    /// How often `id` was applied, changed or not.
    pub fn times_applied(&self, id: &ResourceId) -> usize {
        self.resources_applied
            .iter()
            .filter(|r| &r.resource == id)
            .count()
    }

    /// Whether `id` was skipped at least once.
    pub fn was_skipped(&self, id: &ResourceId) -> bool {
        self.resources_skipped.iter().any(|r| &r.resource == id)
    }
}

/// A run aborted by a fatal error, with everything done before it.
#[derive(Debug, ThisError)]
#[error("convergence run failed: {error}")]
pub struct RunFailure {
    #[source]
    pub error: Error,
    pub report: Box<RunReport>,
}

/// Drives a [`ResourceGraph`] to convergence against a [`Host`].
#[derive(Debug, Clone, Default)]
pub struct ConvergenceExecutor {
    config: ExecutorConfig,
}

impl ConvergenceExecutor {
    /// Create an executor.
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Start a builder.
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::new()
    }

    /// Get the configuration.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run the graph once.
    ///
    /// # Errors
    ///
    /// Returns a [`RunFailure`] on the first fatal error. Resources applied
    /// before it are not rolled back.
    pub fn run(
        &self,
        graph: &ResourceGraph,
        attributes: &mut AttributeStore,
        host: &dyn Host,
    ) -> std::result::Result<RunReport, RunFailure> {
        let mut run = Run {
            graph,
            host,
            attributes,
            max_notifications: self.config.max_notifications,
            report: RunReport::start(),
            triggered: HashMap::new(),
            delayed: Vec::new(),
        };

        info!(
            run_id = %run.report.run_id,
            resources = graph.len(),
            notifications = graph.notifications().len(),
            "Starting convergence run"
        );

        match run.execute() {
            Ok(()) => {
                let report = run.report.finish();
                info!(
                    run_id = %report.run_id,
                    applied = report.resources_applied.len(),
                    updated = report.resources_updated,
                    skipped = report.resources_skipped.len(),
                    notifications = report.notifications_fired.len(),
                    errors = report.errors.len(),
                    "Convergence run complete"
                );
                Ok(report)
            }
            Err(err) => {
                error!(
                    run_id = %run.report.run_id,
                    resource = %err.resource(),
                    error = %err,
                    "Convergence run aborted"
                );
                Err(RunFailure {
                    error: err,
                    report: Box::new(run.report.finish()),
                })
            }
        }
    }
}

struct Run<'r> {
    graph: &'r ResourceGraph,
    host: &'r dyn Host,
    attributes: &'r mut AttributeStore,
    max_notifications: u32,
    report: RunReport,
    triggered: HashMap<ResourceId, u32>,
    /// Delayed notifications in enqueue order, drained ones included so a
    /// target never re-enters the queue.
    delayed: Vec<Notification>,
}

impl Run<'_> {
    fn execute(&mut self) -> Result<()> {
        self.graph.validate()?;

        let graph = self.graph;
        for resource in graph.resources() {
            self.apply(resource, resource.declared_action(), Trigger::Declared)?;
        }

        let mut next = 0;
        while let Some(notification) = self.delayed.get(next).cloned() {
            next = next.saturating_add(1);
            debug!(
                target = %notification.target,
                action = %notification.action,
                "Draining delayed notification"
            );
            self.fire(&notification)?;
        }
        Ok(())
    }

    fn apply(&mut self, resource: &Resource, action: Action, trigger: Trigger) -> Result<()> {
        let id = resource.id();

        if action == Action::Nothing {
            debug!(resource = %id, "Action nothing, waiting for notifications");
            self.skip(id, action, "action nothing");
            return Ok(());
        }

        if let Some(reason) = self.blocking_guard(resource)? {
            debug!(resource = %id, guard = %reason, "Skipped by guard");
            self.skip(id, action, reason);
            return Ok(());
        }

        let mut ctx = ApplyContext {
            host: self.host,
            attributes: &mut *self.attributes,
        };
        let outcome = match resource.provider().converge(action, &mut ctx) {
            Ok(outcome) => outcome,
            Err(ProviderError::Resolve(e)) => return Err(Error::from_attribute(id, e)),
            Err(ProviderError::Apply(e)) if resource.is_best_effort() => {
                warn!(resource = %id, action = %action, error = %e, "Best-effort resource failed");
                self.report.errors.push(ResourceFailure {
                    resource: id.clone(),
                    action,
                    error: e.to_string(),
                });
                return Ok(());
            }
            Err(ProviderError::Apply(e)) => return Err(Error::apply(id, action, e)),
            Err(ProviderError::Unsupported(action)) => {
                return Err(Error::UnsupportedAction {
                    resource: id.clone(),
                    action,
                })
            }
        };

        if outcome.changed {
            info!(
                resource = %id,
                action = %action,
                summary = outcome.summary.as_deref().unwrap_or_default(),
                "Updated"
            );
            self.report.resources_updated = self.report.resources_updated.saturating_add(1);
        } else {
            debug!(resource = %id, action = %action, "Up to date");
        }
        self.report.resources_applied.push(AppliedResource {
            resource: id.clone(),
            action,
            changed: outcome.changed,
            summary: outcome.summary,
            trigger,
        });

        if outcome.changed {
            self.enqueue_delayed(id);
            let immediate = self
                .graph
                .notifications_from(id, Timing::Immediate)
                .cloned()
                .collect_vec();
            for notification in &immediate {
                self.fire(notification)?;
            }
        }
        Ok(())
    }

    /// The first guard that vetoes the resource, if any. Guards see the host
    /// and attributes as they are now, not as they were at declaration.
    fn blocking_guard(&self, resource: &Resource) -> Result<Option<String>> {
        let ctx = GuardContext {
            host: self.host,
            attributes: &*self.attributes,
        };
        for guard in resource.guards() {
            let allowed = guard
                .allows(&ctx)
                .map_err(|e| Error::guard_evaluation(resource.id(), e))?;
            if !allowed {
                return Ok(Some(guard.describe()));
            }
        }
        Ok(None)
    }

    fn enqueue_delayed(&mut self, source: &ResourceId) {
        let graph = self.graph;
        for notification in graph.notifications_from(source, Timing::Delayed) {
            if self.delayed.iter().any(|q| q.target == notification.target) {
                debug!(
                    source = %source,
                    target = %notification.target,
                    "Delayed notification already queued"
                );
                continue;
            }
            debug!(source = %source, target = %notification.target, "Queued delayed notification");
            self.delayed.push(notification.clone());
        }
    }

    fn fire(&mut self, notification: &Notification) -> Result<()> {
        let count = self
            .triggered
            .entry(notification.target.clone())
            .or_insert(0);
        *count = count.saturating_add(1);
        if *count > self.max_notifications {
            return Err(Error::notification_cycle(
                &notification.target,
                self.max_notifications,
            ));
        }

        let graph = self.graph;
        let target = graph
            .get(&notification.target)
            .ok_or_else(|| Error::UnknownNotificationTarget {
                source_resource: notification.source.clone(),
                target: notification.target.clone(),
            })?;

        info!(
            source = %notification.source,
            target = %notification.target,
            action = %notification.action,
            timing = %notification.timing,
            "Notification fired"
        );
        self.report.notifications_fired.push(notification.clone());
        self.apply(
            target,
            notification.action,
            Trigger::Notified {
                source: notification.source.clone(),
                timing: notification.timing,
            },
        )
    }

    fn skip(&mut self, id: &ResourceId, action: Action, reason: impl Into<String>) {
        self.report.resources_skipped.push(SkippedResource {
            resource: id.clone(),
            action,
            reason: reason.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryHost;
    use crate::providers::{Execute, File};

    #[test]
    fn test_builder() {
        let executor = ConvergenceExecutor::builder().max_notifications(3).build();
        assert_eq!(executor.config().max_notifications, 3);
        assert_eq!(
            ConvergenceExecutor::default().config().max_notifications,
            DEFAULT_MAX_NOTIFICATIONS
        );
    }

    #[test]
    fn test_empty_graph_converges() {
        let graph = ResourceGraph::new();
        let mut attrs = AttributeStore::new();
        let host = InMemoryHost::new();

        let report = ConvergenceExecutor::default().run(&graph, &mut attrs, &host);
        assert!(report.is_ok_and(|r| r.is_converged() && r.finished_at.is_some()));
    }

    #[test]
    fn test_validation_failure_reported_before_side_effects() -> Result<()> {
        let mut graph = ResourceGraph::new();
        graph.add(
            Resource::new(File::new("/etc/app.conf").content("x")).notifies(
                ResourceId::new("execute", "ghost"),
                Action::Run,
                Timing::Delayed,
            ),
        )?;
        let mut attrs = AttributeStore::new();
        let host = InMemoryHost::new();

        let failure = ConvergenceExecutor::default()
            .run(&graph, &mut attrs, &host)
            .err();
        assert!(matches!(
            failure.as_ref().map(|f| &f.error),
            Some(Error::UnknownNotificationTarget { .. })
        ));
        assert!(host.file("/etc/app.conf").is_none());
        Ok(())
    }

    #[test]
    fn test_nothing_action_only_runs_when_notified() -> Result<()> {
        let restart = ResourceId::new("execute", "restart");
        let mut graph = ResourceGraph::new();
        graph.add(Resource::new(Execute::new("restart", "systemctl restart app")).action(Action::Nothing))?;
        graph.add(
            Resource::new(File::new("/etc/app.conf").content("x")).notifies(
                restart.clone(),
                Action::Run,
                Timing::Immediate,
            ),
        )?;
        let mut attrs = AttributeStore::new();
        let host = InMemoryHost::new();

        let report = ConvergenceExecutor::default()
            .run(&graph, &mut attrs, &host)
            .map_err(|f| f.error)?;
        assert!(report.was_skipped(&restart));
        assert_eq!(report.times_applied(&restart), 1);
        assert_eq!(host.command_count("systemctl restart app"), 1);
        Ok(())
    }
}
