//! Resource graph: declaration-ordered resources plus notification edges.

use std::collections::HashMap;
use std::fmt;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::resource::{Action, Resource, ResourceId};

/// When a notification fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timing {
    /// Run the target right away, before the main pass continues.
    Immediate,
    /// Queue the target for the end of the run.
    Delayed,
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediately"),
            Self::Delayed => write!(f, "delayed"),
        }
    }
}

/// Edge from a resource that changed to a resource that should re-run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub source: ResourceId,
    pub target: ResourceId,
    pub action: Action,
    pub timing: Timing,
}

/// Ordered collection of resources with their notifications.
///
/// Targets may be declared after the notification that names them; the
/// graph is checked as a whole by [`ResourceGraph::validate`].
#[derive(Debug, Default)]
pub struct ResourceGraph {
    resources: Vec<Resource>,
    index: HashMap<ResourceId, usize>,
    notifications: Vec<Notification>,
}

impl ResourceGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resource, taking over the notifications it declared.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateResource`] when the identity is taken, or
    /// [`Error::UnsupportedAction`] when the declared action is unknown to
    /// the resource's kind.
    pub fn add(&mut self, mut resource: Resource) -> Result<()> {
        let id = resource.id().clone();
        if self.index.contains_key(&id) {
            return Err(Error::DuplicateResource { resource: id });
        }
        if !resource.supports(resource.declared_action()) {
            return Err(Error::UnsupportedAction {
                action: resource.declared_action(),
                resource: id,
            });
        }

        self.notifications.extend(resource.take_notifications());
        self.index.insert(id, self.resources.len());
        self.resources.push(resource);
        Ok(())
    }

    /// Add a notification edge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownResource`] when `source` has not been
    /// declared yet.
    pub fn notify(
        &mut self,
        source: &ResourceId,
        target: ResourceId,
        action: Action,
        timing: Timing,
    ) -> Result<()> {
        if !self.index.contains_key(source) {
            return Err(Error::UnknownResource {
                resource: source.clone(),
            });
        }
        self.notifications.push(Notification {
            source: source.clone(),
            target,
            action,
            timing,
        });
        Ok(())
    }

    /// Check every notification names a declared target that supports the
    /// requested action.
    ///
    /// # Errors
    ///
    /// Returns the first [`Error::UnknownNotificationTarget`] or
    /// [`Error::UnsupportedAction`] found.
    pub fn validate(&self) -> Result<()> {
        for notification in &self.notifications {
            let target = self.get(&notification.target).ok_or_else(|| {
                Error::UnknownNotificationTarget {
                    source_resource: notification.source.clone(),
                    target: notification.target.clone(),
                }
            })?;
            if !target.supports(notification.action) {
                return Err(Error::UnsupportedAction {
                    resource: notification.target.clone(),
                    action: notification.action,
                });
            }
        }
        Ok(())
    }

    /// Look up a resource by identity.
    pub fn get(&self, id: &ResourceId) -> Option<&Resource> {
        self.index.get(id).and_then(|&i| self.resources.get(i))
    }

    /// Resources in declaration order.
    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.iter()
    }

    /// All notification edges in declaration order.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Outbound notifications of `source` with the given timing.
    pub fn notifications_from<'a>(
        &'a self,
        source: &'a ResourceId,
        timing: Timing,
    ) -> impl Iterator<Item = &'a Notification> + 'a {
        self.notifications
            .iter()
            .filter(move |n| &n.source == source && n.timing == timing)
    }

    /// Identities in declaration order.
    pub fn ids(&self) -> Vec<&ResourceId> {
        self.resources.iter().map(Resource::id).collect_vec()
    }

    /// Number of resources.
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the graph has no resources.
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
