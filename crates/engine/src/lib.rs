//! Idempotent convergence engine.
//!
//! A run takes a [`ResourceGraph`] of declared resources, an
//! [`AttributeStore`] of layered configuration and a [`Host`] to act on, and
//! moves the host into the declared state:
//!
//! - [`attributes`]: default < normal < override layered attribute tree
//! - [`resource`]: resource identity, actions, guards, lazy properties and
//!   the [`Provider`] seam
//! - [`providers`]: the built-in resource kinds
//! - [`graph`]: declaration order plus immediate and delayed notifications
//! - [`executor`]: the single-pass run loop and its [`RunReport`]
//! - [`host`] / [`memory`]: the real host and an in-memory one for tests
//!
//! # Example
//!
//! ```
//! use converge_engine::providers::File;
//! use converge_engine::{AttributeStore, ConvergenceExecutor, InMemoryHost, Resource, ResourceGraph};
//!
//! let mut graph = ResourceGraph::new();
//! graph.add(Resource::new(File::new("/etc/motd").content("hello\n")))?;
//!
//! let host = InMemoryHost::new();
//! let mut attributes = AttributeStore::new();
//! let executor = ConvergenceExecutor::default();
//!
//! let first = executor.run(&graph, &mut attributes, &host)?;
//! assert_eq!(first.resources_updated, 1);
//! let second = executor.run(&graph, &mut attributes, &host)?;
//! assert!(second.is_converged());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod attributes;
pub mod error;
pub mod executor;
pub mod graph;
pub mod host;
pub mod memory;
pub mod providers;
pub mod resource;

pub use attributes::{AttributePath, AttributeStore, Precedence};
pub use error::{AttributeError, Error, GuardError, HostError, ProviderError, Result};
pub use executor::{
    AppliedResource, ConvergenceExecutor, ExecutorBuilder, ExecutorConfig, ResourceFailure,
    RunFailure, RunReport, SkippedResource, Trigger,
};
pub use graph::{Notification, ResourceGraph, Timing};
pub use host::{CommandOutput, Host, LocalHost, PackageManager, PackageSpec};
pub use memory::InMemoryHost;
pub use resource::{
    Action, ApplyContext, Guard, GuardContext, Lazy, Outcome, Predicate, Provider, Resource,
    ResourceId,
};
