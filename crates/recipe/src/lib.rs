//! Chef Infra Server install and bootstrap recipe.
//!
//! Installs the server from a package channel, renders its configuration
//! (certificates, data collector, Supermarket, per-host blocks), bootstraps
//! additional frontends from shared secrets, provisions users and
//! organizations, installs addons, and drops a starter-pack `knife.rb` plus
//! a client helper script.
//!
//! ```
//! use chef_server_wrapper::{apply_defaults, build};
//! use converge_engine::{AttributeStore, ConvergenceExecutor, InMemoryHost};
//!
//! let mut store = AttributeStore::new();
//! apply_defaults(&mut store)?;
//! store.set_normal("chef_server_wrapper.fqdn", serde_json::json!("host.example.com"));
//!
//! let graph = build(&store)?;
//! let host = InMemoryHost::new().serve(
//!     "https://github.com/stedolan/jq/releases/download/jq-1.6/jq-linux64",
//!     "jq",
//! );
//! let report = ConvergenceExecutor::default().run(&graph, &mut store, &host)?;
//! assert!(report.resources_updated > 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![forbid(clippy::panic)]

pub mod attributes;
pub mod error;
pub mod recipe;
pub mod server;
pub mod templates;

pub use attributes::{NAMESPACE, WrapperAttributes, apply_defaults, defaults};
pub use error::{Error, Result};
pub use recipe::build;
pub use server::{CertPaths, cert_paths, hostname, server_config};
