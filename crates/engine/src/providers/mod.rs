//! Resource kinds.
//!
//! Each provider resolves its lazy properties against the attribute store
//! and then converges one target through the [`Host`](crate::host::Host).
//! All of them are idempotent: converging an already converged target
//! reports no change.

mod account;
mod attribute;
mod execute;
mod file;
mod ingredient;
mod remote_file;

pub use account::{ChefOrg, ChefUser};
pub use attribute::NodeAttribute;
pub use execute::Execute;
pub use file::{Directory, File, Template, converge_file, render_template};
pub use ingredient::{Ingredient, IngredientConfig, Product, product, version_matches};
pub use remote_file::{RemoteFile, sha256_hex};
