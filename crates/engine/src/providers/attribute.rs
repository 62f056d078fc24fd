//! `node_attribute` resources: attribute writes that happen mid-run.

use serde_json::Value;

use crate::attributes::{AttributePath, Precedence};
use crate::error::ProviderError;
use crate::resource::{Action, ApplyContext, Lazy, Outcome, Provider};

/// Sets an attribute when the resource runs, so later lazy properties see it.
#[derive(Debug)]
pub struct NodeAttribute {
    path: AttributePath,
    value: Lazy<Value>,
    precedence: Precedence,
}

impl NodeAttribute {
    /// Set `path` at override precedence.
    pub fn new(path: impl Into<AttributePath>, value: impl Into<Lazy<Value>>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            precedence: Precedence::Override,
        }
    }

    #[must_use]
    pub fn precedence(mut self, precedence: Precedence) -> Self {
        self.precedence = precedence;
        self
    }
}

impl Provider for NodeAttribute {
    fn kind(&self) -> &'static str {
        "node_attribute"
    }

    fn name(&self) -> String {
        self.path.to_string()
    }

    fn default_action(&self) -> Action {
        Action::Create
    }

    fn supports(&self, action: Action) -> bool {
        action == Action::Create
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        if action != Action::Create {
            return Err(ProviderError::Unsupported(action));
        }

        let value = self.value.resolve(ctx.attributes)?;
        if ctx.attributes.get_in(self.precedence, &self.path) == Some(&value) {
            return Ok(Outcome::unchanged());
        }
        ctx.attributes.set(self.precedence, &self.path, value);
        Ok(Outcome::changed(format!("set {}", self.path)))
    }
}
