//! `remote_file` resources.

use std::path::PathBuf;

use sha2::{Digest, Sha256};
use tracing::debug;

use super::file::converge_file;
use crate::error::{HostError, ProviderError};
use crate::resource::{Action, ApplyContext, Lazy, Outcome, Provider};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// A file downloaded from a URL.
///
/// An existing file is kept when no checksum is pinned, or when its digest
/// already matches the pin.
#[derive(Debug)]
pub struct RemoteFile {
    path: PathBuf,
    source: Lazy<String>,
    checksum: Option<String>,
    mode: Option<u32>,
}

impl RemoteFile {
    /// Declare `path` downloaded from `source`.
    pub fn new(path: impl Into<PathBuf>, source: impl Into<Lazy<String>>) -> Self {
        Self {
            path: path.into(),
            source: source.into(),
            checksum: None,
            mode: None,
        }
    }

    /// Pin the expected SHA-256.
    #[must_use]
    pub fn checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into().to_ascii_lowercase());
        self
    }

    #[must_use]
    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    fn is_current(&self, existing: &[u8]) -> bool {
        self.checksum
            .as_deref()
            .is_none_or(|expected| sha256_hex(existing) == expected)
    }
}

impl Provider for RemoteFile {
    fn kind(&self) -> &'static str {
        "remote_file"
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn default_action(&self) -> Action {
        Action::Create
    }

    fn supports(&self, action: Action) -> bool {
        matches!(action, Action::Create | Action::Delete)
    }

    fn converge(
        &self,
        action: Action,
        ctx: &mut ApplyContext<'_>,
    ) -> Result<Outcome, ProviderError> {
        match action {
            Action::Create => {
                let url = self.source.resolve(ctx.attributes)?;

                let current = ctx.host.read_file(&self.path)?;
                let body = match current {
                    Some(existing) if self.is_current(&existing) => existing,
                    _ => {
                        debug!(url = %url, path = %self.path.display(), "Downloading");
                        let body = ctx.host.fetch(&url)?;
                        if let Some(expected) = &self.checksum {
                            let actual = sha256_hex(&body);
                            if &actual != expected {
                                return Err(HostError::Checksum {
                                    path: self.path.display().to_string(),
                                    expected: expected.clone(),
                                    actual,
                                }
                                .into());
                            }
                        }
                        body
                    }
                };

                Ok(converge_file(ctx.host, &self.path, Some(&body), self.mode, None)?)
            }
            Action::Delete => {
                if ctx.host.exists(&self.path) {
                    ctx.host.remove(&self.path)?;
                    Ok(Outcome::changed("deleted"))
                } else {
                    Ok(Outcome::unchanged())
                }
            }
            other => Err(ProviderError::Unsupported(other)),
        }
    }
}
