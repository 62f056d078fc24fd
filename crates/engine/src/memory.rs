//! In-memory host for tests and dry runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::HostError;
use crate::host::{CommandOutput, Host, PackageSpec};

/// A file held by [`InMemoryHost`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemoryFile {
    pub content: Vec<u8>,
    pub mode: Option<u32>,
    pub owner: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, MemoryFile>,
    dirs: BTreeSet<PathBuf>,
    dir_modes: BTreeMap<PathBuf, u32>,
    packages: BTreeMap<String, String>,
    urls: BTreeMap<String, Vec<u8>>,
    responses: Vec<(String, CommandOutput)>,
    effects: Vec<(String, PathBuf)>,
    failing_writes: BTreeSet<PathBuf>,
    commands: Vec<String>,
    installs: Vec<PackageSpec>,
    fetches: Vec<String>,
}

/// Host that keeps files, packages and command history in memory.
///
/// Commands succeed with empty output unless a response was scripted with
/// [`InMemoryHost::respond`]; the most recently scripted matching prefix
/// wins. Parent directories are implicit.
#[derive(Debug, Default)]
pub struct InMemoryHost {
    state: RefCell<MemoryState>,
}

impl InMemoryHost {
    /// Create an empty host.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file.
    #[must_use]
    pub fn with_file(self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) -> Self {
        self.state.borrow_mut().files.insert(
            path.into(),
            MemoryFile {
                content: content.into(),
                ..MemoryFile::default()
            },
        );
        self
    }

    /// Seed a directory.
    #[must_use]
    pub fn with_dir(self, path: impl Into<PathBuf>) -> Self {
        self.state.borrow_mut().dirs.insert(path.into());
        self
    }

    /// Seed an installed package.
    #[must_use]
    pub fn with_package(self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.state
            .borrow_mut()
            .packages
            .insert(name.into(), version.into());
        self
    }

    /// Serve bytes for a URL.
    #[must_use]
    pub fn serve(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.state.borrow_mut().urls.insert(url.into(), body.into());
        self
    }

    /// Script the result of commands starting with `prefix`.
    #[must_use]
    pub fn respond(
        self,
        prefix: impl Into<String>,
        status: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        self.state.borrow_mut().responses.push((
            prefix.into(),
            CommandOutput {
                status,
                stdout: stdout.into(),
                stderr: stderr.into(),
            },
        ));
        self
    }

    /// Make commands starting with `prefix` create an empty file at `path`.
    #[must_use]
    pub fn creates_on(self, prefix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.state
            .borrow_mut()
            .effects
            .push((prefix.into(), path.into()));
        self
    }

    /// Make writes to `path` fail.
    #[must_use]
    pub fn fail_writes_to(self, path: impl Into<PathBuf>) -> Self {
        self.state.borrow_mut().failing_writes.insert(path.into());
        self
    }

    /// A file's current state.
    pub fn file(&self, path: impl AsRef<Path>) -> Option<MemoryFile> {
        self.state.borrow().files.get(path.as_ref()).cloned()
    }

    /// A file's content as UTF-8.
    pub fn file_string(&self, path: impl AsRef<Path>) -> Option<String> {
        self.file(path)
            .map(|file| String::from_utf8_lossy(&file.content).into_owned())
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.borrow().commands.clone()
    }

    /// Number of commands run that start with `prefix`.
    pub fn command_count(&self, prefix: &str) -> usize {
        self.state
            .borrow()
            .commands
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Every package install requested so far, in order.
    pub fn installs(&self) -> Vec<PackageSpec> {
        self.state.borrow().installs.clone()
    }

    /// Every URL fetched so far, in order.
    pub fn fetches(&self) -> Vec<String> {
        self.state.borrow().fetches.clone()
    }

    /// Installed version of a package.
    pub fn package_version(&self, name: &str) -> Option<String> {
        self.state.borrow().packages.get(name).cloned()
    }

    fn check_writable(&self, path: &Path) -> Result<(), HostError> {
        if self.state.borrow().failing_writes.contains(path) {
            return Err(HostError::io(path, "read-only file system"));
        }
        Ok(())
    }
}

fn is_root(path: &Path) -> bool {
    path == Path::new("/")
}

impl Host for InMemoryHost {
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        Ok(self
            .state
            .borrow()
            .files
            .get(path)
            .map(|file| file.content.clone()))
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), HostError> {
        self.check_writable(path)?;
        let mut state = self.state.borrow_mut();
        if state.dirs.contains(path) {
            return Err(HostError::io(path, "is a directory"));
        }
        let file = state.files.entry(path.to_path_buf()).or_default();
        file.content = contents.to_vec();
        if mode.is_some() {
            file.mode = mode;
        }
        Ok(())
    }

    fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError> {
        let state = self.state.borrow();
        if let Some(file) = state.files.get(path) {
            return Ok(Some(file.mode.unwrap_or(0o644)));
        }
        if state.dirs.contains(path) {
            return Ok(Some(state.dir_modes.get(path).copied().unwrap_or(0o755)));
        }
        Ok(None)
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        if let Some(file) = state.files.get_mut(path) {
            file.mode = Some(mode);
            return Ok(());
        }
        if state.dirs.contains(path) {
            state.dir_modes.insert(path.to_path_buf(), mode);
            return Ok(());
        }
        Err(HostError::io(path, "no such file or directory"))
    }

    fn file_owner(&self, path: &Path) -> Result<Option<String>, HostError> {
        let state = self.state.borrow();
        Ok(state
            .files
            .get(path)
            .map(|file| file.owner.clone().unwrap_or_else(|| "root".to_string())))
    }

    fn set_owner(&self, path: &Path, owner: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        let file = state
            .files
            .get_mut(path)
            .ok_or_else(|| HostError::io(path, "no such file or directory"))?;
        file.owner = Some(owner.to_string());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        let state = self.state.borrow();
        is_root(path) || state.files.contains_key(path) || state.dirs.contains(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        is_root(path) || self.state.borrow().dirs.contains(path)
    }

    fn create_dir(&self, path: &Path, recursive: bool) -> Result<(), HostError> {
        self.check_writable(path)?;
        let mut state = self.state.borrow_mut();
        if state.files.contains_key(path) {
            return Err(HostError::io(path, "file exists"));
        }
        if recursive {
            for ancestor in path.ancestors().filter(|p| !is_root(p) && !p.as_os_str().is_empty()) {
                state.dirs.insert(ancestor.to_path_buf());
            }
        } else {
            state.dirs.insert(path.to_path_buf());
        }
        Ok(())
    }

    fn remove(&self, path: &Path) -> Result<(), HostError> {
        self.check_writable(path)?;
        let mut state = self.state.borrow_mut();
        if state.files.remove(path).is_some() || state.dirs.remove(path) {
            state.dir_modes.remove(path);
            Ok(())
        } else {
            Err(HostError::io(path, "no such file or directory"))
        }
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, HostError> {
        let mut state = self.state.borrow_mut();
        state.commands.push(command.to_string());

        let created: Vec<PathBuf> = state
            .effects
            .iter()
            .filter(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, path)| path.clone())
            .collect();
        for path in created {
            state.files.entry(path).or_default();
        }

        Ok(state
            .responses
            .iter()
            .rev()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, HostError> {
        let mut state = self.state.borrow_mut();
        state.fetches.push(url.to_string());
        state
            .urls
            .get(url)
            .cloned()
            .ok_or_else(|| HostError::download(url, "404 Not Found"))
    }

    fn installed_version(&self, package: &str) -> Result<Option<String>, HostError> {
        Ok(self.package_version(package))
    }

    fn install_package(&self, spec: &PackageSpec) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state.installs.push(spec.clone());
        let version = spec.version.clone().unwrap_or_else(|| "latest".to_string());
        state.packages.insert(spec.name.clone(), version);
        Ok(())
    }

    fn uninstall_package(&self, package: &str) -> Result<(), HostError> {
        let mut state = self.state.borrow_mut();
        state
            .packages
            .remove(package)
            .map(|_| ())
            .ok_or_else(|| HostError::package(package, "not installed"))
    }
}
