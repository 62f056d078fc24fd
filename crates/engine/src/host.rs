//! The host seam: every side effect a provider performs goes through [`Host`].

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::HostError;

/// Captured result of a shell command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful command with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Whether the command exited zero.
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// A package the host should install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageSpec {
    pub name: String,
    pub channel: String,
    pub version: Option<String>,
}

/// Side effects against the machine being converged.
pub trait Host {
    /// Read a file, `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] when the file exists but cannot be read.
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError>;

    /// Write a file, replacing any existing content.
    ///
    /// With `mode` set the file carries those permission bits from the
    /// moment it appears under `path`; without it an existing file keeps
    /// its mode.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn write_file(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), HostError>;

    /// Permission bits of a path, `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError>;

    /// Set permission bits.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), HostError>;

    /// Owning user of a path, `None` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns a [`HostError`] when the owner cannot be determined.
    fn file_owner(&self, path: &Path) -> Result<Option<String>, HostError>;

    /// Change the owning user.
    ///
    /// # Errors
    ///
    /// Returns a [`HostError`] on failure.
    fn set_owner(&self, path: &Path, owner: &str) -> Result<(), HostError>;

    /// Whether the path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Whether the path is a directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Create a directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn create_dir(&self, path: &Path, recursive: bool) -> Result<(), HostError>;

    /// Remove a file or empty directory.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Io`] on failure.
    fn remove(&self, path: &Path) -> Result<(), HostError>;

    /// Run a shell command. A non-zero exit is not an error here.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Command`] when the command cannot be spawned.
    fn run_command(&self, command: &str) -> Result<CommandOutput, HostError>;

    /// Download a URL.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Download`] on failure.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, HostError>;

    /// Installed version of a package, `None` when not installed.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Package`] when the package database cannot be read.
    fn installed_version(&self, package: &str) -> Result<Option<String>, HostError>;

    /// Install a package.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Package`] on failure.
    fn install_package(&self, spec: &PackageSpec) -> Result<(), HostError>;

    /// Remove a package.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Package`] on failure.
    fn uninstall_package(&self, package: &str) -> Result<(), HostError>;

    /// Run a command and fail on a non-zero exit.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Command`] when the command fails.
    fn run_checked(&self, command: &str) -> Result<CommandOutput, HostError> {
        let output = self.run_command(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(HostError::command(command, output.status, output.stderr.trim()))
        }
    }
}

/// Mode of files written without an explicit mode.
pub const DEFAULT_FILE_MODE: u32 = 0o644;

/// Quote a string for safe use as one `sh` word.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:@=+,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// System package manager used by [`LocalHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Apt,
    Yum,
}

impl PackageManager {
    /// Pick the package manager present on this machine.
    pub fn detect() -> Self {
        if Path::new("/usr/bin/dpkg-query").exists() {
            Self::Apt
        } else {
            Self::Yum
        }
    }

    fn query_command(self, package: &str) -> String {
        let package = shell_quote(package);
        match self {
            Self::Apt => format!("dpkg-query -W -f='${{Version}}' {package}"),
            Self::Yum => format!("rpm -q --qf '%{{VERSION}}-%{{RELEASE}}' {package}"),
        }
    }

    fn install_command(self, spec: &PackageSpec) -> String {
        match (self, &spec.version) {
            (Self::Apt, Some(version)) => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                shell_quote(&format!("{}={version}*", spec.name))
            ),
            (Self::Apt, None) => format!(
                "DEBIAN_FRONTEND=noninteractive apt-get install -y {}",
                shell_quote(&spec.name)
            ),
            (Self::Yum, Some(version)) => format!(
                "yum install -y {}",
                shell_quote(&format!("{}-{version}", spec.name))
            ),
            (Self::Yum, None) => format!("yum install -y {}", shell_quote(&spec.name)),
        }
    }

    fn uninstall_command(self, package: &str) -> String {
        let package = shell_quote(package);
        match self {
            Self::Apt => format!("DEBIAN_FRONTEND=noninteractive apt-get remove -y {package}"),
            Self::Yum => format!("yum remove -y {package}"),
        }
    }
}

/// Host backed by the local filesystem, shell and package manager.
///
/// Absolute resource paths resolve under `root`, so a run can target a
/// staging tree. Commands run with `root` as working directory and
/// `CONVERGE_ROOT` in their environment.
#[derive(Debug, Clone)]
pub struct LocalHost {
    root: PathBuf,
    package_manager: PackageManager,
}

impl LocalHost {
    /// Create a host rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            package_manager: PackageManager::detect(),
        }
    }

    /// Use a specific package manager instead of detecting one.
    #[must_use]
    pub fn with_package_manager(mut self, package_manager: PackageManager) -> Self {
        self.package_manager = package_manager;
        self
    }

    /// The root all resource paths resolve under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a resource path onto the real filesystem.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path.strip_prefix("/").unwrap_or(path))
    }
}

impl Default for LocalHost {
    fn default() -> Self {
        Self::new("/")
    }
}

impl Host for LocalHost {
    fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, HostError> {
        let real = self.resolve(path);
        match std::fs::read(&real) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::io(&real, e.to_string())),
        }
    }

    fn write_file(&self, path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), HostError> {
        use std::io::Write;

        let real = self.resolve(path);
        let io_error = |e: std::io::Error| HostError::io(&real, e.to_string());
        let dir = real
            .parent()
            .ok_or_else(|| HostError::io(&real, "no parent directory"))?;

        // Staged as 0600 next to the target and renamed into place, so the
        // content is never readable under a wider mode than requested.
        let mut staged = tempfile::Builder::new()
            .prefix(".converge-")
            .tempfile_in(dir)
            .map_err(io_error)?;
        staged.write_all(contents).map_err(io_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = match mode {
                Some(mode) => mode,
                None => self.file_mode(path)?.unwrap_or(DEFAULT_FILE_MODE),
            };
            staged
                .as_file()
                .set_permissions(std::fs::Permissions::from_mode(mode))
                .map_err(io_error)?;
        }
        #[cfg(not(unix))]
        let _ = mode;

        staged.persist(&real).map_err(|e| io_error(e.error))?;
        Ok(())
    }

    #[cfg(unix)]
    fn file_mode(&self, path: &Path) -> Result<Option<u32>, HostError> {
        use std::os::unix::fs::PermissionsExt;

        let real = self.resolve(path);
        match std::fs::metadata(&real) {
            Ok(meta) => Ok(Some(meta.permissions().mode() & 0o7777)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(HostError::io(&real, e.to_string())),
        }
    }

    #[cfg(not(unix))]
    fn file_mode(&self, _path: &Path) -> Result<Option<u32>, HostError> {
        Ok(None)
    }

    #[cfg(unix)]
    fn set_mode(&self, path: &Path, mode: u32) -> Result<(), HostError> {
        use std::os::unix::fs::PermissionsExt;

        let real = self.resolve(path);
        std::fs::set_permissions(&real, std::fs::Permissions::from_mode(mode))
            .map_err(|e| HostError::io(&real, e.to_string()))
    }

    #[cfg(not(unix))]
    fn set_mode(&self, _path: &Path, _mode: u32) -> Result<(), HostError> {
        Ok(())
    }

    fn file_owner(&self, path: &Path) -> Result<Option<String>, HostError> {
        let real = self.resolve(path);
        if !real.exists() {
            return Ok(None);
        }
        let command = format!("stat -c %U {}", shell_quote(&real.to_string_lossy()));
        let output = self.run_checked(&command)?;
        Ok(Some(output.stdout.trim().to_string()))
    }

    fn set_owner(&self, path: &Path, owner: &str) -> Result<(), HostError> {
        let real = self.resolve(path);
        let command = format!(
            "chown {} {}",
            shell_quote(owner),
            shell_quote(&real.to_string_lossy())
        );
        self.run_checked(&command).map(|_| ())
    }

    fn exists(&self, path: &Path) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.resolve(path).is_dir()
    }

    fn create_dir(&self, path: &Path, recursive: bool) -> Result<(), HostError> {
        let real = self.resolve(path);
        let result = if recursive {
            std::fs::create_dir_all(&real)
        } else {
            std::fs::create_dir(&real)
        };
        result.map_err(|e| HostError::io(&real, e.to_string()))
    }

    fn remove(&self, path: &Path) -> Result<(), HostError> {
        let real = self.resolve(path);
        let result = if real.is_dir() {
            std::fs::remove_dir(&real)
        } else {
            std::fs::remove_file(&real)
        };
        result.map_err(|e| HostError::io(&real, e.to_string()))
    }

    fn run_command(&self, command: &str) -> Result<CommandOutput, HostError> {
        debug!(command = %command, "Running command");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .env("CONVERGE_ROOT", &self.root)
            .output()
            .map_err(|e| HostError::command(command, -1, e.to_string()))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, HostError> {
        debug!(url = %url, "Downloading");

        let response = reqwest::blocking::get(url)
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(|e| HostError::download(url, e.to_string()))?;

        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|e| HostError::download(url, e.to_string()))
    }

    fn installed_version(&self, package: &str) -> Result<Option<String>, HostError> {
        let output = self.run_command(&self.package_manager.query_command(package))?;
        let version = output.stdout.trim();
        if output.success() && !version.is_empty() {
            Ok(Some(version.to_string()))
        } else {
            Ok(None)
        }
    }

    fn install_package(&self, spec: &PackageSpec) -> Result<(), HostError> {
        self.run_checked(&self.package_manager.install_command(spec))
            .map(|_| ())
            .map_err(|e| HostError::package(&spec.name, e.to_string()))
    }

    fn uninstall_package(&self, package: &str) -> Result<(), HostError> {
        self.run_checked(&self.package_manager.uninstall_command(package))
            .map(|_| ())
            .map_err(|e| HostError::package(package, e.to_string()))
    }
}
