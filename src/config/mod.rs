//! Runtime start-up configuration
//!
//! A [`RuntimeConfiguration`] fully determines how the foreign runtime comes
//! up: which ambient influences it honours, where its home is, what it calls
//! itself and, in order, where it looks for modules.
//!
//! # Usage
//!
//! ```rust
//! use hostcall::config::RuntimeConfiguration;
//!
//! let config = RuntimeConfiguration::builder("hostcall")
//!     .home("/opt/hostcall/runtime")
//!     .search_path("/opt/hostcall/app")
//!     .build()
//!     .unwrap();
//!
//! assert!(!config.flags().use_environment);
//! assert_eq!(config.search_paths().len(), 2);
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::paths::Platform;

/// Program identity used when the caller does not supply one
pub const DEFAULT_PROGRAM_NAME: &str = "hostcall";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A directory cannot be represented as a native OS path
    #[error("cannot encode `{}` as a native path: {reason}", path.display())]
    Encoding {
        path: PathBuf,
        reason: &'static str,
    },
}

/// Which ambient influences the runtime may pick up at start.
///
/// `true` means the ambient behaviour is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsolationFlags {
    /// Read `HOSTCALL_HOME` / `HOSTCALL_PATH` and search the working directory
    pub use_environment: bool,
    /// Auto-load the `<home>/site` extension directory
    pub site_import: bool,
    /// Let the engine install signal-based trap handlers
    pub install_signal_handlers: bool,
    /// Expose the process command line to the runtime
    pub parse_argv: bool,
}

impl IsolationFlags {
    /// Nothing ambient: behaviour depends on explicit inputs only
    pub const ISOLATED: Self = Self {
        use_environment: false,
        site_import: false,
        install_signal_handlers: false,
        parse_argv: false,
    };

    /// Everything ambient
    pub const AMBIENT: Self = Self {
        use_environment: true,
        site_import: true,
        install_signal_handlers: true,
        parse_argv: true,
    };

    /// Whether every ambient influence is suppressed
    pub fn is_isolated(&self) -> bool {
        *self == Self::ISOLATED
    }
}

impl Default for IsolationFlags {
    fn default() -> Self {
        Self::ISOLATED
    }
}

/// Ordered module search directories; earlier entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPathList {
    entries: Vec<PathBuf>,
}

impl SearchPathList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a directory. Duplicates are kept.
    pub fn push(
        &mut self,
        dir: impl Into<PathBuf>,
    ) {
        self.entries.push(dir.into());
    }

    /// Insert a directory ahead of every existing entry
    pub fn push_front(
        &mut self,
        dir: impl Into<PathBuf>,
    ) {
        self.entries.insert(0, dir.into());
    }

    pub fn contains(
        &self,
        dir: &Path,
    ) -> bool {
        self.entries.iter().any(|entry| entry == dir)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn as_slice(&self) -> &[PathBuf] {
        &self.entries
    }
}

impl<P: Into<PathBuf>> FromIterator<P> for SearchPathList {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl IntoIterator for SearchPathList {
    type Item = PathBuf;
    type IntoIter = std::vec::IntoIter<PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Start-up configuration, consumed once by `RuntimeHandle::start`.
///
/// Deliberately not `Clone`: a configuration is built per run.
#[derive(Debug, PartialEq, Eq)]
pub struct RuntimeConfiguration {
    flags: IsolationFlags,
    home: Option<PathBuf>,
    program_name: String,
    search_paths: SearchPathList,
}

impl RuntimeConfiguration {
    /// Start an isolated configuration
    pub fn builder(program_name: impl Into<String>) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            flags: IsolationFlags::ISOLATED,
            home: None,
            program_name: program_name.into(),
            extra: Vec::new(),
        }
    }

    /// The degraded configuration used when an explicit start fails:
    /// ambient flags, no home, no explicit search entries.
    pub fn ambient_default(program_name: impl Into<String>) -> Self {
        Self {
            flags: IsolationFlags::AMBIENT,
            home: None,
            program_name: program_name.into(),
            search_paths: SearchPathList::new(),
        }
    }

    pub fn flags(&self) -> IsolationFlags {
        self.flags
    }

    /// Directory holding the runtime support files
    pub fn home(&self) -> Option<&Path> {
        self.home.as_deref()
    }

    pub fn program_name(&self) -> &str {
        &self.program_name
    }

    pub fn search_paths(&self) -> &SearchPathList {
        &self.search_paths
    }

    pub(crate) fn into_parts(self) -> (IsolationFlags, Option<PathBuf>, String, SearchPathList) {
        (self.flags, self.home, self.program_name, self.search_paths)
    }
}

/// Builder for [`RuntimeConfiguration`]
#[derive(Debug)]
pub struct RuntimeConfigBuilder {
    flags: IsolationFlags,
    home: Option<PathBuf>,
    program_name: String,
    extra: Vec<PathBuf>,
}

impl RuntimeConfigBuilder {
    /// Switch every isolation flag to its ambient setting
    pub fn ambient(mut self) -> Self {
        self.flags = IsolationFlags::AMBIENT;
        self
    }

    pub fn flags(
        mut self,
        flags: IsolationFlags,
    ) -> Self {
        self.flags = flags;
        self
    }

    /// Runtime home; it becomes the first search entry
    pub fn home(
        mut self,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.home = Some(dir.into());
        self
    }

    /// Append a search directory after the home
    pub fn search_path(
        mut self,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.extra.push(dir.into());
        self
    }

    pub fn search_paths<I, P>(
        mut self,
        dirs: I,
    ) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.extra.extend(dirs.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> Result<RuntimeConfiguration, ConfigError> {
        let home = self.home.map(encode_native).transpose()?;

        let mut search_paths = SearchPathList::new();
        if let Some(home) = &home {
            search_paths.push(home.clone());
        }
        for dir in self.extra {
            search_paths.push(encode_native(dir)?);
        }

        Ok(RuntimeConfiguration {
            flags: self.flags,
            home,
            program_name: self.program_name,
            search_paths,
        })
    }
}

/// Isolated configuration for an executable directory.
///
/// The home comes from the platform layout table; `extra_dirs` follow it in
/// the given order.
pub fn build<I, P>(
    exe_dir: &Path,
    platform: Platform,
    program_name: &str,
    extra_dirs: I,
) -> Result<RuntimeConfiguration, ConfigError>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    RuntimeConfiguration::builder(program_name)
        .home(platform.layout().home_dir(exe_dir))
        .search_paths(extra_dirs)
        .build()
}

fn encode_native(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.as_os_str().is_empty() {
        return Err(ConfigError::Encoding {
            path,
            reason: "path is empty",
        });
    }
    if path.to_string_lossy().contains('\0') {
        return Err(ConfigError::Encoding {
            path,
            reason: "path contains an interior NUL",
        });
    }
    // Relative entries would otherwise resolve against whatever the working
    // directory is at lookup time
    std::path::absolute(&path).map_err(|_| ConfigError::Encoding {
        path,
        reason: "path cannot be made absolute",
    })
}
