//! Executable location and per-platform resource layout
//!
//! The runtime never assumes its resources live next to the working
//! directory. Everything is derived from the directory of the running binary
//! through a fixed per-platform offset table.
//!
//! ```text
//! Platform      home                         app
//! Windows       <exe>/runtime                <exe>/../../app
//! macOS         <exe>/../Resources/runtime   <exe>/../Resources/app
//! Linux/other   <exe>/runtime                <exe>/../../app
//! ```

use std::io;
use std::path::{Component, Path, PathBuf};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::debug;

/// Path discovery errors
#[derive(Debug, Error)]
pub enum PathError {
    /// The executable directory could not be determined
    #[error("executable directory not found: {0}")]
    NotFound(String),
}

static EXECUTABLE_DIR: OnceCell<PathBuf> = OnceCell::new();

/// Directory containing the running executable.
///
/// Uses the OS query behind [`std::env::current_exe`] (the `/proc/self/exe`
/// link on Linux, `GetModuleFileNameW` on Windows, `_NSGetExecutablePath` on
/// macOS). The value is computed once and cached for the process lifetime.
pub fn executable_directory() -> Result<PathBuf, PathError> {
    EXECUTABLE_DIR
        .get_or_try_init(|| directory_of(std::env::current_exe()))
        .cloned()
}

/// Strip the file name from the result of an executable path query.
pub fn directory_of(query: io::Result<PathBuf>) -> Result<PathBuf, PathError> {
    let exe = query.map_err(|e| PathError::NotFound(format!("OS query failed: {}", e)))?;
    if exe.as_os_str().is_empty() {
        return Err(PathError::NotFound("OS returned an empty path".to_string()));
    }
    if !exe.is_absolute() {
        return Err(PathError::NotFound(format!(
            "OS returned a relative path: {}",
            exe.display()
        )));
    }

    let dir = exe
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| PathError::NotFound(format!("no parent for {}", exe.display())))?;

    debug!("executable directory: {}", dir.display());
    Ok(dir.to_path_buf())
}

/// Target platform family for the resource layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Platform this binary was built for
    pub const fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Fixed resource offsets for this platform
    pub fn layout(self) -> &'static Layout {
        LAYOUTS
            .iter()
            .find(|(platform, _)| *platform == self)
            .map(|(_, layout)| layout)
            .unwrap_or(&LINUX_LAYOUT)
    }
}

/// Resource offsets relative to the executable directory.
///
/// Each offset is a list of path components; `..` steps out of the
/// executable directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Runtime home (core support files)
    pub home: &'static [&'static str],
    /// Application-level foreign code
    pub app: &'static [&'static str],
}

const WINDOWS_LAYOUT: Layout = Layout {
    home: &["runtime"],
    app: &["..", "..", "app"],
};

const MACOS_LAYOUT: Layout = Layout {
    home: &["..", "Resources", "runtime"],
    app: &["..", "Resources", "app"],
};

const LINUX_LAYOUT: Layout = Layout {
    home: &["runtime"],
    app: &["..", "..", "app"],
};

static LAYOUTS: [(Platform, Layout); 3] = [
    (Platform::Windows, WINDOWS_LAYOUT),
    (Platform::MacOs, MACOS_LAYOUT),
    (Platform::Linux, LINUX_LAYOUT),
];

impl Layout {
    /// Runtime home for an executable directory
    pub fn home_dir(
        &self,
        exe_dir: &Path,
    ) -> PathBuf {
        apply_offset(exe_dir, self.home)
    }

    /// Application code directory for an executable directory
    pub fn app_dir(
        &self,
        exe_dir: &Path,
    ) -> PathBuf {
        apply_offset(exe_dir, self.app)
    }
}

fn apply_offset(
    base: &Path,
    offset: &[&str],
) -> PathBuf {
    let joined = offset
        .iter()
        .fold(base.to_path_buf(), |acc, part| acc.join(part));
    normalize(&joined)
}

/// Fold `.` and `..` components without touching the filesystem.
///
/// `..` never climbs above the root or a prefix.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(component),
            },
            other => out.push(other),
        }
    }
    out.iter().collect()
}
