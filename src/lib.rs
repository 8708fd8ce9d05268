//! hostcall: host a WebAssembly runtime and call into guest code
//!
//! One run locates the runtime's resources relative to the executable,
//! starts an isolated runtime with an explicit module search path, performs a
//! single round-trip call and finalizes the runtime on every exit path.
//!
//! ```text
//! paths::executable_directory ─► config::build ─► RuntimeHandle::start
//!                                                   (ambient fallback once)
//!                                                          │
//!                           RuntimeHandle::finalize ◄─ invoke::ModuleInvoker
//! ```
//!
//! # Crate Features
//!
//! - `rnnoise`: RNNoise-backed [`audio::Denoiser`]

#![warn(rust_2018_idioms)]

pub mod audio;
pub mod config;
pub mod error;
pub mod invoke;
pub mod paths;
pub mod runtime;

// Utility modules
pub mod util;


// Re-exports
pub use error::{ErrorKind, HostError};

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::config::RuntimeConfiguration;
use crate::invoke::{ModuleInvoker, NativeValue};
use crate::paths::Platform;
use crate::runtime::{start_with_fallback, RuntimeHandle};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Program name
pub const NAME: &str = "hostcall";

/// Inputs of one host run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostOptions {
    /// Runtime home; derived from the executable directory when unset
    pub home: Option<PathBuf>,
    /// Guest code directory; derived from the executable directory when unset
    pub app_dir: Option<PathBuf>,
    pub module: String,
    pub function: String,
    pub args: Vec<i64>,
    pub program_name: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            home: None,
            app_dir: None,
            module: "Sample".to_string(),
            function: "add".to_string(),
            args: vec![2, 2],
            program_name: config::DEFAULT_PROGRAM_NAME.to_string(),
        }
    }
}

/// Resolve the directory resources are laid out from.
///
/// Falls back to the working directory when the executable cannot be found.
fn resource_base() -> Result<PathBuf, HostError> {
    match paths::executable_directory() {
        Ok(dir) => Ok(dir),
        Err(err) => {
            warn!("{}; resolving resources from the working directory", err);
            std::env::current_dir().map_err(|e| {
                HostError::Path(paths::PathError::NotFound(format!(
                    "working directory unavailable: {}",
                    e
                )))
            })
        }
    }
}

/// Run the full host sequence and return the guest's result
///
/// # Example
///
/// ```no_run
/// use hostcall::{run, HostOptions};
///
/// let sum = run(&HostOptions::default())?;
/// assert_eq!(sum, 4);
/// # Ok::<(), hostcall::HostError>(())
/// ```
pub fn run(options: &HostOptions) -> Result<i64, HostError> {
    let layout = Platform::current().layout();
    let (home, app_dir) = match (&options.home, &options.app_dir) {
        (Some(home), Some(app)) => (home.clone(), app.clone()),
        (home, app) => {
            let base = resource_base()?;
            (
                home.clone().unwrap_or_else(|| layout.home_dir(&base)),
                app.clone().unwrap_or_else(|| layout.app_dir(&base)),
            )
        }
    };
    debug!("runtime home: {}", home.display());
    debug!("app directory: {}", app_dir.display());

    let primary = RuntimeConfiguration::builder(options.program_name.as_str())
        .home(home)
        .search_path(app_dir.clone())
        .build()?;

    let mut runtime = RuntimeHandle::new();
    let mode = start_with_fallback(&mut runtime, primary, || {
        RuntimeConfiguration::ambient_default(options.program_name.as_str())
    })?;
    info!("runtime started ({:?})", mode);

    let args: Vec<NativeValue> = options.args.iter().copied().map(NativeValue::from).collect();
    let result = ModuleInvoker::new(&runtime)
        .with_module_dir(app_dir)
        .invoke::<i64>(&options.module, &options.function, &args);

    runtime.finalize();
    Ok(result?)
}
