//! Foreign runtime lifecycle
//!
//! ```text
//! Uninitialized --start(config)--> Running --finalize()--> Finalized
//!       |                                                      ^
//!       +----------------------finalize() (no-op)--------------+ (stays Uninitialized)
//! ```
//!
//! The engine is treated as a process singleton: a process-wide slot admits
//! one running [`RuntimeHandle`] at a time. Dropping a running handle
//! finalizes it, so every exit path tears the runtime down.

pub mod loader;
pub mod objects;

use std::cell::RefCell;
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};
use wasmtime::{Engine, Module, Store};

use crate::config::{IsolationFlags, RuntimeConfiguration, SearchPathList};
use crate::util::config::{load_settings, EngineSettings, OptLevel, RuntimeSettings};

pub use objects::{Borrowed, HandleStats, ObjectKind, Owned};

/// Supplies the runtime home for ambient starts without one
pub const HOME_ENV: &str = "HOSTCALL_HOME";

/// Extra module directories for ambient starts
pub const PATH_ENV: &str = "HOSTCALL_PATH";

/// Extension directory inside the home, loaded by ambient starts
pub const SITE_DIR: &str = "site";

/// Runtime lifecycle errors
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The runtime could not be brought up
    #[error("runtime initialization failed: {0}")]
    Init(String),

    /// Operation not allowed in the current lifecycle state
    #[error("invalid runtime state: {0}")]
    InvalidState(String),
}

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Uninitialized,
    Running,
    Finalized,
}

/// How a fallback-capable start succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// The explicit configuration was used
    Configured,
    /// The explicit configuration failed; the ambient default was used
    AmbientFallback,
}

static LIVE_RUNTIME: Mutex<Option<u64>> = parking_lot::const_mutex(None);
static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Whether any runtime is running in this process
pub fn is_runtime_live() -> bool {
    LIVE_RUNTIME.lock().is_some()
}

/// Claim on the process-wide runtime slot, released on drop
#[derive(Debug)]
struct LiveSlot {
    id: u64,
}

impl LiveSlot {
    fn claim() -> Result<Self, RuntimeError> {
        let mut live = LIVE_RUNTIME.lock();
        if let Some(id) = *live {
            return Err(RuntimeError::InvalidState(format!(
                "runtime #{} is already running in this process",
                id
            )));
        }
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        *live = Some(id);
        Ok(Self { id })
    }
}

impl Drop for LiveSlot {
    fn drop(&mut self) {
        let mut live = LIVE_RUNTIME.lock();
        if *live == Some(self.id) {
            *live = None;
        }
    }
}

/// Everything owned by a running runtime
pub(crate) struct Session {
    pub(crate) objects: RefCell<objects::ObjectTable>,
    pub(crate) search_path: RefCell<SearchPathList>,
    compiled: RefCell<HashMap<PathBuf, Module>>,
    engine: Engine,
    flags: IsolationFlags,
    home: Option<PathBuf>,
    program_name: String,
    argv: Vec<String>,
    slot: LiveSlot,
}

impl Session {
    fn open(
        config: RuntimeConfiguration,
        slot: LiveSlot,
    ) -> Result<Self, RuntimeError> {
        let (flags, home, program_name, configured) = config.into_parts();

        let (home, home_from_env) = match home {
            Some(home) => (Some(home), false),
            None if flags.use_environment => {
                let home = env::var_os(HOME_ENV)
                    .filter(|v| !v.is_empty())
                    .map(PathBuf::from);
                let from_env = home.is_some();
                (home, from_env)
            }
            None => (None, false),
        };

        let settings = match &home {
            Some(home) => {
                check_home(home)?;
                load_settings(home).map_err(|e| RuntimeError::Init(e.to_string()))?
            }
            None => RuntimeSettings::default(),
        };

        let search_path = live_search_path(flags, home.as_deref(), home_from_env, configured);
        let argv = if flags.parse_argv {
            env::args().collect()
        } else {
            vec![program_name.clone()]
        };

        let engine = build_engine(flags, &settings.engine)?;

        Ok(Self {
            objects: RefCell::new(objects::ObjectTable::new()),
            search_path: RefCell::new(search_path),
            compiled: RefCell::new(HashMap::new()),
            engine,
            flags,
            home,
            program_name,
            argv,
            slot,
        })
    }

    /// Fresh store for one module instance; dropping it frees the instance
    pub(crate) fn create_store(&self) -> Store<()> {
        Store::new(&self.engine, ())
    }

    /// Compile a module file, reusing earlier compilations of the same path
    pub(crate) fn compile(
        &self,
        path: &Path,
    ) -> wasmtime::Result<Module> {
        if let Some(module) = self.compiled.borrow().get(path) {
            debug!("module cache hit: {}", path.display());
            return Ok(module.clone());
        }

        let module = Module::from_file(&self.engine, path)?;
        self.compiled
            .borrow_mut()
            .insert(path.to_path_buf(), module.clone());
        Ok(module)
    }

    #[cfg(test)]
    pub(crate) fn cached_modules(&self) -> usize {
        self.compiled.borrow().len()
    }
}

fn check_home(home: &Path) -> Result<(), RuntimeError> {
    fs::read_dir(home).map(drop).map_err(|e| {
        RuntimeError::Init(format!(
            "runtime home {} is not a readable directory: {}",
            home.display(),
            e
        ))
    })
}

/// Live search order: `HOSTCALL_PATH`, env-supplied home, configured
/// entries, `<home>/site`, working directory. Ambient sources only appear
/// when their flag allows them.
fn live_search_path(
    flags: IsolationFlags,
    home: Option<&Path>,
    home_from_env: bool,
    configured: SearchPathList,
) -> SearchPathList {
    let mut live = SearchPathList::new();

    if flags.use_environment {
        if let Some(paths) = env::var_os(PATH_ENV) {
            for dir in env::split_paths(&paths) {
                if !dir.as_os_str().is_empty() {
                    live.push(dir);
                }
            }
        }
    }
    if home_from_env {
        if let Some(home) = home {
            live.push(home);
        }
    }

    for dir in configured {
        live.push(dir);
    }

    if flags.site_import {
        if let Some(site) = home.map(|h| h.join(SITE_DIR)).filter(|s| s.is_dir()) {
            live.push(site);
        }
    }
    if flags.use_environment {
        if let Ok(cwd) = env::current_dir() {
            live.push(cwd);
        }
    }

    live
}

fn build_engine(
    flags: IsolationFlags,
    settings: &EngineSettings,
) -> Result<Engine, RuntimeError> {
    let opt_level = match settings.opt_level {
        OptLevel::None => wasmtime::OptLevel::None,
        OptLevel::Speed => wasmtime::OptLevel::Speed,
        OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
    };

    let mut config = wasmtime::Config::new();
    config
        .signals_based_traps(flags.install_signal_handlers)
        .max_wasm_stack(settings.max_wasm_stack)
        .wasm_backtrace(settings.wasm_backtrace)
        .cranelift_opt_level(opt_level);

    Engine::new(&config)
        .map_err(|e| RuntimeError::Init(format!("engine rejected configuration: {:#}", e)))
}

enum State {
    Uninitialized,
    Running(Box<Session>),
    Finalized,
}

/// Handle to the one foreign runtime of this process.
///
/// # Usage
///
/// ```no_run
/// use hostcall::config::RuntimeConfiguration;
/// use hostcall::runtime::RuntimeHandle;
///
/// let config = RuntimeConfiguration::builder("hostcall")
///     .home("runtime")
///     .search_path("app")
///     .build()?;
///
/// let mut runtime = RuntimeHandle::new();
/// runtime.start(config)?;
/// // ... invoke guest code ...
/// runtime.finalize();
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct RuntimeHandle {
    state: State,
}

impl RuntimeHandle {
    /// Create an uninitialized handle
    pub fn new() -> Self {
        Self {
            state: State::Uninitialized,
        }
    }

    /// Bring the runtime up with `config`.
    ///
    /// On failure the handle stays uninitialized and needs no finalize.
    pub fn start(
        &mut self,
        config: RuntimeConfiguration,
    ) -> Result<(), RuntimeError> {
        match self.state {
            State::Uninitialized => {}
            State::Running(_) => {
                return Err(RuntimeError::InvalidState(
                    "start called on a running runtime".to_string(),
                ))
            }
            State::Finalized => {
                return Err(RuntimeError::InvalidState(
                    "start called on a finalized runtime".to_string(),
                ))
            }
        }

        let slot = LiveSlot::claim()?;
        let session = Session::open(config, slot)?;
        info!(
            "runtime #{} started as `{}` ({})",
            session.slot.id,
            session.program_name,
            if session.flags.is_isolated() {
                "isolated"
            } else {
                "ambient"
            }
        );
        debug!("module search path: {:?}", session.search_path.borrow().as_slice());

        self.state = State::Running(Box::new(session));
        Ok(())
    }

    /// Tear the runtime down. Safe to call in any state, any number of times.
    pub fn finalize(&mut self) {
        match std::mem::replace(&mut self.state, State::Finalized) {
            State::Running(session) => {
                let (stats, remaining) = {
                    let table = session.objects.borrow();
                    (table.stats(), table.len())
                };
                if remaining > 0 {
                    warn!(
                        "finalizing with {} foreign objects still referenced",
                        remaining
                    );
                }
                let id = session.slot.id;
                drop(session);
                info!(
                    "runtime #{} finalized ({} handles acquired, {} released)",
                    id, stats.acquired, stats.released
                );
            }
            State::Uninitialized => self.state = State::Uninitialized,
            State::Finalized => {}
        }
    }

    pub fn state(&self) -> RuntimeState {
        match self.state {
            State::Uninitialized => RuntimeState::Uninitialized,
            State::Running(_) => RuntimeState::Running,
            State::Finalized => RuntimeState::Finalized,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, State::Running(_))
    }

    pub(crate) fn session(&self) -> Result<&Session, RuntimeError> {
        match &self.state {
            State::Running(session) => Ok(&**session),
            State::Uninitialized => Err(RuntimeError::InvalidState(
                "runtime has not been started".to_string(),
            )),
            State::Finalized => Err(RuntimeError::InvalidState(
                "runtime has been finalized".to_string(),
            )),
        }
    }

    /// Program identity of the running runtime
    pub fn program_name(&self) -> Option<&str> {
        self.session().ok().map(|s| s.program_name.as_str())
    }

    /// Argument vector visible to the runtime
    pub fn argv(&self) -> Option<&[String]> {
        self.session().ok().map(|s| s.argv.as_slice())
    }

    /// Home directory the runtime was started with
    pub fn home(&self) -> Option<&Path> {
        self.session().ok().and_then(|s| s.home.as_deref())
    }

    /// Snapshot of the live module search order
    pub fn search_path(&self) -> Vec<PathBuf> {
        self.session()
            .map(|s| s.search_path.borrow().as_slice().to_vec())
            .unwrap_or_default()
    }

    /// Leak-detection counters of the running runtime
    pub fn handle_stats(&self) -> Option<HandleStats> {
        self.session().ok().map(|s| s.objects.borrow().stats())
    }

    /// Make `dir` visible to module resolution.
    ///
    /// Inserts it ahead of every other entry unless it is already present;
    /// returns whether it was inserted.
    pub fn ensure_search_path(
        &self,
        dir: &Path,
    ) -> Result<bool, RuntimeError> {
        let session = self.session()?;
        // Entries are absolute, so compare against the absolute form
        let dir = std::path::absolute(dir).unwrap_or_else(|_| dir.to_path_buf());
        let mut search_path = session.search_path.borrow_mut();
        if search_path.contains(&dir) {
            return Ok(false);
        }
        debug!("prepending {} to module search path", dir.display());
        search_path.push_front(dir);
        Ok(true)
    }
}

impl Default for RuntimeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RuntimeHandle {
    fn drop(&mut self) {
        self.finalize();
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RuntimeHandle")
            .field("state", &self.state())
            .field("program_name", &self.program_name())
            .finish_non_exhaustive()
    }
}

/// Start with `primary`, falling back to `fallback()` exactly once.
///
/// Only an initialization failure triggers the fallback; the failure is
/// logged at `warn` level so a misconfigured deployment stays visible.
pub fn start_with_fallback<F>(
    runtime: &mut RuntimeHandle,
    primary: RuntimeConfiguration,
    fallback: F,
) -> Result<StartMode, RuntimeError>
where
    F: FnOnce() -> RuntimeConfiguration,
{
    match runtime.start(primary) {
        Ok(()) => Ok(StartMode::Configured),
        Err(RuntimeError::Init(reason)) => {
            warn!(
                "explicit runtime configuration failed: {}; retrying with the default ambient configuration",
                reason
            );
            runtime.start(fallback())?;
            Ok(StartMode::AmbientFallback)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests;
