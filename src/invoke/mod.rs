//! Round-trip calls into guest modules
//!
//! One call runs six steps against a running [`RuntimeHandle`]:
//!
//! ```text
//! module dir ─► search path ─► import (Owned module)
//!                                   │
//!                                   ▼
//!                       export (Borrowed callable)
//!                                   │
//!   &[NativeValue] ─► marshal (Owned tuple, steals each Owned value)
//!                                   │
//!                                   ▼
//!                  call ─► Owned results ─► R: FromForeign
//! ```
//!
//! Every handle is an RAII guard, so an early `?` return releases whatever
//! was acquired so far in reverse order.

use std::fmt;
use std::fs;
use std::path::PathBuf;

use thiserror::Error;
use tracing::{debug, info};
use wasmtime::{Extern, Instance, Store, Val, ValType};

use crate::runtime::objects::ForeignObject;
use crate::runtime::{loader, Borrowed, Owned, RuntimeError, RuntimeHandle, Session};

/// Native argument values accepted by [`ModuleInvoker::invoke`]
///
/// `Str` exists so callers can hand over text; it has no WebAssembly
/// representation and is always rejected during marshalling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeValue {
    I64(i64),
    Str(String),
}

impl fmt::Display for NativeValue {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            NativeValue::I64(v) => write!(f, "{}", v),
            NativeValue::Str(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for NativeValue {
    fn from(v: i64) -> Self {
        NativeValue::I64(v)
    }
}

impl From<&str> for NativeValue {
    fn from(v: &str) -> Self {
        NativeValue::Str(v.to_string())
    }
}

/// Native types a single foreign result can be extracted into
pub trait FromForeign: Sized {
    /// Name used in conversion errors
    const TYPE_NAME: &'static str;

    fn from_foreign(val: &Val) -> Option<Self>;
}

impl FromForeign for i64 {
    const TYPE_NAME: &'static str = "i64";

    fn from_foreign(val: &Val) -> Option<Self> {
        match val {
            Val::I64(v) => Some(*v),
            Val::I32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }
}

impl FromForeign for f64 {
    const TYPE_NAME: &'static str = "f64";

    fn from_foreign(val: &Val) -> Option<Self> {
        match val {
            Val::F64(bits) => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }
}

/// Invocation errors
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error("module `{module}` not found; searched [{}]", display_dirs(.searched))]
    ModuleNotFound {
        module: String,
        searched: Vec<PathBuf>,
    },

    #[error("module `{module}` at {} failed to load: {reason}", .path.display())]
    ModuleLoad {
        module: String,
        path: PathBuf,
        reason: String,
    },

    #[error("module `{module}` has no export named `{symbol}`")]
    SymbolNotFound { module: String, symbol: String },

    #[error("export `{symbol}` of module `{module}` is a {kind}, not a function")]
    NotCallable {
        module: String,
        symbol: String,
        kind: &'static str,
    },

    #[error("argument {index} of `{function}`: {reason}")]
    ArgumentConversion {
        function: String,
        index: usize,
        reason: String,
    },

    #[error("call to `{function}` failed: {message}")]
    Invocation { function: String, message: String },

    #[error("result of `{function}`: expected {expected}, found {found}")]
    ResultConversion {
        function: String,
        expected: &'static str,
        found: String,
    },
}

fn display_dirs(dirs: &[PathBuf]) -> String {
    dirs.iter()
        .map(|d| d.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn val_type_name(val: &Val) -> &'static str {
    match val {
        Val::I32(_) => "i32",
        Val::I64(_) => "i64",
        Val::F32(_) => "f32",
        Val::F64(_) => "f64",
        Val::V128(_) => "v128",
        _ => "reference",
    }
}

fn valtype_name(ty: &ValType) -> &'static str {
    match ty {
        ValType::I32 => "i32",
        ValType::I64 => "i64",
        ValType::F32 => "f32",
        ValType::F64 => "f64",
        ValType::V128 => "v128",
        _ => "reference",
    }
}

fn extern_kind(ext: &Extern) -> &'static str {
    match ext {
        Extern::Global(_) => "global",
        Extern::Table(_) => "table",
        Extern::Memory(_) => "memory",
        _ => "non-function export",
    }
}

/// Convert one argument to the parameter's type
fn to_foreign(
    value: &NativeValue,
    ty: &ValType,
) -> Result<Val, String> {
    match (ty, value) {
        (_, NativeValue::Str(_)) => Err(format!(
            "string {} has no WebAssembly representation",
            value
        )),
        (ValType::I64, NativeValue::I64(v)) => Ok(Val::I64(*v)),
        (ValType::I32, NativeValue::I64(v)) => i32::try_from(*v)
            .map(Val::I32)
            .map_err(|_| format!("{} is out of range for i32", v)),
        (ty, value) => Err(format!(
            "cannot pass i64 `{}` as {}",
            value,
            valtype_name(ty)
        )),
    }
}

/// Run `f` against the store owned by a module handle
fn with_store<R>(
    module: &Owned<'_>,
    f: impl FnOnce(&mut Store<()>) -> R,
) -> Option<R> {
    module.with_mut(|object| match object {
        ForeignObject::Module { store, .. } => Some(f(store)),
        _ => None,
    })
}

/// Calls one function of one guest module on a running runtime.
///
/// # Usage
///
/// ```no_run
/// # use hostcall::runtime::RuntimeHandle;
/// use hostcall::invoke::{ModuleInvoker, NativeValue};
///
/// # let runtime = RuntimeHandle::new();
/// let sum: i64 = ModuleInvoker::new(&runtime)
///     .with_module_dir("app")
///     .invoke("Sample", "add", &[NativeValue::I64(2), NativeValue::I64(2)])?;
/// # Ok::<(), hostcall::invoke::InvokeError>(())
/// ```
#[derive(Debug)]
pub struct ModuleInvoker<'rt> {
    runtime: &'rt RuntimeHandle,
    module_dir: Option<PathBuf>,
}

impl<'rt> ModuleInvoker<'rt> {
    pub fn new(runtime: &'rt RuntimeHandle) -> Self {
        Self {
            runtime,
            module_dir: None,
        }
    }

    /// Directory that must be searched for the module
    pub fn with_module_dir(
        mut self,
        dir: impl Into<PathBuf>,
    ) -> Self {
        self.module_dir = Some(dir.into());
        self
    }

    /// Import `module`, call `function` with `args` and extract the result
    pub fn invoke<R: FromForeign>(
        &self,
        module: &str,
        function: &str,
        args: &[NativeValue],
    ) -> Result<R, InvokeError> {
        let session = self.runtime.session()?;

        if let Some(dir) = &self.module_dir {
            self.runtime.ensure_search_path(dir)?;
        }

        let imported = import(session, module)?;
        let callable = resolve(&imported, module, function)?;
        let arg_tuple = marshal(session, &imported, &callable, function, args)?;

        let params = arg_tuple.with(|object| match object {
            ForeignObject::Tuple(items) => items.clone(),
            _ => Vec::new(),
        });

        info!(
            "calling {}.{}({})",
            module,
            function,
            args.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let func = callable.func();
        let results = with_store(&imported, |store| {
            let mut results = vec![Val::I32(0); func.ty(&*store).results().len()];
            func.call(&mut *store, &params, &mut results)
                .map(|()| results)
                .map_err(|e| format!("{:#}", e))
        })
        .unwrap_or_else(|| Err(format!("`{}` is not an instantiated module", module)))
        .map_err(|message| InvokeError::Invocation {
            function: function.to_string(),
            message,
        })?;

        let result = Owned::acquire(session, ForeignObject::Results(results));
        let value = extract::<R>(&result, function)?;

        drop(arg_tuple);
        drop(result);
        drop(imported);
        Ok(value)
    }
}

/// Import and instantiate `name` from the live search path.
///
/// Each import gets its own store, owned by the returned module handle.
fn import<'rt>(
    session: &'rt Session,
    name: &str,
) -> Result<Owned<'rt>, InvokeError> {
    let path = {
        let search_path = session.search_path.borrow();
        loader::locate(search_path.iter(), name).ok_or_else(|| InvokeError::ModuleNotFound {
            module: name.to_string(),
            searched: search_path.as_slice().to_vec(),
        })?
    };
    debug!("module `{}` resolved to {}", name, path.display());

    let load_error = |reason: String| InvokeError::ModuleLoad {
        module: name.to_string(),
        path: path.clone(),
        reason,
    };

    if path.extension().is_some_and(|ext| ext == "wasm") {
        let bytes = fs::read(&path).map_err(|e| load_error(e.to_string()))?;
        if !loader::is_valid_wasm(&bytes) {
            return Err(load_error("missing WebAssembly magic header".to_string()));
        }
    }

    let compiled = session
        .compile(&path)
        .map_err(|e| load_error(format!("{:#}", e)))?;
    let mut store = session.create_store();
    let instance = Instance::new(&mut store, &compiled, &[])
        .map_err(|e| load_error(format!("{:#}", e)))?;

    Ok(Owned::acquire(
        session,
        ForeignObject::Module {
            name: name.to_string(),
            store,
            instance,
        },
    ))
}

/// Borrow the callable export `symbol` of an imported module
fn resolve<'m>(
    module: &'m Owned<'_>,
    module_name: &str,
    symbol: &str,
) -> Result<Borrowed<'m>, InvokeError> {
    let export = module
        .with_mut(|object| match object {
            ForeignObject::Module {
                store, instance, ..
            } => instance.get_export(&mut *store, symbol),
            _ => None,
        });

    match export {
        Some(Extern::Func(func)) => Ok(Borrowed::new(module, func)),
        Some(other) => Err(InvokeError::NotCallable {
            module: module_name.to_string(),
            symbol: symbol.to_string(),
            kind: extern_kind(&other),
        }),
        None => Err(InvokeError::SymbolNotFound {
            module: module_name.to_string(),
            symbol: symbol.to_string(),
        }),
    }
}

/// Build the owned argument tuple for `callable`
fn marshal<'rt>(
    session: &'rt Session,
    module: &Owned<'rt>,
    callable: &Borrowed<'_>,
    function: &str,
    args: &[NativeValue],
) -> Result<Owned<'rt>, InvokeError> {
    let func = callable.func();
    let params: Vec<ValType> =
        with_store(module, |store| func.ty(&*store).params().collect()).unwrap_or_default();

    if params.len() != args.len() {
        return Err(InvokeError::ArgumentConversion {
            function: function.to_string(),
            index: args.len().min(params.len()),
            reason: format!("expected {} arguments, got {}", params.len(), args.len()),
        });
    }

    let tuple = Owned::acquire(session, ForeignObject::Tuple(Vec::with_capacity(args.len())));
    for (index, (value, ty)) in args.iter().zip(&params).enumerate() {
        let val = to_foreign(value, ty).map_err(|reason| InvokeError::ArgumentConversion {
            function: function.to_string(),
            index,
            reason,
        })?;
        Owned::acquire(session, ForeignObject::Value(val)).steal_into(&tuple);
    }
    Ok(tuple)
}

fn extract<R: FromForeign>(
    result: &Owned<'_>,
    function: &str,
) -> Result<R, InvokeError> {
    let error = |found: String| InvokeError::ResultConversion {
        function: function.to_string(),
        expected: R::TYPE_NAME,
        found,
    };

    result.with(|object| match object {
        ForeignObject::Results(values) => match values.as_slice() {
            [single] => R::from_foreign(single).ok_or_else(|| error(val_type_name(single).to_string())),
            [] => Err(error("no value".to_string())),
            many => Err(error(format!("{} values", many.len()))),
        },
        _ => Err(error("a non-result object".to_string())),
    })
}

/// Shorthand for `ModuleInvoker::new(runtime).invoke(...)`
pub fn invoke<R: FromForeign>(
    runtime: &RuntimeHandle,
    module: &str,
    function: &str,
    args: &[NativeValue],
) -> Result<R, InvokeError> {
    ModuleInvoker::new(runtime).invoke(module, function, args)
}
