//! Runtime lifecycle through the public API

use std::fs;

use hostcall::config::{self, RuntimeConfiguration};
use hostcall::invoke::{invoke, ModuleInvoker, NativeValue};
use hostcall::paths::{executable_directory, Platform};
use hostcall::runtime::{start_with_fallback, RuntimeError, RuntimeHandle, RuntimeState, StartMode};

use crate::common::{layout, runtime_lock};

#[test]
fn test_executable_directory_exists() {
    let dir = executable_directory().unwrap();
    assert!(dir.is_absolute());
    assert!(dir.is_dir());
}

#[test]
fn test_configuration_from_exe_dir() {
    let layout = layout();
    let exe_dir = layout.home.parent().unwrap().join("bin");
    let config = config::build(&exe_dir, Platform::Linux, "hostcall", [layout.app.clone()]).unwrap();

    assert_eq!(config.home(), Some(exe_dir.join("runtime").as_path()));
    assert_eq!(
        config.search_paths().as_slice(),
        &[exe_dir.join("runtime"), layout.app.clone()]
    );
    assert!(config.flags().is_isolated());
}

#[test]
fn test_many_calls_keep_handles_balanced() {
    let _lock = runtime_lock();
    let layout = layout();
    let config = RuntimeConfiguration::builder("hostcall")
        .home(&layout.home)
        .search_path(&layout.app)
        .build()
        .unwrap();

    let mut runtime = RuntimeHandle::new();
    runtime.start(config).unwrap();
    for i in 0..50i64 {
        let sum: i64 = invoke(&runtime, "Sample", "add", &[i.into(), 1i64.into()]).unwrap();
        assert_eq!(sum, i + 1);
    }
    for _ in 0..5 {
        let _ = invoke::<i64>(&runtime, "Sample", "missing", &[]);
        let _ = invoke::<i64>(&runtime, "Sample", "add", &[NativeValue::from("x"), 1i64.into()]);
        let _ = invoke::<i64>(&runtime, "Sample", "fail", &[1i64.into(), 2i64.into()]);
    }

    let stats = runtime.handle_stats().unwrap();
    assert_eq!(stats.live(), 0);
    assert_eq!(stats.acquired, stats.released);
    assert!(stats.acquired > 0);

    runtime.finalize();
    assert_eq!(runtime.state(), RuntimeState::Finalized);
    assert!(runtime.handle_stats().is_none());
}

#[test]
fn test_invoke_after_finalize_is_invalid_state() {
    let _lock = runtime_lock();
    let layout = layout();
    let config = RuntimeConfiguration::builder("hostcall")
        .home(&layout.home)
        .build()
        .unwrap();

    let mut runtime = RuntimeHandle::new();
    runtime.start(config).unwrap();
    runtime.finalize();

    let err = ModuleInvoker::new(&runtime)
        .with_module_dir(&layout.app)
        .invoke::<i64>("Sample", "add", &[2i64.into(), 2i64.into()])
        .unwrap_err();
    assert!(err.to_string().contains("finalized"));
}

#[test]
fn test_fallback_then_both_fail() {
    let _lock = runtime_lock();
    let layout = layout();
    fs::write(layout.home.join("runtime.toml"), "[engine]\nmax_wasm_stack = 0\n").unwrap();

    let primary = RuntimeConfiguration::builder("hostcall")
        .home(&layout.home)
        .build()
        .unwrap();
    let mut attempts = 0;
    let mut runtime = RuntimeHandle::new();
    let err = start_with_fallback(&mut runtime, primary, || {
        attempts += 1;
        RuntimeConfiguration::builder("hostcall")
            .ambient()
            .home(&layout.home)
            .build()
            .unwrap()
    })
    .unwrap_err();

    assert!(matches!(err, RuntimeError::Init(_)));
    assert_eq!(attempts, 1);
    assert_eq!(runtime.state(), RuntimeState::Uninitialized);

    fs::remove_file(layout.home.join("runtime.toml")).unwrap();
    let primary = RuntimeConfiguration::builder("hostcall")
        .home(&layout.home)
        .build()
        .unwrap();
    let mode = start_with_fallback(&mut runtime, primary, || {
        RuntimeConfiguration::ambient_default("hostcall")
    })
    .unwrap();
    assert_eq!(mode, StartMode::Configured);
}
