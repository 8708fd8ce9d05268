//! Full host runs through the library entry point

use hostcall::runtime::is_runtime_live;
use hostcall::{run, ErrorKind, HostOptions};

use crate::common::{layout, runtime_lock, Layout};

fn options(
    layout: &Layout,
    module: &str,
    function: &str,
) -> HostOptions {
    HostOptions {
        home: Some(layout.home.clone()),
        app_dir: Some(layout.app.clone()),
        module: module.to_string(),
        function: function.to_string(),
        ..HostOptions::default()
    }
}

#[test]
fn test_sample_add_returns_four() {
    let _lock = runtime_lock();
    let layout = layout();

    assert_eq!(run(&options(&layout, "Sample", "add")).unwrap(), 4);
    assert!(!is_runtime_live());
}

#[test]
fn test_custom_arguments() {
    let _lock = runtime_lock();
    let layout = layout();

    let opts = HostOptions {
        args: vec![-40, 82],
        ..options(&layout, "Sample", "add")
    };
    assert_eq!(run(&opts).unwrap(), 42);
}

#[test]
fn test_missing_module_finalizes() {
    let _lock = runtime_lock();
    let layout = layout();

    let err = run(&options(&layout, "DoesNotExist", "add")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModuleNotFound);
    assert!(!is_runtime_live());
}

#[test]
fn test_missing_symbol_finalizes() {
    let _lock = runtime_lock();
    let layout = layout();

    let err = run(&options(&layout, "Sample", "missing")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SymbolNotFound);
    assert!(!is_runtime_live());
}

#[test]
fn test_other_failure_kinds() {
    let _lock = runtime_lock();
    let layout = layout();

    let err = run(&options(&layout, "Sample", "memory")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotCallable);

    let err = run(&options(&layout, "Sample", "fail")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvocationError);
    assert!(err.to_string().contains("unreachable"));

    let opts = HostOptions {
        args: vec![1, 2, 3],
        ..options(&layout, "Sample", "add")
    };
    assert_eq!(
        run(&opts).unwrap_err().kind(),
        ErrorKind::ArgumentConversionError
    );
    assert!(!is_runtime_live());
}

#[test]
fn test_missing_home_falls_back() {
    let _lock = runtime_lock();
    let layout = layout();

    let opts = HostOptions {
        home: Some(layout.home.join("missing")),
        ..options(&layout, "Sample", "add")
    };
    assert_eq!(run(&opts).unwrap(), 4);
    assert!(!is_runtime_live());
}
