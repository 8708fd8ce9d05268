//! Runtime lifecycle unit tests

use crate::config::RuntimeConfiguration;
use crate::runtime::{
    is_runtime_live, start_with_fallback, RuntimeError, RuntimeHandle, RuntimeState, StartMode,
};
use crate::test_support::{fixture, runtime_lock};
use std::fs;
use std::path::Path;

fn isolated(
    home: &Path,
    app: &Path,
) -> RuntimeConfiguration {
    RuntimeConfiguration::builder("hostcall-test")
        .home(home)
        .search_path(app)
        .build()
        .unwrap()
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_start_isolated() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();

        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(runtime.program_name(), Some("hostcall-test"));
        assert_eq!(runtime.argv().unwrap(), ["hostcall-test".to_string()]);
        assert_eq!(runtime.home(), Some(fx.home.as_path()));
        assert_eq!(runtime.search_path(), vec![fx.home.clone(), fx.app.clone()]);
        assert_eq!(runtime.handle_stats().unwrap().live(), 0);

        runtime.finalize();
        assert_eq!(runtime.state(), RuntimeState::Finalized);
        assert!(runtime.search_path().is_empty());
    }

    #[test]
    fn test_start_twice_is_invalid_state() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();
        let err = runtime.start(isolated(&fx.home, &fx.app)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
        assert!(runtime.is_running());
    }

    #[test]
    fn test_finalize_uninitialized_is_noop() {
        let _lock = runtime_lock();
        let mut runtime = RuntimeHandle::new();
        runtime.finalize();
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();
        runtime.finalize();
        runtime.finalize();
        assert_eq!(runtime.state(), RuntimeState::Finalized);
        assert!(!is_runtime_live());
    }

    #[test]
    fn test_start_after_finalize_is_invalid_state() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();
        runtime.finalize();
        let err = runtime.start(isolated(&fx.home, &fx.app)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
    }

    #[test]
    fn test_drop_finalizes() {
        let _lock = runtime_lock();
        let fx = fixture();

        {
            let mut runtime = RuntimeHandle::new();
            runtime.start(isolated(&fx.home, &fx.app)).unwrap();
            assert!(is_runtime_live());
        }
        assert!(!is_runtime_live());
    }
}

#[cfg(test)]
mod singleton_tests {
    use super::*;

    #[test]
    fn test_second_running_runtime_is_rejected() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut first = RuntimeHandle::new();
        first.start(isolated(&fx.home, &fx.app)).unwrap();

        let mut second = RuntimeHandle::new();
        let err = second.start(isolated(&fx.home, &fx.app)).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
        assert_eq!(second.state(), RuntimeState::Uninitialized);

        first.finalize();
        second.start(isolated(&fx.home, &fx.app)).unwrap();
        assert!(second.is_running());
    }
}

#[cfg(test)]
mod init_failure_tests {
    use super::*;

    #[test]
    fn test_missing_home_fails_init() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        let err = runtime
            .start(isolated(&fx.home.join("missing"), &fx.app))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Init(_)));
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
        assert!(!is_runtime_live());
    }

    #[test]
    fn test_home_that_is_a_file_fails_init() {
        let _lock = runtime_lock();
        let fx = fixture();
        let file = fx.home.join("not-a-dir");
        fs::write(&file, "x").unwrap();

        let mut runtime = RuntimeHandle::new();
        assert!(matches!(
            runtime.start(isolated(&file, &fx.app)),
            Err(RuntimeError::Init(_))
        ));
    }

    #[test]
    fn test_corrupt_settings_fail_init() {
        let _lock = runtime_lock();
        let fx = fixture();
        fs::write(fx.home.join("runtime.toml"), "[engine\n").unwrap();

        let mut runtime = RuntimeHandle::new();
        let err = runtime.start(isolated(&fx.home, &fx.app)).unwrap_err();
        assert!(err.to_string().contains("runtime.toml"));
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
    }

    #[test]
    fn test_valid_settings_are_applied() {
        let _lock = runtime_lock();
        let fx = fixture();
        fs::write(
            fx.home.join("runtime.toml"),
            "[engine]\nopt_level = \"none\"\nwasm_backtrace = false\n",
        )
        .unwrap();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();
        assert!(runtime.is_running());
    }
}

#[cfg(test)]
mod fallback_tests {
    use super::*;

    #[test]
    fn test_fallback_not_used_when_primary_starts() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut calls = 0;
        let mut runtime = RuntimeHandle::new();
        let mode = start_with_fallback(&mut runtime, isolated(&fx.home, &fx.app), || {
            calls += 1;
            RuntimeConfiguration::ambient_default("fallback")
        })
        .unwrap();

        assert_eq!(mode, StartMode::Configured);
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_fallback_used_once_when_primary_fails() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut calls = 0;
        let mut runtime = RuntimeHandle::new();
        let mode = start_with_fallback(
            &mut runtime,
            isolated(&fx.home.join("missing"), &fx.app),
            || {
                calls += 1;
                RuntimeConfiguration::ambient_default("fallback")
            },
        )
        .unwrap();

        assert_eq!(mode, StartMode::AmbientFallback);
        assert_eq!(calls, 1);
        assert_eq!(runtime.program_name(), Some("fallback"));
    }

    #[test]
    fn test_both_attempts_fail() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut calls = 0;
        let mut runtime = RuntimeHandle::new();
        let err = start_with_fallback(
            &mut runtime,
            isolated(&fx.home.join("missing"), &fx.app),
            || {
                calls += 1;
                RuntimeConfiguration::builder("fallback")
                    .ambient()
                    .home(fx.home.join("also-missing"))
                    .build()
                    .unwrap()
            },
        )
        .unwrap_err();

        assert!(matches!(err, RuntimeError::Init(_)));
        assert_eq!(calls, 1);
        assert_eq!(runtime.state(), RuntimeState::Uninitialized);
        assert!(!is_runtime_live());
    }

    #[test]
    fn test_invalid_state_is_not_retried() {
        let _lock = runtime_lock();
        let fx = fixture();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();

        let mut calls = 0;
        let err = start_with_fallback(&mut runtime, isolated(&fx.home, &fx.app), || {
            calls += 1;
            RuntimeConfiguration::ambient_default("fallback")
        })
        .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
        assert_eq!(calls, 0);
    }
}

#[cfg(test)]
mod search_path_tests {
    use super::*;

    #[test]
    fn test_ensure_search_path_prepends_once() {
        let _lock = runtime_lock();
        let fx = fixture();
        let extra = fx.home.join("extra");

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();

        assert!(runtime.ensure_search_path(&extra).unwrap());
        assert!(!runtime.ensure_search_path(&extra).unwrap());
        assert!(!runtime.ensure_search_path(&fx.app).unwrap());
        assert_eq!(
            runtime.search_path(),
            vec![extra, fx.home.clone(), fx.app.clone()]
        );
    }

    #[test]
    fn test_ensure_search_path_requires_running() {
        let _lock = runtime_lock();
        let runtime = RuntimeHandle::new();
        assert!(matches!(
            runtime.ensure_search_path(Path::new("/tmp")),
            Err(RuntimeError::InvalidState(_))
        ));
    }

    #[test]
    fn test_site_directory_only_for_ambient_starts() {
        let _lock = runtime_lock();
        let fx = fixture();
        let site = fx.home.join("site");
        fs::create_dir_all(&site).unwrap();

        let mut runtime = RuntimeHandle::new();
        runtime.start(isolated(&fx.home, &fx.app)).unwrap();
        assert!(!runtime.search_path().contains(&site));
        runtime.finalize();

        let ambient = RuntimeConfiguration::builder("ambient")
            .ambient()
            .home(&fx.home)
            .search_path(&fx.app)
            .build()
            .unwrap();
        let mut runtime = RuntimeHandle::new();
        runtime.start(ambient).unwrap();
        let search_path = runtime.search_path();
        assert!(search_path.contains(&site));

        let home_at = search_path.iter().position(|p| p == &fx.home).unwrap();
        let site_at = search_path.iter().position(|p| p == &site).unwrap();
        assert!(home_at < site_at);
    }
}
