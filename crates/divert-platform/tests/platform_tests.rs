//! Integration tests for the native binding
//!
//! These run without the driver installed: they only check how loading
//! behaves on the current target.

use divert_core::{Error, Handle, Layer, Op, OpenFlags};
use divert_platform::{WinDivert, LIBRARY_NAME};

#[test]
fn test_library_name() {
    assert_eq!(LIBRARY_NAME, "WinDivert.dll");
}

#[cfg(not(windows))]
#[test]
fn test_load_is_unsupported_off_windows() {
    assert!(matches!(
        WinDivert::load(),
        Err(Error::Unsupported { op: Op::Load })
    ));
}

#[cfg(windows)]
#[test]
fn test_load_outcome_is_cached() {
    // Either the library is present or it is not; both calls must agree
    let first = WinDivert::load().map(|_| ()).map_err(|e| e.os_code());
    let second = WinDivert::load().map(|_| ()).map_err(|e| e.os_code());
    assert_eq!(first, second);

    if let Err(code) = first {
        assert!(code.is_some());
    }
}

#[test]
fn test_invalid_priority_rejected_before_driver() {
    // Only meaningful where the library can be loaded
    let Ok(engine) = WinDivert::load() else {
        return;
    };
    let err = Handle::open(engine, "true", Layer::Network, 4000, OpenFlags::SNIFF).unwrap_err();
    assert!(matches!(err, Error::InvalidPriority { .. }));
}

#[test]
fn test_load_error_is_not_validation() {
    if let Err(e) = WinDivert::load() {
        assert!(!e.is_validation());
        assert!(matches!(
            e,
            Error::Unsupported { op: Op::Load } | Error::Engine { op: Op::Load, .. }
        ));
    }
}
