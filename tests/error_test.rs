//! Tests for error types

use mlvault::Error;

#[test]
fn test_not_found_error() {
    let error = Error::NotFound("models/clf".to_string());
    assert_eq!(format!("{error}"), "Not found: models/clf");
    assert!(error.is_not_found());
}

#[test]
fn test_unknown_tag_error() {
    let error = Error::UnknownTag {
        name: "clf".to_string(),
        tag: "prod".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unknown tag 'prod'"));
    assert!(error_str.contains("'clf'"));
    assert!(error.is_not_found());
}

#[test]
fn test_unknown_commit_error() {
    let error = Error::UnknownCommit {
        name: "clf".to_string(),
        commit: "deadbeef".to_string(),
    };
    assert!(format!("{error}").contains("Unknown commit 'deadbeef'"));
    assert!(error.is_not_found());
}

#[test]
fn test_no_active_run_error() {
    let error = Error::NoActiveRun("churn".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("No active run for experiment 'churn'"));
    assert!(error_str.contains("start()"));
    assert!(!error.is_not_found());
}

#[test]
fn test_unsupported_object_error() {
    let error = Error::UnsupportedObject {
        name: "raw".to_string(),
        object_type: "bytes".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Unsupported object 'raw'"));
    assert!(error_str.contains("no backend matches"));
}

#[test]
fn test_not_implemented_error() {
    let error = Error::NotImplemented {
        kind: "model.blob".to_string(),
        action: "fit",
    };
    assert_eq!(format!("{error}"), "Backend 'model.blob' does not implement fit");
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("bad selector".to_string());
    assert_eq!(format!("{error}"), "Invalid input: bad selector");
}

#[test]
fn test_storage_and_config_errors() {
    let error = Error::StorageError("disk full".to_string());
    assert!(format!("{error}").contains("Storage error"));
    let error = Error::Config("bucket must not be empty".to_string());
    assert!(format!("{error}").contains("Configuration error"));
}

#[test]
fn test_lock_poisoned_error() {
    let error = Error::LockPoisoned("event buffer");
    assert_eq!(format!("{error}"), "Lock poisoned: event buffer");
}

#[test]
fn test_serialization_error_from() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_err.into();
    assert!(matches!(error, Error::Serialization(_)));
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_io_error_from() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error".to_string());
    assert_eq!(format!("{error}"), "custom error");
}

#[test]
fn test_error_debug() {
    let error = Error::NotFound("x".to_string());
    assert!(format!("{error:?}").contains("NotFound"));
}
