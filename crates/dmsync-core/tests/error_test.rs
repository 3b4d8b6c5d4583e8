// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error type tests for dmsync-core.

use dmsync_core::{ClientError, MigrationError};
use serde_json::json;

#[test]
fn test_only_transport_is_retryable() {
    assert!(MigrationError::Transport("reset".to_string()).is_retryable());
    assert!(!MigrationError::Cancelled.is_retryable());
    assert!(!MigrationError::JobNotFound("auto-mj-orders".to_string()).is_retryable());
    assert!(
        !MigrationError::JobStartFailed {
            job_id: "auto-mj-orders".to_string(),
            message: "HTTP 400".to_string(),
        }
        .is_retryable()
    );
}

#[test]
fn test_client_error_conversion() {
    let err: MigrationError = ClientError::Transport("connection refused".to_string()).into();
    assert!(matches!(err, MigrationError::Transport(_)));
    let err: MigrationError = ClientError::NotFound("jobs/x".to_string()).into();
    assert!(matches!(err, MigrationError::NotFound(_)));
}

#[test]
fn test_operation_timeout_display() {
    let err = MigrationError::OperationTimeout {
        name: "op-1".to_string(),
        timeout_secs: 120,
        last: json!({"done": false}),
    };
    let display = err.to_string();
    assert!(display.contains("op-1"));
    assert!(display.contains("120s"));
    assert!(display.contains("\"done\":false"));
}

#[test]
fn test_malformed_operation_display() {
    let err = MigrationError::MalformedOperation(vec!["name".to_string(), "metadata".to_string()]);
    let display = err.to_string();
    assert!(display.contains("unable to get status of operation"));
    assert!(display.contains("metadata"));
}

#[test]
fn test_operation_failed_is_not_retryable() {
    let err = MigrationError::OperationFailed {
        name: "sqlop-3".to_string(),
        message: "instance busy".to_string(),
    };
    assert!(!err.is_retryable());
    assert_eq!(err.to_string(), "operation sqlop-3 failed: instance busy");
}

#[test]
fn test_job_not_running_display() {
    let err = MigrationError::JobNotRunning {
        job_id: "auto-mj-orders".to_string(),
        state: "STOPPED".to_string(),
    };
    let display = err.to_string();
    assert!(display.contains("auto-mj-orders"));
    assert!(display.contains("STOPPED"));
}

#[test]
fn test_unit_busy_display() {
    let err = MigrationError::UnitBusy("orders".to_string());
    assert!(err.to_string().contains("already being synced"));
}

#[test]
fn test_io_error_conversion() {
    let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
    let err: MigrationError = io.into();
    assert!(err.to_string().contains("IO error"));
}
