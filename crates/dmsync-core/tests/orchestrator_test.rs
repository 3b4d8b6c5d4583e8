// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! End-to-end tests for the orchestrator over the mock client.

mod common;

use std::sync::Arc;

use common::{PROJECT, STAMP, location, orchestrator, unit};
use dmsync_core::types::ProfileEndpoint;
use dmsync_core::{
    CleanupTarget, ConfigStore, FailPoint, JobPhase, JobState, MemoryStore, MigrationError,
    MockClient, ProfileState, Project, SyncOutcome,
};
use tokio_util::sync::CancellationToken;

const DESTINATION: &str = "sql-orders-20240101t000000";

/// Script a freshly created job: RUNNING in FULL_DUMP, then CDC.
async fn script_orders(client: &MockClient) {
    client
        .script_job(
            &location(),
            "auto-mj-orders",
            [
                (JobState::Running, Some(JobPhase::FullDump)),
                (JobState::Running, Some(JobPhase::FullDump)),
                (JobState::Running, Some(JobPhase::Cdc)),
            ],
        )
        .await;
}

fn fixture() -> (Arc<MockClient>, Arc<MemoryStore>) {
    (
        Arc::new(MockClient::new()),
        Arc::new(MemoryStore::new([unit("orders")])),
    )
}

// ============================================================================
// sync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_sync_fresh_unit_provisions_everything_once() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store.clone(), true);
    assert_eq!(orchestrator.stamp(), STAMP);

    let outcome = orchestrator
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        outcome,
        SyncOutcome::Synced {
            state: JobState::Running,
            phase: JobPhase::Cdc
        }
    );

    let calls = client.calls().await;
    assert_eq!(calls.profile_creates, 2);
    assert_eq!(calls.job_creates, 1);
    assert_eq!(calls.job_starts, 1);

    let job = client.job(&location(), "auto-mj-orders").await.unwrap();
    assert_eq!(job.destination_profile_id(), Some(DESTINATION));
    assert_eq!(job.source, location().profile_name("src-orders"));

    // Discovered fields were persisted before the job was created.
    let stored = store.load_unit("orders").await.unwrap();
    assert_eq!(stored.discovered.profile_id.as_deref(), Some(DESTINATION));
    assert_eq!(stored.discovered.host.as_deref(), Some("10.20.30.40"));
    let root_password = stored.discovered.root_password.clone().unwrap();
    assert_eq!(root_password.len(), 12);

    let spec = client.profile_spec(&location(), DESTINATION).await.unwrap();
    match spec.endpoint {
        ProfileEndpoint::Cloudsql(cloudsql) => {
            assert_eq!(cloudsql.settings.root_password, root_password);
            assert_eq!(cloudsql.settings.tier, "db-custom-2-7680");
        }
        other => panic!("unexpected endpoint: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_sync_twice_is_idempotent() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store.clone(), true);
    let cancel = CancellationToken::new();

    orchestrator.sync("orders", &cancel).await.unwrap();
    let first = client.calls().await;

    let outcome = orchestrator.sync("orders", &cancel).await.unwrap();
    assert!(matches!(outcome, SyncOutcome::Synced { .. }));

    let second = client.calls().await;
    assert_eq!(second.profile_creates, first.profile_creates);
    assert_eq!(second.job_creates, first.job_creates);
    assert_eq!(second.job_starts, first.job_starts);
    // Only the source profile has mutable fields.
    assert_eq!(second.profile_patches, 1);
}

#[tokio::test(start_paused = true)]
async fn test_sync_running_job_creates_and_starts_nothing() {
    let (client, store) = fixture();
    let loc = location();
    client
        .insert_profile(&loc, "src-orders", ProfileState::Ready)
        .await;
    client
        .insert_profile(&loc, DESTINATION, ProfileState::Ready)
        .await;
    client
        .insert_job(
            &loc,
            "auto-mj-orders",
            dmsync_core::MigrationJob {
                name: String::new(),
                state: JobState::Running,
                phase: Some(JobPhase::Cdc),
                error: None,
                source: loc.profile_name("src-orders"),
                destination: loc.profile_name(DESTINATION),
            },
        )
        .await;

    orchestrator(client.clone(), store, true)
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();

    let calls = client.calls().await;
    assert_eq!(calls.profile_creates, 0);
    assert_eq!(calls.job_creates, 0);
    assert_eq!(calls.job_starts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sync_reuses_recorded_destination() {
    let (client, _) = fixture();
    let loc = location();
    client
        .insert_profile(&loc, "sql-orders-20231231t120000", ProfileState::Ready)
        .await;
    let mut orders = unit("orders");
    orders.discovered.profile_id = Some("sql-orders-20231231t120000".to_string());
    orders.discovered.root_password = Some("RECORDEDPW01".to_string());
    let store = Arc::new(MemoryStore::new([orders]));
    script_orders(&client).await;

    orchestrator(client.clone(), store.clone(), true)
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();

    // Only the source profile was created.
    assert_eq!(client.calls().await.profile_creates, 1);
    let job = client.job(&loc, "auto-mj-orders").await.unwrap();
    assert_eq!(
        job.destination_profile_id(),
        Some("sql-orders-20231231t120000")
    );
    let stored = store.load_unit("orders").await.unwrap();
    assert_eq!(
        stored.discovered.root_password.as_deref(),
        Some("RECORDEDPW01")
    );
}

#[tokio::test(start_paused = true)]
async fn test_sync_recovers_host_after_failed_lookup() {
    let (client, store) = fixture();
    script_orders(&client).await;
    client.fail_times(FailPoint::GetInstance, 1).await;
    let orchestrator = orchestrator(client.clone(), store.clone(), true);
    let cancel = CancellationToken::new();

    orchestrator.sync("orders", &cancel).await.unwrap();
    let stored = store.load_unit("orders").await.unwrap();
    assert_eq!(stored.discovered.profile_id.as_deref(), Some(DESTINATION));
    assert!(stored.discovered.host.is_none());
    assert!(matches!(
        orchestrator.get_progress("orders").await,
        Err(MigrationError::Config(_))
    ));

    orchestrator.sync("orders", &cancel).await.unwrap();
    let stored = store.load_unit("orders").await.unwrap();
    assert_eq!(stored.discovered.host.as_deref(), Some("10.20.30.40"));
    assert!(stored.discovered.root_password.is_some());
    assert_eq!(client.calls().await.instance_gets, 2);
    assert_eq!(orchestrator.get_progress("orders").await.unwrap(), 42.5);

    // Once recorded, the host is not looked up again.
    orchestrator.sync("orders", &cancel).await.unwrap();
    assert_eq!(client.calls().await.instance_gets, 2);
}

#[tokio::test(start_paused = true)]
async fn test_sync_unreachable_source_touches_nothing() {
    let (client, store) = fixture();
    let outcome = orchestrator(client.clone(), store, false)
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, SyncOutcome::SourceUnreachable);
    assert_eq!(client.calls().await, Default::default());
}

#[tokio::test(start_paused = true)]
async fn test_sync_unknown_unit() {
    let (client, store) = fixture();
    let err = orchestrator(client, store, true)
        .sync("billing", &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::UnitNotFound(ref name) if name == "billing"));
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sync_of_same_unit_is_rejected() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store, true);
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        orchestrator.sync("orders", &cancel),
        orchestrator.sync("orders", &cancel)
    );

    assert!(first.is_ok());
    assert!(matches!(second, Err(MigrationError::UnitBusy(ref name)) if name == "orders"));
    // The slot is released afterwards.
    assert!(orchestrator.sync("orders", &cancel).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_profile_failure_aborts_sync() {
    let mut client = MockClient::new();
    client.profile_outcome = ProfileState::Failed;
    let client = Arc::new(client);
    let store = Arc::new(MemoryStore::new([unit("orders")]));

    let err = orchestrator(client.clone(), store, true)
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::ProfileProvisioningFailed { .. }));
    assert_eq!(client.calls().await.job_creates, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sync_cancelled() {
    let (client, store) = fixture();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = orchestrator(client, store, true)
        .sync("orders", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Cancelled));
}

// ============================================================================
// cleanup
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cleanup_continues_past_failures() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store, true);
    let cancel = CancellationToken::new();
    orchestrator.sync("orders", &cancel).await.unwrap();

    client.fail(FailPoint::DeleteProfile).await;
    let report = orchestrator.cleanup("orders", &cancel).await.unwrap();

    assert!(report.job_found);
    assert!(report.succeeded(CleanupTarget::Instance));
    assert!(!report.succeeded(CleanupTarget::SourceProfile));
    assert!(report.succeeded(CleanupTarget::Job));
    assert_eq!(report.failures().count(), 1);

    let backing = format!("{}-master", DESTINATION);
    assert!(!client.has_instance(PROJECT, &backing).await);
    assert!(client.job(&location(), "auto-mj-orders").await.is_none());
    assert!(client.has_profile(&location(), "src-orders").await);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_reports_operations_finished_with_error() {
    let mut client = MockClient::new();
    client.operation_error = Some("resource is in use".to_string());
    let client = Arc::new(client);
    let store = Arc::new(MemoryStore::new([unit("orders")]));
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store, true);
    let cancel = CancellationToken::new();
    orchestrator.sync("orders", &cancel).await.unwrap();

    let report = orchestrator.cleanup("orders", &cancel).await.unwrap();

    assert!(report.job_found);
    assert_eq!(report.steps.len(), 3);
    assert_eq!(report.failures().count(), 3);
    assert!(!report.succeeded(CleanupTarget::Job));
    let job_step = report
        .steps
        .iter()
        .find(|step| step.target == CleanupTarget::Job)
        .unwrap();
    assert!(job_step.error.as_deref().unwrap().contains("resource is in use"));
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_without_job_does_nothing() {
    let (client, store) = fixture();
    let report = orchestrator(client.clone(), store, true)
        .cleanup("orders", &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.job_found);
    assert!(report.steps.is_empty());
    let calls = client.calls().await;
    assert_eq!(calls.instance_deletes, 0);
    assert_eq!(calls.profile_deletes, 0);
    assert_eq!(calls.job_deletes, 0);
}

// ============================================================================
// progress, promote, projects, users
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_progress_is_zero_when_source_unreachable() {
    let (client, store) = fixture();
    let progress = orchestrator(client, store, false)
        .get_progress("orders")
        .await
        .unwrap();
    assert_eq!(progress, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_progress_needs_provisioned_destination() {
    let (client, store) = fixture();
    let orchestrator = orchestrator(client.clone(), store, true);
    assert!(matches!(
        orchestrator.get_progress("orders").await,
        Err(MigrationError::Config(_))
    ));

    script_orders(&client).await;
    orchestrator
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(orchestrator.get_progress("orders").await.unwrap(), 42.5);
}

#[tokio::test(start_paused = true)]
async fn test_promote_and_status() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store, true);
    assert!(orchestrator.status("orders").await.unwrap().is_none());

    orchestrator
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();
    orchestrator.promote("orders").await.unwrap();

    let job = orchestrator.status("orders").await.unwrap().unwrap();
    assert_eq!(job.current_phase(), JobPhase::PromoteInProgress);
    assert_eq!(client.calls().await.job_promotes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_list_projects_is_cached() {
    let client = Arc::new(MockClient::new().with_projects(vec![Project {
        project_id: PROJECT.to_string(),
        name: "Acme production".to_string(),
        lifecycle_state: Some("ACTIVE".to_string()),
    }]));
    let store = Arc::new(MemoryStore::new([unit("orders")]));
    let orchestrator = orchestrator(client.clone(), store, true);

    assert_eq!(orchestrator.list_projects().await.unwrap().len(), 1);
    assert_eq!(orchestrator.list_projects().await.unwrap()[0].project_id, PROJECT);
    assert_eq!(client.calls().await.project_lists, 1);
}

#[tokio::test(start_paused = true)]
async fn test_create_database_user_on_destination() {
    let (client, store) = fixture();
    script_orders(&client).await;
    let orchestrator = orchestrator(client.clone(), store, true);
    orchestrator
        .sync("orders", &CancellationToken::new())
        .await
        .unwrap();

    let password = orchestrator
        .create_database_user("orders", "app", None)
        .await
        .unwrap();
    assert_eq!(password.len(), 12);

    let explicit = orchestrator
        .create_database_user("orders", "reporting", Some("s3cret".to_string()))
        .await
        .unwrap();
    assert_eq!(explicit, "s3cret");

    let users = client.created_users().await;
    assert_eq!(
        users[0],
        (DESTINATION.to_string(), "app".to_string(), password)
    );
    assert_eq!(users[1].1, "reporting");
}
