// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Idempotent upsert of connection profiles.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::client::RemoteResourceClient;
use crate::config::PollingConfig;
use crate::error::{MigrationError, Result};
use crate::poll::{BackoffPolicy, Step, poll_until};
use crate::types::{ConnectionProfileSpec, Location, ProfileState};
use crate::waiter::OperationWaiter;

/// What [`ConnectionProfileManager::ensure_profile`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileOutcome {
    /// The profile was absent and has been created; it is READY.
    Created,
    /// The profile already existed and its mutable fields were patched.
    Updated,
    /// The profile already existed and has no mutable fields.
    Unchanged,
}

/// Ensures a named source or destination connection profile exists.
///
/// Never deletes and recreates to converge drift: an existing profile is
/// patched on its mutable fields only.
pub struct ConnectionProfileManager {
    client: Arc<dyn RemoteResourceClient>,
    ready_backoff: BackoffPolicy,
    waiter: OperationWaiter,
}

impl ConnectionProfileManager {
    pub fn new(client: Arc<dyn RemoteResourceClient>, polling: &PollingConfig) -> Self {
        Self {
            client,
            ready_backoff: polling.profile_ready,
            waiter: OperationWaiter::from_config(polling),
        }
    }

    /// Current remote state; NOT_EXISTS when the profile is absent.
    pub async fn state(&self, location: &Location, profile_id: &str) -> Result<ProfileState> {
        match self.client.get_connection_profile(location, profile_id).await {
            Ok(profile) => Ok(profile.state),
            Err(e) if e.is_not_found() => Ok(ProfileState::NotExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the profile if absent and wait until it is READY, otherwise
    /// patch its mutable fields.
    ///
    /// The READY wait has no overall deadline; only `cancel` ends it early.
    #[instrument(skip(self, spec, cancel), fields(project = %location.project_id))]
    pub async fn ensure_profile(
        &self,
        location: &Location,
        profile_id: &str,
        spec: &ConnectionProfileSpec,
        cancel: &CancellationToken,
    ) -> Result<ProfileOutcome> {
        let current = self.state(location, profile_id).await?;

        if current != ProfileState::NotExists {
            let mask = spec.mutable_fields();
            if mask.is_empty() {
                info!(state = %current, "Connection profile exists, nothing to update");
                return Ok(ProfileOutcome::Unchanged);
            }
            info!(state = %current, "Connection profile exists, updating");
            self.client
                .patch_connection_profile(location, profile_id, spec, mask)
                .await?;
            return Ok(ProfileOutcome::Updated);
        }

        info!("Connection profile is going to be created");
        self.client
            .create_connection_profile(location, profile_id, spec)
            .await
            .map_err(|e| MigrationError::ProfileProvisioningFailed {
                profile_id: profile_id.to_string(),
                cause: e.to_string(),
            })?;

        info!("Awaiting connection profile to be READY");
        poll_until(
            profile_id,
            self.ready_backoff,
            cancel,
            move || self.state(location, profile_id),
            |state| ready_step(profile_id, state),
        )
        .await?;

        info!("Connection profile is READY");
        Ok(ProfileOutcome::Created)
    }

    /// Delete a profile by full resource name and wait for the operation.
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let handle = self.client.delete_connection_profile(name).await?;
        self.waiter
            .wait_for(self.client.as_ref(), &handle, cancel)
            .await?;
        Ok(())
    }
}

/// Step function for the READY wait after create.
///
/// A FAILED profile ends the wait; the remote resource stays in place so a
/// later call takes the "already exists" branch.
pub fn ready_step(profile_id: &str, state: ProfileState) -> Result<Step<()>> {
    debug!(profile_id, state = %state, "Awaiting connection profile to be READY");
    match state {
        ProfileState::Ready => Ok(Step::Done(())),
        ProfileState::Failed => Err(MigrationError::ProfileProvisioningFailed {
            profile_id: profile_id.to_string(),
            cause: "profile entered FAILED state".to_string(),
        }),
        _ => Ok(Step::Continue),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_step() {
        assert_eq!(ready_step("p", ProfileState::Ready).unwrap(), Step::Done(()));
        assert_eq!(ready_step("p", ProfileState::Creating).unwrap(), Step::Continue);
        // Eventual consistency: a just-created profile may not be visible yet.
        assert_eq!(ready_step("p", ProfileState::NotExists).unwrap(), Step::Continue);
        assert!(matches!(
            ready_step("p", ProfileState::Failed),
            Err(MigrationError::ProfileProvisioningFailed { .. })
        ));
    }
}
