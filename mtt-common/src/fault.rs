//! Bounce loop: stop and restart one entity of a role, iteration by iteration.
//!
//! Every iteration ends with the same fixed pause whether or not bouncing is
//! enabled, so total elapsed time depends only on the iteration count and the
//! downtime. The target is always the first registered entity of the role.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use crate::environment::{CaseEnv, TestEnvironment};
use crate::errors::{HarnessError, HarnessResult};
use crate::registry::EntityRegistry;
use crate::testcase::BounceConfig;
use crate::types::{EntityId, ProcessHandle};

/// One stop/restart cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BounceRecord {
    /// 1-based iteration number.
    pub iteration: u32,
    pub entity_id: EntityId,
    /// Handle that was stopped.
    pub old_handle: ProcessHandle,
    /// Handle of the restarted process.
    pub new_handle: ProcessHandle,
}

/// Outcome of a bounce loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BounceReport {
    /// Iterations completed, bounced or not.
    pub iterations_run: u32,
    /// One record per stop/restart; empty when bouncing is disabled.
    pub bounces: Vec<BounceRecord>,
}

/// Stops and restarts entities through a [`TestEnvironment`].
///
/// The injector holds no per-case state; one instance serves every case.
pub struct FaultInjector<E> {
    env: Arc<E>,
    interval: Duration,
}

impl<E: TestEnvironment> FaultInjector<E> {
    /// `interval` is the pause that closes every iteration.
    pub fn new(env: Arc<E>, interval: Duration) -> Self {
        Self { env, interval }
    }

    /// Run the bounce loop. A failed stop or restart ends the loop with that error.
    pub async fn inject_faults(
        &self,
        case: &CaseEnv,
        registry: &EntityRegistry,
        config: &BounceConfig,
    ) -> HarnessResult<BounceReport> {
        let mut report = BounceReport::default();

        for iteration in 1..=config.iterations {
            info!(
                component = "FaultInjector",
                testcase = %case.name(),
                iteration,
                total = config.iterations,
                "Bounce iteration"
            );

            if config.enabled {
                report
                    .bounces
                    .push(self.bounce_once(case, registry, config, iteration).await?);
            }

            tokio::time::sleep(self.interval).await;
            report.iterations_run = iteration;
        }

        Ok(report)
    }

    async fn bounce_once(
        &self,
        case: &CaseEnv,
        registry: &EntityRegistry,
        config: &BounceConfig,
        iteration: u32,
    ) -> HarnessResult<BounceRecord> {
        let target = registry
            .first_of(config.target)
            .ok_or(HarnessError::NoEntityForRole(config.target))?;
        let old_handle = target
            .handle
            .ok_or_else(|| HarnessError::EntityNotRunning(target.id.clone()))?;

        info!(
            component = "FaultInjector",
            entity = %target.id,
            role = %target.role,
            handle = %old_handle,
            "Stopping entity"
        );
        self.env.stop_entity(case, &target, old_handle).await?;
        registry.clear_handle(&target.id)?;

        tokio::time::sleep(Duration::from_secs(config.downtime_secs)).await;

        info!(
            component = "FaultInjector",
            entity = %target.id,
            downtime_secs = config.downtime_secs,
            "Restarting entity"
        );
        let new_handle = self.env.start_entity(case, &target).await?;
        registry.record_handle(&target.id, new_handle)?;

        Ok(BounceRecord {
            iteration,
            entity_id: target.id,
            old_handle,
            new_handle,
        })
    }
}
