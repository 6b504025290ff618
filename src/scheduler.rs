//! Timer-driven perform actions. `tick` is called by the host process (or
//! the `tick` CLI command); nothing here owns a clock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::engine::{Engine, OpContext};
use crate::error::{CloudError, Result};
use crate::resources::service;
use crate::state::models::ScheduledTaskRecord;
use crate::timer::Timer;

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub ran: Vec<String>,
    pub failed: Vec<String>,
    pub expired: Vec<String>,
}

/// Bind `timer` to `action` on a record. The record must exist and the
/// action must be one the class offers.
pub async fn schedule(
    cx: &OpContext,
    name: &str,
    class: &str,
    ident: &str,
    action: &str,
    params: Value,
    mut timer: Timer,
) -> Result<ScheduledTaskRecord> {
    if !cx.identity.is_system_admin() {
        return Err(CloudError::forbidden("scheduling requires a system admin"));
    }
    timer.validate()?;
    if !service::actions(cx, class)?.contains(&action) {
        return Err(CloudError::not_supported(format!("{} on {}", action, class)));
    }
    let spec = cx.engine.spec(class)?;
    let target = service::find(cx, &spec, ident).await?;

    timer.update(Utc::now());
    let mut scheduled = ScheduledTaskRecord::new(name, class, &target.id, action, timer);
    scheduled.domain_id = target.domain_id.clone();
    scheduled.params = params;
    scheduled.enabled = !scheduled.timer.is_expired;
    cx.engine.store.insert_scheduled(&scheduled).await?;
    info!(
        scheduled = %scheduled.name,
        target = %target.reference(),
        action,
        timer = %scheduled.timer.describe(),
        "Scheduled operation"
    );
    Ok(scheduled)
}

/// Run every enabled entry due at `now`, then move its timer forward.
pub async fn tick(engine: &Arc<Engine>, now: DateTime<Utc>) -> Result<TickReport> {
    let due: Vec<ScheduledTaskRecord> = engine
        .store
        .list_scheduled(true)
        .await?
        .into_iter()
        .filter(|s| s.timer.is_due(now))
        .collect();

    let runs = due.into_iter().map(|scheduled| run_one(engine, scheduled, now));
    let mut report = TickReport::default();
    for (scheduled, ok) in join_all(runs).await.into_iter().collect::<Result<Vec<_>>>()? {
        if ok {
            report.ran.push(scheduled.id.clone());
        } else {
            report.failed.push(scheduled.id.clone());
        }
        if scheduled.timer.is_expired {
            report.expired.push(scheduled.id);
        }
    }
    Ok(report)
}

async fn run_one(
    engine: &Arc<Engine>,
    mut scheduled: ScheduledTaskRecord,
    now: DateTime<Utc>,
) -> Result<(ScheduledTaskRecord, bool)> {
    let cx = OpContext::system(engine);
    let outcome = service::perform(
        &cx,
        &scheduled.resource_class,
        &scheduled.resource_id,
        &scheduled.action,
        scheduled.params.clone(),
    )
    .await;
    let ok = match outcome {
        Ok(outcome) => {
            scheduled.last_result = match outcome.task_id {
                Some(task_id) => format!("started task {}", task_id),
                None => "done".to_string(),
            };
            info!(scheduled = %scheduled.name, action = %scheduled.action, "Scheduled operation ran");
            true
        }
        Err(e) => {
            warn!(scheduled = %scheduled.name, action = %scheduled.action, error = %e, "Scheduled operation failed");
            scheduled.last_result = e.to_string();
            false
        }
    };
    scheduled.last_run_at = Some(now.to_rfc3339());
    scheduled.timer.update(now);
    if scheduled.timer.is_expired {
        scheduled.enabled = false;
    }
    engine.store.update_scheduled(&scheduled).await?;
    Ok((scheduled, ok))
}
