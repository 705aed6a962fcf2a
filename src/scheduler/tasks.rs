use std::sync::Arc;

use tracing::{debug, info};

use crate::instance_lock::InstanceLocks;
use crate::scheduler::Scheduler;

pub const LOCK_PRUNE_JOB: &str = "instance-lock-prune";

/// Drop lock-table entries for instances with no turn in flight.
pub fn prune_instance_locks(locks: &InstanceLocks) -> usize {
    let removed = locks.prune();
    if removed > 0 {
        info!(
            "Pruned {} idle instance lock(s), {} remaining",
            removed,
            locks.len()
        );
    } else {
        debug!("No idle instance locks to prune ({} held)", locks.len());
    }
    removed
}

pub async fn register_builtin_tasks(
    scheduler: &mut Scheduler,
    locks: Arc<InstanceLocks>,
    prune_schedule: &str,
) -> anyhow::Result<()> {
    scheduler
        .schedule(LOCK_PRUNE_JOB, prune_schedule, move || {
            let locks = Arc::clone(&locks);
            async move {
                prune_instance_locks(&locks);
            }
        })
        .await?;

    Ok(())
}
