use super::*;
use std::time::Duration;

pub(crate) fn ensure_can_read(caller: &CallerContext, project_id: &str) -> Result<(), GateError> {
    if AccessGate::can_read(caller, project_id) {
        return Ok(());
    }
    Err(GateError::Forbidden(format!(
        "actor '{}' has no access to project '{project_id}'",
        caller.actor_id
    )))
}

pub(crate) fn ensure_can_manage(caller: &CallerContext, project_id: &str) -> Result<(), GateError> {
    if AccessGate::can_manage(caller, project_id) {
        return Ok(());
    }
    Err(GateError::Forbidden(format!(
        "actor '{}' does not own project '{project_id}'",
        caller.actor_id
    )))
}

pub(crate) fn claim_timeout(config: &GateConfig) -> Duration {
    Duration::from_millis(config.merge_claim_timeout_ms)
}

pub(crate) fn claim_timeout_micros(config: &GateConfig) -> u64 {
    config.merge_claim_timeout_ms.saturating_mul(1_000)
}

/// Delivers one event to every hook in registration order. A panicking hook
/// is logged and skipped; it never fails the operation that emitted the event.
pub(crate) fn dispatch_lifecycle_event(hooks: &[Arc<dyn LifecycleHook>], event: &LifecycleEvent) {
    for hook in hooks {
        if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook.on_event(event))).is_err()
        {
            warn!(?event, "lifecycle hook panicked while handling event");
        }
    }
}
