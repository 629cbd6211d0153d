use crate::error::GateError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Named points inside a store operation where a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CreateTable,
    AppendRows,
    ReplaceRows,
    /// Inside `merge_staging`, after part of the batch was applied to the
    /// working copy and before anything became visible.
    MergeApply,
    /// File store only: after new chunk files are durable, before the manifest swap.
    ManifestSwap,
    DropTable,
    CountRows,
    ReadRows,
}

/// One-shot failure switches shared between a store and its caller.
///
/// Arming a point makes the next operation that reaches it fail with
/// `StoreUnavailable`; the switch then disarms itself.
#[derive(Debug, Clone, Default)]
pub struct FaultInjector {
    armed: Arc<Mutex<Vec<FaultPoint>>>,
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self, point: FaultPoint) {
        self.armed.lock().push(point);
    }

    pub fn disarm_all(&self) {
        self.armed.lock().clear();
    }

    pub fn is_armed(&self, point: FaultPoint) -> bool {
        self.armed.lock().contains(&point)
    }

    pub(crate) fn check(&self, point: FaultPoint) -> Result<(), GateError> {
        let mut armed = self.armed.lock();
        if let Some(pos) = armed.iter().position(|p| *p == point) {
            armed.remove(pos);
            return Err(GateError::unavailable(format!(
                "injected fault at {point:?}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FaultInjector, FaultPoint};

    #[test]
    fn faults_fire_once() {
        let faults = FaultInjector::new();
        faults.arm(FaultPoint::AppendRows);
        assert!(faults.check(FaultPoint::CountRows).is_ok());
        let err = faults.check(FaultPoint::AppendRows).expect_err("armed");
        assert!(err.is_retryable());
        assert!(faults.check(FaultPoint::AppendRows).is_ok());
    }
}
