use std::time::Duration;

use orion_error::StructError;
use tokio::task::JoinHandle;

use crate::error::{RuntimeReason, RuntimeResult};

// ---------------------------------------------------------------------------
// TaskGroup — named collection of async tasks for ordered shutdown
// ---------------------------------------------------------------------------

/// A named group of async tasks shut down together.
///
/// Groups are assembled in *start order* and joined in *reverse order*
/// (LIFO) during shutdown: the scan listener stops first so no new work
/// arrives, then the fuzzy listener, then the periodic tasks.
pub(crate) struct TaskGroup {
    pub(super) name: &'static str,
    handles: Vec<JoinHandle<anyhow::Result<()>>>,
}

impl TaskGroup {
    pub(super) fn new(name: &'static str) -> Self {
        Self {
            name,
            handles: Vec::new(),
        }
    }

    pub(super) fn push(&mut self, handle: JoinHandle<anyhow::Result<()>>) {
        self.handles.push(handle);
    }

    /// Join all tasks, aborting whatever is still running once `deadline`
    /// elapses. The first task error is returned.
    pub(super) async fn wait(self, deadline: Duration) -> RuntimeResult<()> {
        let name = self.name;
        let mut handles = self.handles;
        let drain = async {
            for handle in &mut handles {
                handle
                    .await
                    .map_err(|e| {
                        StructError::from(RuntimeReason::Shutdown)
                            .with_detail(format!("{name}: task join error: {e}"))
                    })?
                    .map_err(|e| {
                        StructError::from(RuntimeReason::Shutdown)
                            .with_detail(format!("{name}: {e}"))
                    })?;
            }
            Ok::<(), crate::error::RuntimeError>(())
        };
        match tokio::time::timeout(deadline, drain).await {
            Ok(result) => result,
            Err(_) => {
                sg_warn!(sys, group = name, "drain deadline reached, aborting tasks");
                for handle in &handles {
                    handle.abort();
                }
                Ok(())
            }
        }
    }
}
