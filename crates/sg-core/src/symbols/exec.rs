use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;

use crate::error::CoreResult;
use crate::task::{Task, TaskStage};

use super::registry::ScanSchedule;
use super::{SymbolId, SymbolType};

// ---------------------------------------------------------------------------
// Checkpoint — per-task cursor into the schedule
// ---------------------------------------------------------------------------

struct Checkpoint {
    started: Vec<bool>,
    finished: Vec<bool>,
}

impl Checkpoint {
    fn new(count: usize) -> Self {
        Self {
            started: vec![false; count],
            finished: vec![false; count],
        }
    }

    fn start(&mut self, id: SymbolId) {
        self.started[id] = true;
    }

    fn finish(&mut self, id: SymbolId) {
        self.started[id] = true;
        self.finished[id] = true;
    }

    fn is_started(&self, id: SymbolId) -> bool {
        self.started[id]
    }

    fn deps_finished(&self, deps: &[SymbolId]) -> bool {
        deps.iter().all(|&d| self.finished[d])
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Drives one task through the pipeline phases: prefilters (sequential),
/// filters (concurrent, dependency-gated), composites (fixed point) and
/// postfilters (sequential), then waits for the async session to drain.
pub struct Scheduler {
    schedule: Arc<ScanSchedule>,
}

impl Scheduler {
    pub fn new(schedule: Arc<ScanSchedule>) -> Self {
        Self { schedule }
    }

    pub fn schedule(&self) -> &Arc<ScanSchedule> {
        &self.schedule
    }

    #[tracing::instrument(name = "scan", skip_all)]
    pub async fn process(&self, task: Arc<Task>) -> CoreResult<()> {
        let mut cp = Checkpoint::new(self.schedule.symbol_count());

        task.advance_stage(TaskStage::Prefilters);
        let prefilters = self.schedule.prefilters.clone();
        self.run_ordered(&task, &prefilters, &mut cp, true).await;

        task.advance_stage(TaskStage::Filters);
        self.run_filters(&task, &mut cp).await;

        task.advance_stage(TaskStage::Composites);
        self.run_composites(&task);

        // Postfilters always run, pre-result or not.
        task.advance_stage(TaskStage::Postfilters);
        let postfilters = self.schedule.postfilters.clone();
        self.run_ordered(&task, &postfilters, &mut cp, false).await;

        task.session().wait_empty().await;
        task.advance_stage(TaskStage::Done);
        Ok(())
    }

    /// Sequential phase runner: each symbol is awaited before the next
    /// (prefilters and postfilters).
    async fn run_ordered(
        &self,
        task: &Arc<Task>,
        order: &[SymbolId],
        cp: &mut Checkpoint,
        honor_pre_result: bool,
    ) {
        for &id in order {
            if cp.is_started(id) {
                continue;
            }
            cp.start(id);
            if !self.gates_pass(task, id, honor_pre_result) {
                cp.finish(id);
                continue;
            }
            run_symbol(Arc::clone(&self.schedule), Arc::clone(task), id).await;
            cp.finish(id);
        }
    }

    /// Concurrent filter phase. Ready symbols (dependencies finished,
    /// condition true, group under cap) are spawned together; completion
    /// of any one re-opens the ready scan. A callback symbol only counts
    /// as finished after its watcher has drained.
    async fn run_filters(&self, task: &Arc<Task>, cp: &mut Checkpoint) {
        // Symbols that never run are finished up front so dependents are
        // not gated on them: virtuals (their parent contributes), ghosts,
        // skip-flagged and callback-less definitions.
        for &id in &self.schedule.filters {
            let def = self.schedule.def(id);
            let runnable = def.handler.is_some()
                && !def.flags.skipped
                && !matches!(def.ty, SymbolType::Virtual | SymbolType::Ghost);
            if !runnable {
                cp.finish(id);
            }
        }

        let mut running: JoinSet<SymbolId> = JoinSet::new();
        loop {
            let mut spawned = false;
            for &id in &self.schedule.filters {
                if cp.is_started(id) {
                    continue;
                }
                let def = self.schedule.def(id);
                if !cp.deps_finished(&def.deps) {
                    continue;
                }
                cp.start(id);
                if !self.gates_pass(task, id, true) {
                    cp.finish(id);
                    continue;
                }
                let schedule = Arc::clone(&self.schedule);
                let task = Arc::clone(task);
                running.spawn(async move {
                    run_symbol(schedule, task, id).await;
                    id
                });
                spawned = true;
            }

            match running.join_next().await {
                Some(Ok(id)) => cp.finish(id),
                Some(Err(e)) => {
                    // run_symbol shields handler panics; reaching this
                    // means the wrapper itself was aborted.
                    tracing::error!(error = %e, "filter task join error");
                }
                None => {
                    if !spawned {
                        break;
                    }
                }
            }
        }
    }

    /// Multi-pass composite evaluation until no new symbol is inserted
    /// (composites may reference each other).
    fn run_composites(&self, task: &Arc<Task>) {
        loop {
            let mut inserted = false;
            for (id, expr) in &self.schedule.composites {
                let def = self.schedule.def(*id);
                if task.has_symbol(&def.name) {
                    continue;
                }
                let matched = expr.eval(&|name| task.has_symbol(name));
                if matched {
                    tracing::debug!(composite = %def.name, "composite matched");
                    task.insert_symbol(&def.name, 1.0, &[]);
                    inserted = true;
                }
            }
            if !inserted {
                break;
            }
        }
    }

    /// Run-time gates shared by every phase: enable condition, empty
    /// message, pre-result short-circuit and group cap.
    fn gates_pass(&self, task: &Task, id: SymbolId, honor_pre_result: bool) -> bool {
        let def = self.schedule.def(id);
        if def.handler.is_none() || def.flags.skipped {
            return false;
        }
        if let Some(cond) = &def.condition
            && !cond.enabled(task)
        {
            tracing::debug!(symbol = %def.name, "condition disabled symbol");
            return false;
        }
        if task.message().is_none() && !def.flags.empty && def.ty != SymbolType::Prefilter {
            return false;
        }
        if honor_pre_result && task.pre_result().is_some() && !def.flags.fine {
            return false;
        }
        if let Some(group) = &def.group {
            let max = self.schedule.group_max_score(group);
            if max > 0.0
                && def.weight() > 0.0
                && task.with_result(|r| r.group_score(group)) >= max
            {
                tracing::debug!(symbol = %def.name, group, "group cap reached, skipping");
                return false;
            }
        }
        true
    }
}

/// Run one symbol callback: time it, shield the scheduler from panics,
/// apply the outcome, then wait for the callback's watcher to drain.
async fn run_symbol(schedule: Arc<ScanSchedule>, task: Arc<Task>, id: SymbolId) {
    let def = schedule.def(id);
    let Some(handler) = def.handler.clone() else {
        return;
    };

    let watcher = task.watcher_push(None);
    let started = Instant::now();
    let handler_task = {
        let task = Arc::clone(&task);
        tokio::spawn(async move { handler.run(task).await })
    };
    let joined = handler_task.await;
    schedule.stats.record_call(id, started.elapsed());
    task.watcher_pop();

    match joined {
        Ok(Ok(super::SymbolOutcome::Match {
            multiplier,
            options,
        })) => {
            let opts: Vec<&str> = options.iter().map(String::as_str).collect();
            task.insert_symbol(&def.name, multiplier, &opts);
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            // Never aborts the task: log, release, move on.
            tracing::warn!(symbol = %def.name, error = %e, "symbol callback failed");
            return;
        }
        Err(e) if e.is_panic() => {
            tracing::error!(symbol = %def.name, "symbol callback panicked");
            return;
        }
        Err(e) => {
            tracing::warn!(symbol = %def.name, error = %e, "symbol callback cancelled");
            return;
        }
    }

    watcher.drained().await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
