//! Coordinator — drives the task DAG to completion.
//!
//! The main `run()` loop uses `tokio::select!` to:
//!   - Run a reconciliation tick on an interval: reclaim expired locks,
//!     promote ready tasks, and assign them to idle agents with
//!     all-or-nothing resource acquisition
//!   - Process task outcomes reported by the sandbox runtime
//!   - Watch the emergency state and stand down on shutdown-all
//!
//! Acquisition never holds a partial resource set across ticks, so the
//! system cannot deadlock on circular lock waits; at worst a task retries
//! on a later tick.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::coordination::EmergencyState;
use crate::domain::{AgentStatus, Task, TaskGraph, TaskStatus};
use crate::error::LockError;
use crate::lock::{LockManager, LockToken};
use crate::monitor::ViolationLog;
use crate::report::RunReport;
use crate::sandbox::{SandboxRuntime, TaskOutcome};

use super::state::{AgentRegistry, ReclaimEvent, RunSnapshot, SharedSnapshot};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Reconciliation tick interval. Responsiveness vs lock-store
    /// contention.
    pub tick_interval_ms: u64,
    /// TTL stamped on every lock taken for a task.
    pub lock_ttl_secs: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            lock_ttl_secs: 30,
        }
    }
}

pub struct Coordinator {
    config: CoordinatorConfig,
    lock_manager: Arc<LockManager>,
    runtime: Arc<dyn SandboxRuntime>,
    agents: AgentRegistry,
    audit: Arc<ViolationLog>,
    tasks: BTreeMap<String, Task>,
    /// Tokens held on behalf of assigned tasks: task id -> (resource, token).
    held: HashMap<String, Vec<(String, LockToken)>>,
    /// Every assignment made this run, kept for reporting.
    assignments: BTreeMap<String, String>,
    reclaims: Vec<ReclaimEvent>,
    snapshot: SharedSnapshot,
    started_at: DateTime<Utc>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        graph: TaskGraph,
        lock_manager: Arc<LockManager>,
        runtime: Arc<dyn SandboxRuntime>,
        agents: AgentRegistry,
        audit: Arc<ViolationLog>,
    ) -> Self {
        Self {
            config,
            lock_manager,
            runtime,
            agents,
            audit,
            tasks: graph.into_tasks(),
            held: HashMap::new(),
            assignments: BTreeMap::new(),
            reclaims: Vec::new(),
            snapshot: Arc::new(RwLock::new(RunSnapshot::default())),
            started_at: Utc::now(),
        }
    }

    /// Handle for status surfaces and tests to observe the run.
    pub fn snapshot_handle(&self) -> SharedSnapshot {
        self.snapshot.clone()
    }

    /// Drive the run to completion. Ends when every task settles, when no
    /// agent can make further progress, on shutdown-all, or on interrupt.
    pub async fn run(
        mut self,
        mut outcome_rx: mpsc::Receiver<TaskOutcome>,
        mut emergency_rx: watch::Receiver<EmergencyState>,
        mut interrupt_rx: watch::Receiver<bool>,
    ) -> RunReport {
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.tick_interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(tasks = self.tasks.len(), "coordination run starting");

        // A closed side channel disables its branch; only the ticker and
        // outcomes drive the run itself.
        let mut emergency_open = true;
        let mut interrupt_open = true;
        loop {
            if emergency_rx.borrow().is_terminal() {
                error!("run is in shutdown-all; coordinator standing down");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    self.reconcile().await;
                    self.publish_snapshot().await;
                    if self.run_complete().await {
                        info!("all tasks settled; run complete");
                        break;
                    }
                }
                Some(outcome) = outcome_rx.recv() => {
                    self.on_outcome(outcome).await;
                    self.publish_snapshot().await;
                }
                changed = emergency_rx.changed(), if emergency_open => {
                    if changed.is_err() {
                        emergency_open = false;
                    }
                }
                changed = interrupt_rx.changed(), if interrupt_open => {
                    match changed {
                        Ok(()) if *interrupt_rx.borrow() => {
                            warn!("interrupt received; winding down run");
                            break;
                        }
                        Ok(()) => {}
                        Err(_) => interrupt_open = false,
                    }
                }
            }
        }

        let final_state = emergency_rx.borrow().clone();
        self.wind_down(&final_state).await;
        self.publish_snapshot().await;
        self.build_report(final_state).await
    }

    /// One reconciliation tick. Idempotent: safe to run twice.
    async fn reconcile(&mut self) {
        // 1. Reclaim locks whose holders went silent past their TTL.
        match self.lock_manager.reclaim_expired() {
            Ok(records) => {
                let now = Utc::now();
                for record in records {
                    self.reclaims.push(ReclaimEvent {
                        resource_id: record.resource_id,
                        holder_agent_id: record.holder_agent_id,
                        expired_at: record.expires_at,
                        reclaimed_at: now,
                    });
                }
            }
            Err(e) => error!("lock reclaim failed: {e}"),
        }

        // 2. Promote tasks whose dependencies are all done.
        let done: HashSet<String> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id.clone())
            .collect();
        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Pending
                && task.depends_on.iter().all(|dep| done.contains(dep))
            {
                task.status = TaskStatus::Ready;
                debug!(task = %task.id, "task ready");
            }
        }

        // 3. Order ready tasks: fewest waiting dependents first, then id.
        let mut waiting: HashMap<&str, usize> = HashMap::new();
        for task in self.tasks.values() {
            if task.status.is_terminal() {
                continue;
            }
            for dep in &task.depends_on {
                *waiting.entry(dep.as_str()).or_insert(0) += 1;
            }
        }
        let mut ready: Vec<(usize, String)> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|t| (waiting.get(t.id.as_str()).copied().unwrap_or(0), t.id.clone()))
            .collect();
        ready.sort();
        let mut candidates: VecDeque<String> = ready.into_iter().map(|(_, id)| id).collect();

        // 4. Idle agents, in stable id order.
        let idle: Vec<String> = {
            let agents = self.agents.read().await;
            agents
                .values()
                .filter(|a| a.status.can_accept_work())
                .map(|a| a.id.clone())
                .collect()
        };

        // 5. Assign. A task that fails acquisition stays ready; its locks
        //    are already contended this tick, so it is not retried until
        //    the next one.
        'agents: for agent_id in idle {
            while let Some(task_id) = candidates.pop_front() {
                if self.try_assign(&agent_id, &task_id).await {
                    continue 'agents;
                }
            }
            break;
        }
    }

    /// Acquire every resource a task needs, all-or-nothing, then
    /// dispatch. Any failed acquire releases the partial set immediately:
    /// nothing is held across ticks for an unassigned task.
    async fn try_assign(&mut self, agent_id: &str, task_id: &str) -> bool {
        let Some(task) = self.tasks.get(task_id).cloned() else {
            return false;
        };

        let mut resources = task.required_resources.clone();
        resources.sort();
        resources.dedup();

        let ttl = ChronoDuration::seconds(self.config.lock_ttl_secs as i64);
        let mut acquired: Vec<(String, LockToken)> = Vec::new();
        for resource in &resources {
            match self.lock_manager.acquire(resource, agent_id, ttl) {
                Ok(token) => acquired.push((resource.clone(), token)),
                Err(e) => {
                    if e.is_busy() {
                        debug!(task = task_id, resource = %resource, "resource busy; no partial hold");
                    } else {
                        error!(task = task_id, resource = %resource, "acquire failed: {e}");
                    }
                    self.release_set(task_id, acquired);
                    return false;
                }
            }
        }

        // Re-check the agent is still dispatchable: the emergency
        // controller may have quarantined it since the idle snapshot, and
        // its writes take precedence.
        let agent = {
            let mut agents = self.agents.write().await;
            match agents.get_mut(agent_id) {
                Some(a) if a.status.can_accept_work() => {
                    a.status = AgentStatus::Running;
                    a.current_task_id = Some(task_id.to_string());
                    Some(a.clone())
                }
                _ => None,
            }
        };
        let Some(agent) = agent else {
            debug!(agent = agent_id, "agent no longer dispatchable");
            self.release_set(task_id, acquired);
            return false;
        };

        if let Err(e) = self.runtime.start(&agent, &task).await {
            error!(task = task_id, agent = agent_id, "dispatch failed: {e}");
            self.release_set(task_id, acquired);
            let mut agents = self.agents.write().await;
            if let Some(a) = agents.get_mut(agent_id) {
                if a.status == AgentStatus::Running {
                    a.status = AgentStatus::Idle;
                    a.current_task_id = None;
                }
            }
            return false;
        }

        if let Some(t) = self.tasks.get_mut(task_id) {
            t.status = TaskStatus::Assigned;
        }
        self.held.insert(task_id.to_string(), acquired);
        self.assignments
            .insert(task_id.to_string(), agent_id.to_string());
        info!(task = task_id, agent = agent_id, "task assigned");
        true
    }

    fn release_set(&self, task_id: &str, acquired: Vec<(String, LockToken)>) {
        for (resource, token) in acquired {
            if let Err(e) = self.lock_manager.release(&resource, &token) {
                warn!(task = task_id, resource = %resource, "rollback release failed: {e}");
            }
        }
    }

    /// Handle a completion or failure report from the sandbox runtime.
    async fn on_outcome(&mut self, outcome: TaskOutcome) {
        // Locks go back first.
        if let Some(held) = self.held.remove(&outcome.task_id) {
            for (resource, token) in held {
                match self.lock_manager.release(&resource, &token) {
                    Ok(()) => {}
                    Err(LockError::NotHolder { .. }) => warn!(
                        task = %outcome.task_id,
                        resource = %resource,
                        "lock was reclaimed before release; holder was sluggish"
                    ),
                    Err(e) => error!(task = %outcome.task_id, resource = %resource, "release failed: {e}"),
                }
            }
        }

        match self.tasks.get_mut(&outcome.task_id) {
            Some(task) if task.status == TaskStatus::Assigned => {
                if outcome.success {
                    task.status = TaskStatus::Done;
                    info!(task = %outcome.task_id, agent = %outcome.agent_id, "task done");
                } else {
                    task.status = TaskStatus::Failed;
                    warn!(
                        task = %outcome.task_id,
                        agent = %outcome.agent_id,
                        message = outcome.message.as_deref().unwrap_or("unspecified"),
                        "task failed; dependents stay blocked, no auto-retry"
                    );
                }
            }
            Some(task) => warn!(
                task = %outcome.task_id,
                status = %task.status,
                "outcome for task not currently assigned; ignored"
            ),
            None => warn!(task = %outcome.task_id, "outcome for unknown task; ignored"),
        }

        // Return the agent to the pool only if we still own its status.
        let mut agents = self.agents.write().await;
        if let Some(agent) = agents.get_mut(&outcome.agent_id) {
            if agent.status == AgentStatus::Running {
                agent.status = AgentStatus::Idle;
                agent.current_task_id = None;
            } else {
                debug!(
                    agent = %outcome.agent_id,
                    status = %agent.status,
                    "status owned by emergency controller; left as-is"
                );
            }
        }
    }

    /// Whether the run has nothing left it can do. An assigned task only
    /// counts as in-flight while its agent can still report; a task whose
    /// agent was quarantined or stopped will never settle and must not
    /// keep the run alive.
    async fn run_complete(&self) -> bool {
        let agents = self.agents.read().await;
        let mut any_live_assigned = false;
        let mut any_ready = false;
        let mut all_terminal = true;
        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Assigned => {
                    all_terminal = false;
                    let live = self
                        .assignments
                        .get(&task.id)
                        .and_then(|agent_id| agents.get(agent_id))
                        .is_some_and(|agent| !agent.status.is_terminal());
                    if live {
                        any_live_assigned = true;
                    }
                }
                TaskStatus::Ready => {
                    any_ready = true;
                    all_terminal = false;
                }
                TaskStatus::Pending => all_terminal = false,
                TaskStatus::Done | TaskStatus::Failed => {}
            }
        }
        if all_terminal {
            return true;
        }
        if any_live_assigned {
            return false;
        }

        if !agents.values().any(|a| !a.status.is_terminal()) {
            warn!("no agents remain available; ending run with unfinished tasks");
            return true;
        }

        // Nothing in flight, nothing ready: with an acyclic graph the
        // remaining pending tasks all sit behind failed ancestors.
        if !any_ready {
            warn!("remaining tasks cannot progress; ending run");
            return true;
        }
        false
    }

    /// Stop sandboxes that are still live at the end of a normal run.
    /// After shutdown-all the emergency controller has already done this.
    async fn wind_down(&mut self, final_state: &EmergencyState) {
        if final_state.is_terminal() {
            return;
        }
        let snapshots: Vec<_> = {
            let mut agents = self.agents.write().await;
            agents
                .values_mut()
                .filter(|a| !a.status.is_terminal())
                .map(|a| {
                    a.status = AgentStatus::Stopped;
                    a.clone()
                })
                .collect()
        };
        for agent in snapshots {
            if let Err(e) = self.runtime.stop(&agent).await {
                error!(agent = %agent.id, "stop failed during wind-down: {e}");
            }
        }
    }

    async fn publish_snapshot(&self) {
        let snapshot = RunSnapshot {
            tasks: self
                .tasks
                .values()
                .map(|t| (t.id.clone(), t.status))
                .collect(),
            assignments: self.assignments.clone(),
            reclaims: self.reclaims.len(),
            last_refresh: Some(Utc::now()),
        };
        *self.snapshot.write().await = snapshot;
    }

    async fn build_report(self, final_state: EmergencyState) -> RunReport {
        let violations = match self.audit.load() {
            Ok(violations) => violations,
            Err(e) => {
                error!("could not load audit log for report: {e}");
                Vec::new()
            }
        };
        let agents: Vec<_> = {
            let agents = self.agents.read().await;
            agents.values().cloned().collect()
        };
        RunReport::build(
            self.started_at,
            final_state,
            self.tasks.into_values().collect(),
            &self.assignments,
            agents,
            self.reclaims,
            violations,
        )
    }
}
