//! Superstep execution engine
//!
//! Pregel-style scheduling: each superstep computes the active frontier,
//! filters it through the eligibility checks (`skip_if_exists`, `requires`,
//! loop limits), dispatches the surviving tasks concurrently, merges their
//! staged updates through the reducer table in deterministic order, persists
//! a checkpoint, and applies edges to produce the next frontier.
//!
//! Tasks never observe each other's in-flight updates; merges happen only at
//! the superstep barrier, in task spawn order. The checkpoint written after
//! superstep N carries the frontier for superstep N+1, which is all a resume
//! needs.
//!
//! # Interrupts
//!
//! A node returning `Interrupt` suspends the run: the payload lands under
//! `__interrupt__`, a checkpoint is written, and the caller gets
//! [`RunOutcome::Interrupted`]. A later invocation with
//! [`RunInput::Resume`] re-enters the interrupt node, which consumes the
//! value under its `resume_key`. Without a checkpoint store, an interrupt is
//! fatal.

pub mod policy;

use crate::error::{EngineError, Result, RunError};
use crate::expr::eval_condition;
use crate::graph::compile::{CompiledGraph, CompiledNode};
use crate::graph::END;
use crate::node::{error_entry, NodeContext, NodeSignal};
use crate::prompt::{PromptExecutor, PromptOutcome, PromptRequest};
use crate::state::{CURRENT_STEP_KEY, ERRORS_KEY, INTERRUPT_KEY, LOOP_COUNTS_KEY, ROUTE_KEY};
use crate::tool::ToolRegistry;
use async_trait::async_trait;
use cascade_checkpoint::{Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointStore};
use futures::future::join_all;
use policy::{run_with_policy, PolicyInputs};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Input to a run: fresh values, or a resume value for a pending interrupt
#[derive(Debug, Clone)]
pub enum RunInput {
    Values(Value),
    Resume(Value),
}

/// How a run ended
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The frontier drained; `state` is final
    Completed { state: Value },
    /// Suspended on an interrupt; resume with [`RunInput::Resume`]
    Interrupted { state: Value, payload: Value },
}

impl RunOutcome {
    pub fn state(&self) -> &Value {
        match self {
            RunOutcome::Completed { state } => state,
            RunOutcome::Interrupted { state, .. } => state,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, RunOutcome::Interrupted { .. })
    }
}

/// Per-invocation settings
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Thread identity for checkpointing; anonymous runs skip persistence
    pub thread_id: Option<String>,
    /// Override of the graph's recursion limit
    pub recursion_limit: Option<u64>,
    /// Override of the graph's total timeout
    pub timeout: Option<Duration>,
}

impl RunConfig {
    pub fn with_thread(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            ..Default::default()
        }
    }
}

// Prompt executor used when none is configured; graphs without LLM nodes
// never hit it.
struct UnconfiguredPrompts;

#[async_trait]
impl PromptExecutor for UnconfiguredPrompts {
    async fn execute(&self, request: PromptRequest) -> Result<PromptOutcome> {
        Err(EngineError::node(
            request.prompt_name,
            "no prompt executor configured on the engine",
        ))
    }
}

/// The superstep scheduler over a compiled graph
pub struct ExecutionEngine {
    graph: Arc<CompiledGraph>,
    tools: Arc<ToolRegistry>,
    prompts: Arc<dyn PromptExecutor>,
    store: Option<Arc<dyn CheckpointStore>>,
    depth: u64,
}

impl ExecutionEngine {
    pub fn new(graph: CompiledGraph) -> Self {
        Self {
            graph: Arc::new(graph),
            tools: Arc::new(ToolRegistry::new()),
            prompts: Arc::new(UnconfiguredPrompts),
            store: None,
            depth: 0,
        }
    }

    /// Assemble an engine from shared parts (subgraph runs reuse the
    /// parent's registries and store).
    pub fn from_parts(
        graph: Arc<CompiledGraph>,
        tools: Arc<ToolRegistry>,
        prompts: Arc<dyn PromptExecutor>,
        store: Option<Arc<dyn CheckpointStore>>,
    ) -> Self {
        Self {
            graph,
            tools,
            prompts,
            store,
            depth: 0,
        }
    }

    /// Subgraph nesting depth of this engine's runs.
    pub fn with_depth(mut self, depth: u64) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn with_prompt_executor(mut self, prompts: Arc<dyn PromptExecutor>) -> Self {
        self.prompts = prompts;
        self
    }

    pub fn with_checkpointer(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Run the graph to completion, interruption, or failure.
    pub async fn invoke(&self, input: RunInput, run: &RunConfig) -> std::result::Result<RunOutcome, RunError> {
        let deadline = run
            .timeout
            .or(self
                .graph
                .defaults
                .timeout_seconds
                .map(Duration::from_secs))
            .map(|d| Instant::now() + d);
        let recursion_limit = run
            .recursion_limit
            .unwrap_or(self.graph.defaults.recursion_limit);

        let started = Instant::now();
        let mut run_state = self
            .initialize(input, run)
            .await
            .map_err(|e| RunError::new(e, Value::Object(Default::default())))?;

        info!(
            graph = %self.graph.name,
            thread = ?run.thread_id,
            frontier = ?run_state.frontier,
            "starting run"
        );

        loop {
            run_state.frontier.retain(|n| n.as_str() != END);
            if run_state.frontier.is_empty() {
                break;
            }

            if run_state.step >= recursion_limit {
                let err = EngineError::RecursionExceeded {
                    limit: recursion_limit,
                };
                return Err(RunError::new(err, run_state.state));
            }

            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(cancelled(started, deadline, run_state.state));
                }
            }

            match self
                .superstep(&mut run_state, run, deadline, started)
                .await
            {
                Ok(StepResult::Continue) => {}
                Ok(StepResult::Suspended(payload)) => {
                    return Ok(RunOutcome::Interrupted {
                        state: run_state.state,
                        payload,
                    });
                }
                Err(err) => return Err(RunError::new(err, run_state.state)),
            }
        }

        info!(graph = %self.graph.name, steps = run_state.step, "run completed");
        Ok(RunOutcome::Completed {
            state: run_state.state,
        })
    }

    async fn initialize(&self, input: RunInput, run: &RunConfig) -> Result<RunState> {
        let existing = match (&self.store, &run.thread_id) {
            (Some(store), Some(thread)) => store.get(thread).await?,
            _ => None,
        };

        match existing {
            Some(tuple) => {
                let mut state = tuple.checkpoint.state;
                let mut frontier = tuple.checkpoint.frontier;
                let step = tuple.checkpoint.step + 1;
                let mut resume = None;

                match input {
                    RunInput::Resume(value) => {
                        let pending = state
                            .get(INTERRUPT_KEY)
                            .and_then(|p| p.get("node"))
                            .and_then(Value::as_str)
                            .map(str::to_string);
                        let Some(target) = pending else {
                            return Err(EngineError::InvalidConfig(
                                "resume input supplied but no interrupt is pending".into(),
                            ));
                        };
                        if let Some(obj) = state.as_object_mut() {
                            obj.remove(INTERRUPT_KEY);
                        }
                        debug!(node = %target, "resuming into interrupt node");
                        frontier = reorder_with_target(frontier, &target);
                        resume = Some((target, value));
                    }
                    RunInput::Values(values) => {
                        if let (Some(obj), Some(input_obj)) =
                            (state.as_object_mut(), values.as_object())
                        {
                            for (k, v) in input_obj {
                                obj.insert(k.clone(), v.clone());
                            }
                        }
                    }
                }

                Ok(RunState {
                    state,
                    frontier,
                    step,
                    resume,
                })
            }
            None => {
                let values = match input {
                    RunInput::Values(values) => values,
                    RunInput::Resume(_) => {
                        return Err(EngineError::InvalidConfig(
                            "resume input supplied but the thread has no checkpoint".into(),
                        ));
                    }
                };
                let state = self.graph.schema.initial_state(&values).map_err(|e| {
                    EngineError::InvalidConfig(format!("initial state: {}", e))
                })?;
                let frontier =
                    self.next_frontier(&[crate::graph::START.to_string()], &state)?;
                Ok(RunState {
                    state,
                    frontier,
                    step: 0,
                    resume: None,
                })
            }
        }
    }

    async fn superstep(
        &self,
        run_state: &mut RunState,
        run: &RunConfig,
        deadline: Option<Instant>,
        started: Instant,
    ) -> Result<StepResult> {
        let frontier = dedup(std::mem::take(&mut run_state.frontier));
        debug!(step = run_state.step, frontier = ?frontier, "superstep");

        // Eligibility: skip-if-exists, requires, loop limits.
        let mut completed: Vec<String> = Vec::new();
        let mut scheduled: Vec<Arc<CompiledNode>> = Vec::new();

        for name in &frontier {
            let node = self
                .graph
                .nodes
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::unknown_node(name, "frontier"))?;

            if node.skip_if_exists {
                if let Some(key) = &node.state_key {
                    let present = run_state
                        .state
                        .get(key)
                        .map(|v| !v.is_null())
                        .unwrap_or(false);
                    if present {
                        debug!(node = %name, key = %key, "skip_if_exists: output present");
                        completed.push(name.clone());
                        continue;
                    }
                }
            }

            if let Some(missing) = node
                .requires
                .iter()
                .find(|key| {
                    run_state
                        .state
                        .get(key.as_str())
                        .map(Value::is_null)
                        .unwrap_or(true)
                })
                .cloned()
            {
                let err = EngineError::MissingRequirement {
                    node: name.clone(),
                    key: missing,
                };
                warn!(node = %name, error = %err, "requirement missing; node skipped");
                self.merge(&mut run_state.state, &json!({ ERRORS_KEY: [error_entry(name, &err)] }))?;
                completed.push(name.clone());
                continue;
            }

            let count = run_state
                .state
                .get(LOOP_COUNTS_KEY)
                .and_then(|c| c.get(name.as_str()))
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            self.merge(
                &mut run_state.state,
                &json!({ LOOP_COUNTS_KEY: { name.as_str(): count } }),
            )?;

            if let Some(limit) = node.loop_limit {
                if count > limit {
                    let err = EngineError::LoopLimitExceeded {
                        node: name.clone(),
                        limit,
                    };
                    self.merge(
                        &mut run_state.state,
                        &json!({ ERRORS_KEY: [error_entry(name, &err)] }),
                    )?;
                    self.persist(run, run_state, frontier.clone(), CheckpointSource::Loop)
                        .await?;
                    return Err(err);
                }
            }

            scheduled.push(node);
        }

        // Dispatch under the superstep barrier.
        let ctx_base = NodeContext {
            tools: self.tools.clone(),
            prompts: self.prompts.clone(),
            store: self.store.clone(),
            thread_id: run.thread_id.clone(),
            graph_dir: self.graph.graph_dir.clone(),
            exec: self.graph.defaults.clone(),
            graph_defaults: self.graph.graph_defaults.clone(),
            resume: None,
            depth: self.depth,
            deadline,
        };

        let resume = run_state.resume.take();
        let tasks = scheduled.iter().map(|node| {
            let mut ctx = ctx_base.clone();
            if let Some((target, value)) = &resume {
                if target == &node.name {
                    ctx.resume = Some(value.clone());
                }
            }
            let node = node.clone();
            let state = run_state.state.clone();
            async move {
                let inputs = PolicyInputs {
                    name: &node.name,
                    on_error: node.on_error,
                    state_key: node.state_key.as_deref(),
                    max_retries: node.max_retries,
                    executor: &node.executor,
                    fallback: node.fallback.as_ref(),
                };
                run_with_policy(inputs, state, ctx).await
            }
        });

        let joined = match deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match tokio::time::timeout(remaining, join_all(tasks)).await {
                    Ok(results) => results,
                    Err(_) => {
                        // In-flight tasks were dropped at the barrier; the
                        // last persisted checkpoint remains authoritative.
                        let timeout_ms =
                            deadline.saturating_duration_since(started).as_millis() as u64;
                        return Err(EngineError::ExecutionCancelled {
                            elapsed_ms: started.elapsed().as_millis() as u64,
                            timeout_ms,
                        });
                    }
                }
            }
            None => join_all(tasks).await,
        };

        // Merge staged updates in task spawn order.
        let mut interrupts: Vec<(String, Value)> = Vec::new();
        for (node, result) in scheduled.iter().zip(joined) {
            match result? {
                NodeSignal::Continue(updates) => {
                    self.merge(&mut run_state.state, &updates)?;
                    self.merge(
                        &mut run_state.state,
                        &json!({ CURRENT_STEP_KEY: node.name.clone() }),
                    )?;
                    completed.push(node.name.clone());
                }
                NodeSignal::Interrupt { payload, updates } => {
                    self.merge(&mut run_state.state, &updates)?;
                    self.merge(
                        &mut run_state.state,
                        &json!({ CURRENT_STEP_KEY: node.name.clone() }),
                    )?;
                    interrupts.push((node.name.clone(), payload));
                }
            }
        }

        if let Some((node, payload)) = interrupts.first().cloned() {
            if self.store.is_none() || run.thread_id.is_none() {
                return Err(EngineError::InterruptWithoutCheckpointer { node });
            }

            // Force the payload's `node` to this graph's node so resume
            // re-enters at the right level (a subgraph's child payload names
            // the child's node).
            let payload = match payload {
                Value::Object(mut obj) => {
                    obj.insert("node".to_string(), json!(node));
                    Value::Object(obj)
                }
                other => json!({"node": node, "value": other}),
            };

            self.merge(&mut run_state.state, &json!({ INTERRUPT_KEY: payload.clone() }))?;

            let mut next = interrupts.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();
            next.extend(self.next_frontier(&completed, &run_state.state)?);
            let next = dedup(next);

            self.persist(run, run_state, next, CheckpointSource::Interrupt)
                .await?;
            info!(node = %node, "run suspended on interrupt");
            return Ok(StepResult::Suspended(payload));
        }

        let next = self.next_frontier(&completed, &run_state.state)?;
        self.persist(run, run_state, next.clone(), CheckpointSource::Loop)
            .await?;

        run_state.step += 1;
        run_state.frontier = next;
        Ok(StepResult::Continue)
    }

    fn merge(&self, state: &mut Value, updates: &Value) -> Result<()> {
        self.graph
            .schema
            .apply(state, updates)
            .map_err(|e| EngineError::InvalidConfig(format!("state merge: {}", e)))
    }

    async fn persist(
        &self,
        run: &RunConfig,
        run_state: &RunState,
        frontier: Vec<String>,
        source: CheckpointSource,
    ) -> Result<()> {
        let (Some(store), Some(thread)) = (&self.store, &run.thread_id) else {
            return Ok(());
        };

        let checkpoint = Checkpoint::new(run_state.step, run_state.state.clone(), frontier);
        let metadata = CheckpointMetadata::new()
            .with_source(source)
            .with_extra("graph", json!(self.graph.name));
        store.put(thread, checkpoint, metadata).await?;
        Ok(())
    }

    /// Apply edges from completed nodes to compute the next frontier.
    fn next_frontier(&self, completed: &[String], state: &Value) -> Result<Vec<String>> {
        let mut next = Vec::new();
        for node in completed {
            for edge in self.graph.topology.edges_from(node) {
                self.apply_edge(node, edge, state, &mut next)?;
            }
        }
        Ok(dedup(next))
    }

    fn apply_edge(
        &self,
        from: &str,
        edge: &crate::config::schema::EdgeConfig,
        state: &Value,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if !edge.is_conditional() {
            out.extend(edge.to.names().into_iter().map(str::to_string));
            return Ok(());
        }

        if let Some(condition) = &edge.condition {
            if eval_condition(condition, state)? {
                out.extend(edge.to.names().into_iter().map(str::to_string));
            }
            return Ok(());
        }

        // List target with no condition: route-label selection.
        let targets = edge.to.names();
        let label = state.get(ROUTE_KEY).and_then(Value::as_str);
        let compiled = self.graph.nodes.get(from);

        let mapped = label.and_then(|l| {
            compiled
                .and_then(|n| n.routes.get(l).cloned())
                .or_else(|| targets.contains(&l).then(|| l.to_string()))
        });
        let target = mapped.or_else(|| compiled.and_then(|n| n.default_route.clone()));

        match target {
            Some(target) => out.push(target),
            None => {
                warn!(
                    from = %from,
                    label = ?label,
                    "no route target and no default_route; edge dropped"
                );
            }
        }
        Ok(())
    }
}

enum StepResult {
    Continue,
    Suspended(Value),
}

struct RunState {
    state: Value,
    frontier: Vec<String>,
    step: u64,
    /// `(target_node, value)` consumed by the first superstep after resume
    resume: Option<(String, Value)>,
}

fn cancelled(started: Instant, deadline: Instant, state: Value) -> RunError {
    RunError::new(
        EngineError::ExecutionCancelled {
            elapsed_ms: started.elapsed().as_millis() as u64,
            timeout_ms: deadline.saturating_duration_since(started).as_millis() as u64,
        },
        state,
    )
}

fn dedup(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|n| seen.insert(n.clone()))
        .collect()
}

fn reorder_with_target(frontier: Vec<String>, target: &str) -> Vec<String> {
    let mut next = vec![target.to_string()];
    next.extend(frontier.into_iter().filter(|n| n.as_str() != target));
    next
}
