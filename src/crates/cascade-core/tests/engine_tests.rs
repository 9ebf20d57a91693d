//! End-to-end engine scenarios over compiled graphs
//!
//! These tests drive full runs through the public surface: YAML config in,
//! compiled graph, engine invocation with a scripted prompt executor and the
//! in-memory checkpoint store.

use async_trait::async_trait;
use cascade_checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use cascade_core::engine::{ExecutionEngine, RunConfig, RunInput, RunOutcome};
use cascade_core::error::{EngineError, Result};
use cascade_core::graph::compile::{compile, compile_file};
use cascade_core::llm::TokenUsage;
use cascade_core::prompt::{PromptExecutor, PromptOutcome, PromptRequest};
use cascade_core::tool::{FnTool, ToolRegistry};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Prompt executor with canned responses per prompt name; responses pop in
/// order and the last one repeats. Counts calls per prompt.
struct ScriptedPrompts {
    responses: Mutex<HashMap<String, Vec<Value>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl ScriptedPrompts {
    fn new() -> Self {
        Self {
            responses: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn respond(self, prompt: &str, value: Value) -> Self {
        self.responses
            .lock()
            .unwrap()
            .entry(prompt.to_string())
            .or_default()
            .push(value);
        self
    }

    fn calls(&self, prompt: &str) -> usize {
        self.calls.lock().unwrap().get(prompt).copied().unwrap_or(0)
    }
}

#[async_trait]
impl PromptExecutor for ScriptedPrompts {
    async fn execute(&self, request: PromptRequest) -> Result<PromptOutcome> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.prompt_name.clone())
            .or_insert(0) += 1;

        let value = {
            let mut responses = self.responses.lock().unwrap();
            let queue = responses
                .get_mut(&request.prompt_name)
                .ok_or_else(|| EngineError::node(&request.prompt_name, "no scripted response"))?;
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue[0].clone()
            }
        };

        Ok(PromptOutcome {
            value,
            usage: Some(TokenUsage::new(5, 5)),
        })
    }
}

fn build_engine(yaml: &str, prompts: Arc<ScriptedPrompts>) -> ExecutionEngine {
    let config = cascade_core::config::load_str(yaml).unwrap();
    let graph = compile(config, HashMap::new()).unwrap();
    ExecutionEngine::new(graph).with_prompt_executor(prompts)
}

// --- Scenario 1: linear pipeline ---------------------------------------

#[tokio::test]
async fn linear_pipeline_merges_each_step() {
    let yaml = r#"
name: linear
nodes:
  a:
    type: llm
    prompt: summarize
    state_key: summary
  b:
    type: passthrough
    output:
      count: "{state.counter + 1}"
edges:
  - from: "__start__"
    to: "a"
  - from: "a"
    to: "b"
  - from: "b"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new().respond("summarize", json!("ok")));
    let engine = build_engine(yaml, prompts);

    let outcome = engine
        .invoke(
            RunInput::Values(json!({"topic": "x", "counter": 0})),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    let RunOutcome::Completed { state } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(state["summary"], "ok");
    assert_eq!(state["count"], 1);
    assert_eq!(state["current_step"], "b");
    // Token usage accumulated from the one LLM call.
    assert_eq!(state["_token_usage"], 10);
}

// --- Scenario 2: reflexion loop with limits -----------------------------

#[tokio::test]
async fn reflexion_loop_hits_loop_limit() {
    let yaml = r#"
name: reflexion
nodes:
  draft:
    type: llm
    prompt: draft
    state_key: draft
  critique:
    type: llm
    prompt: critique
    state_key: critique
    parse_json: true
  refine:
    type: llm
    prompt: refine
    state_key: draft
edges:
  - from: "__start__"
    to: "draft"
  - from: "draft"
    to: "critique"
  - from: "critique"
    to: ["refine"]
    condition: "critique.score < 0.8"
  - from: "critique"
    to: "__end__"
    condition: "critique.score >= 0.8"
  - from: "refine"
    to: "critique"
loop_limits:
  refine: 3
  critique: 4
"#;
    let prompts = Arc::new(
        ScriptedPrompts::new()
            .respond("draft", json!("v1"))
            .respond("critique", json!(r#"{"score": 0.5}"#))
            .respond("refine", json!("v2")),
    );
    let engine = build_engine(yaml, prompts.clone());

    let err = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap_err();

    assert!(matches!(err.error, EngineError::LoopLimitExceeded { .. }));
    // Exactly three refinement passes ran before the limit tripped.
    assert_eq!(prompts.calls("refine"), 3);
    // The failure is recorded and the state reflects the last complete
    // superstep.
    assert!(!err.state["errors"].as_array().unwrap().is_empty());
    assert_eq!(err.state["draft"], "v2");
}

// --- Scenario 3: map fan-out with ordered fan-in ------------------------

#[tokio::test]
async fn map_collect_is_ordered_by_index() {
    let yaml = r#"
name: mapped
nodes:
  expand:
    type: map
    over: "{state.items}"
    as: element
    collect: collected
    node:
      type: tool
      tool: times_ten
      state_key: val
      args:
        i: "{state.element.i}"
edges:
  - from: "__start__"
    to: "expand"
  - from: "expand"
    to: "__end__"
"#;
    let config = cascade_core::config::load_str(yaml).unwrap();
    let graph = compile(config, HashMap::new()).unwrap();

    let mut tools = ToolRegistry::new();
    // Earlier items sleep longer, so completion order is reversed.
    tools.register(
        "times_ten",
        Arc::new(FnTool::new("multiply by ten", |args| {
            Box::pin(async move {
                let i = args["i"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(30 - 10 * i.min(2))).await;
                Ok(json!(i * 10))
            })
        })),
    );

    let engine = ExecutionEngine::new(graph).with_tools(tools);
    let outcome = engine
        .invoke(
            RunInput::Values(json!({"items": [{"i": 0}, {"i": 1}, {"i": 2}]})),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        outcome.state()["collected"],
        json!([
            {"val": 0, "_map_index": 0},
            {"val": 10, "_map_index": 1},
            {"val": 20, "_map_index": 2},
        ])
    );
}

// --- Scenario 4: interrupt and resume -----------------------------------

#[tokio::test]
async fn interrupt_then_resume_completes_downstream() {
    let yaml = r#"
name: hitl
nodes:
  ask:
    type: interrupt
    message: "favorite color?"
    resume_key: answer
  echo:
    type: passthrough
    output:
      final: "{state.answer}"
edges:
  - from: "__start__"
    to: "ask"
  - from: "ask"
    to: "echo"
  - from: "echo"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(yaml, prompts).with_checkpointer(store.clone());
    let run = RunConfig::with_thread("session-1");

    let first = engine
        .invoke(RunInput::Values(json!({})), &run)
        .await
        .unwrap();
    let RunOutcome::Interrupted { state, payload } = first else {
        panic!("expected interrupt");
    };
    assert_eq!(payload["node"], "ask");
    assert_eq!(payload["message"], "favorite color?");
    assert!(state.get("__interrupt__").is_some());

    let second = engine
        .invoke(RunInput::Resume(json!("blue")), &run)
        .await
        .unwrap();
    let RunOutcome::Completed { state } = second else {
        panic!("expected completion");
    };
    assert_eq!(state["answer"], "blue");
    assert_eq!(state["final"], "blue");
    assert!(state.get("__interrupt__").is_none());
}

#[tokio::test]
async fn interrupt_without_checkpointer_is_fatal() {
    let yaml = r#"
name: hitl
nodes:
  ask:
    type: interrupt
    resume_key: answer
edges:
  - from: "__start__"
    to: "ask"
"#;
    let prompts = Arc::new(ScriptedPrompts::new());
    let engine = build_engine(yaml, prompts);

    let err = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(
        err.error,
        EngineError::InterruptWithoutCheckpointer { .. }
    ));
}

// --- Scenario 5: router with default route ------------------------------

#[tokio::test]
async fn unknown_route_label_falls_back_to_default() {
    let yaml = r#"
name: routed
nodes:
  classify:
    type: router
    prompt: classify
    routes:
      a: handle_a
      b: handle_b
    default_route: handle_b
  handle_a:
    type: passthrough
    output:
      handled_by: "a"
  handle_b:
    type: passthrough
    output:
      handled_by: "b"
edges:
  - from: "__start__"
    to: "classify"
  - from: "classify"
    to: ["handle_a", "handle_b"]
  - from: "handle_a"
    to: "__end__"
  - from: "handle_b"
    to: "__end__"
"#;
    let prompts = Arc::new(
        ScriptedPrompts::new().respond("classify", json!({"route": "unknown_label"})),
    );
    let engine = build_engine(yaml, prompts);

    let outcome = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.state()["handled_by"], "b");
}

#[tokio::test]
async fn known_route_label_selects_target() {
    let yaml = r#"
name: routed
nodes:
  classify:
    type: router
    prompt: classify
    routes:
      a: handle_a
      b: handle_b
  handle_a:
    type: passthrough
    output:
      handled_by: "a"
  handle_b:
    type: passthrough
    output:
      handled_by: "b"
edges:
  - from: "__start__"
    to: "classify"
  - from: "classify"
    to: ["handle_a", "handle_b"]
  - from: "handle_a"
    to: "__end__"
  - from: "handle_b"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new().respond("classify", json!({"route": "a"})));
    let engine = build_engine(yaml, prompts);

    let outcome = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap();
    assert_eq!(outcome.state()["handled_by"], "a");
    assert_eq!(outcome.state()["_route"], "a");
}

// --- Scenario 6: subgraph with interrupt-output mapping ------------------

#[tokio::test]
async fn subgraph_interrupt_projects_and_resumes() {
    let dir = tempfile::tempdir().unwrap();

    let child = r#"
name: extraction
nodes:
  extract:
    type: passthrough
    output:
      phase: "extracting"
      extracted: "{state.document}"
  ask:
    type: interrupt
    message: "approve extraction?"
    resume_key: approval
  finish:
    type: passthrough
    output:
      final_result: "{state.approval}"
edges:
  - from: "__start__"
    to: "extract"
  - from: "extract"
    to: "ask"
  - from: "ask"
    to: "finish"
  - from: "finish"
    to: "__end__"
"#;
    std::fs::write(dir.path().join("child.yaml"), child).unwrap();

    let parent = r#"
name: parent
nodes:
  analysis:
    type: subgraph
    graph: child.yaml
    mode: invoke
    input_mapping:
      doc: document
    interrupt_output_mapping:
      phase: phase
      extracted: extracted
    output_mapping:
      final_result: result
edges:
  - from: "__start__"
    to: "analysis"
  - from: "analysis"
    to: "__end__"
"#;
    std::fs::write(dir.path().join("parent.yaml"), parent).unwrap();

    let graph = compile_file(dir.path().join("parent.yaml")).unwrap();
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = ExecutionEngine::new(graph).with_checkpointer(store.clone());
    let run = RunConfig::with_thread("t1");

    let first = engine
        .invoke(RunInput::Values(json!({"doc": "contract text"})), &run)
        .await
        .unwrap();
    let RunOutcome::Interrupted { state, payload } = first else {
        panic!("expected interrupt");
    };
    // The child's pre-suspend state is projected into the parent.
    assert_eq!(state["phase"], "extracting");
    assert_eq!(state["extracted"], "contract text");
    // The resumable node is the parent-level subgraph node.
    assert_eq!(payload["node"], "analysis");

    let second = engine
        .invoke(RunInput::Resume(json!("approved")), &run)
        .await
        .unwrap();
    let RunOutcome::Completed { state } = second else {
        panic!("expected completion");
    };
    assert_eq!(state["result"], "approved");
}

#[tokio::test]
async fn direct_subgraph_runs_as_if_inline() {
    let dir = tempfile::tempdir().unwrap();

    let child = r#"
name: enrich
nodes:
  bump:
    type: passthrough
    output:
      n: "{state.n + 1}"
      tagged: "yes"
edges:
  - from: "__start__"
    to: "bump"
  - from: "bump"
    to: "__end__"
"#;
    std::fs::write(dir.path().join("child.yaml"), child).unwrap();

    let parent = r#"
name: parent
nodes:
  inline:
    type: subgraph
    graph: child.yaml
    mode: direct
  after:
    type: passthrough
    output:
      n2: "{state.n * 2}"
edges:
  - from: "__start__"
    to: "inline"
  - from: "inline"
    to: "after"
  - from: "after"
    to: "__end__"
"#;
    std::fs::write(dir.path().join("parent.yaml"), parent).unwrap();

    let graph = compile_file(dir.path().join("parent.yaml")).unwrap();
    let engine = ExecutionEngine::new(graph);

    let outcome = engine
        .invoke(RunInput::Values(json!({"n": 1})), &RunConfig::default())
        .await
        .unwrap();

    // The child's writes land in the parent state as if its nodes ran
    // inline, and downstream parent nodes see them.
    assert_eq!(outcome.state()["n"], 2);
    assert_eq!(outcome.state()["tagged"], "yes");
    assert_eq!(outcome.state()["n2"], 4);
}

// --- Additional engine behaviors ----------------------------------------

#[tokio::test]
async fn skip_if_exists_bypasses_executor() {
    let yaml = r#"
name: idempotent
nodes:
  a:
    type: llm
    prompt: expensive
    state_key: summary
  b:
    type: passthrough
    output:
      after: "{state.summary}"
edges:
  - from: "__start__"
    to: "a"
  - from: "a"
    to: "b"
  - from: "b"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new().respond("expensive", json!("fresh")));
    let engine = build_engine(yaml, prompts.clone());

    // The state key is already populated, so the executor never runs but
    // downstream nodes still do.
    let outcome = engine
        .invoke(
            RunInput::Values(json!({"summary": "cached"})),
            &RunConfig::default(),
        )
        .await
        .unwrap();

    assert_eq!(prompts.calls("expensive"), 0);
    assert_eq!(outcome.state()["summary"], "cached");
    assert_eq!(outcome.state()["after"], "cached");
}

#[tokio::test]
async fn requires_gate_skips_node_and_records_error() {
    let yaml = r#"
name: gated
nodes:
  consume:
    type: passthrough
    requires: ["summary"]
    output:
      used: "{state.summary}"
edges:
  - from: "__start__"
    to: "consume"
  - from: "consume"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new());
    let engine = build_engine(yaml, prompts);

    let outcome = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap();

    let state = outcome.state();
    assert!(state.get("used").is_none());
    let errors = state["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0]["error"].as_str().unwrap().contains("summary"));
}

#[tokio::test]
async fn recursion_limit_aborts_unbounded_loop() {
    let yaml = r#"
name: spin
nodes:
  a:
    type: passthrough
    output:
      n: "{state.n + 1}"
edges:
  - from: "__start__"
    to: "a"
  - from: "a"
    to: "a"
"#;
    let prompts = Arc::new(ScriptedPrompts::new());
    let engine = build_engine(yaml, prompts);

    let run = RunConfig {
        recursion_limit: Some(5),
        ..Default::default()
    };
    let err = engine
        .invoke(RunInput::Values(json!({"n": 0})), &run)
        .await
        .unwrap_err();

    assert!(matches!(
        err.error,
        EngineError::RecursionExceeded { limit: 5 }
    ));
    // Five supersteps completed before the abort.
    assert_eq!(err.state["n"], 5);
}

#[tokio::test]
async fn timeout_cancels_inflight_tasks() {
    let yaml = r#"
name: slow
nodes:
  stall:
    type: tool
    tool: sleepy
    state_key: out
edges:
  - from: "__start__"
    to: "stall"
  - from: "stall"
    to: "__end__"
"#;
    let config = cascade_core::config::load_str(yaml).unwrap();
    let graph = compile(config, HashMap::new()).unwrap();

    let mut tools = ToolRegistry::new();
    tools.register(
        "sleepy",
        Arc::new(FnTool::new("sleeps forever", |_args| {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            })
        })),
    );

    let engine = ExecutionEngine::new(graph).with_tools(tools);
    let run = RunConfig {
        timeout: Some(Duration::from_millis(50)),
        ..Default::default()
    };

    let err = engine
        .invoke(RunInput::Values(json!({})), &run)
        .await
        .unwrap_err();
    assert!(matches!(err.error, EngineError::ExecutionCancelled { .. }));
}

#[tokio::test]
async fn skip_policy_lets_downstream_requires_gate() {
    let yaml = r#"
name: degraded
nodes:
  flaky:
    type: llm
    prompt: flaky
    state_key: summary
    on_error: skip
  consume:
    type: passthrough
    requires: ["summary"]
    output:
      used: "{state.summary}"
edges:
  - from: "__start__"
    to: "flaky"
  - from: "flaky"
    to: "consume"
  - from: "consume"
    to: "__end__"
"#;
    // No scripted response: every call to "flaky" fails.
    let prompts = Arc::new(ScriptedPrompts::new());
    let engine = build_engine(yaml, prompts);

    let outcome = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap();

    let state = outcome.state();
    // The flaky node skipped, the consumer gated; both recorded errors.
    assert!(state["summary"].is_null());
    assert_eq!(state["errors"].as_array().unwrap().len(), 2);
    assert!(state.get("used").is_none());
}

#[tokio::test]
async fn parallel_fan_out_merges_in_spawn_order() {
    let yaml = r#"
name: fanout
nodes:
  seed:
    type: passthrough
    output:
      base: "1"
  left:
    type: tool
    tool: tag
    state_key: winner
    args:
      tag: "left"
      delay_ms: 30
  right:
    type: tool
    tool: tag
    state_key: winner
    args:
      tag: "right"
      delay_ms: 0
edges:
  - from: "__start__"
    to: "seed"
  - from: "seed"
    to: "left"
  - from: "seed"
    to: "right"
  - from: "left"
    to: "__end__"
  - from: "right"
    to: "__end__"
"#;
    let config = cascade_core::config::load_str(yaml).unwrap();
    let graph = compile(config, HashMap::new()).unwrap();

    let counter = Arc::new(AtomicUsize::new(0));
    let order = counter.clone();
    let mut tools = ToolRegistry::new();
    tools.register(
        "tag",
        Arc::new(FnTool::new("tags after a delay", move |args| {
            let order = order.clone();
            Box::pin(async move {
                let delay = args["delay_ms"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                order.fetch_add(1, Ordering::SeqCst);
                Ok(args["tag"].clone())
            })
        })),
    );

    let engine = ExecutionEngine::new(graph).with_tools(tools);
    let outcome = engine
        .invoke(RunInput::Values(json!({})), &RunConfig::default())
        .await
        .unwrap();

    // "right" finishes first, but merges apply in spawn order: the edge
    // declaration order puts "left" before "right", so right's write wins
    // the last-writer-wins reduction.
    assert_eq!(outcome.state()["winner"], "right");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn checkpoint_records_frontier_per_superstep() {
    let yaml = r#"
name: steps
nodes:
  a:
    type: passthrough
    output:
      x: "1"
  b:
    type: passthrough
    output:
      y: "2"
edges:
  - from: "__start__"
    to: "a"
  - from: "a"
    to: "b"
  - from: "b"
    to: "__end__"
"#;
    let prompts = Arc::new(ScriptedPrompts::new());
    let store = Arc::new(InMemoryCheckpointStore::new());
    let engine = build_engine(yaml, prompts).with_checkpointer(store.clone());
    let run = RunConfig::with_thread("steps");

    engine
        .invoke(RunInput::Values(json!({})), &run)
        .await
        .unwrap();

    let history = store.list(Some("steps"), None).await.unwrap();
    // Two supersteps, newest first.
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].checkpoint.step, 0);
    assert_eq!(history[1].checkpoint.frontier, vec!["b".to_string()]);
    assert_eq!(history[0].checkpoint.step, 1);
    assert_eq!(history[0].checkpoint.frontier, vec!["__end__".to_string()]);
}
