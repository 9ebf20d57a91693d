//! Per-node `on_error` policy application
//!
//! Wraps a compiled executor: recoverable failures are filtered through the
//! node's policy (fail, skip, retry with backoff, fallback provider) before
//! the engine ever sees them. Structural errors pass straight through.

use crate::config::schema::OnError;
use crate::error::{EngineError, Result};
use crate::node::{error_entry, NodeContext, NodeExecutor, NodeSignal};
use crate::retry::RetryPolicy;
use crate::state::{ERRORS_KEY, SKIPPED_KEY};
use serde_json::{json, Value};
use tracing::{debug, warn};

/// The policy-relevant slice of a compiled node
pub(crate) struct PolicyInputs<'a> {
    pub name: &'a str,
    pub on_error: OnError,
    pub state_key: Option<&'a str>,
    pub max_retries: Option<u32>,
    pub executor: &'a NodeExecutor,
    pub fallback: Option<&'a NodeExecutor>,
}

/// Run a node executor with its error policy applied.
pub(crate) async fn run_with_policy(
    inputs: PolicyInputs<'_>,
    state: Value,
    ctx: NodeContext,
) -> Result<NodeSignal> {
    let first = (inputs.executor)(state.clone(), ctx.clone()).await;

    let err = match first {
        Ok(signal) => return Ok(signal),
        Err(err) if err.is_recoverable() => err,
        Err(fatal) => return Err(fatal),
    };

    match inputs.on_error {
        OnError::Fail => Err(err),
        OnError::Skip => {
            warn!(node = inputs.name, error = %err, "node failed; skipping per policy");
            Ok(NodeSignal::Continue(skip_update(
                inputs.name,
                inputs.state_key,
                &err,
            )))
        }
        OnError::Retry => {
            // max_retries counts re-attempts after the initial failure.
            let policy = RetryPolicy::new(inputs.max_retries.unwrap_or(2) + 1);
            let mut attempts: u32 = 1;
            let mut last_err = err;

            while policy.should_retry(attempts) {
                let delay = policy.calculate_delay(attempts - 1);
                debug!(
                    node = inputs.name,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;

                match (inputs.executor)(state.clone(), ctx.clone()).await {
                    Ok(signal) => return Ok(signal),
                    Err(e) if e.is_recoverable() => {
                        attempts += 1;
                        last_err = e;
                    }
                    Err(fatal) => return Err(fatal),
                }
            }

            // Exhausted: escalate to fallback when configured, fail otherwise.
            match inputs.fallback {
                Some(fallback) => run_fallback(inputs.name, fallback, state, ctx, last_err).await,
                None => Err(last_err),
            }
        }
        OnError::Fallback => match inputs.fallback {
            Some(fallback) => run_fallback(inputs.name, fallback, state, ctx, err).await,
            None => Err(err),
        },
    }
}

async fn run_fallback(
    name: &str,
    fallback: &NodeExecutor,
    state: Value,
    ctx: NodeContext,
    primary_err: EngineError,
) -> Result<NodeSignal> {
    warn!(node = name, error = %primary_err, "invoking fallback provider");
    fallback(state, ctx).await
}

fn skip_update(name: &str, state_key: Option<&str>, err: &EngineError) -> Value {
    let mut update = json!({
        SKIPPED_KEY: true,
        ERRORS_KEY: [error_entry(name, err)],
    });
    if let Some(key) = state_key {
        update[key] = Value::Null;
    }
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::{context_with, ScriptedPrompts};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn failing_n_times(failures: u32) -> (NodeExecutor, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let executor: NodeExecutor = Arc::new(move |_state, _ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if n < failures {
                    Err(EngineError::node("flaky", "transient"))
                } else {
                    Ok(NodeSignal::Continue(json!({"out": "ok"})))
                }
            })
        });
        (executor, calls)
    }

    fn inputs<'a>(
        on_error: OnError,
        executor: &'a NodeExecutor,
        fallback: Option<&'a NodeExecutor>,
    ) -> PolicyInputs<'a> {
        PolicyInputs {
            name: "flaky",
            on_error,
            state_key: Some("out"),
            max_retries: Some(3),
            executor,
            fallback,
        }
    }

    #[tokio::test]
    async fn test_fail_propagates() {
        let (executor, _) = failing_n_times(10);
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let err = run_with_policy(inputs(OnError::Fail, &executor, None), json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeError { .. }));
    }

    #[tokio::test]
    async fn test_skip_nulls_state_key_and_records_error() {
        let (executor, _) = failing_n_times(10);
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let signal = run_with_policy(inputs(OnError::Skip, &executor, None), json!({}), ctx)
            .await
            .unwrap();
        let NodeSignal::Continue(update) = signal else {
            panic!("expected continue");
        };
        assert!(update["out"].is_null());
        assert_eq!(update[SKIPPED_KEY], true);
        assert_eq!(update[ERRORS_KEY][0]["node"], "flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_succeeds_after_transient_failures() {
        let (executor, calls) = failing_n_times(2);
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let signal = run_with_policy(inputs(OnError::Retry, &executor, None), json!({}), ctx)
            .await
            .unwrap();
        assert!(matches!(signal, NodeSignal::Continue(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_fails() {
        let (executor, calls) = failing_n_times(100);
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let err = run_with_policy(inputs(OnError::Retry, &executor, None), json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NodeError { .. }));
        // One initial attempt plus max_retries re-attempts.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_escalates_to_fallback() {
        let (executor, _) = failing_n_times(100);
        let fallback: NodeExecutor = Arc::new(|_state, _ctx| {
            Box::pin(async move { Ok(NodeSignal::Continue(json!({"out": "fallback"}))) })
        });
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let signal = run_with_policy(
            inputs(OnError::Retry, &executor, Some(&fallback)),
            json!({}),
            ctx,
        )
        .await
        .unwrap();
        let NodeSignal::Continue(update) = signal else {
            panic!("expected continue");
        };
        assert_eq!(update["out"], "fallback");
    }

    #[tokio::test]
    async fn test_fallback_policy_invokes_alternate() {
        let (executor, _) = failing_n_times(100);
        let fallback: NodeExecutor = Arc::new(|_state, _ctx| {
            Box::pin(async move { Ok(NodeSignal::Continue(json!({"out": "alternate"}))) })
        });
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let signal = run_with_policy(
            inputs(OnError::Fallback, &executor, Some(&fallback)),
            json!({}),
            ctx,
        )
        .await
        .unwrap();
        let NodeSignal::Continue(update) = signal else {
            panic!("expected continue");
        };
        assert_eq!(update["out"], "alternate");
    }

    #[tokio::test]
    async fn test_fatal_errors_bypass_policy() {
        let executor: NodeExecutor = Arc::new(|_state, _ctx| {
            Box::pin(async move { Err(EngineError::RecursionExceeded { limit: 5 }) })
        });
        let (ctx, _) = context_with(ScriptedPrompts::new());

        let err = run_with_policy(inputs(OnError::Skip, &executor, None), json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RecursionExceeded { .. }));
    }
}
