//! Executes the local tool calls of one model response.

use std::sync::Arc;

use tokio_util::task::AbortOnDropHandle;
use tracing::Instrument;
use turnstile_model::ToolCallRequest;

use super::capability::Capability;
use super::{CapabilitySet, Error, ToolResult};
use crate::conversation::ToolResultMessage;

enum Pending {
    Ready(ToolResult),
    Running(AbortOnDropHandle<ToolResult>),
}

/// Runs every request concurrently and returns one result per request, in
/// request order.
///
/// Requests that don't name a local tool yield an `UnknownTool` error
/// result. A panicking tool yields an `ExecutionError` result. Dropping the
/// returned future aborts the tools still running.
pub(crate) async fn execute(
    requests: &[ToolCallRequest],
    capabilities: &CapabilitySet,
) -> Vec<ToolResultMessage> {
    let span = debug_span!("tool executor", count = requests.len());
    async move {
        let running: Vec<_> = requests
            .iter()
            .map(|req| (req.id.clone(), spawn(req, capabilities)))
            .collect();

        let mut results = Vec::with_capacity(running.len());
        for (id, pending) in running {
            let result = match pending {
                Pending::Ready(result) => result,
                Pending::Running(handle) => match handle.await {
                    Ok(result) => result,
                    Err(err) => {
                        error!("tool ({id}) did not complete: {err}");
                        let reason = if err.is_panic() {
                            "tool panicked"
                        } else {
                            "tool was aborted"
                        };
                        Err(Error::execution_error().with_reason(reason))
                    }
                },
            };
            trace!("tool ({id}) finished: {result:?}");
            results.push(ToolResultMessage::from_tool_result(id, result));
        }
        results
    }
    .instrument(span)
    .await
}

fn spawn(req: &ToolCallRequest, capabilities: &CapabilitySet) -> Pending {
    match capabilities.get(&req.name) {
        Some(Capability::Local(tool)) => {
            let (id, arguments) = (&req.id, &req.arguments);
            trace!("spawning a tool ({id}) with args: {arguments:?}");
            let fut = Arc::clone(tool).execute(req.arguments.clone());
            Pending::Running(AbortOnDropHandle::new(tokio::spawn(fut)))
        }
        Some(Capability::External(_)) => {
            warn!("external action requested in a local batch: {}", req.name);
            let name = &req.name;
            let reason = format!("`{name}` is an external action");
            Pending::Ready(Err(Error::unknown_tool(name).with_reason(reason)))
        }
        None => {
            warn!("tool not found: {}", req.name);
            Pending::Ready(Err(Error::unknown_tool(&req.name)))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::testing::{PanickingTool, SleepTool, WeatherTool, call};
    use crate::tool::{ErrorKind, ExternalAction, ToolRegistry};

    fn capabilities() -> CapabilitySet {
        let mut tools = ToolRegistry::default();
        tools.add_tool(WeatherTool);
        tools.add_tool(SleepTool);
        tools.add_tool(PanickingTool);
        CapabilitySet::merge(&tools, &[ExternalAction::new("bookFlight", "")])
    }

    #[tokio::test]
    async fn test_results_in_request_order() {
        let requests = [
            call("c1", "sleep", json!(30)),
            call("c2", "sleep", json!(10)),
            call("c3", "get_weather", json!({ "location": "Paris" })),
        ];
        let results = execute(&requests, &capabilities()).await;
        let ids: Vec<_> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2", "c3"]);
        assert_eq!(results[0].content, "slept 30ms");
        assert_eq!(results[2].content, "The weather for Paris is 70 degrees.");
        assert!(results.iter().all(|r| !r.is_error()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_concurrently() {
        let requests = [
            call("c1", "sleep", json!(1000)),
            call("c2", "sleep", json!(1000)),
        ];
        let started = tokio::time::Instant::now();
        let results = execute(&requests, &capabilities()).await;
        assert_eq!(results.len(), 2);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_failures_become_results() {
        let requests = [
            call("c1", "missing", json!({})),
            call("c2", "get_weather", json!({ "city": "Paris" })),
            call("c3", "get_weather", json!({ "location": "nowhere" })),
            call("c4", "panic", json!(null)),
            call("c5", "bookFlight", json!({})),
        ];
        let results = execute(&requests, &capabilities()).await;
        let kinds: Vec<_> = results.iter().map(|r| r.error).collect();
        assert_eq!(
            kinds,
            [
                Some(ErrorKind::UnknownTool),
                Some(ErrorKind::InvalidInput),
                Some(ErrorKind::ExecutionError),
                Some(ErrorKind::ExecutionError),
                Some(ErrorKind::UnknownTool),
            ]
        );
        assert!(results[0].content.starts_with("Error: Unknown tool"));
        assert!(results[2].content.ends_with("no such place"));
        assert!(results[3].content.ends_with("tool panicked"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        assert!(execute(&[], &capabilities()).await.is_empty());
    }
}
