//! A local fake model for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use turnstile_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent,
};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<PresetEvent>,
    completed: bool,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    finish_reason: ModelFinishReason,
}

impl TestModelResponse {
    fn new(preset: PresetResponse, delay: Duration) -> Self {
        let has_tool_call = preset
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        Self {
            events: preset.events.into(),
            completed: false,
            delay,
            sleep: None,
            finish_reason: if has_tool_call {
                ModelFinishReason::ToolCalls
            } else {
                ModelFinishReason::Stop
            },
        }
    }
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();

        if let Some(sleep) = &mut this.sleep {
            ready!(sleep.as_mut().poll(cx));
            this.sleep = None;

            let event = match this.events.pop_front() {
                Some(PresetEvent::MessageDelta(msg)) => {
                    ModelResponseEvent::MessageDelta(msg)
                }
                Some(PresetEvent::ToolCall(req)) => {
                    ModelResponseEvent::ToolCall(req)
                }
                Some(PresetEvent::Malformed(message)) => {
                    this.events.clear();
                    this.completed = true;
                    return Poll::Ready(Err(Error {
                        message,
                        kind: ErrorKind::Malformed,
                    }));
                }
                None if !this.completed => {
                    this.completed = true;
                    ModelResponseEvent::Completed(this.finish_reason)
                }
                // In case this method is called after completion.
                None => return Poll::Ready(Ok(None)),
            };
            return Poll::Ready(Ok(Some(event)));
        }

        if this.completed && this.events.is_empty() {
            return Poll::Ready(Ok(None));
        }
        this.sleep = Some(Box::pin(sleep(this.delay)));
        Pin::new(this).poll_next_event(cx)
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<PresetResponse>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond to each request. Every successful request consumes
/// the first remaining step, and a step with pending failures fails the
/// request without being consumed. If there are no enough steps in the
/// script, an error will be returned.
///
/// Clones share the same script, so a test can keep one clone around to
/// inspect the requests received by another.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Arc<Mutex<Script>>,
    delay: Option<Duration>,
}

impl TestModelProvider {
    #[inline]
    pub fn add_response(&self, preset: PresetResponse) {
        self.lock().steps.push_back(preset);
    }

    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns every request received so far, failed ones included.
    #[inline]
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock().requests.clone()
    }

    /// Returns how many requests have been received.
    #[inline]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Returns how many steps are still waiting in the script.
    #[inline]
    pub fn remaining_steps(&self) -> usize {
        self.lock().steps.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        // The script is only touched by short critical sections without
        // panicking code, so a poisoned lock still holds consistent data.
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let delay = self.delay.unwrap_or(Duration::from_millis(1));
        let mut script = self.lock();
        script.requests.push(req.clone());

        let result = 'blk: {
            let Some(step) = script.steps.front_mut() else {
                break 'blk Err(Error {
                    message: "no enough steps".to_owned(),
                    kind: ErrorKind::Other,
                });
            };
            match step.failures {
                Some(0) => {
                    break 'blk Err(Error {
                        message: "preset failure".to_owned(),
                        kind: ErrorKind::Unavailable,
                    });
                }
                Some(ref mut remaining) => {
                    *remaining -= 1;
                    if *remaining == 0 {
                        step.failures = None;
                    }
                    break 'blk Err(Error {
                        message: "preset failure".to_owned(),
                        kind: ErrorKind::Unavailable,
                    });
                }
                None => {}
            }
            let step = script.steps.pop_front().unwrap_or_else(|| {
                unreachable!("front step has been checked")
            });
            Ok(TestModelResponse::new(step, delay))
        };
        ready(result)
    }
}
