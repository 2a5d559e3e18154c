//! Turn configuration.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";
const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Decides how tool calls of one model response are routed when some of
/// them name external actions.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingPolicy {
    /// The first tool call decides for the whole response: if it names an
    /// external action, every call of the response is left pending for the
    /// host, including calls to local tools.
    ///
    /// # Quirk
    ///
    /// Local calls that follow an external one in the same response are
    /// starved: they are never executed by the agent, and the host has to
    /// answer them as well before the turn can resume. This is kept for
    /// compatibility with hosts relying on it.
    #[default]
    FirstCallWins,
    /// Every tool call is routed on its own: local calls are executed right
    /// away, and the turn only waits for the host if external calls remain.
    PerRequest,
}

impl Display for RoutingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingPolicy::FirstCallWins => write!(f, "first-call-wins"),
            RoutingPolicy::PerRequest => write!(f, "per-request"),
        }
    }
}

impl FromStr for RoutingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "first-call-wins" => Ok(RoutingPolicy::FirstCallWins),
            "per-request" => Ok(RoutingPolicy::PerRequest),
            _ => Err(format!("unknown routing policy: {s}")),
        }
    }
}

/// Configuration of the turn controller.
///
/// It can be deserialized from any `serde` format; missing fields take
/// their default values.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// The system preamble sent before the conversation.
    pub system_prompt: String,
    /// Maximum number of model invocations in one turn, `None` for no
    /// limit. A limit of `0` also means no limit.
    #[serde(deserialize_with = "deserialize_limit")]
    pub max_iterations: Option<u32>,
    /// How tool calls are routed between the agent and the host.
    pub routing: RoutingPolicy,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            max_iterations: Some(DEFAULT_MAX_ITERATIONS),
            routing: RoutingPolicy::default(),
        }
    }
}

impl TurnConfig {
    /// Creates a builder starting from the default configuration.
    #[inline]
    pub fn builder() -> TurnConfigBuilder {
        TurnConfigBuilder {
            config: TurnConfig::default(),
        }
    }

    /// Returns the effective iteration limit, if any.
    #[inline]
    pub fn iteration_limit(&self) -> Option<u32> {
        self.max_iterations.filter(|&limit| limit > 0)
    }
}

fn deserialize_limit<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let limit = Option::<u32>::deserialize(deserializer)?;
    Ok(limit.filter(|&limit| limit > 0))
}

/// Builder for [`TurnConfig`].
#[derive(Clone, Debug)]
pub struct TurnConfigBuilder {
    config: TurnConfig,
}

impl TurnConfigBuilder {
    /// Sets the system preamble.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.config.system_prompt = prompt.into();
        self
    }

    /// Sets the maximum number of model invocations per turn. `0` removes
    /// the limit.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations =
            Some(max_iterations).filter(|&limit| limit > 0);
        self
    }

    /// Removes the iteration limit.
    #[inline]
    pub fn without_iteration_limit(mut self) -> Self {
        self.config.max_iterations = None;
        self
    }

    /// Sets the routing policy.
    #[inline]
    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.config.routing = routing;
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> TurnConfig {
        self.config
    }
}
