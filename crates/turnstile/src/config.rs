//! Reads the agent settings from environment variables.

use turnstile_core::{RoutingPolicy, TurnConfig};

/// Maximum number of model invocations per turn. `0` or `none` lifts the
/// limit.
pub const MAX_ITERATIONS_VAR: &str = "TURNSTILE_MAX_ITERATIONS";
/// Either `first-call-wins` or `per-request`.
pub const ROUTING_VAR: &str = "TURNSTILE_ROUTING";
/// Replaces the default system prompt.
pub const SYSTEM_PROMPT_VAR: &str = "TURNSTILE_SYSTEM_PROMPT";

/// An invalid setting.
#[derive(Debug, thiserror::Error)]
#[error("invalid value for {var}: {reason}")]
pub struct ConfigError {
    var: &'static str,
    reason: String,
}

/// Builds a [`TurnConfig`] from the variables `lookup` resolves.
///
/// Unset variables keep their defaults, and `default_prompt` is used when
/// no system prompt is given.
pub fn turn_config_from_vars<F>(
    lookup: F,
    default_prompt: &str,
) -> Result<TurnConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = TurnConfig::builder().with_system_prompt(
        lookup(SYSTEM_PROMPT_VAR).unwrap_or_else(|| default_prompt.to_owned()),
    );

    if let Some(value) = lookup(MAX_ITERATIONS_VAR) {
        let value = value.trim();
        builder = match value {
            "0" | "none" => builder.without_iteration_limit(),
            _ => {
                let limit = value.parse().map_err(|err| ConfigError {
                    var: MAX_ITERATIONS_VAR,
                    reason: format!("{err}"),
                })?;
                builder.with_max_iterations(limit)
            }
        };
    }

    if let Some(value) = lookup(ROUTING_VAR) {
        let routing: RoutingPolicy =
            value.trim().parse().map_err(|reason| ConfigError {
                var: ROUTING_VAR,
                reason,
            })?;
        builder = builder.with_routing(routing);
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(
        vars: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = turn_config_from_vars(lookup(&[]), "Be brief.").unwrap();
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.max_iterations, TurnConfig::default().max_iterations);
        assert_eq!(config.routing, RoutingPolicy::FirstCallWins);
    }

    #[test]
    fn test_overrides() {
        let vars = lookup(&[
            (MAX_ITERATIONS_VAR, "4"),
            (ROUTING_VAR, "per-request"),
            (SYSTEM_PROMPT_VAR, "Talk like a pirate."),
        ]);
        let config = turn_config_from_vars(vars, "Be brief.").unwrap();
        assert_eq!(config.system_prompt, "Talk like a pirate.");
        assert_eq!(config.max_iterations, Some(4));
        assert_eq!(config.routing, RoutingPolicy::PerRequest);

        let vars = lookup(&[(MAX_ITERATIONS_VAR, "none")]);
        let config = turn_config_from_vars(vars, "").unwrap();
        assert_eq!(config.max_iterations, None);
    }

    #[test]
    fn test_invalid() {
        let vars = lookup(&[(MAX_ITERATIONS_VAR, "lots")]);
        let err = turn_config_from_vars(vars, "").unwrap_err();
        assert!(err.to_string().contains(MAX_ITERATIONS_VAR));

        let vars = lookup(&[(ROUTING_VAR, "round-robin")]);
        let err = turn_config_from_vars(vars, "").unwrap_err();
        assert!(err.to_string().contains("round-robin"));
    }
}
