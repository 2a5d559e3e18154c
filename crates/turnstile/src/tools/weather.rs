use std::future::ready;

use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;
use turnstile_core::tool::{Tool, ToolResult};

/// Input of [`GetWeatherTool`].
#[derive(Deserialize, JsonSchema)]
pub struct GetWeatherParameters {
    #[schemars(description = "The location to get the weather for.")]
    location: String,
}

/// A demo tool that reports the same weather everywhere.
pub struct GetWeatherTool {
    parameter_schema: Value,
}

impl GetWeatherTool {
    /// Creates a new weather tool.
    #[inline]
    pub fn new() -> Self {
        GetWeatherTool {
            parameter_schema: schema_for!(GetWeatherParameters).to_value(),
        }
    }
}

impl Default for GetWeatherTool {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for GetWeatherTool {
    type Input = GetWeatherParameters;

    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather for a given location."
    }

    fn parameter_schema(&self) -> &Value {
        &self.parameter_schema
    }

    fn execute(
        &self,
        input: GetWeatherParameters,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let location = input.location.trim();
        ready(Ok(format!("The weather for {location} is 70 degrees.")))
    }
}
