//! Tools and helpers shared by the unit tests.

use std::future::ready;
use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};
use turnstile_model::ToolCallRequest;

use crate::tool::{Error, Tool, ToolResult};

static WEATHER_SCHEMA: LazyLock<Value> = LazyLock::new(|| {
    json!({
        "type": "object",
        "properties": { "location": { "type": "string" } },
        "required": ["location"]
    })
});

static EMPTY_SCHEMA: Value = Value::Null;

pub(crate) fn weather_schema() -> &'static Value {
    &WEATHER_SCHEMA
}

pub(crate) fn call(id: &str, name: &str, arguments: Value) -> ToolCallRequest {
    ToolCallRequest {
        id: id.to_owned(),
        name: name.to_owned(),
        arguments,
    }
}

#[derive(Deserialize)]
pub(crate) struct WeatherInput {
    location: String,
}

/// Answers like the demo weather tool, fails for `"nowhere"`.
pub(crate) struct WeatherTool;

impl Tool for WeatherTool {
    type Input = WeatherInput;

    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather for a given location."
    }

    fn parameter_schema(&self) -> &Value {
        &WEATHER_SCHEMA
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        ready(if input.location == "nowhere" {
            Err(Error::execution_error().with_reason("no such place"))
        } else {
            Ok(format!("The weather for {} is 70 degrees.", input.location))
        })
    }
}

/// Sleeps for the given number of milliseconds, then echoes it.
pub(crate) struct SleepTool;

impl Tool for SleepTool {
    type Input = u64;

    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleeps for a while."
    }

    fn parameter_schema(&self) -> &Value {
        &EMPTY_SCHEMA
    }

    fn execute(
        &self,
        millis: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async move {
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Ok(format!("slept {millis}ms"))
        }
    }
}

pub(crate) struct PanickingTool;

impl Tool for PanickingTool {
    type Input = Value;

    fn name(&self) -> &str {
        "panic"
    }

    fn description(&self) -> &str {
        "Always panics."
    }

    fn parameter_schema(&self) -> &Value {
        &EMPTY_SCHEMA
    }

    fn execute(
        &self,
        _input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        async { explode() }
    }
}

fn explode() -> ToolResult {
    panic!("tool exploded")
}
