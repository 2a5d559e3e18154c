use std::collections::HashMap;
use std::sync::Arc;

use crate::tool::{AnyTool, Tool, ToolObject};

/// The local tools of an agent, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolObject>>,
}

impl ToolRegistry {
    /// Adds a tool, replacing any tool with the same name.
    pub fn add_tool<T: Tool>(&mut self, tool: T) {
        let name = tool.name().to_owned();
        if self.tools.insert(name, Arc::new(AnyTool(tool))).is_some() {
            warn!("replaced a tool with the same name");
        }
    }

    /// Returns whether a tool with the given name exists.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Returns the names of all tools, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of tools.
    #[inline]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns whether there is no tool.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub(crate) fn iter(
        &self,
    ) -> impl Iterator<Item = (&str, &Arc<dyn ToolObject>)> {
        self.tools.iter().map(|(name, tool)| (name.as_str(), tool))
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{WeatherTool, weather_schema};
    use crate::tool::ErrorKind;

    #[test]
    fn test_add_tool() {
        let mut registry = ToolRegistry::default();
        assert!(registry.is_empty());
        registry.add_tool(WeatherTool);
        registry.add_tool(WeatherTool);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("get_weather"));
        assert_eq!(registry.names(), ["get_weather"]);

        let (_, tool) = registry.iter().next().unwrap();
        let definition = tool.definition();
        assert_eq!(definition.name, "get_weather");
        assert_eq!(&definition.parameters, weather_schema());
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let mut registry = ToolRegistry::default();
        registry.add_tool(WeatherTool);
        let (_, tool) = registry.iter().next().unwrap();

        let err = Arc::clone(tool)
            .execute(json!({ "city": "Paris" }))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let output = Arc::clone(tool)
            .execute(json!({ "location": "Paris" }))
            .await
            .unwrap();
        assert_eq!(output, "The weather for Paris is 70 degrees.");
    }
}
