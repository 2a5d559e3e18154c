use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use turnstile_model::ModelTool;

use super::{ToolObject, ToolRegistry};

/// An action the host performs on behalf of the agent.
///
/// External actions are advertised to the model like local tools, but
/// calling one suspends the turn until the host supplies its result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalAction {
    /// Name the model uses to call the action.
    pub name: String,
    /// Description shown to the model.
    #[serde(default)]
    pub description: String,
    /// JSON schema of the parameters.
    #[serde(default)]
    pub parameters: Value,
}

impl ExternalAction {
    /// Creates an action without parameters.
    #[inline]
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Value::Null,
        }
    }

    /// Sets the JSON schema of the parameters.
    #[inline]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

#[derive(Clone)]
pub(crate) enum Capability {
    Local(Arc<dyn ToolObject>),
    External(ExternalAction),
}

impl Capability {
    fn definition(&self) -> ModelTool {
        match self {
            Capability::Local(tool) => tool.definition(),
            Capability::External(action) => ModelTool {
                name: action.name.clone(),
                description: action.description.clone(),
                parameters: action.parameters.clone(),
            },
        }
    }
}

/// Everything the model may call during one turn: the local tools of the
/// agent merged with the external actions supplied by the caller.
///
/// An external action shadows a local tool with the same name.
#[derive(Clone, Default)]
pub struct CapabilitySet {
    entries: BTreeMap<String, Capability>,
}

impl CapabilitySet {
    /// Merges local tools with external actions.
    pub fn merge(
        tools: &ToolRegistry,
        external_actions: &[ExternalAction],
    ) -> Self {
        let mut entries: BTreeMap<_, _> = tools
            .iter()
            .map(|(name, tool)| {
                (name.to_owned(), Capability::Local(Arc::clone(tool)))
            })
            .collect();
        for action in external_actions {
            let shadowed = entries.insert(
                action.name.clone(),
                Capability::External(action.clone()),
            );
            if let Some(Capability::Local(_)) = shadowed {
                warn!("external action `{}` shadows a local tool", action.name);
            }
        }
        Self { entries }
    }

    /// Returns whether the name refers to an external action.
    #[inline]
    pub fn is_external(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(Capability::External(_)))
    }

    /// Returns whether the name refers to a local tool.
    #[inline]
    pub fn is_local(&self, name: &str) -> bool {
        matches!(self.entries.get(name), Some(Capability::Local(_)))
    }

    /// Returns the definitions advertised to the model, sorted by name.
    pub fn definitions(&self) -> Vec<ModelTool> {
        self.entries.values().map(Capability::definition).collect()
    }

    /// Returns the number of capabilities.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether there is no capability.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Capability> {
        self.entries.get(name)
    }
}

impl std::fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for (name, capability) in &self.entries {
            let kind = match capability {
                Capability::Local(_) => "local",
                Capability::External(_) => "external",
            };
            map.entry(name, &kind);
        }
        map.finish()
    }
}
