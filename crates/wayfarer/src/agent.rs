use std::sync::Arc;

use crate::providers::base::Provider;

/// A model-backed participant of a conversation
#[derive(Clone)]
pub struct Agent {
    name: String,
    system_prompt: String,
    provider: Arc<dyn Provider>,
}

impl Agent {
    pub fn new<N, S>(name: N, system_prompt: S, provider: Arc<dyn Provider>) -> Self
    where
        N: Into<String>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            provider,
        }
    }

    /// The name tools are bound to
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.provider.model())
            .finish()
    }
}
