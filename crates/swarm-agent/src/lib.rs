//! The external agent-executor collaborator: the core never inspects
//! prompts or results, only forwards them.

use async_trait::async_trait;

/// `ProcessDirect(ctx, prompt, sessionID) -> (result, error)`. Must be
/// re-entrant: a node may have one call in flight per task it is
/// executing.
#[async_trait]
pub trait AgentExecutor: Send + Sync {
    async fn process_direct(&self, prompt: &str, session_id: &str) -> Result<String, String>;
}

/// Deterministic stand-in used by tests in this workspace. Echoes the
/// prompt back, or returns the configured error for prompts matching a
/// registered trigger substring.
pub struct StubAgentExecutor {
    failing_triggers: Vec<(String, String)>,
}

impl StubAgentExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self { failing_triggers: Vec::new() }
    }

    #[must_use]
    pub fn failing_on(mut self, trigger: impl Into<String>, error: impl Into<String>) -> Self {
        self.failing_triggers.push((trigger.into(), error.into()));
        self
    }
}

impl Default for StubAgentExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentExecutor for StubAgentExecutor {
    async fn process_direct(&self, prompt: &str, _session_id: &str) -> Result<String, String> {
        for (trigger, error) in &self.failing_triggers {
            if prompt.contains(trigger.as_str()) {
                return Err(error.clone());
            }
        }
        Ok(format!("local execution result: {prompt}"))
    }
}
