//! Built-in Hook Listeners

use async_trait::async_trait;

use crate::application::ports::{HookError, HookListener, HookName};
use crate::domain::event::Payload;

/// Hooks the logging listener is attached to by default.
pub const LOGGED_HOOKS: [HookName; 3] = [
    HookName::ON_BREACH,
    HookName::AUTO_FLATTEN_START,
    HookName::AUTO_FLATTEN_COMPLETE,
];

/// Writes every hook invocation to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingListener;

impl LoggingListener {
    /// Listener name.
    pub const NAME: &'static str = "logging";
}

#[async_trait]
impl HookListener for LoggingListener {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn on_hook(&self, hook: &HookName, payload: &Payload) -> Result<(), HookError> {
        let contract_id = payload
            .get("contractId")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("-");
        let data = serde_json::Value::Object(payload.clone());

        if *hook == HookName::AUTO_FLATTEN_COMPLETE
            && payload.get("status").and_then(serde_json::Value::as_str) == Some("failed")
        {
            tracing::warn!(hook = %hook, contract_id, payload = %data, "Hook fired");
        } else {
            tracing::info!(hook = %hook, contract_id, payload = %data, "Hook fired");
        }
        Ok(())
    }
}
