use crate::extract::FunctionCall;
use anyhow::Result;
use async_trait::async_trait;
use norn_core::state::ChoiceOption;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Ambient identity for a dispatch. Carried separately from call args so the
/// model can never overwrite who it is talking to.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub user_id: String,
    pub username: String,
    pub channel: String,
}

/// What a handler wants said, plus any choice reactions to attach to the
/// final message.
#[derive(Debug, Clone, Default)]
pub struct HandlerOutput {
    pub messages: Vec<String>,
    pub choices: Vec<ChoiceOption>,
}

impl HandlerOutput {
    pub fn say(text: impl Into<String>) -> Self {
        Self {
            messages: vec![text.into()],
            choices: Vec::new(),
        }
    }
}

/// One named capability the model (or a keyword override) can invoke.
#[async_trait]
pub trait FunctionHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(&self, args: &Value, ctx: &CallContext) -> Result<HandlerOutput>;
}

/// Registry of handlers by wire name. Dispatch never lets a handler failure
/// escape: unknown names and handler errors both come back as text for the
/// user, and the controller carries on in its current state.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    handlers: HashMap<&'static str, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn FunctionHandler>) {
        self.handlers.insert(handler.name(), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub async fn dispatch(&self, call: &FunctionCall, ctx: &CallContext) -> HandlerOutput {
        let Some(handler) = self.handlers.get(call.name.as_str()) else {
            tracing::warn!(name = %call.name, "Unregistered function call");
            return HandlerOutput::say("I'm not sure how to handle that.");
        };
        tracing::debug!(name = %call.name, user_id = %ctx.user_id, "Dispatching function call");
        match handler.handle(&call.args, ctx).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(name = %call.name, "Handler failed: {e:#}");
                HandlerOutput::say("Something went wrong while I wove that thread. Let's try again.")
            }
        }
    }

    /// Invoke a capability by name with empty args, bypassing extraction.
    /// Used by platform commands and keyword overrides.
    pub async fn invoke(&self, name: &str, ctx: &CallContext) -> HandlerOutput {
        let call = FunctionCall {
            name: name.to_string(),
            args: Value::Object(serde_json::Map::new()),
        };
        self.dispatch(&call, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl FunctionHandler for EchoHandler {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn handle(&self, args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
            Ok(HandlerOutput::say(format!(
                "{}: {}",
                ctx.username,
                args.get("text").and_then(|v| v.as_str()).unwrap_or("")
            )))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl FunctionHandler for FailingHandler {
        fn name(&self) -> &'static str {
            "boom"
        }

        async fn handle(&self, _args: &Value, _ctx: &CallContext) -> Result<HandlerOutput> {
            anyhow::bail!("internal failure")
        }
    }

    fn ctx() -> CallContext {
        CallContext {
            user_id: "u1".to_string(),
            username: "astrid".to_string(),
            channel: "c1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_dispatch_known_handler() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoHandler));
        let call = FunctionCall {
            name: "echo".to_string(),
            args: json!({"text": "hello"}),
        };
        let out = registry.dispatch(&call, &ctx()).await;
        assert_eq!(out.messages, vec!["astrid: hello"]);
    }

    #[tokio::test]
    async fn test_unknown_name_reports_politely() {
        let registry = FunctionRegistry::new();
        let call = FunctionCall {
            name: "no_such_thing".to_string(),
            args: json!({}),
        };
        let out = registry.dispatch(&call, &ctx()).await;
        assert_eq!(out.messages, vec!["I'm not sure how to handle that."]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_propagate() {
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(FailingHandler));
        let call = FunctionCall {
            name: "boom".to_string(),
            args: json!({}),
        };
        let out = registry.dispatch(&call, &ctx()).await;
        assert_eq!(out.messages.len(), 1);
        assert!(out.messages[0].contains("try again"));
    }

    #[tokio::test]
    async fn test_args_cannot_impersonate_context() {
        // Identity rides in CallContext only; args carrying user_id are inert.
        let mut registry = FunctionRegistry::new();
        registry.register(Arc::new(EchoHandler));
        let call = FunctionCall {
            name: "echo".to_string(),
            args: json!({"user_id": "someone_else", "text": "hi"}),
        };
        let out = registry.dispatch(&call, &ctx()).await;
        assert!(out.messages[0].starts_with("astrid:"));
    }
}
