pub mod controller;
pub mod creation;
pub mod dispatch;
pub mod extract;
pub mod handlers;
pub mod llm;
pub mod pacing;
pub mod prompts;
pub mod provider;
pub mod sweep;

pub use controller::Controller;
pub use dispatch::{CallContext, FunctionHandler, FunctionRegistry};
pub use llm::{CompletionClient, CompletionParams};
