pub mod adventure;
pub mod config;
pub mod persona;
pub mod profile;
pub mod state;
pub mod store;

pub use config::NornConfig;
pub use persona::Persona;
pub use profile::UserProfile;
pub use state::{ConversationState, Mode};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An inbound chat message, normalized away from any specific platform.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub user_id: String,
    pub author: String,
    pub channel: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

/// A reaction added to one of our own messages (used for scene choices).
#[derive(Debug, Clone)]
pub struct ReactionEvent {
    pub user_id: String,
    pub channel: String,
    pub message_id: String,
    pub emoji: String,
}

/// Speaker role for a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// One entry in the short-term conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn now(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Outbound side of the chat platform. The platform client itself lives
/// outside the core; the core only needs to send text and attach reactions.
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// Send a message to a channel, returning the platform message id.
    async fn send(&self, channel: &str, text: &str) -> anyhow::Result<String>;

    /// Attach a reaction emoji to a previously sent message.
    async fn react(&self, channel: &str, message_id: &str, emoji: &str) -> anyhow::Result<()>;
}
