use crate::store::{self, KvStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const STATE_NAMESPACE: &str = "states";

// ============================================================================
// Modes
// ============================================================================

/// The interaction mode a user is in. Routing, prompt assembly, and the
/// inactivity sweep all key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Introduction,
    Menu,
    CharacterCreation,
    CharacterCreationConfirm,
    CharacterUpdate,
    Adventure,
}

/// Where a user is in the guided character-creation dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStep {
    Name,
    Class,
    Background,
    Traits,
    Complete,
}

/// Answers gathered so far during creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreationAnswers {
    pub name: String,
    pub class_name: String,
    pub background: String,
    pub traits: Vec<String>,
}

/// Mode plus exactly the data that mode needs. Switching modes replaces the
/// whole variant, so data from a previous mode can never leak forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeData {
    Introduction,
    Menu,
    CharacterCreation {
        step: CreationStep,
        answers: CreationAnswers,
    },
    CharacterCreationConfirm {
        answers: CreationAnswers,
    },
    CharacterUpdate,
    Adventure {
        adventure_id: String,
    },
}

impl ModeData {
    pub fn mode(&self) -> Mode {
        match self {
            ModeData::Introduction => Mode::Introduction,
            ModeData::Menu => Mode::Menu,
            ModeData::CharacterCreation { .. } => Mode::CharacterCreation,
            ModeData::CharacterCreationConfirm { .. } => Mode::CharacterCreationConfirm,
            ModeData::CharacterUpdate => Mode::CharacterUpdate,
            ModeData::Adventure { .. } => Mode::Adventure,
        }
    }
}

// ============================================================================
// Choice prompts
// ============================================================================

/// One selectable option attached to a sent scene message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub emoji: String,
    /// Key understood by the adventure graph (`option_1`, ...).
    pub key: String,
    pub label: String,
}

/// A message we reacted to with numbered emoji, awaiting the user's pick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChoicePrompt {
    pub message_id: String,
    pub options: Vec<ChoiceOption>,
}

impl ChoicePrompt {
    pub fn option_for_emoji(&self, emoji: &str) -> Option<&ChoiceOption> {
        self.options.iter().find(|o| o.emoji == emoji)
    }
}

/// Number emoji for options 1 through 9, in order.
pub const OPTION_EMOJI: [&str; 9] = [
    "1\u{fe0f}\u{20e3}",
    "2\u{fe0f}\u{20e3}",
    "3\u{fe0f}\u{20e3}",
    "4\u{fe0f}\u{20e3}",
    "5\u{fe0f}\u{20e3}",
    "6\u{fe0f}\u{20e3}",
    "7\u{fe0f}\u{20e3}",
    "8\u{fe0f}\u{20e3}",
    "9\u{fe0f}\u{20e3}",
];

// ============================================================================
// Conversation state
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub user_id: String,
    pub data: ModeData,
    pub pending_choice: Option<ChoicePrompt>,
    /// Channel of the most recent exchange; reminders go here.
    pub channel: String,
    pub last_active: DateTime<Utc>,
    /// Set once a reminder fires, cleared when the user speaks again.
    pub reminded_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            data: ModeData::Menu,
            pending_choice: None,
            channel: String::new(),
            last_active: Utc::now(),
            reminded_at: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.data.mode()
    }

    /// Switch modes, discarding everything that belonged to the old mode.
    pub fn enter(&mut self, data: ModeData) {
        self.data = data;
        self.pending_choice = None;
    }

    pub fn touch(&mut self) {
        self.last_active = Utc::now();
        self.reminded_at = None;
    }
}

// ============================================================================
// Store facade
// ============================================================================

#[derive(Clone)]
pub struct StateStore {
    store: Arc<dyn KvStore>,
}

impl StateStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<ConversationState>> {
        store::load(self.store.as_ref(), STATE_NAMESPACE, user_id).await
    }

    /// New users start at the menu.
    pub async fn get_or_create(&self, user_id: &str) -> Result<ConversationState> {
        match self.get(user_id).await? {
            Some(s) => Ok(s),
            None => {
                let state = ConversationState::new(user_id);
                self.put(&state).await?;
                Ok(state)
            }
        }
    }

    pub async fn put(&self, state: &ConversationState) -> Result<()> {
        store::save(self.store.as_ref(), STATE_NAMESPACE, &state.user_id, state).await
    }

    pub async fn user_ids(&self) -> Result<Vec<String>> {
        self.store.keys(STATE_NAMESPACE).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_enter_replaces_mode_data_and_clears_choice() {
        let mut state = ConversationState::new("u1");
        state.enter(ModeData::Adventure {
            adventure_id: "adv_1".to_string(),
        });
        state.pending_choice = Some(ChoicePrompt {
            message_id: "m1".to_string(),
            options: vec![],
        });

        state.enter(ModeData::CharacterCreation {
            step: CreationStep::Name,
            answers: CreationAnswers::default(),
        });
        assert_eq!(state.mode(), Mode::CharacterCreation);
        assert!(state.pending_choice.is_none());
        // The adventure id is gone with the old variant.
        assert!(!matches!(state.data, ModeData::Adventure { .. }));
    }

    #[test]
    fn test_mode_data_serde_tagging() {
        let data = ModeData::CharacterCreation {
            step: CreationStep::Class,
            answers: CreationAnswers {
                name: "Eirik".to_string(),
                ..Default::default()
            },
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["mode"], "character_creation");
        assert_eq!(json["step"], "class");
        let back: ModeData = serde_json::from_value(json).unwrap();
        assert_eq!(back.mode(), Mode::CharacterCreation);
    }

    #[test]
    fn test_choice_prompt_lookup() {
        let prompt = ChoicePrompt {
            message_id: "m1".to_string(),
            options: vec![
                ChoiceOption {
                    emoji: OPTION_EMOJI[0].to_string(),
                    key: "option_1".to_string(),
                    label: "Open the door".to_string(),
                },
                ChoiceOption {
                    emoji: OPTION_EMOJI[1].to_string(),
                    key: "option_2".to_string(),
                    label: "Turn back".to_string(),
                },
            ],
        };
        assert_eq!(
            prompt.option_for_emoji(OPTION_EMOJI[1]).unwrap().key,
            "option_2"
        );
        assert!(prompt.option_for_emoji("🎲").is_none());
    }

    #[test]
    fn test_touch_clears_reminder() {
        let mut state = ConversationState::new("u1");
        state.reminded_at = Some(Utc::now());
        state.touch();
        assert!(state.reminded_at.is_none());
    }

    #[tokio::test]
    async fn test_state_store_defaults_to_menu() {
        let store = StateStore::new(Arc::new(MemoryStore::new()));
        let state = store.get_or_create("u1").await.unwrap();
        assert_eq!(state.mode(), Mode::Menu);
        assert_eq!(store.user_ids().await.unwrap(), vec!["u1"]);
    }
}
