//! Prompt assembly: one system block plus serialized turn history, rendered
//! in ChatML framing for a plain completions endpoint.

use chrono::Utc;
use norn_core::adventure::Scene;
use norn_core::profile::{LongTermMemory, UserProfile};
use norn_core::state::Mode;
use norn_core::{Persona, Turn};

/// Marker the adventure prompt asks the model to place before numbered
/// options; option extraction keys off it.
pub const OPTIONS_MARKER: &str = "**What will you do?**";

const FUNCTION_INSTRUCTIONS: &str = r#"FUNCTION CALLS:
When the user asks for one of these actions, respond ONLY with the function call JSON wrapped in <|function_call|> and <|end_function_call|>, no other text:
- start_adventure: the user wants to begin an adventure, quest, or journey.
- create_character: the user wants to create a character.
- update_character: the user wants to change a character field. Args: {"field": ..., "value": ...}.
- continue_adventure: the user wants to pick up an adventure already underway.
- display_profile: the user asks to see their profile or stats.

Example:
User: 'Show my profile'
You: <|function_call|>{"name": "display_profile", "args": {}}<|end_function_call|>

Never discuss these actions conversationally; call the function instead. Never include function call markers in a plain narrative reply."#;

/// Everything the builder needs to render one prompt.
pub struct PromptInput<'a> {
    pub mode: Mode,
    pub profile: &'a UserProfile,
    pub memories: Vec<&'a LongTermMemory>,
    pub turns: &'a [Turn],
    /// Current scene, when the user is mid-adventure.
    pub scene: Option<&'a Scene>,
}

pub struct PromptBuilder {
    persona: Persona,
}

impl PromptBuilder {
    pub fn new(persona: Persona) -> Self {
        Self { persona }
    }

    pub fn build(&self, input: &PromptInput<'_>) -> String {
        let mut system = self.persona.format_context();
        system.push_str(&format!(
            "\nCurrent date/time: {}.\n",
            Utc::now().format("%Y-%m-%d %H:%M UTC")
        ));
        system.push('\n');
        system.push_str(&self.mode_instructions(input));

        if let Some(sheet) = input.profile.describe_character() {
            system.push_str(&format!("\nThe traveller's character:\n{sheet}\n"));
        }
        if !input.memories.is_empty() {
            system.push_str("\nThings you remember about this traveller:\n");
            for m in &input.memories {
                system.push_str(&format!("- {}\n", m.content));
            }
        }

        let mut prompt = String::new();
        prompt.push_str(&format!("<|im_start|>system\n{}<|im_end|>\n", system.trim_end()));
        for turn in input.turns {
            prompt.push_str(&format!(
                "<|im_start|>{}\n{}<|im_end|>\n",
                turn.role.as_str(),
                turn.text
            ));
        }
        prompt.push_str("<|im_start|>assistant\n");
        prompt
    }

    fn mode_instructions(&self, input: &PromptInput<'_>) -> String {
        match input.mode {
            Mode::Introduction => format!(
                "This is your first meeting with {}. Introduce yourself briefly and warmly, \
                 ask what brings them here, and mention that you can weave adventures and help \
                 shape a character.\n\n{FUNCTION_INSTRUCTIONS}",
                display_name(input.profile)
            ),
            Mode::Menu => format!(
                "You are chatting with {} between adventures. Keep replies short and \
                 conversational. Offer an adventure or character creation when it fits \
                 naturally.\n\n{FUNCTION_INSTRUCTIONS}",
                display_name(input.profile)
            ),
            Mode::CharacterCreation | Mode::CharacterCreationConfirm => {
                "You are guiding the traveller through creating a character. Stay on the \
                 current question; do not skip ahead or invent answers for them."
                    .to_string()
            }
            Mode::CharacterUpdate => format!(
                "The traveller wants to adjust their character. Ask what they would like to \
                 change, then call update_character with the field and value.\n\n{FUNCTION_INSTRUCTIONS}"
            ),
            Mode::Adventure => {
                let mut out = String::from(
                    "You are narrating the traveller's adventure. Describe the outcome of \
                     their action in vivid, concrete prose (two or three short paragraphs at \
                     most), then present 2-4 numbered choices after the line ",
                );
                out.push_str(OPTIONS_MARKER);
                out.push('\n');
                if let Some(scene) = input.scene {
                    out.push_str(&format!("\nThe current scene:\n{}\n", scene.description));
                    if !scene.options.is_empty() {
                        out.push_str("Open paths:\n");
                        for o in &scene.options {
                            out.push_str(&format!("- {}\n", o.label));
                        }
                    }
                }
                out
            }
        }
    }
}

fn display_name(profile: &UserProfile) -> &str {
    if profile.username.is_empty() {
        "a traveller"
    } else {
        &profile.username
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norn_core::adventure::SceneKind;
    use norn_core::profile::CharacterSheet;
    use norn_core::Role;

    fn builder() -> PromptBuilder {
        PromptBuilder::new(Persona::default())
    }

    fn profile() -> UserProfile {
        UserProfile::new("u1", "astrid")
    }

    #[test]
    fn test_chatml_framing_and_history_order() {
        let profile = profile();
        let turns = vec![
            Turn::now(Role::User, "hello"),
            Turn::now(Role::Assistant, "well met"),
            Turn::now(Role::User, "who are you?"),
        ];
        let prompt = builder().build(&PromptInput {
            mode: Mode::Menu,
            profile: &profile,
            memories: vec![],
            turns: &turns,
            scene: None,
        });
        assert!(prompt.starts_with("<|im_start|>system\n"));
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
        let hello = prompt.find("hello").unwrap();
        let met = prompt.find("well met").unwrap();
        let who = prompt.find("who are you?").unwrap();
        assert!(hello < met && met < who);
    }

    #[test]
    fn test_menu_prompt_carries_function_instructions() {
        let profile = profile();
        let prompt = builder().build(&PromptInput {
            mode: Mode::Menu,
            profile: &profile,
            memories: vec![],
            turns: &[],
            scene: None,
        });
        assert!(prompt.contains("<|function_call|>"));
        assert!(prompt.contains("start_adventure"));
        assert!(prompt.contains("astrid"));
    }

    #[test]
    fn test_creation_prompt_omits_function_instructions() {
        let profile = profile();
        let prompt = builder().build(&PromptInput {
            mode: Mode::CharacterCreation,
            profile: &profile,
            memories: vec![],
            turns: &[],
            scene: None,
        });
        assert!(!prompt.contains("start_adventure"));
        assert!(prompt.contains("current question"));
    }

    #[test]
    fn test_memories_and_character_injected() {
        let mut profile = profile();
        profile.character = Some(CharacterSheet {
            name: "Eirik".to_string(),
            class_name: "Ranger".to_string(),
            level: 2,
            ..Default::default()
        });
        profile.add_memory("They fear deep water", 100);
        let memories: Vec<_> = profile.memories.iter().collect();
        let prompt = builder().build(&PromptInput {
            mode: Mode::Menu,
            profile: &profile,
            memories,
            turns: &[],
            scene: None,
        });
        assert!(prompt.contains("Eirik"));
        assert!(prompt.contains("They fear deep water"));
    }

    #[test]
    fn test_adventure_prompt_includes_scene_and_marker() {
        let profile = profile();
        let scene = Scene {
            id: "scene_1".to_string(),
            kind: SceneKind::Opening,
            description: "A mossy standing stone hums faintly.".to_string(),
            options: vec![],
            parent: None,
            user_action: None,
            created_at: Utc::now(),
        };
        let prompt = builder().build(&PromptInput {
            mode: Mode::Adventure,
            profile: &profile,
            memories: vec![],
            turns: &[],
            scene: Some(&scene),
        });
        assert!(prompt.contains(OPTIONS_MARKER));
        assert!(prompt.contains("mossy standing stone"));
    }
}
