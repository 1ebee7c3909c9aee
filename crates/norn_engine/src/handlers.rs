//! The capability surface exposed to the model: one handler per registered
//! function name, all working through the shared service roots.

use crate::creation;
use crate::dispatch::{CallContext, FunctionHandler, HandlerOutput};
use crate::llm::{CompletionClient, CompletionParams};
use crate::prompts::OPTIONS_MARKER;
use anyhow::Result;
use async_trait::async_trait;
use norn_core::adventure::{Adventure, AdventureStore, Scene, SceneOption};
use norn_core::config::NornConfig;
use norn_core::profile::ProfileStore;
use norn_core::state::{
    ChoiceOption, CreationAnswers, CreationStep, ModeData, StateStore, OPTION_EMOJI,
};
use norn_core::Persona;
use norn_memory::BufferStore;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use std::sync::LazyLock;

/// Composition root handed to every handler and to the controller. Built
/// once at startup; nothing reaches for globals.
pub struct Services {
    pub profiles: ProfileStore,
    pub states: StateStore,
    pub adventures: AdventureStore,
    pub buffers: BufferStore,
    pub client: Arc<dyn CompletionClient>,
    pub persona: Persona,
    pub config: NornConfig,
}

impl Services {
    pub fn params(&self) -> CompletionParams {
        CompletionParams::from_config(&self.config.llm)
    }
}

// ============================================================================
// Option extraction and scene rendering
// ============================================================================

static NUMBERED_OPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*(\d+)[.)]\s+(.+?)\s*$").unwrap());

/// Pull numbered options out of generated scene text. Only lines after the
/// options marker count; narrative enumerations before it are left alone.
pub fn extract_options(text: &str) -> Vec<String> {
    let Some((_, tail)) = text.split_once(OPTIONS_MARKER) else {
        return Vec::new();
    };
    NUMBERED_OPTION_RE
        .captures_iter(tail)
        .map(|c| c[2].trim().to_string())
        .take(OPTION_EMOJI.len())
        .collect()
}

/// Scene description without the options block.
pub fn scene_description(text: &str) -> String {
    match text.split_once(OPTIONS_MARKER) {
        Some((head, _)) => head.trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn scene_options(labels: &[String]) -> Vec<SceneOption> {
    labels
        .iter()
        .enumerate()
        .map(|(i, label)| SceneOption {
            key: format!("option_{}", i + 1),
            label: label.clone(),
            next: None,
        })
        .collect()
}

/// Render a scene for delivery and build the matching emoji choices.
pub fn present_scene(scene: &Scene) -> (String, Vec<ChoiceOption>) {
    let mut text = scene.description.clone();
    let mut choices = Vec::new();
    if !scene.options.is_empty() {
        text.push_str(&format!("\n\n{OPTIONS_MARKER}\n"));
        for (i, option) in scene.options.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, option.label));
            choices.push(ChoiceOption {
                emoji: OPTION_EMOJI[i].to_string(),
                key: option.key.clone(),
                label: option.label.clone(),
            });
        }
    }
    (text.trim_end().to_string(), choices)
}

/// Ask the model for a scene and split it into description + option labels.
async fn generate_scene(services: &Services, prompt: &str) -> Result<(String, Vec<String>)> {
    let text = services.client.complete(prompt, &services.params()).await?;
    Ok((scene_description(&text), extract_options(&text)))
}

fn opening_scene_prompt(services: &Services, character: &str) -> String {
    format!(
        "{}\nWrite the opening scene of a new adventure for this character:\n{}\n\n\
         Two or three short paragraphs of second-person narration, then the line \
         {OPTIONS_MARKER} followed by 2-4 numbered choices.",
        services.persona.format_context(),
        character
    )
}

fn next_scene_prompt(services: &Services, current: &Scene, choice: &str) -> String {
    format!(
        "{}\nThe traveller is mid-adventure. The scene so far:\n{}\n\n\
         They chose: {}\n\nWrite what happens next in second person, two or three \
         short paragraphs, then the line {OPTIONS_MARKER} followed by 2-4 numbered choices.",
        services.persona.format_context(),
        current.description,
        choice
    )
}

/// Generate the scene a picked option leads to, wire it into the graph, and
/// advance. The option key is validated against the current scene before
/// any generation happens.
pub async fn advance_adventure(
    services: &Services,
    adventure: &mut Adventure,
    option_key: &str,
) -> Result<HandlerOutput> {
    let (label, current) = {
        let current = adventure
            .current()
            .ok_or_else(|| anyhow::anyhow!("adventure {} has no current scene", adventure.id))?;
        let option = current.options.iter().find(|o| o.key == option_key);
        match option {
            Some(o) => (o.label.clone(), current.clone()),
            None => {
                return Ok(HandlerOutput::say(
                    "That path isn't open from here. Pick one of the offered choices.",
                ))
            }
        }
    };

    let prompt = next_scene_prompt(services, &current, &label);
    let (description, labels) = generate_scene(services, &prompt).await?;
    let scene_id = adventure.add_scene(description, scene_options(&labels));
    adventure.resolve_option(option_key, &scene_id)?;
    let scene = adventure.advance(option_key)?.clone();
    services.adventures.put(adventure).await?;

    let (text, choices) = present_scene(&scene);
    Ok(HandlerOutput {
        messages: vec![text],
        choices,
    })
}

/// Fold a free-text action's narrated outcome into the story graph: a new
/// scene recording the action, made current, with any offered options ready
/// for the next pick.
pub async fn record_free_action(
    services: &Services,
    adventure: &mut Adventure,
    action: &str,
    narration: &str,
) -> Result<HandlerOutput> {
    let description = scene_description(narration);
    let labels = extract_options(narration);
    let scene_id = adventure.add_action_scene(description, scene_options(&labels), action);
    adventure.set_current(&scene_id)?;
    services.adventures.put(adventure).await?;

    let scene = adventure
        .current()
        .ok_or_else(|| anyhow::anyhow!("adventure {} lost its current scene", adventure.id))?;
    let (text, choices) = present_scene(scene);
    Ok(HandlerOutput {
        messages: vec![text],
        choices,
    })
}

// ============================================================================
// Handlers
// ============================================================================

pub struct StartAdventureHandler {
    pub services: Arc<Services>,
}

#[async_trait]
impl FunctionHandler for StartAdventureHandler {
    fn name(&self) -> &'static str {
        "start_adventure"
    }

    async fn handle(&self, _args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        let services = &self.services;
        let profile = services
            .profiles
            .get_or_create(&ctx.user_id, &ctx.username)
            .await?;
        let mut state = services.states.get_or_create(&ctx.user_id).await?;

        if !profile.has_character() {
            state.enter(ModeData::CharacterCreation {
                step: CreationStep::Name,
                answers: CreationAnswers::default(),
            });
            services.states.put(&state).await?;
            return Ok(HandlerOutput::say(format!(
                "Before the loom can turn, you need a thread of your own. {}",
                creation::question_for(CreationStep::Name, &CreationAnswers::default())
            )));
        }

        let character = profile
            .describe_character()
            .unwrap_or_else(|| ctx.username.clone());
        let mut adventure = Adventure::new(&ctx.user_id, format!("{}'s tale", ctx.username));
        let prompt = opening_scene_prompt(services, &character);
        let (description, labels) = generate_scene(services, &prompt).await?;
        let scene_id = adventure.add_scene(description, scene_options(&labels));
        adventure.set_current(&scene_id)?;
        services.adventures.put(&adventure).await?;

        state.enter(ModeData::Adventure {
            adventure_id: adventure.id.clone(),
        });
        services.states.put(&state).await?;
        tracing::info!(user_id = %ctx.user_id, adventure_id = %adventure.id, "Adventure started");

        let scene = adventure.current().cloned();
        let (text, choices) = match &scene {
            Some(s) => present_scene(s),
            None => ("The threads tangle; try again in a moment.".to_string(), vec![]),
        };
        Ok(HandlerOutput {
            messages: vec![text],
            choices,
        })
    }
}

pub struct ContinueAdventureHandler {
    pub services: Arc<Services>,
}

#[async_trait]
impl FunctionHandler for ContinueAdventureHandler {
    fn name(&self) -> &'static str {
        "continue_adventure"
    }

    async fn handle(&self, _args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        let services = &self.services;
        let Some(adventure) = services.adventures.active_for_user(&ctx.user_id).await? else {
            return Ok(HandlerOutput::say(
                "There is no adventure underway. Say the word and I will weave one.",
            ));
        };
        let mut state = services.states.get_or_create(&ctx.user_id).await?;
        state.enter(ModeData::Adventure {
            adventure_id: adventure.id.clone(),
        });
        services.states.put(&state).await?;

        match adventure.current() {
            Some(scene) => {
                let (text, choices) = present_scene(scene);
                Ok(HandlerOutput {
                    messages: vec![format!("Where were we... ah, yes.\n\n{text}")],
                    choices,
                })
            }
            None => Ok(HandlerOutput::say(
                "The tale's thread is frayed. Let us start a fresh adventure.",
            )),
        }
    }
}

pub struct CreateCharacterHandler {
    pub services: Arc<Services>,
}

#[async_trait]
impl FunctionHandler for CreateCharacterHandler {
    fn name(&self) -> &'static str {
        "create_character"
    }

    async fn handle(&self, _args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        let services = &self.services;
        let profile = services
            .profiles
            .get_or_create(&ctx.user_id, &ctx.username)
            .await?;
        let mut state = services.states.get_or_create(&ctx.user_id).await?;
        state.enter(ModeData::CharacterCreation {
            step: CreationStep::Name,
            answers: CreationAnswers::default(),
        });
        services.states.put(&state).await?;

        let lead_in = if profile.has_character() {
            "Very well — we unravel the old thread and spin a new one. "
        } else {
            "Let us weave someone new into the pattern. "
        };
        Ok(HandlerOutput::say(format!(
            "{lead_in}{}",
            creation::question_for(CreationStep::Name, &CreationAnswers::default())
        )))
    }
}

pub struct UpdateCharacterHandler {
    pub services: Arc<Services>,
}

#[async_trait]
impl FunctionHandler for UpdateCharacterHandler {
    fn name(&self) -> &'static str {
        "update_character"
    }

    async fn handle(&self, args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        let services = &self.services;
        let field = args.get("field").and_then(Value::as_str);
        let value = args.get("value").cloned();

        let mut profile = services
            .profiles
            .get_or_create(&ctx.user_id, &ctx.username)
            .await?;
        if !profile.has_character() {
            return Ok(HandlerOutput::say(
                "You have no character yet. Shall we create one first?",
            ));
        }

        match (field, value) {
            (Some(field), Some(value)) if !field.is_empty() => {
                profile.update_field(field, value.clone());
                services.profiles.put(&profile).await?;
                let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
                Ok(HandlerOutput::say(format!(
                    "Done. Your {field} is now {shown}."
                )))
            }
            _ => {
                let mut state = services.states.get_or_create(&ctx.user_id).await?;
                state.enter(ModeData::CharacterUpdate);
                services.states.put(&state).await?;
                Ok(HandlerOutput::say(
                    "What would you like to change about your character?",
                ))
            }
        }
    }
}

pub struct DisplayProfileHandler {
    pub services: Arc<Services>,
}

#[async_trait]
impl FunctionHandler for DisplayProfileHandler {
    fn name(&self) -> &'static str {
        "display_profile"
    }

    async fn handle(&self, _args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        let services = &self.services;
        let profile = services
            .profiles
            .get_or_create(&ctx.user_id, &ctx.username)
            .await?;
        match profile.describe_character() {
            Some(sheet) => {
                let mut text = sheet;
                text.push_str(&format!("\n{}", profile.describe_condition()));
                if let Some(location) = &profile.attributes.location {
                    text.push_str(&format!("\nLocation: {location}"));
                }
                if let Some(adventure) = services.adventures.active_for_user(&ctx.user_id).await? {
                    text.push_str(&format!(
                        "\nActive adventure: {} ({} scenes into the tale)",
                        adventure.title,
                        adventure.history.len()
                    ));
                }
                Ok(HandlerOutput::say(text))
            }
            None => Ok(HandlerOutput::say(
                "No character is woven for you yet. Say 'character' and we shall begin.",
            )),
        }
    }
}

/// Permanently disabled. The name stays registered so calls are answered
/// rather than treated as unknown, but no evaluation path exists.
pub struct ExecuteScriptHandler;

#[async_trait]
impl FunctionHandler for ExecuteScriptHandler {
    fn name(&self) -> &'static str {
        "execute_script"
    }

    async fn handle(&self, args: &Value, ctx: &CallContext) -> Result<HandlerOutput> {
        tracing::warn!(
            user_id = %ctx.user_id,
            script = %args.get("script_name").and_then(|v| v.as_str()).unwrap_or("<unnamed>"),
            "Rejected execute_script call"
        );
        Ok(HandlerOutput::say(
            "Script execution is not available.",
        ))
    }
}

/// Build the full registry over one service root.
pub fn build_registry(services: Arc<Services>) -> crate::dispatch::FunctionRegistry {
    let mut registry = crate::dispatch::FunctionRegistry::new();
    registry.register(Arc::new(StartAdventureHandler {
        services: services.clone(),
    }));
    registry.register(Arc::new(ContinueAdventureHandler {
        services: services.clone(),
    }));
    registry.register(Arc::new(CreateCharacterHandler {
        services: services.clone(),
    }));
    registry.register(Arc::new(UpdateCharacterHandler {
        services: services.clone(),
    }));
    registry.register(Arc::new(DisplayProfileHandler { services }));
    registry.register(Arc::new(ExecuteScriptHandler));
    registry
}

// ============================================================================
// Tests
// ============================================================================
