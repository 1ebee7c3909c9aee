//! The interaction controller: receives inbound events, updates memory and
//! state, routes by mode, runs the model, and delivers the result paced.
//! Per-user work is single-flight; two near-simultaneous messages from the
//! same user serialize in arrival order.

use crate::dispatch::{CallContext, FunctionRegistry, HandlerOutput};
use crate::extract::extract_function_call;
use crate::handlers::{self, Services};
use crate::llm::LlmSummarizer;
use crate::pacing::{plan_delivery, Clock, Deliverer};
use crate::prompts::{PromptBuilder, PromptInput};
use crate::creation;
use anyhow::Result;
use norn_core::state::{ChoicePrompt, CreationStep, Mode, ModeData};
use norn_core::{ChatSink, MessageEvent, ReactionEvent, Role};
use norn_memory::{rank_memories, Consolidator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

const ADVENTURE_WORDS: [&str; 3] = ["adventure", "quest", "journey"];
const CHARACTER_WORDS: [&str; 1] = ["character"];
const PROFILE_WORDS: [&str; 2] = ["profile", "stats"];

const FALLBACK_REPLY: &str =
    "The threads slip through my fingers for a moment. Say that again, and I will listen.";

pub struct Controller {
    services: Arc<Services>,
    registry: FunctionRegistry,
    prompt_builder: PromptBuilder,
    consolidator: Consolidator,
    deliverer: Deliverer,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Controller {
    pub fn new(services: Arc<Services>, sink: Arc<dyn ChatSink>, clock: Arc<dyn Clock>) -> Self {
        let registry = handlers::build_registry(services.clone());
        let prompt_builder = PromptBuilder::new(services.persona.clone());
        let consolidator = Consolidator::new(services.config.memory.clone());
        Self {
            services,
            registry,
            prompt_builder,
            consolidator,
            deliverer: Deliverer::new(sink, clock),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    async fn user_lock(&self, user_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Entry point for inbound messages. Never propagates an error; a failed
    /// turn leaves the user in their current state.
    pub async fn handle_message(&self, event: &MessageEvent) {
        let lock = self.user_lock(&event.user_id).await;
        let _guard = lock.lock().await;
        if let Err(e) = self.process_message(event).await {
            tracing::error!(user_id = %event.user_id, "Message handling failed: {e:#}");
            let _ = self
                .deliverer
                .deliver(
                    &event.channel,
                    &plan_delivery(FALLBACK_REPLY, &self.services.config.pacing),
                )
                .await;
        }
    }

    /// Entry point for choice reactions on scene messages.
    pub async fn handle_reaction(&self, event: &ReactionEvent) {
        let lock = self.user_lock(&event.user_id).await;
        let _guard = lock.lock().await;
        if let Err(e) = self.process_reaction(event).await {
            tracing::error!(user_id = %event.user_id, "Reaction handling failed: {e:#}");
        }
    }

    async fn process_message(&self, event: &MessageEvent) -> Result<()> {
        let services = &self.services;
        let mut profile = services
            .profiles
            .get_or_create(&event.user_id, &event.author)
            .await?;
        let mut state = services.states.get_or_create(&event.user_id).await?;
        state.channel = event.channel.clone();
        state.touch();

        let mut buffer = services.buffers.get_or_create(&event.user_id).await?;
        buffer.push(Role::User, &event.body);

        let summarizer = LlmSummarizer::new(services.client.clone(), services.params());
        if self
            .consolidator
            .consolidate(&mut buffer, &mut profile, &summarizer)
            .await?
        {
            services.profiles.put(&profile).await?;
        }
        services.buffers.put(&buffer).await?;
        services.states.put(&state).await?;

        let ctx = CallContext {
            user_id: event.user_id.clone(),
            username: event.author.clone(),
            channel: event.channel.clone(),
        };

        let output = match state.data.clone() {
            ModeData::CharacterCreation { step, answers } => {
                self.handle_creation_reply(&ctx, step, answers, &event.body)
                    .await?
            }
            ModeData::CharacterCreationConfirm { .. } => {
                self.handle_creation_confirm(&ctx, &event.body).await?
            }
            _ => self.handle_free_text(&ctx, &state.data, &event.body).await?,
        };

        self.send_output(&ctx, output).await
    }

    async fn process_reaction(&self, event: &ReactionEvent) -> Result<()> {
        let services = &self.services;
        let Some(mut state) = services.states.get(&event.user_id).await? else {
            return Ok(());
        };
        let Some(prompt) = state.pending_choice.clone() else {
            return Ok(());
        };
        if prompt.message_id != event.message_id {
            return Ok(());
        }
        let Some(option) = prompt.option_for_emoji(&event.emoji) else {
            tracing::debug!(emoji = %event.emoji, "Reaction emoji is not a choice");
            return Ok(());
        };
        let ModeData::Adventure { adventure_id } = state.data.clone() else {
            return Ok(());
        };
        let Some(mut adventure) = services.adventures.get(&adventure_id).await? else {
            return Ok(());
        };

        // The pick counts as the user's turn.
        let mut buffer = services.buffers.get_or_create(&event.user_id).await?;
        buffer.push(Role::User, &option.label);
        services.buffers.put(&buffer).await?;

        state.touch();
        state.pending_choice = None;
        services.states.put(&state).await?;

        let ctx = CallContext {
            user_id: event.user_id.clone(),
            username: String::new(),
            channel: event.channel.clone(),
        };
        let output =
            handlers::advance_adventure(services, &mut adventure, &option.key).await?;
        self.send_output(&ctx, output).await
    }

    // ========================================================================
    // Routing
    // ========================================================================

    async fn handle_creation_reply(
        &self,
        ctx: &CallContext,
        step: CreationStep,
        mut answers: norn_core::state::CreationAnswers,
        reply: &str,
    ) -> Result<HandlerOutput> {
        let services = &self.services;
        let next = creation::record_answer(step, &mut answers, reply);

        if next == CreationStep::Complete {
            // Roll stats via the model; any failure falls back to flat 10s.
            let scores = match services
                .client
                .complete(&creation::stats_prompt(&answers), &services.params())
                .await
            {
                Ok(text) => creation::parse_stats(&text),
                Err(e) => {
                    tracing::warn!("Stat generation failed ({e:#}), using defaults");
                    Default::default()
                }
            };
            let mut profile = services
                .profiles
                .get_or_create(&ctx.user_id, &ctx.username)
                .await?;
            profile.character = Some(creation::build_sheet(&answers, scores));
            services.profiles.put(&profile).await?;

            let mut state = services.states.get_or_create(&ctx.user_id).await?;
            state.enter(ModeData::CharacterCreationConfirm {
                answers: answers.clone(),
            });
            services.states.put(&state).await?;
            return Ok(HandlerOutput::say(creation::summary(&answers)));
        }

        let mut state = services.states.get_or_create(&ctx.user_id).await?;
        state.enter(ModeData::CharacterCreation {
            step: next,
            answers: answers.clone(),
        });
        services.states.put(&state).await?;
        Ok(HandlerOutput::say(creation::question_for(next, &answers)))
    }

    async fn handle_creation_confirm(
        &self,
        ctx: &CallContext,
        reply: &str,
    ) -> Result<HandlerOutput> {
        if creation::is_affirmative(reply) {
            return Ok(self.registry.invoke("start_adventure", ctx).await);
        }
        let mut state = self.services.states.get_or_create(&ctx.user_id).await?;
        state.enter(ModeData::Menu);
        self.services.states.put(&state).await?;
        Ok(HandlerOutput::say(
            "Very well. The loom will wait; your thread is spun and ready whenever you are.",
        ))
    }

    async fn handle_free_text(
        &self,
        ctx: &CallContext,
        data: &ModeData,
        body: &str,
    ) -> Result<HandlerOutput> {
        let services = &self.services;
        let mode = data.mode();

        // Keyword overrides bypass the model, but only between adventures.
        // Creation replies keep a character named "Quest" a name, and talk of
        // quests mid-adventure stays part of the fiction.
        let overrides_active = matches!(mode, Mode::Menu | Mode::Introduction);
        if overrides_active {
            if let Some(name) = self.keyword_override(ctx, body).await? {
                return Ok(self.registry.invoke(name, ctx).await);
            }
        }

        let mut profile = services
            .profiles
            .get_or_create(&ctx.user_id, &ctx.username)
            .await?;
        let effective_mode = if profile.introduced {
            mode
        } else {
            Mode::Introduction
        };

        let adventure = match data {
            ModeData::Adventure { adventure_id } => services.adventures.get(adventure_id).await?,
            _ => None,
        };
        let scene = adventure.as_ref().and_then(|a| a.current().cloned());

        let buffer = services.buffers.get_or_create(&ctx.user_id).await?;
        let memories = rank_memories(&profile.memories, body, services.config.memory.relevance_top_k);
        let prompt = self.prompt_builder.build(&PromptInput {
            mode: effective_mode,
            profile: &profile,
            memories,
            turns: &buffer.turns,
            scene: scene.as_ref(),
        });

        let response = match services.client.complete(&prompt, &services.params()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(user_id = %ctx.user_id, "Completion failed: {e:#}");
                return Ok(HandlerOutput::say(FALLBACK_REPLY));
            }
        };

        if !profile.introduced {
            profile.introduced = true;
            services.profiles.put(&profile).await?;
        }

        if let Some(call) = extract_function_call(&response) {
            return Ok(self.registry.dispatch(&call, ctx).await);
        }

        // The model answered in prose even though the user asked for an
        // adventure; force the call rather than chat about it.
        let body_lower = body.to_lowercase();
        if overrides_active
            && has_word(&body_lower, &ADVENTURE_WORDS)
            && !response.to_lowercase().contains("adventure")
        {
            tracing::debug!(user_id = %ctx.user_id, "Adventure keyword override after narrative reply");
            return Ok(self.registry.invoke("start_adventure", ctx).await);
        }

        // Mid-adventure, the narrated outcome becomes a new scene; whatever
        // choice prompt was outstanding is superseded by it.
        if let Some(mut adventure) = adventure {
            let mut state = services.states.get_or_create(&ctx.user_id).await?;
            state.pending_choice = None;
            services.states.put(&state).await?;
            return handlers::record_free_action(services, &mut adventure, body, &response).await;
        }

        Ok(HandlerOutput::say(response))
    }

    async fn keyword_override(&self, ctx: &CallContext, body: &str) -> Result<Option<&'static str>> {
        let lower = body.to_lowercase();
        if has_word(&lower, &ADVENTURE_WORDS) {
            let name = if self
                .services
                .adventures
                .active_for_user(&ctx.user_id)
                .await?
                .is_some()
            {
                "continue_adventure"
            } else {
                "start_adventure"
            };
            return Ok(Some(name));
        }
        if has_word(&lower, &CHARACTER_WORDS) {
            return Ok(Some("create_character"));
        }
        if has_word(&lower, &PROFILE_WORDS) {
            return Ok(Some("display_profile"));
        }
        Ok(None)
    }

    /// Platform commands (help, character, adventure, profile, status) map
    /// straight onto the dispatcher, bypassing the model.
    pub async fn handle_command(&self, ctx: &CallContext, command: &str) {
        let lock = self.user_lock(&ctx.user_id).await;
        let _guard = lock.lock().await;
        if let Err(e) = self.process_command(ctx, command).await {
            tracing::error!(user_id = %ctx.user_id, command, "Command failed: {e:#}");
        }
    }

    async fn process_command(&self, ctx: &CallContext, command: &str) -> Result<()> {
        let output = match command {
            "help" => HandlerOutput::say(
                "I am Verdandi, weaver of tales. Commands: help, character, adventure, \
                 profile, status — or simply talk to me.",
            ),
            "character" => self.registry.invoke("create_character", ctx).await,
            "adventure" => {
                let name = if self
                    .services
                    .adventures
                    .active_for_user(&ctx.user_id)
                    .await?
                    .is_some()
                {
                    "continue_adventure"
                } else {
                    "start_adventure"
                };
                self.registry.invoke(name, ctx).await
            }
            "profile" => self.registry.invoke("display_profile", ctx).await,
            "status" => {
                let state = self.services.states.get_or_create(&ctx.user_id).await?;
                HandlerOutput::say(format!("You are currently in {:?} mode.", state.mode()))
            }
            other => HandlerOutput::say(format!("I don't know the command '{other}'.")),
        };
        self.send_output(ctx, output).await
    }

    // ========================================================================
    // Inactivity sweep
    // ========================================================================

    /// One pass over all known users, nudging those gone quiet mid-adventure
    /// or mid-creation. Each user is handled under their own lock, through
    /// the same output path as ordinary replies.
    pub async fn sweep_inactive(&self) {
        let user_ids = match self.services.states.user_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::error!("Inactivity sweep could not list users: {e:#}");
                return;
            }
        };
        for user_id in user_ids {
            let lock = self.user_lock(&user_id).await;
            let _guard = lock.lock().await;
            if let Err(e) = self.remind_if_idle(&user_id).await {
                tracing::error!(user_id = %user_id, "Reminder failed: {e:#}");
            }
        }
    }

    async fn remind_if_idle(&self, user_id: &str) -> Result<()> {
        let services = &self.services;
        let Some(mut state) = services.states.get(user_id).await? else {
            return Ok(());
        };
        if !matches!(state.mode(), Mode::Adventure | Mode::CharacterCreation) {
            return Ok(());
        }
        if state.reminded_at.is_some() || state.channel.is_empty() {
            return Ok(());
        }
        let threshold =
            chrono::Duration::minutes(services.config.sweep.inactivity_threshold_mins);
        if chrono::Utc::now() - state.last_active < threshold {
            return Ok(());
        }

        let text = match state.mode() {
            Mode::CharacterCreation => {
                "The loom still holds your half-spun thread. Shall we finish your character?"
            }
            _ => "The tale waits where you left it. Shall we pick up the thread?",
        };
        state.reminded_at = Some(chrono::Utc::now());
        services.states.put(&state).await?;
        tracing::info!(user_id = %user_id, "Sending inactivity reminder");

        let ctx = CallContext {
            user_id: user_id.to_string(),
            username: String::new(),
            channel: state.channel.clone(),
        };
        self.send_output(&ctx, HandlerOutput::say(text)).await
    }

    // ========================================================================
    // Output
    // ========================================================================

    /// Deliver handler output paced. Every segment lands in the short-term
    /// buffer before anything is sent, so a crash mid-delivery never forgets
    /// text the user may already have seen.
    async fn send_output(&self, ctx: &CallContext, output: HandlerOutput) -> Result<()> {
        let services = &self.services;
        let mut last_id = None;
        let mut buffer = services.buffers.get_or_create(&ctx.user_id).await?;

        for message in &output.messages {
            let plan = plan_delivery(message, &services.config.pacing);
            for step in &plan {
                buffer.push(Role::Assistant, &step.segment);
            }
            services.buffers.put(&buffer).await?;
            if let Some(id) = self.deliverer.deliver(&ctx.channel, &plan).await? {
                last_id = Some(id);
            }
        }

        if let (Some(message_id), false) = (last_id, output.choices.is_empty()) {
            for choice in &output.choices {
                self.deliverer
                    .react(&ctx.channel, &message_id, &choice.emoji)
                    .await?;
            }
            let mut state = services.states.get_or_create(&ctx.user_id).await?;
            state.pending_choice = Some(ChoicePrompt {
                message_id,
                options: output.choices.clone(),
            });
            services.states.put(&state).await?;
        }
        Ok(())
    }
}

fn has_word(lower: &str, words: &[&str]) -> bool {
    lower
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| words.contains(&w))
}
