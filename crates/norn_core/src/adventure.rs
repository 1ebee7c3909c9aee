use crate::store::{self, KvStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const ADVENTURE_NAMESPACE: &str = "adventures";

// ============================================================================
// Model
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AdventureError {
    #[error("adventure is not active")]
    NotActive,
    #[error("no scene with id {0}")]
    UnknownScene(String),
    #[error("current scene has no option {0}")]
    UnknownOption(String),
    #[error("option {0} points at missing scene {1}")]
    DanglingOption(String, String),
    #[error("option {0} has no destination scene yet")]
    UnresolvedOption(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdventureStatus {
    Active,
    Completed,
}

/// One option leading out of a scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneOption {
    /// Stable key referenced by choice prompts (`option_1`, ...).
    pub key: String,
    pub label: String,
    /// Scene this option leads to. None until the destination is generated.
    pub next: Option<String>,
}

/// How a scene came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneKind {
    /// The first scene of the adventure.
    Opening,
    /// Reached by picking one of a scene's offered options.
    Choice,
    /// Generated from a free-text action the user typed mid-adventure.
    Action,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub kind: SceneKind,
    pub description: String,
    pub options: Vec<SceneOption>,
    /// Scene that was current when this one was generated.
    pub parent: Option<String>,
    /// The free-text action behind an `Action` scene.
    pub user_action: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A branching story for one user. Scenes form a graph; `advance` only moves
/// along an option of the current scene, and never mutates on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adventure {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: AdventureStatus,
    pub scenes: HashMap<String, Scene>,
    pub current_scene: Option<String>,
    /// Scene ids in visit order.
    pub history: Vec<String>,
    /// Story-state flags handlers may set as the tale unfolds.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    next_scene_number: u64,
}

impl Adventure {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        Self {
            id: format!("adv_{}", &short[..8]),
            user_id: user_id.into(),
            title: title.into(),
            status: AdventureStatus::Active,
            scenes: HashMap::new(),
            current_scene: None,
            history: Vec::new(),
            variables: HashMap::new(),
            created_at: now,
            updated_at: now,
            next_scene_number: 1,
        }
    }

    /// Add a scene under a freshly allocated `scene_{n}` id and return the id.
    /// The first scene of an adventure is the opening; later ones are choice
    /// destinations.
    pub fn add_scene(
        &mut self,
        description: impl Into<String>,
        options: Vec<SceneOption>,
    ) -> String {
        let kind = if self.current_scene.is_none() {
            SceneKind::Opening
        } else {
            SceneKind::Choice
        };
        self.push_scene(kind, description.into(), options, None)
    }

    /// Add a scene produced by a free-text action, recording the action that
    /// led to it.
    pub fn add_action_scene(
        &mut self,
        description: impl Into<String>,
        options: Vec<SceneOption>,
        action: &str,
    ) -> String {
        self.push_scene(
            SceneKind::Action,
            description.into(),
            options,
            Some(action.to_string()),
        )
    }

    fn push_scene(
        &mut self,
        kind: SceneKind,
        description: String,
        options: Vec<SceneOption>,
        user_action: Option<String>,
    ) -> String {
        let id = format!("scene_{}", self.next_scene_number);
        self.next_scene_number += 1;
        self.scenes.insert(
            id.clone(),
            Scene {
                id: id.clone(),
                kind,
                description,
                options,
                parent: self.current_scene.clone(),
                user_action,
                created_at: Utc::now(),
            },
        );
        self.updated_at = Utc::now();
        id
    }

    pub fn current(&self) -> Option<&Scene> {
        self.current_scene
            .as_ref()
            .and_then(|id| self.scenes.get(id))
    }

    /// Jump to a known scene, recording it in the visit history.
    pub fn set_current(&mut self, scene_id: &str) -> std::result::Result<(), AdventureError> {
        if !self.scenes.contains_key(scene_id) {
            return Err(AdventureError::UnknownScene(scene_id.to_string()));
        }
        self.current_scene = Some(scene_id.to_string());
        self.history.push(scene_id.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Follow an option key out of the current scene. On any failure the
    /// adventure is left exactly as it was.
    pub fn advance(&mut self, option_key: &str) -> std::result::Result<&Scene, AdventureError> {
        if self.status != AdventureStatus::Active {
            return Err(AdventureError::NotActive);
        }
        let current = self
            .current()
            .ok_or_else(|| AdventureError::UnknownScene("<none>".to_string()))?;
        let option = current
            .options
            .iter()
            .find(|o| o.key == option_key)
            .ok_or_else(|| AdventureError::UnknownOption(option_key.to_string()))?;
        let next_id = option
            .next
            .clone()
            .ok_or_else(|| AdventureError::UnresolvedOption(option_key.to_string()))?;
        if !self.scenes.contains_key(&next_id) {
            return Err(AdventureError::DanglingOption(
                option_key.to_string(),
                next_id,
            ));
        }
        self.current_scene = Some(next_id.clone());
        self.history.push(next_id.clone());
        self.updated_at = Utc::now();
        Ok(&self.scenes[&next_id])
    }

    /// Point an option of the current scene at a (freshly generated) scene.
    pub fn resolve_option(
        &mut self,
        option_key: &str,
        scene_id: &str,
    ) -> std::result::Result<(), AdventureError> {
        if !self.scenes.contains_key(scene_id) {
            return Err(AdventureError::UnknownScene(scene_id.to_string()));
        }
        let current_id = self
            .current_scene
            .clone()
            .ok_or_else(|| AdventureError::UnknownScene("<none>".to_string()))?;
        let scene = self
            .scenes
            .get_mut(&current_id)
            .ok_or_else(|| AdventureError::UnknownScene(current_id.clone()))?;
        let option = scene
            .options
            .iter_mut()
            .find(|o| o.key == option_key)
            .ok_or_else(|| AdventureError::UnknownOption(option_key.to_string()))?;
        option.next = Some(scene_id.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self) {
        self.status = AdventureStatus::Completed;
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Store facade
// ============================================================================

#[derive(Clone)]
pub struct AdventureStore {
    store: Arc<dyn KvStore>,
}

impl AdventureStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, adventure_id: &str) -> Result<Option<Adventure>> {
        store::load(self.store.as_ref(), ADVENTURE_NAMESPACE, adventure_id).await
    }

    pub async fn put(&self, adventure: &Adventure) -> Result<()> {
        store::save(
            self.store.as_ref(),
            ADVENTURE_NAMESPACE,
            &adventure.id,
            adventure,
        )
        .await
    }

    /// The user's currently active adventure, if any.
    pub async fn active_for_user(&self, user_id: &str) -> Result<Option<Adventure>> {
        for id in self.store.keys(ADVENTURE_NAMESPACE).await? {
            if let Some(adv) = self.get(&id).await? {
                if adv.user_id == user_id && adv.status == AdventureStatus::Active {
                    return Ok(Some(adv));
                }
            }
        }
        Ok(None)
    }
}

// ============================================================================
// Tests
// ============================================================================
