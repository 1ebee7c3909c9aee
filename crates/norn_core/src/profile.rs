use crate::store::{self, KvStore};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

const PROFILE_NAMESPACE: &str = "profiles";

// ============================================================================
// Model
// ============================================================================

/// The six classic ability scores. Unset scores default to 10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self {
            strength: 10,
            dexterity: 10,
            constitution: 10,
            intelligence: 10,
            wisdom: 10,
            charisma: 10,
        }
    }
}

/// A player character. A profile counts as "having a character" only once
/// both `name` and `class_name` are filled in.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterSheet {
    pub name: String,
    #[serde(rename = "class")]
    pub class_name: String,
    pub background: String,
    pub traits: Vec<String>,
    pub level: u32,
    pub scores: AbilityScores,
    /// Named skills with their ranks.
    pub skills: HashMap<String, i64>,
    pub inventory: Vec<String>,
}

/// Attributes that change as the story unfolds. Known fields are typed;
/// everything else rides in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicAttributes {
    pub health: i64,
    pub experience: i64,
    pub gold: i64,
    pub reputation: i64,
    pub location: Option<String>,
    pub mood: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Default for DynamicAttributes {
    fn default() -> Self {
        Self {
            health: 100,
            experience: 0,
            gold: 0,
            reputation: 0,
            location: None,
            mood: None,
            extra: HashMap::new(),
        }
    }
}

/// What a long-term memory came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    #[default]
    Conversation,
    Adventure,
}

/// One consolidated long-term memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LongTermMemory {
    pub content: String,
    #[serde(default)]
    pub kind: MemoryKind,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    pub user_id: String,
    pub username: String,
    pub character: Option<CharacterSheet>,
    pub attributes: DynamicAttributes,
    /// Newest first.
    pub memories: Vec<LongTermMemory>,
    /// Set after the first-meeting introduction has been delivered.
    pub introduced: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for UserProfile {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            user_id: String::new(),
            username: String::new(),
            character: None,
            attributes: DynamicAttributes::default(),
            memories: Vec::new(),
            introduced: false,
            created_at: now,
            updated_at: now,
        }
    }
}

impl UserProfile {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            ..Default::default()
        }
    }

    /// True only when a character exists with both name and class filled in.
    pub fn has_character(&self) -> bool {
        self.character
            .as_ref()
            .map(|c| !c.name.is_empty() && !c.class_name.is_empty())
            .unwrap_or(false)
    }

    /// Prepend a conversation memory, evicting the oldest past `max`.
    pub fn add_memory(&mut self, content: impl Into<String>, max: usize) {
        self.memories.insert(
            0,
            LongTermMemory {
                content: content.into(),
                kind: MemoryKind::Conversation,
                timestamp: Utc::now(),
                metadata: HashMap::new(),
            },
        );
        self.memories.truncate(max);
        self.updated_at = Utc::now();
    }

    /// Set a named field. Character-sheet fields and ability scores are tried
    /// first, then the typed attributes; anything else lands in the extras
    /// map.
    pub fn update_field(&mut self, field: &str, value: Value) {
        if let Some(c) = self.character.as_mut() {
            if update_sheet_field(c, field, &value) {
                self.updated_at = Utc::now();
                return;
            }
        }
        match field {
            "health" | "experience" | "gold" | "reputation" => {
                if let Some(n) = as_number(&value) {
                    match field {
                        "health" => self.attributes.health = n,
                        "experience" => self.attributes.experience = n,
                        "gold" => self.attributes.gold = n,
                        _ => self.attributes.reputation = n,
                    }
                } else {
                    self.attributes.extra.insert(field.to_string(), value);
                }
            }
            "location" => self.attributes.location = value.as_str().map(str::to_string),
            "mood" => self.attributes.mood = value.as_str().map(str::to_string),
            _ => {
                self.attributes.extra.insert(field.to_string(), value);
            }
        }
        self.updated_at = Utc::now();
    }

    /// Human-readable character summary for display and prompt context.
    pub fn describe_character(&self) -> Option<String> {
        let c = self.character.as_ref()?;
        let mut out = format!(
            "{} — level {} {}",
            c.name,
            c.level.max(1),
            c.class_name
        );
        if !c.background.is_empty() {
            out.push_str(&format!("\nBackground: {}", c.background));
        }
        if !c.traits.is_empty() {
            out.push_str(&format!("\nTraits: {}", c.traits.join(", ")));
        }
        out.push_str(&format!(
            "\nSTR {} / DEX {} / CON {} / INT {} / WIS {} / CHA {}",
            c.scores.strength,
            c.scores.dexterity,
            c.scores.constitution,
            c.scores.intelligence,
            c.scores.wisdom,
            c.scores.charisma
        ));
        if !c.skills.is_empty() {
            let mut skills: Vec<_> = c.skills.iter().collect();
            skills.sort_by_key(|(name, _)| name.as_str());
            let listed: Vec<String> = skills
                .into_iter()
                .map(|(name, rank)| format!("{name} {rank}"))
                .collect();
            out.push_str(&format!("\nSkills: {}", listed.join(", ")));
        }
        if !c.inventory.is_empty() {
            out.push_str(&format!("\nCarrying: {}", c.inventory.join(", ")));
        }
        Some(out)
    }

    /// One-line summary of the character's current condition.
    pub fn describe_condition(&self) -> String {
        let a = &self.attributes;
        format!(
            "Health {} | XP {} | Gold {} | Reputation {}",
            a.health, a.experience, a.gold, a.reputation
        )
    }
}

fn as_number(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn update_sheet_field(sheet: &mut CharacterSheet, field: &str, value: &Value) -> bool {
    match field {
        "name" | "class" | "background" => {
            let Some(s) = value.as_str() else { return false };
            match field {
                "name" => sheet.name = s.to_string(),
                "class" => sheet.class_name = s.to_string(),
                _ => sheet.background = s.to_string(),
            }
            true
        }
        "level" => {
            let Some(n) = as_number(value) else { return false };
            sheet.level = n.max(1) as u32;
            true
        }
        "strength" | "dexterity" | "constitution" | "intelligence" | "wisdom" | "charisma" => {
            let Some(n) = as_number(value) else { return false };
            let score = n.clamp(1, 20) as u8;
            match field {
                "strength" => sheet.scores.strength = score,
                "dexterity" => sheet.scores.dexterity = score,
                "constitution" => sheet.scores.constitution = score,
                "intelligence" => sheet.scores.intelligence = score,
                "wisdom" => sheet.scores.wisdom = score,
                _ => sheet.scores.charisma = score,
            }
            true
        }
        _ => false,
    }
}

// ============================================================================
// Store facade
// ============================================================================

/// Typed access to profiles over any `KvStore` backing.
#[derive(Clone)]
pub struct ProfileStore {
    store: Arc<dyn KvStore>,
}

impl ProfileStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn get(&self, user_id: &str) -> Result<Option<UserProfile>> {
        store::load(self.store.as_ref(), PROFILE_NAMESPACE, user_id).await
    }

    /// Fetch the profile, creating a blank one if the user is new.
    pub async fn get_or_create(&self, user_id: &str, username: &str) -> Result<UserProfile> {
        match self.get(user_id).await? {
            Some(p) => Ok(p),
            None => {
                let profile = UserProfile::new(user_id, username);
                self.put(&profile).await?;
                Ok(profile)
            }
        }
    }

    pub async fn put(&self, profile: &UserProfile) -> Result<()> {
        store::save(
            self.store.as_ref(),
            PROFILE_NAMESPACE,
            &profile.user_id,
            profile,
        )
        .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_has_character_requires_name_and_class() {
        let mut profile = UserProfile::new("u1", "astrid");
        assert!(!profile.has_character());

        profile.character = Some(CharacterSheet {
            name: "Eirik".to_string(),
            ..Default::default()
        });
        assert!(!profile.has_character());

        profile.character.as_mut().unwrap().class_name = "Ranger".to_string();
        assert!(profile.has_character());
    }

    #[test]
    fn test_add_memory_newest_first_with_cap() {
        let mut profile = UserProfile::new("u1", "astrid");
        for i in 0..5 {
            profile.add_memory(format!("memory {i}"), 3);
        }
        assert_eq!(profile.memories.len(), 3);
        assert_eq!(profile.memories[0].content, "memory 4");
        assert_eq!(profile.memories[2].content, "memory 2");
    }

    #[test]
    fn test_update_field_typed_and_extra() {
        let mut profile = UserProfile::new("u1", "astrid");
        profile.update_field("location", json!("the old mill"));
        profile.update_field("gold", json!(42));
        profile.update_field("health", json!("87"));
        profile.update_field("favourite_song", json!("The Weaver's Lament"));
        assert_eq!(profile.attributes.location.as_deref(), Some("the old mill"));
        assert_eq!(profile.attributes.gold, 42);
        assert_eq!(profile.attributes.health, 87);
        assert_eq!(
            profile.attributes.extra["favourite_song"],
            json!("The Weaver's Lament")
        );
    }

    #[test]
    fn test_update_field_reaches_sheet_and_scores() {
        let mut profile = UserProfile::new("u1", "astrid");
        profile.character = Some(CharacterSheet {
            name: "Eirik".to_string(),
            class_name: "Ranger".to_string(),
            level: 1,
            ..Default::default()
        });
        profile.update_field("background", json!("Raised by wolves"));
        profile.update_field("level", json!(3));
        profile.update_field("strength", json!(99));
        let c = profile.character.as_ref().unwrap();
        assert_eq!(c.background, "Raised by wolves");
        assert_eq!(c.level, 3);
        assert_eq!(c.scores.strength, 20);
        // Non-string sheet values fall through to the extras map.
        profile.update_field("name", json!(7));
        assert_eq!(profile.character.as_ref().unwrap().name, "Eirik");
        assert_eq!(profile.attributes.extra["name"], json!(7));
    }

    #[test]
    fn test_attribute_defaults() {
        let profile = UserProfile::new("u1", "astrid");
        assert_eq!(profile.attributes.health, 100);
        assert_eq!(profile.attributes.gold, 0);
        assert_eq!(
            profile.describe_condition(),
            "Health 100 | XP 0 | Gold 0 | Reputation 0"
        );
    }

    #[test]
    fn test_memories_default_to_conversation_kind() {
        let mut profile = UserProfile::new("u1", "astrid");
        profile.add_memory("met a pedlar on the road", 10);
        assert_eq!(profile.memories[0].kind, MemoryKind::Conversation);
        assert!(profile.memories[0].metadata.is_empty());
    }

    #[test]
    fn test_describe_character() {
        let mut profile = UserProfile::new("u1", "astrid");
        assert!(profile.describe_character().is_none());
        profile.character = Some(CharacterSheet {
            name: "Eirik".to_string(),
            class_name: "Ranger".to_string(),
            background: "Raised by wolves".to_string(),
            traits: vec!["stoic".to_string()],
            level: 1,
            scores: AbilityScores::default(),
            skills: HashMap::from([("tracking".to_string(), 3)]),
            inventory: vec!["longbow".to_string(), "rope".to_string()],
        });
        let desc = profile.describe_character().unwrap();
        assert!(desc.contains("Eirik — level 1 Ranger"));
        assert!(desc.contains("Raised by wolves"));
        assert!(desc.contains("STR 10"));
        assert!(desc.contains("tracking 3"));
        assert!(desc.contains("Carrying: longbow, rope"));
    }

    #[tokio::test]
    async fn test_profile_store_get_or_create() {
        let store = ProfileStore::new(Arc::new(MemoryStore::new()));
        let p = store.get_or_create("u1", "astrid").await.unwrap();
        assert_eq!(p.username, "astrid");

        // Second fetch returns the persisted record, not a new blank.
        let mut p = store.get_or_create("u1", "astrid").await.unwrap();
        p.add_memory("found the key", 100);
        store.put(&p).await.unwrap();
        let p = store.get("u1").await.unwrap().unwrap();
        assert_eq!(p.memories[0].content, "found the key");
    }
}
