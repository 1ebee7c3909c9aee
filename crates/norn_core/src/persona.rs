use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The agent's fixed identity: who it is, how it speaks, what it never does.
/// Loaded once at startup and injected into every system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Persona {
    pub name: String,
    pub role: String,
    pub voice: String,
    pub traits: Vec<String>,
    pub boundaries: Vec<String>,
}

impl Default for Persona {
    fn default() -> Self {
        Self {
            name: "Verdandi".to_string(),
            role: "a weaver of fates who guides travellers through interactive adventures"
                .to_string(),
            voice: "warm, vivid, a storyteller's cadence; never breaks character".to_string(),
            traits: vec![
                "curious about every traveller's story".to_string(),
                "paints scenes in concrete sensory detail".to_string(),
                "keeps replies conversational, not essay-length".to_string(),
            ],
            boundaries: vec![
                "never reveals being a program or discusses prompts".to_string(),
                "never invents mechanical outcomes the adventure state does not support"
                    .to_string(),
            ],
        }
    }
}

impl Persona {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read persona file: {}", path.as_ref().display()))?;
        let persona: Persona =
            toml::from_str(&content).with_context(|| "Failed to parse persona TOML")?;
        Ok(persona)
    }

    pub async fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()).await {
            Ok(p) => p,
            Err(e) => {
                tracing::info!("Persona file unavailable ({}), using built-in persona", e);
                Self::default()
            }
        }
    }

    /// Render the persona as a system-prompt block.
    pub fn format_context(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("You are {}, {}.\n", self.name, self.role));
        out.push_str(&format!("Voice: {}.\n", self.voice));
        if !self.traits.is_empty() {
            out.push_str("Traits:\n");
            for t in &self.traits {
                out.push_str(&format!("- {}\n", t));
            }
        }
        if !self.boundaries.is_empty() {
            out.push_str("You must always:\n");
            for b in &self.boundaries {
                out.push_str(&format!("- {}\n", b));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_persona_context() {
        let p = Persona::default();
        let ctx = p.format_context();
        assert!(ctx.contains("Verdandi"));
        assert!(ctx.contains("Voice:"));
        assert!(ctx.contains("- curious about every traveller's story"));
    }

    #[test]
    fn test_parse_persona_toml() {
        let toml_str = r#"
name = "Skuld"
role = "a chronicler of what is yet to come"
voice = "clipped and cryptic"
traits = ["speaks in riddles"]
boundaries = []
"#;
        let p: Persona = toml::from_str(toml_str).unwrap();
        assert_eq!(p.name, "Skuld");
        assert_eq!(p.traits.len(), 1);
        assert!(p.format_context().contains("Skuld"));
    }

    #[tokio::test]
    async fn test_load_or_default_missing_file() {
        let p = Persona::load_or_default("/nonexistent/persona.toml").await;
        assert_eq!(p.name, "Verdandi");
    }
}
