use crate::short_term::ShortTermBuffer;
use anyhow::Result;
use async_trait::async_trait;
use norn_core::config::MemoryConfig;
use norn_core::profile::UserProfile;
use norn_core::{Role, Turn};

/// Produces a one-paragraph summary of a run of turns. The engine provides
/// an LLM-backed implementation; tests script their own.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, turns: &[Turn]) -> Result<String>;
}

/// Folds the older portion of a full short-term buffer into one long-term
/// memory, keeping the most recent half of the buffer verbatim.
pub struct Consolidator {
    config: MemoryConfig,
}

impl Consolidator {
    pub fn new(config: MemoryConfig) -> Self {
        Self { config }
    }

    /// Consolidate if the buffer is over threshold. Returns true when a
    /// memory was written. The buffer keeps its `max/2` most recent turns
    /// either way the summary goes: a failed summarizer call falls back to
    /// a deterministic digest rather than dropping the turns unrecorded.
    pub async fn consolidate(
        &self,
        buffer: &mut ShortTermBuffer,
        profile: &mut UserProfile,
        summarizer: &dyn Summarizer,
    ) -> Result<bool> {
        if !buffer.over_threshold(self.config.consolidate_threshold) {
            return Ok(false);
        }
        let keep = (buffer.max() / 2).max(1);
        let older = buffer.drain_older(keep);
        if older.is_empty() {
            return Ok(false);
        }

        let summary = match summarizer.summarize(&older).await {
            Ok(s) if !s.trim().is_empty() => s.trim().to_string(),
            Ok(_) => fallback_summary(&older),
            Err(e) => {
                tracing::warn!("Summarizer failed ({e:#}), using fallback digest");
                fallback_summary(&older)
            }
        };

        tracing::debug!(
            user_id = %buffer.user_id,
            folded = older.len(),
            kept = buffer.len(),
            "Consolidated short-term buffer"
        );
        profile.add_memory(summary, self.config.max_long_term);
        Ok(true)
    }
}

/// Digest built from the turns themselves, used when the model is
/// unavailable. Keeps the first and last user lines so the memory still
/// anchors what the stretch of conversation was about.
fn fallback_summary(turns: &[Turn]) -> String {
    let user_lines: Vec<&str> = turns
        .iter()
        .filter(|t| t.role == Role::User)
        .map(|t| t.text.as_str())
        .collect();
    let exchanges = turns.len();
    match (user_lines.first(), user_lines.last()) {
        (Some(first), Some(last)) if user_lines.len() > 1 => format!(
            "Earlier conversation ({exchanges} turns), opening with \"{}\" and ending around \"{}\".",
            snippet(first),
            snippet(last)
        ),
        (Some(only), _) => format!(
            "Earlier conversation ({exchanges} turns) around \"{}\".",
            snippet(only)
        ),
        _ => format!("Earlier conversation of {exchanges} turns."),
    }
}

fn snippet(text: &str) -> String {
    const LIMIT: usize = 80;
    let trimmed = text.trim();
    if trimmed.chars().count() <= LIMIT {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(LIMIT).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use norn_core::Role;

    struct FixedSummarizer(&'static str);

    #[async_trait]
    impl Summarizer for FixedSummarizer {
        async fn summarize(&self, _turns: &[Turn]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(&self, _turns: &[Turn]) -> Result<String> {
            anyhow::bail!("model offline")
        }
    }

    fn full_buffer() -> ShortTermBuffer {
        let mut buf = ShortTermBuffer::new("u1", 20);
        for i in 0..16 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            buf.push(role, format!("turn {i}"));
        }
        buf
    }

    #[tokio::test]
    async fn test_consolidates_over_threshold() {
        let consolidator = Consolidator::new(MemoryConfig::default());
        let mut buf = full_buffer();
        let mut profile = UserProfile::new("u1", "astrid");

        let did = consolidator
            .consolidate(&mut buf, &mut profile, &FixedSummarizer("They explored the barrow."))
            .await
            .unwrap();
        assert!(did);
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.turns[0].text, "turn 6");
        assert_eq!(profile.memories[0].content, "They explored the barrow.");
    }

    #[tokio::test]
    async fn test_below_threshold_is_noop() {
        let consolidator = Consolidator::new(MemoryConfig::default());
        let mut buf = ShortTermBuffer::new("u1", 20);
        buf.push(Role::User, "hi");
        let mut profile = UserProfile::new("u1", "astrid");

        let did = consolidator
            .consolidate(&mut buf, &mut profile, &FixedSummarizer("unused"))
            .await
            .unwrap();
        assert!(!did);
        assert_eq!(buf.len(), 1);
        assert!(profile.memories.is_empty());
    }

    #[tokio::test]
    async fn test_summarizer_failure_uses_fallback() {
        let consolidator = Consolidator::new(MemoryConfig::default());
        let mut buf = full_buffer();
        let mut profile = UserProfile::new("u1", "astrid");

        let did = consolidator
            .consolidate(&mut buf, &mut profile, &FailingSummarizer)
            .await
            .unwrap();
        assert!(did);
        // Turns were still folded, not lost.
        assert_eq!(buf.len(), 10);
        assert_eq!(profile.memories.len(), 1);
        assert!(profile.memories[0].content.contains("turn 0"));
    }

    #[test]
    fn test_fallback_summary_shapes() {
        let turns = vec![Turn::now(Role::Assistant, "welcome")];
        assert_eq!(fallback_summary(&turns), "Earlier conversation of 1 turns.");

        let turns = vec![
            Turn::now(Role::User, "I want to find the sword"),
            Turn::now(Role::Assistant, "A noble quest"),
            Turn::now(Role::User, "Let's head north"),
        ];
        let s = fallback_summary(&turns);
        assert!(s.contains("I want to find the sword"));
        assert!(s.contains("Let's head north"));
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(200);
        let s = snippet(&long);
        assert!(s.chars().count() <= 81);
        assert!(s.ends_with('…'));
    }
}
