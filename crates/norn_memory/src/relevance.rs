use norn_core::profile::LongTermMemory;
use std::collections::HashSet;

/// Rank long-term memories against a query by lexical token overlap and
/// return up to `top_k` of the best. Memories sharing no tokens with the
/// query are never returned, however few matches there are.
pub fn rank_memories<'a>(
    memories: &'a [LongTermMemory],
    query: &str,
    top_k: usize,
) -> Vec<&'a LongTermMemory> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() || top_k == 0 {
        return Vec::new();
    }

    // (score, original index) — stable sort keeps newest-first order among ties
    // because the memories vec is stored newest first.
    let mut scored: Vec<(usize, usize)> = memories
        .iter()
        .enumerate()
        .filter_map(|(i, m)| {
            let score = overlap(&query_tokens, &m.content);
            (score > 0).then_some((score, i))
        })
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored
        .into_iter()
        .take(top_k)
        .map(|(_, i)| &memories[i])
        .collect()
}

fn overlap(query_tokens: &HashSet<String>, content: &str) -> usize {
    tokenize(content)
        .iter()
        .filter(|t| query_tokens.contains(*t))
        .count()
}

/// Whitespace-separated words, lowercased, with punctuation trimmed off the
/// edges so "hoard." still matches "hoard".
fn tokenize(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}
