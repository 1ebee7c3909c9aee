//! The guided character-creation dialogue: a fixed sequence of questions,
//! each free-text reply recorded into the answers, then a confirmation step
//! and model-assisted stat generation with clamped fallbacks.

use norn_core::profile::{AbilityScores, CharacterSheet};
use norn_core::state::{CreationAnswers, CreationStep};
use serde_json::Value;

/// Words that accept the "shall we begin?" offer after creation completes.
const AFFIRMATIVES: [&str; 6] = ["yes", "start", "begin", "adventure", "sure", "okay"];

/// Words that turn an apparent acceptance into a refusal ("not sure",
/// "nowhere to start"). "don" covers "don't" once apostrophes split.
const NEGATIONS: [&str; 7] = ["no", "not", "nowhere", "never", "don", "dont", "cannot"];

pub fn question_for(step: CreationStep, answers: &CreationAnswers) -> String {
    match step {
        CreationStep::Name => {
            "Every thread in the weave has a name. What shall yours be?".to_string()
        }
        CreationStep::Class => format!(
            "{} — a fine name. What calling do you follow? A ranger, a skald, a sellsword? \
             Name any path you like.",
            answers.name
        ),
        CreationStep::Background => {
            "And where does your story begin? Tell me a little of your past.".to_string()
        }
        CreationStep::Traits => {
            "Lastly, what marks your character? Give me a few traits, separated by commas."
                .to_string()
        }
        CreationStep::Complete => summary(answers),
    }
}

/// Record a free-text reply against the current step and return the next
/// step. Empty replies re-ask the same question.
pub fn record_answer(
    step: CreationStep,
    answers: &mut CreationAnswers,
    reply: &str,
) -> CreationStep {
    let reply = reply.trim();
    if reply.is_empty() {
        return step;
    }
    match step {
        CreationStep::Name => {
            answers.name = reply.to_string();
            CreationStep::Class
        }
        CreationStep::Class => {
            answers.class_name = reply.to_string();
            CreationStep::Background
        }
        CreationStep::Background => {
            answers.background = reply.to_string();
            CreationStep::Traits
        }
        CreationStep::Traits => {
            answers.traits = reply
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            CreationStep::Complete
        }
        CreationStep::Complete => CreationStep::Complete,
    }
}

pub fn summary(answers: &CreationAnswers) -> String {
    let traits = if answers.traits.is_empty() {
        "none given".to_string()
    } else {
        answers.traits.join(", ")
    };
    format!(
        "The threads are gathered. Here is what I have woven:\n\
         Name: {}\nClass: {}\nBackground: {}\nTraits: {}\n\n\
         Shall we begin your adventure now?",
        answers.name, answers.class_name, answers.background, traits
    )
}

/// Whole-word acceptance check. Substrings never count ("restart" is not
/// "start"), and any negation word vetoes the whole reply.
pub fn is_affirmative(text: &str) -> bool {
    let lowered = text.to_lowercase();
    let mut affirmed = false;
    for word in lowered.split(|c: char| !c.is_alphanumeric()) {
        if NEGATIONS.contains(&word) {
            return false;
        }
        if AFFIRMATIVES.contains(&word) {
            affirmed = true;
        }
    }
    affirmed
}

/// Prompt asking the model to roll ability scores for the finished answers.
pub fn stats_prompt(answers: &CreationAnswers) -> String {
    format!(
        "Generate ability scores for a new character.\n\
         Name: {}\nClass: {}\nBackground: {}\nTraits: {}\n\n\
         Respond with ONLY a JSON object of the form\n\
         {{\"strength\": n, \"dexterity\": n, \"constitution\": n, \
         \"intelligence\": n, \"wisdom\": n, \"charisma\": n}}\n\
         where each n is an integer from 3 to 18 fitting the character concept.",
        answers.name,
        answers.class_name,
        answers.background,
        answers.traits.join(", ")
    )
}

/// Parse model-generated scores, clamping each to 1-20 and defaulting any
/// missing or unparseable score to 10. Garbage in never fails creation.
pub fn parse_stats(model_text: &str) -> AbilityScores {
    let json = first_json_object(model_text);
    let get = |key: &str| -> u8 {
        json.as_ref()
            .and_then(|v| v.get(key))
            .and_then(Value::as_i64)
            .map(|n| n.clamp(1, 20) as u8)
            .unwrap_or(10)
    };
    AbilityScores {
        strength: get("strength"),
        dexterity: get("dexterity"),
        constitution: get("constitution"),
        intelligence: get("intelligence"),
        wisdom: get("wisdom"),
        charisma: get("charisma"),
    }
}

fn first_json_object(text: &str) -> Option<Value> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

/// A level-1 sheet from completed answers and rolled scores.
pub fn build_sheet(answers: &CreationAnswers, scores: AbilityScores) -> CharacterSheet {
    CharacterSheet {
        name: answers.name.clone(),
        class_name: answers.class_name.clone(),
        background: answers.background.clone(),
        traits: answers.traits.clone(),
        level: 1,
        scores,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_advance_in_order() {
        let mut answers = CreationAnswers::default();
        let mut step = CreationStep::Name;
        step = record_answer(step, &mut answers, "Eirik");
        assert_eq!(step, CreationStep::Class);
        step = record_answer(step, &mut answers, "Ranger");
        assert_eq!(step, CreationStep::Background);
        step = record_answer(step, &mut answers, "Raised by wolves");
        assert_eq!(step, CreationStep::Traits);
        step = record_answer(step, &mut answers, "stoic, sharp-eyed");
        assert_eq!(step, CreationStep::Complete);
        assert_eq!(answers.name, "Eirik");
        assert_eq!(answers.traits, vec!["stoic", "sharp-eyed"]);
    }

    #[test]
    fn test_empty_reply_repeats_step() {
        let mut answers = CreationAnswers::default();
        let step = record_answer(CreationStep::Name, &mut answers, "   ");
        assert_eq!(step, CreationStep::Name);
        assert!(answers.name.is_empty());
    }

    #[test]
    fn test_summary_offers_adventure() {
        let answers = CreationAnswers {
            name: "Eirik".to_string(),
            class_name: "Ranger".to_string(),
            background: "Raised by wolves".to_string(),
            traits: vec!["stoic".to_string()],
        };
        let s = summary(&answers);
        assert!(s.contains("Eirik"));
        assert!(s.contains("Shall we begin your adventure now?"));
    }

    #[test]
    fn test_affirmatives() {
        assert!(is_affirmative("Yes, let's go!"));
        assert!(is_affirmative("okay"));
        assert!(is_affirmative("START"));
        assert!(!is_affirmative("not yet, maybe later"));
    }

    #[test]
    fn test_hedged_or_negated_replies_are_not_consent() {
        assert!(!is_affirmative("I'm not sure"));
        assert!(!is_affirmative("nowhere to start from"));
        assert!(!is_affirmative("I don't think so, sure as I stand here"));
        // Affirmative words inside larger words never count.
        assert!(!is_affirmative("restart everything"));
        assert!(!is_affirmative("that would be unsure of me"));
    }

    #[test]
    fn test_parse_stats_clamps_and_defaults() {
        let text = r#"Here you go: {"strength": 25, "dexterity": 0, "wisdom": 14}"#;
        let scores = parse_stats(text);
        assert_eq!(scores.strength, 20);
        assert_eq!(scores.dexterity, 1);
        assert_eq!(scores.wisdom, 14);
        // Missing keys default.
        assert_eq!(scores.constitution, 10);
        assert_eq!(scores.charisma, 10);
    }

    #[test]
    fn test_parse_stats_garbage_defaults_everything() {
        let scores = parse_stats("the dice clatter across the table");
        assert_eq!(scores, AbilityScores::default());
    }

    #[test]
    fn test_build_sheet_level_one() {
        let answers = CreationAnswers {
            name: "Eirik".to_string(),
            class_name: "Ranger".to_string(),
            ..Default::default()
        };
        let sheet = build_sheet(&answers, AbilityScores::default());
        assert_eq!(sheet.level, 1);
        assert_eq!(sheet.name, "Eirik");
    }
}
