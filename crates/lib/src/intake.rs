//! Intake conversation: a small fixed state machine that asks a new sender which
//! category they are most interested in.
//!
//! The transition function is pure. Callers load the [`ConversationState`] for a phone
//! number, call [`process_message`], and persist the returned state and messages
//! (see [`crate::conversation`]).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Substrings that (re)start the intake flow. Matched case-insensitively anywhere in the
/// message, so "hint" or "this" also match "hi".
pub const TRIGGER_WORDS: [&str; 5] = ["//invoke", "hello", "hi", "start", "invoke"];

pub const INTAKE_QUESTION: &str = "Perfect. Last one \u{2014} what are you most excited to invoke? Reply with a number:
1 Tasks
2 Reminders
3 Planning
4 Money
5 Coordination
6 Something else";

pub const CATEGORY_REPROMPT: &str = "Please reply with a number 1-6 to let us know what you're most interested in:
1 Tasks
2 Reminders
3 Planning
4 Money
5 Coordination
6 Something else";

pub const COMPLETION_MESSAGE: &str = "You're on the early list. We're launching soon \u{2014} I'll text you when your spot opens. You can //invoke here anytime for updates.";

pub const ALREADY_LISTED_MESSAGE: &str = "Thanks for reaching out! You're on the early list. Reply \"//invoke\" anytime for updates or to change your preferences.";

pub const HELP_MESSAGE: &str = "Hi there! Reply \"//invoke\" to get started or reply with a number 1-6 if you're selecting your interest.";

/// Where a phone number is in the intake flow.
///
/// Persisted as a snake_case string. Values this build does not know are kept verbatim in
/// [`ConversationStep::Unrecognized`] so they round-trip through the store unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ConversationStep {
    #[default]
    Greeting,
    AwaitingCategory,
    Completed,
    Unrecognized(String),
}

impl ConversationStep {
    pub fn as_str(&self) -> &str {
        match self {
            ConversationStep::Greeting => "greeting",
            ConversationStep::AwaitingCategory => "awaiting_category",
            ConversationStep::Completed => "completed",
            ConversationStep::Unrecognized(raw) => raw,
        }
    }
}

impl From<String> for ConversationStep {
    fn from(s: String) -> Self {
        match s.as_str() {
            "greeting" => ConversationStep::Greeting,
            "awaiting_category" => ConversationStep::AwaitingCategory,
            "completed" => ConversationStep::Completed,
            _ => ConversationStep::Unrecognized(s),
        }
    }
}

impl From<ConversationStep> for String {
    fn from(step: ConversationStep) -> Self {
        step.as_str().to_string()
    }
}

/// Persisted per-phone conversation state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    #[serde(default)]
    pub step: ConversationStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
}

impl ConversationState {
    fn at(step: ConversationStep, now: DateTime<Utc>) -> Self {
        Self {
            step,
            last_message_at: Some(now),
        }
    }
}

/// Interest categories offered by the intake question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Category {
    Tasks = 1,
    Reminders = 2,
    Planning = 3,
    Money = 4,
    Coordination = 5,
    SomethingElse = 6,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Tasks,
        Category::Reminders,
        Category::Planning,
        Category::Money,
        Category::Coordination,
        Category::SomethingElse,
    ];

    pub fn from_number(n: u64) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.number() as u64 == n)
    }

    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::Tasks => "Tasks",
            Category::Reminders => "Reminders",
            Category::Planning => "Planning",
            Category::Money => "Money",
            Category::Coordination => "Coordination",
            Category::SomethingElse => "Something else",
        }
    }
}

impl From<Category> for u8 {
    fn from(c: Category) -> u8 {
        c.number()
    }
}

impl TryFrom<u8> for Category {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Category::from_number(n as u64).ok_or_else(|| format!("category out of range: {}", n))
    }
}

/// Outcome of one intake turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntakeReply {
    pub reply: String,
    pub state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

/// True if the message contains any trigger word (substring match, case-insensitive).
pub fn is_trigger(text: &str) -> bool {
    let text = text.trim().to_lowercase();
    TRIGGER_WORDS.iter().any(|w| text.contains(w))
}

/// Keep only ASCII digits and parse them as one number. "1 and 2" yields 12.
fn parse_category_digits(text: &str) -> Option<u64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Run one turn against the current state, stamping transitions with the current time.
pub fn process_message(text: &str, current: &ConversationState) -> IntakeReply {
    process_message_at(text, current, Utc::now())
}

/// Run one turn against the current state with an explicit clock.
pub fn process_message_at(
    text: &str,
    current: &ConversationState,
    now: DateTime<Utc>,
) -> IntakeReply {
    let trigger = is_trigger(text);

    // A trigger restarts from any step, including completed and unrecognized ones.
    if trigger || current.step == ConversationStep::Greeting {
        return IntakeReply {
            reply: INTAKE_QUESTION.to_string(),
            state: ConversationState::at(ConversationStep::AwaitingCategory, now),
            category: None,
        };
    }

    match current.step {
        ConversationStep::AwaitingCategory => {
            match parse_category_digits(text).and_then(Category::from_number) {
                Some(category) => IntakeReply {
                    reply: COMPLETION_MESSAGE.to_string(),
                    state: ConversationState::at(ConversationStep::Completed, now),
                    category: Some(category),
                },
                None => IntakeReply {
                    reply: CATEGORY_REPROMPT.to_string(),
                    state: ConversationState::at(ConversationStep::AwaitingCategory, now),
                    category: None,
                },
            }
        }
        ConversationStep::Completed => IntakeReply {
            reply: ALREADY_LISTED_MESSAGE.to_string(),
            state: ConversationState::at(ConversationStep::Completed, now),
            category: None,
        },
        _ => IntakeReply {
            reply: HELP_MESSAGE.to_string(),
            state: current.clone(),
            category: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_texts_match_the_published_copy() {
        assert_eq!(
            INTAKE_QUESTION,
            "Perfect. Last one — what are you most excited to invoke? Reply with a number:\n1 Tasks\n2 Reminders\n3 Planning\n4 Money\n5 Coordination\n6 Something else"
        );
        assert_eq!(
            COMPLETION_MESSAGE,
            "You're on the early list. We're launching soon — I'll text you when your spot opens. You can //invoke here anytime for updates."
        );
        assert!(CATEGORY_REPROMPT.ends_with("5 Coordination\n6 Something else"));
    }

    fn state(step: ConversationStep) -> ConversationState {
        ConversationState {
            step,
            last_message_at: None,
        }
    }

    fn all_states() -> Vec<ConversationState> {
        vec![
            state(ConversationStep::Greeting),
            state(ConversationStep::AwaitingCategory),
            state(ConversationStep::Completed),
            state(ConversationStep::Unrecognized("paused".to_string())),
        ]
    }

    #[test]
    fn trigger_restarts_from_every_state() {
        for s in all_states() {
            for input in ["//invoke", "Hello there", "HI", "start", "please INVOKE me", "hint"] {
                let out = process_message(input, &s);
                assert_eq!(out.state.step, ConversationStep::AwaitingCategory, "{:?} {}", s, input);
                assert_eq!(out.reply, INTAKE_QUESTION);
                assert_eq!(out.category, None);
            }
        }
    }

    #[test]
    fn greeting_asks_intake_question_for_any_input() {
        let out = process_message("", &state(ConversationStep::Greeting));
        assert_eq!(out.state.step, ConversationStep::AwaitingCategory);
        assert_eq!(out.reply, INTAKE_QUESTION);
        assert!(out.state.last_message_at.is_some());
    }

    #[test]
    fn awaiting_category_accepts_one_through_six() {
        let awaiting = state(ConversationStep::AwaitingCategory);
        for n in 1..=6u8 {
            for input in [format!("{}", n), format!(" #{} please", n), format!("option {}!", n)] {
                let out = process_message(&input, &awaiting);
                assert_eq!(out.state.step, ConversationStep::Completed);
                assert_eq!(out.category.map(Category::number), Some(n));
                assert_eq!(out.reply, COMPLETION_MESSAGE);
            }
        }
    }

    #[test]
    fn awaiting_category_reprompts_on_bad_input() {
        let awaiting = state(ConversationStep::AwaitingCategory);
        for input in ["banana", "99", "", "0", "7", "1 and 2", "99999999999999999999999"] {
            let out = process_message(input, &awaiting);
            assert_eq!(out.state.step, ConversationStep::AwaitingCategory, "{}", input);
            assert_eq!(out.category, None);
            assert_eq!(out.reply, CATEGORY_REPROMPT);
        }
    }

    #[test]
    fn completed_stays_completed_without_trigger() {
        let out = process_message("thanks!", &state(ConversationStep::Completed));
        assert_eq!(out.state.step, ConversationStep::Completed);
        assert_eq!(out.reply, ALREADY_LISTED_MESSAGE);
        assert_eq!(out.category, None);
    }

    #[test]
    fn unrecognized_step_returns_help_and_keeps_state() {
        let now = Utc::now();
        let current = ConversationState {
            step: ConversationStep::Unrecognized("paused".to_string()),
            last_message_at: Some(now),
        };
        let out = process_message("3", &current);
        assert_eq!(out.reply, HELP_MESSAGE);
        assert_eq!(out.state, current);
    }

    #[test]
    fn state_round_trips_wire_format() {
        let json = serde_json::json!({ "step": "awaiting_category" });
        let s: ConversationState = serde_json::from_value(json).unwrap();
        assert_eq!(s.step, ConversationStep::AwaitingCategory);

        let raw = serde_json::json!({ "step": "legacy_step", "lastMessageAt": "2025-01-02T03:04:05Z" });
        let s: ConversationState = serde_json::from_value(raw).unwrap();
        assert_eq!(s.step, ConversationStep::Unrecognized("legacy_step".to_string()));
        let back = serde_json::to_value(&s).unwrap();
        assert_eq!(back["step"], "legacy_step");
        assert!(back.get("lastMessageAt").is_some());
    }

    #[test]
    fn category_serializes_as_number() {
        let reply = process_message("4", &state(ConversationStep::AwaitingCategory));
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(v["category"], 4);
        assert_eq!(Category::Money.label(), "Money");
        assert!(Category::try_from(9u8).is_err());
    }
}
