//! Intent parsing port and the keyword-based default

use serde::{Deserialize, Serialize};

use crate::errors::LocatorError;

/// What the caller intends to do with the element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Select,
    Check,
    Hover,
    /// No recognised verb; affinity scoring stays neutral
    Unknown,
}

impl ActionKind {
    /// Get action name as string
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Select => "select",
            ActionKind::Check => "check",
            ActionKind::Hover => "hover",
            ActionKind::Unknown => "unknown",
        }
    }

    fn from_verb(verb: &str) -> Option<Self> {
        let kind = match verb {
            "click" | "press" | "tap" | "push" | "hit" => ActionKind::Click,
            "type" | "enter" | "fill" | "input" | "write" => ActionKind::Type,
            "select" | "choose" | "pick" => ActionKind::Select,
            "check" | "uncheck" | "tick" | "toggle" => ActionKind::Check,
            "hover" => ActionKind::Hover,
            "find" | "locate" | "get" => ActionKind::Unknown,
            _ => return None,
        };
        Some(kind)
    }
}

/// Parsed intent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub action: ActionKind,
    /// Phrase describing the element
    pub target: String,
    /// Text to type or option to select, when quoted in the query
    pub value: Option<String>,
}

/// Natural-language intent parser port
pub trait IntentParser: Send + Sync {
    fn parse(&self, text: &str) -> Result<Intent, LocatorError>;
}

/// Leading-verb parser: the first word picks the action, the first quoted
/// segment becomes the value and the remainder describes the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordIntentParser;

const TARGET_LEADERS: &[&str] = &["into", "in", "on", "to", "at", "the"];

impl IntentParser for KeywordIntentParser {
    fn parse(&self, text: &str) -> Result<Intent, LocatorError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::InputInvalid("empty query".to_string()));
        }

        let (value, rest) = extract_quoted(trimmed);
        let mut words: Vec<&str> = rest.split_whitespace().collect();

        let action = match words.first().map(|w| w.to_lowercase()) {
            Some(first) => match ActionKind::from_verb(first.trim_matches(|c: char| !c.is_alphanumeric())) {
                Some(kind) => {
                    words.remove(0);
                    kind
                }
                None => ActionKind::Unknown,
            },
            None => ActionKind::Unknown,
        };

        // "type 'x' into the email field": the value sat between verb and target
        if value.is_some() {
            while let Some(first) = words.first() {
                if TARGET_LEADERS.contains(&first.to_lowercase().as_str()) {
                    words.remove(0);
                } else {
                    break;
                }
            }
        }

        let target = words.join(" ");
        let target = if target.is_empty() {
            // bare quoted phrase: `click "Sign in"` targets the quoted text
            value.clone().unwrap_or_default()
        } else {
            target
        };
        if target.trim().is_empty() {
            return Err(LocatorError::InputInvalid(format!(
                "query '{trimmed}' names no target"
            )));
        }

        let value = match action {
            ActionKind::Type | ActionKind::Select => value,
            _ if words.is_empty() => None,
            _ => value,
        };

        Ok(Intent {
            action,
            target,
            value,
        })
    }
}

/// Splits off the first `"..."` or `'...'` segment.
fn extract_quoted(text: &str) -> (Option<String>, String) {
    for quote in ['"', '\''] {
        if let Some(start) = text.find(quote) {
            if let Some(len) = text[start + 1..].find(quote) {
                let end = start + 1 + len;
                let value = text[start + 1..end].to_string();
                let mut rest = String::with_capacity(text.len());
                rest.push_str(&text[..start]);
                rest.push(' ');
                rest.push_str(&text[end + 1..]);
                return (Some(value), rest);
            }
        }
    }
    (None, text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Intent {
        KeywordIntentParser.parse(text).unwrap()
    }

    #[test]
    fn leading_verb_selects_action() {
        let intent = parse("click the sign-in button");
        assert_eq!(intent.action, ActionKind::Click);
        assert_eq!(intent.target, "the sign-in button");
        assert_eq!(intent.value, None);
    }

    #[test]
    fn quoted_value_is_extracted() {
        let intent = parse("type \"ada@example.com\" into the email field");
        assert_eq!(intent.action, ActionKind::Type);
        assert_eq!(intent.value.as_deref(), Some("ada@example.com"));
        assert_eq!(intent.target, "email field");
    }

    #[test]
    fn bare_quoted_phrase_becomes_target() {
        let intent = parse("click 'Sign in'");
        assert_eq!(intent.action, ActionKind::Click);
        assert_eq!(intent.target, "Sign in");
        assert_eq!(intent.value, None);
    }

    #[test]
    fn unknown_verb_keeps_whole_phrase() {
        let intent = parse("Submit in payment frame");
        assert_eq!(intent.action, ActionKind::Unknown);
        assert_eq!(intent.target, "Submit in payment frame");
    }

    #[test]
    fn empty_query_is_rejected() {
        assert!(matches!(
            KeywordIntentParser.parse("   "),
            Err(LocatorError::InputInvalid(_))
        ));
        assert!(KeywordIntentParser.parse("click").is_err());
    }
}
