//! Typed action payloads.
//!
//! Rows keep the payload as raw JSON text; this module is the single place
//! that turns that JSON into a typed value. Creation-time validation and
//! dispatch both go through [`ActionPayload::from_value`], so a payload that
//! passed `add_task` parses the same way when it later comes due.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ActionType;
use crate::error::{Error, Result};

/// Payload for a `speak` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakPayload {
    pub text: String,
}

/// Payload for a `plugin` action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginPayload {
    pub plugin: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub refresh_only: bool,
}

/// An action payload, keyed by the task's `action_type` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionPayload {
    Speak(SpeakPayload),
    Plugin(PluginPayload),
}

impl ActionPayload {
    /// Validate and normalize a JSON payload against an action type.
    ///
    /// The caller's value is not modified; the returned payload carries the
    /// normalized fields (trimmed plugin name, whitespace-only query
    /// collapsed to empty, coerced refresh_only).
    pub fn from_value(action_type: &str, value: &Value) -> Result<Self> {
        match ActionType::parse(action_type) {
            Some(ActionType::Speak) => {
                let text = value.get("text").and_then(Value::as_str).unwrap_or_default();
                if text.trim().is_empty() {
                    return Err(Error::InvalidPayload(
                        "'speak' action requires non-empty 'text'".into(),
                    ));
                }
                Ok(ActionPayload::Speak(SpeakPayload {
                    text: text.to_string(),
                }))
            }
            Some(ActionType::Plugin) => {
                let plugin = value
                    .get("plugin")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .trim();
                if plugin.is_empty() {
                    return Err(Error::InvalidPayload(
                        "'plugin' action requires non-empty 'plugin'".into(),
                    ));
                }
                let query = match value.get("query") {
                    None | Some(Value::Null) => String::new(),
                    Some(Value::String(s)) => {
                        if s.trim().is_empty() {
                            String::new()
                        } else {
                            s.clone()
                        }
                    }
                    Some(other) => {
                        return Err(Error::InvalidPayload(format!(
                            "'query' must be a string, got {other}"
                        )));
                    }
                };
                let refresh_only = match value.get("refresh_only") {
                    None | Some(Value::Null) => false,
                    Some(v) => coerce_bool(v)?,
                };
                Ok(ActionPayload::Plugin(PluginPayload {
                    plugin: plugin.to_string(),
                    query,
                    refresh_only,
                }))
            }
            None => Err(Error::UnknownActionType(action_type.to_string())),
        }
    }

    /// Parse the persisted raw JSON form.
    pub fn from_json(action_type: &str, raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidPayload(format!("malformed action_payload JSON: {e}")))?;
        Self::from_value(action_type, &value)
    }

    /// Serialize to the canonical persisted JSON form.
    pub fn to_json(&self) -> String {
        match self {
            ActionPayload::Speak(p) => serde_json::json!({ "text": p.text }),
            ActionPayload::Plugin(p) => serde_json::json!({
                "plugin": p.plugin,
                "query": p.query,
                "refresh_only": p.refresh_only,
            }),
        }
        .to_string()
    }
}

/// Accepted spellings for string-typed boolean payload fields.
const TRUE_WORDS: &[&str] = &["true", "1", "yes", "y", "on"];
const FALSE_WORDS: &[&str] = &["false", "0", "no", "n", "off", ""];

/// Coerce a JSON value into a bool.
///
/// Accepts real booleans and the fixed spellings above, case-insensitively.
/// Everything else (numbers, objects, unrecognized strings) is rejected.
pub fn coerce_bool(value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => {
            let lowered = s.trim().to_ascii_lowercase();
            if TRUE_WORDS.contains(&lowered.as_str()) {
                Ok(true)
            } else if FALSE_WORDS.contains(&lowered.as_str()) {
                Ok(false)
            } else {
                Err(Error::InvalidPayload(format!(
                    "unrecognized boolean string: {s:?}"
                )))
            }
        }
        other => Err(Error::InvalidPayload(format!(
            "expected a boolean, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn speak_requires_text() {
        assert!(ActionPayload::from_value("speak", &json!({})).is_err());
        assert!(ActionPayload::from_value("speak", &json!({"text": ""})).is_err());
        assert!(ActionPayload::from_value("speak", &json!({"text": "   "})).is_err());
        assert!(ActionPayload::from_value("speak", &json!({"text": 42})).is_err());
    }

    #[test]
    fn speak_keeps_text_verbatim() {
        let p = ActionPayload::from_value("speak", &json!({"text": "hello world"})).unwrap();
        assert_eq!(p, ActionPayload::Speak(SpeakPayload { text: "hello world".into() }));
    }

    #[test]
    fn plugin_requires_name() {
        assert!(ActionPayload::from_value("plugin", &json!({})).is_err());
        assert!(ActionPayload::from_value("plugin", &json!({"plugin": "  "})).is_err());
    }

    #[test]
    fn plugin_name_is_trimmed() {
        let p = ActionPayload::from_value("plugin", &json!({"plugin": "  weather "})).unwrap();
        let ActionPayload::Plugin(p) = p else { panic!("expected plugin payload") };
        assert_eq!(p.plugin, "weather");
        assert_eq!(p.query, "");
        assert!(!p.refresh_only);
    }

    #[test]
    fn whitespace_query_normalized_to_empty() {
        let p = ActionPayload::from_value(
            "plugin",
            &json!({"plugin": "weather", "query": "  ", "refresh_only": "true"}),
        )
        .unwrap();
        let ActionPayload::Plugin(p) = p else { panic!("expected plugin payload") };
        assert_eq!(p.query, "");
        assert!(p.refresh_only);
    }

    #[test]
    fn non_string_query_rejected() {
        let v = json!({"plugin": "news", "query": 5});
        assert!(ActionPayload::from_value("plugin", &v).is_err());
    }

    #[test]
    fn null_query_and_refresh_treated_as_absent() {
        let v = json!({"plugin": "news", "query": null, "refresh_only": null});
        let ActionPayload::Plugin(p) = ActionPayload::from_value("plugin", &v).unwrap() else {
            panic!("expected plugin payload")
        };
        assert_eq!(p.query, "");
        assert!(!p.refresh_only);
    }

    #[test]
    fn boolean_table() {
        for s in ["true", "1", "yes", "y", "on", "TRUE", " Yes "] {
            assert!(coerce_bool(&json!(s)).unwrap(), "{s:?} should be true");
        }
        for s in ["false", "0", "no", "n", "off", "", "OFF"] {
            assert!(!coerce_bool(&json!(s)).unwrap(), "{s:?} should be false");
        }
        assert!(coerce_bool(&json!(true)).unwrap());
        assert!(!coerce_bool(&json!(false)).unwrap());
        assert!(coerce_bool(&json!("maybe")).is_err());
        assert!(coerce_bool(&json!(1)).is_err());
        assert!(coerce_bool(&json!([])).is_err());
    }

    #[test]
    fn unknown_action_type_rejected() {
        assert!(matches!(
            ActionPayload::from_value("email", &json!({})),
            Err(Error::UnknownActionType(_))
        ));
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(ActionPayload::from_json("speak", "{not json").is_err());
    }

    #[test]
    fn canonical_json_carries_normalized_fields() {
        let p = ActionPayload::from_value(
            "plugin",
            &json!({"plugin": " weather ", "query": " ", "refresh_only": "yes"}),
        )
        .unwrap();
        let round: Value = serde_json::from_str(&p.to_json()).unwrap();
        assert_eq!(round["plugin"], "weather");
        assert_eq!(round["query"], "");
        assert_eq!(round["refresh_only"], true);
    }
}
