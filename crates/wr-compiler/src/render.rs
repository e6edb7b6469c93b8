//! JSON rendering of rules and response envelopes.

use serde_json::{json, Map, Value};
use wr_core::types::Rule;

const PRIVATE_FIELDS: [&str; 1] = ["private_comment"];

/// Public view of a rule. Unset fields are omitted, and the private comment
/// only appears when `include_private` is set.
pub fn rule_summary(rule: &Rule, include_private: bool) -> Value {
    let mut summary = match serde_json::to_value(rule) {
        Ok(Value::Object(fields)) => fields,
        Ok(_) | Err(_) => fallback_summary(rule),
    };
    if !include_private {
        for field in PRIVATE_FIELDS {
            summary.remove(field);
        }
    }
    Value::Object(summary)
}

pub fn rules_summary<'a, I>(rules: I, include_private: bool) -> Value
where
    I: IntoIterator<Item = &'a Rule>,
{
    Value::Array(rules.into_iter().map(|rule| rule_summary(rule, include_private)).collect())
}

/// `{"status": "success", "message": "ok", "result": …}`
pub fn success(result: Value) -> Value {
    json!({
        "status": "success",
        "message": "ok",
        "result": result,
    })
}

/// `{"status": "error", "message": …}`, with `result` only when given.
pub fn error(message: &str, result: Option<Value>) -> Value {
    let mut envelope = Map::new();
    envelope.insert("status".to_string(), Value::from("error"));
    envelope.insert("message".to_string(), Value::from(message));
    if let Some(result) = result {
        envelope.insert("result".to_string(), result);
    }
    Value::Object(envelope)
}

/// Serialization only fails for dates outside the RFC 3339 range; keep the
/// identifying fields in that case.
fn fallback_summary(rule: &Rule) -> Map<String, Value> {
    log::warn!("rule {} could not be fully rendered", rule.id);
    let mut fields = Map::new();
    fields.insert("id".to_string(), Value::from(rule.id.0));
    fields.insert("policy".to_string(), Value::from(rule.policy.as_str()));
    fields.insert("enabled".to_string(), Value::from(rule.enabled));
    fields.insert("environment".to_string(), Value::from(rule.environment.as_str()));
    fields.insert("surt".to_string(), Value::from(rule.surt.as_str()));
    fields
}
