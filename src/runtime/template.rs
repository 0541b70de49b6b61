/// `{{ ... }}` interpolation for action parameters
///
/// Placeholders:
/// - `{{trigger.<field>}}`: a field of the triggering record (dotted paths allowed)
/// - `{{event.operation}}`, `{{event.tableName}}`, `{{event.tableId}}`,
///   `{{event.recordId}}`, `{{event.actor}}`
///
/// Anything that does not resolve renders as an empty string. A string that is
/// exactly one placeholder keeps the resolved value's JSON type.

use crate::data::events::RecordChangeEvent;
use crate::runtime::condition::lookup;
use crate::table::types::Record;
use serde_json::{Map, Value};

pub struct TemplateScope<'a> {
    pub record: &'a Record,
    pub event: &'a RecordChangeEvent,
}

impl<'a> TemplateScope<'a> {
    pub fn new(record: &'a Record, event: &'a RecordChangeEvent) -> Self {
        Self { record, event }
    }

    fn resolve(&self, expression: &str) -> Option<Value> {
        let (root, path) = expression.split_once('.')?;
        match root {
            "trigger" => lookup(self.record, path).cloned(),
            "event" => match path {
                "operation" => Some(Value::from(self.event.operation.as_str())),
                "tableName" => Some(Value::from(self.event.table_name.clone())),
                "tableId" => Some(Value::from(self.event.table_id.to_string())),
                "recordId" => Some(Value::from(self.event.record_id)),
                "actor" => self.event.actor.clone().map(Value::from),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Render every string inside `template`, recursing through arrays and objects
pub fn render_value(template: &Value, scope: &TemplateScope<'_>) -> Value {
    match template {
        Value::String(s) => render_string(s, scope),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, scope)).collect()),
        Value::Object(map) => Value::Object(render_map(map, scope)),
        other => other.clone(),
    }
}

pub fn render_map(map: &Map<String, Value>, scope: &TemplateScope<'_>) -> Map<String, Value> {
    map.iter().map(|(k, v)| (k.clone(), render_value(v, scope))).collect()
}

fn render_string(template: &str, scope: &TemplateScope<'_>) -> Value {
    let trimmed = template.trim();
    if let Some(inner) = trimmed.strip_prefix("{{").and_then(|s| s.strip_suffix("}}")) {
        if !inner.contains("{{") && !inner.contains("}}") {
            return match scope.resolve(inner.trim()) {
                Some(Value::Null) | None => Value::from(""),
                Some(value) => value,
            };
        }
    }
    Value::String(render(template, scope))
}

/// Interpolate placeholders into text
pub fn render(template: &str, scope: &TemplateScope<'_>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                if let Some(value) = scope.resolve(after[..end].trim()) {
                    out.push_str(&to_text(&value));
                }
                rest = &after[end + 2..];
            }
            None => {
                // unclosed placeholder is literal text
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::events::RecordOperation;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn event(after: Value) -> RecordChangeEvent {
        RecordChangeEvent {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            table_name: "items".to_string(),
            operation: RecordOperation::Insert,
            record_id: 7,
            before: None,
            after: after.as_object().cloned(),
            actor: Some("alice".to_string()),
            depth: 0,
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn interpolates_trigger_fields() {
        let ev = event(json!({"item_name": "Gold Watch", "price": 1500}));
        let scope = TemplateScope::new(ev.current().unwrap(), &ev);
        assert_eq!(
            render("High Value Item Added: {{trigger.item_name}}", &scope),
            "High Value Item Added: Gold Watch"
        );
        assert_eq!(
            render("{{ event.operation }} on {{event.tableName}} #{{event.recordId}} by {{event.actor}}", &scope),
            "INSERT on items #7 by alice"
        );
    }

    #[test]
    fn unresolved_placeholders_render_empty() {
        let ev = event(json!({"item_name": "Gold Watch"}));
        let scope = TemplateScope::new(ev.current().unwrap(), &ev);
        assert_eq!(render("[{{trigger.nope}}]", &scope), "[]");
        assert_eq!(render("[{{bogus}}]", &scope), "[]");
        assert_eq!(render("open {{trigger.item_name", &scope), "open {{trigger.item_name");
    }

    #[test]
    fn whole_placeholder_keeps_type() {
        let ev = event(json!({"price": 1500, "item_name": "Gold Watch"}));
        let scope = TemplateScope::new(ev.current().unwrap(), &ev);
        let rendered = render_value(
            &json!({"amount": "{{trigger.price}}", "label": "#{{trigger.price}}", "missing": "{{trigger.x}}", "n": 3}),
            &scope,
        );
        assert_eq!(rendered, json!({"amount": 1500, "label": "#1500", "missing": "", "n": 3}));
    }
}
