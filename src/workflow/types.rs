/// Core workflow type definitions
///
/// A workflow watches one custom table and reacts to record changes by walking
/// a graph of trigger, condition and action nodes. Definitions arrive as the
/// editor's node/edge JSON and are stored as one document; they are parsed
/// straight into the typed node variants below, so an unknown node type,
/// operator or action is rejected at save time.

use crate::data::events::RecordOperation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Which record changes start a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerType {
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    /// Any mutation
    RecordChanged,
}

impl TriggerType {
    pub fn matches(&self, operation: RecordOperation) -> bool {
        matches!(
            (self, operation),
            (Self::RecordChanged, _)
                | (Self::RecordCreated, RecordOperation::Insert)
                | (Self::RecordUpdated, RecordOperation::Update)
                | (Self::RecordDeleted, RecordOperation::Delete)
        )
    }
}

fn default_active() -> bool {
    true
}

/// A complete workflow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    /// The table whose record changes the trigger watches
    pub table_id: Uuid,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    /// Tables the workflow depends on: the watched table, then every `create_record` target
    pub fn referenced_tables(&self) -> Vec<Uuid> {
        let mut tables = vec![self.table_id];
        for node in &self.nodes {
            if let NodeKind::Action(ActionConfig::CreateRecord { table_id, .. }) = &node.kind {
                if !tables.contains(table_id) {
                    tables.push(*table_id);
                }
            }
        }
        tables
    }

    pub fn references_table(&self, table_id: Uuid) -> bool {
        self.referenced_tables().contains(&table_id)
    }
}

/// A node in the workflow graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique within the workflow (e.g. "n1", "check-price")
    pub id: String,
    #[serde(flatten)]
    pub kind: NodeKind,
}

/// `{"type": "condition", "data": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NodeKind {
    Trigger(TriggerConfig),
    Condition(ConditionConfig),
    Action(ActionConfig),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Trigger(_) => "trigger",
            Self::Condition(_) => "condition",
            Self::Action(_) => "action",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerConfig {
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    /// Field of the triggering record; dots descend into JSON values
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    #[serde(alias = "eq")]
    Equals,
    #[serde(alias = "neq", alias = "ne")]
    NotEquals,
    #[serde(alias = "gt")]
    GreaterThan,
    #[serde(alias = "gte")]
    GreaterThanOrEqual,
    #[serde(alias = "lt")]
    LessThan,
    #[serde(alias = "lte")]
    LessThanOrEqual,
    Contains,
    NotContains,
    IsEmpty,
    IsNotEmpty,
}

/// What an action node does
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ActionConfig {
    /// Create a record in `table_id`; string values are templates
    #[serde(rename_all = "camelCase")]
    CreateRecord {
        table_id: Uuid,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    /// Publish a templated message on a named channel
    Broadcast {
        channel: String,
        #[serde(default)]
        message: Value,
    },
}

/// Connection between two nodes; condition edges carry a `true`/`false` label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, alias = "sourceHandle")]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    /// At least one action failed
    PartialFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeOutcome {
    /// Trigger fired or condition evaluated
    Matched,
    /// Not reached: untaken branch or below a failed action
    Skipped,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeOutcomeRecord {
    pub node_id: String,
    pub outcome: NodeOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    pub duration_ms: u64,
}

/// Append-only audit record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub table_id: Uuid,
    pub record_id: i64,
    pub event_id: Uuid,
    pub trigger_operation: RecordOperation,
    pub status: ExecutionStatus,
    /// Node ids in the order they ran
    pub path: Vec<String>,
    pub nodes: Vec<NodeOutcomeRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowExecution {
    pub fn outcome_of(&self, node_id: &str) -> Option<NodeOutcome> {
        self.nodes.iter().find(|n| n.node_id == node_id).map(|n| n.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_editor_graph_json() {
        let table_id = Uuid::new_v4();
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "High value alert",
            "triggerType": "RECORD_CREATED",
            "tableId": table_id,
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "c", "type": "condition", "data": {"field": "price", "operator": "gt", "value": 1000}},
                {"id": "a", "type": "action", "data": {
                    "action": "create_record",
                    "tableId": table_id,
                    "fields": {"message": "High Value Item Added: {{trigger.item_name}}"}
                }},
                {"id": "b", "type": "action", "data": {"action": "broadcast", "channel": "alerts", "message": "cheap"}}
            ],
            "edges": [
                {"source": "t", "target": "c"},
                {"source": "c", "target": "a", "sourceHandle": "true"},
                {"source": "c", "target": "b", "label": "false"}
            ]
        }))
        .unwrap();

        assert!(workflow.is_active);
        assert_eq!(workflow.edges[1].label.as_deref(), Some("true"));
        match &workflow.nodes[1].kind {
            NodeKind::Condition(c) => assert_eq!(c.operator, ConditionOperator::GreaterThan),
            other => panic!("unexpected node {other:?}"),
        }
        assert!(matches!(
            &workflow.nodes[2].kind,
            NodeKind::Action(ActionConfig::CreateRecord { fields, .. }) if fields.contains_key("message")
        ));
    }

    #[test]
    fn rejects_unknown_operator() {
        let parsed = serde_json::from_value::<Node>(json!({
            "id": "c",
            "type": "condition",
            "data": {"field": "price", "operator": "roughly", "value": 1}
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn referenced_tables_include_action_targets() {
        let watched = Uuid::new_v4();
        let target = Uuid::new_v4();
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "copy",
            "triggerType": "RECORD_CHANGED",
            "tableId": watched,
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "a", "type": "action", "data": {"action": "create_record", "tableId": target, "fields": {}}},
                {"id": "b", "type": "action", "data": {"action": "create_record", "tableId": watched, "fields": {}}}
            ]
        }))
        .unwrap();

        assert_eq!(workflow.referenced_tables(), vec![watched, target]);
        assert!(workflow.references_table(target));
        assert!(!workflow.references_table(Uuid::new_v4()));
    }

    #[test]
    fn trigger_types_map_operations() {
        assert!(TriggerType::RecordCreated.matches(RecordOperation::Insert));
        assert!(!TriggerType::RecordCreated.matches(RecordOperation::Update));
        assert!(TriggerType::RecordDeleted.matches(RecordOperation::Delete));
        assert!(TriggerType::RecordChanged.matches(RecordOperation::Update));
    }
}
