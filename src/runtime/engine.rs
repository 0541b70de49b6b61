/// Workflow evaluation engine
///
/// Walks a compiled workflow breadth-first from its trigger for one record
/// change event. Conditions pick exactly one outgoing branch; the other branch
/// and everything below it is recorded as skipped. A failed or timed-out
/// action marks its own subtree skipped and the run as a partial failure,
/// while independent branches keep going.

use crate::data::events::{RecordChangeEvent, SharedEvent};
use crate::data::service::{RecordWriter, WriteContext};
use crate::errors::ActionError;
use crate::runtime::broadcast::Broadcaster;
use crate::runtime::condition;
use crate::runtime::template::{self, TemplateScope};
use crate::table::types::{record_id, Record};
use crate::workflow::graph::{Branch, CompiledWorkflow};
use crate::workflow::types::{ActionConfig, ExecutionStatus, NodeKind, NodeOutcome, NodeOutcomeRecord, WorkflowExecution};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

pub struct WorkflowEngine {
    writer: Arc<dyn RecordWriter>,
    broadcaster: Arc<dyn Broadcaster>,
    action_timeout: Duration,
}

/// Accumulates node outcomes during one run
struct Trace {
    path: Vec<String>,
    nodes: Vec<NodeOutcomeRecord>,
    settled: HashSet<NodeIndex>,
}

impl Trace {
    fn record(&mut self, workflow: &CompiledWorkflow, index: NodeIndex, outcome: NodeOutcome, detail: Option<Value>, started: Instant) {
        let node_id = workflow.node(index).id.clone();
        if outcome != NodeOutcome::Skipped {
            self.path.push(node_id.clone());
        }
        self.settled.insert(index);
        self.nodes.push(NodeOutcomeRecord {
            node_id,
            outcome,
            detail,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Mark `index` and its whole subtree as skipped
    fn skip_subtree(&mut self, workflow: &CompiledWorkflow, index: NodeIndex, reason: &str) {
        let now = Instant::now();
        for node in std::iter::once(index).chain(workflow.descendants(index)) {
            if !self.settled.contains(&node) {
                self.record(workflow, node, NodeOutcome::Skipped, Some(json!({ "reason": reason })), now);
            }
        }
    }
}

impl WorkflowEngine {
    pub fn new(writer: Arc<dyn RecordWriter>, broadcaster: Arc<dyn Broadcaster>, action_timeout: Duration) -> Self {
        Self {
            writer,
            broadcaster,
            action_timeout,
        }
    }

    /// Run one workflow against one event and report what happened
    pub async fn run(&self, workflow: Arc<CompiledWorkflow>, event: SharedEvent) -> WorkflowExecution {
        let started_at = Utc::now();
        let empty = Record::new();
        let record = event.current().unwrap_or(&empty);

        info!(
            "🚀 Running workflow '{}' for {} {}#{}",
            workflow.workflow.name,
            event.operation.as_str(),
            event.table_name,
            event.record_id
        );

        let mut trace = Trace {
            path: Vec::new(),
            nodes: Vec::new(),
            settled: HashSet::new(),
        };
        let mut failed = false;
        let mut queue = VecDeque::from([workflow.trigger()]);

        while let Some(index) = queue.pop_front() {
            let started = Instant::now();
            let node = workflow.node(index);
            debug!("📍 Node '{}' ({})", node.id, node.kind.name());

            match &node.kind {
                NodeKind::Trigger(_) => {
                    trace.record(&workflow, index, NodeOutcome::Matched, None, started);
                    queue.extend(workflow.successors(index).into_iter().map(|(_, t)| t));
                }
                NodeKind::Condition(config) => {
                    let result = condition::evaluate(config, record);
                    trace.record(&workflow, index, NodeOutcome::Matched, Some(json!({ "result": result })), started);

                    let taken = if result { Branch::True } else { Branch::False };
                    for (branch, target) in workflow.successors(index) {
                        if branch == taken {
                            queue.push_back(target);
                        } else {
                            trace.skip_subtree(&workflow, target, "branch not taken");
                        }
                    }
                }
                NodeKind::Action(action) => match self.execute_action(&workflow, action, &event, record).await {
                    Ok(detail) => {
                        trace.record(&workflow, index, NodeOutcome::Succeeded, Some(detail), started);
                        queue.extend(workflow.successors(index).into_iter().map(|(_, t)| t));
                    }
                    Err(e) => {
                        error!("❌ Action '{}' in workflow '{}' failed: {}", node.id, workflow.workflow.name, e);
                        failed = true;
                        trace.record(
                            &workflow,
                            index,
                            NodeOutcome::Failed,
                            Some(json!({ "error": e.to_string() })),
                            started,
                        );
                        for (_, target) in workflow.successors(index) {
                            trace.skip_subtree(&workflow, target, "upstream action failed");
                        }
                    }
                },
            }
        }

        let status = if failed {
            ExecutionStatus::PartialFailure
        } else {
            ExecutionStatus::Completed
        };
        info!("✅ Workflow '{}' finished: {:?} via {:?}", workflow.workflow.name, status, trace.path);

        WorkflowExecution {
            id: Uuid::new_v4(),
            workflow_id: workflow.id(),
            table_id: event.table_id,
            record_id: event.record_id,
            event_id: event.id,
            trigger_operation: event.operation,
            status,
            path: trace.path,
            nodes: trace.nodes,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn execute_action(
        &self,
        workflow: &CompiledWorkflow,
        action: &ActionConfig,
        event: &RecordChangeEvent,
        record: &Record,
    ) -> Result<Value, ActionError> {
        let scope = TemplateScope::new(record, event);

        match action {
            ActionConfig::CreateRecord { table_id, fields } => {
                let payload = Value::Object(template::render_map(fields, &scope));
                let ctx = WriteContext::caused_by(Some(format!("workflow:{}", workflow.id())), event.depth);
                let created = tokio::time::timeout(self.action_timeout, self.writer.create_record(*table_id, &payload, &ctx))
                    .await
                    .map_err(|_| ActionError::Timeout(self.action_timeout))??;
                Ok(json!({ "tableId": table_id, "recordId": record_id(&created) }))
            }
            ActionConfig::Broadcast { channel, message } => {
                let message = template::render_value(message, &scope);
                tokio::time::timeout(self.action_timeout, self.broadcaster.publish(channel, message.clone()))
                    .await
                    .map_err(|_| ActionError::Timeout(self.action_timeout))??;
                Ok(json!({ "channel": channel, "message": message }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::events::RecordOperation;
    use crate::errors::ServiceError;
    use crate::runtime::broadcast::ChannelBroadcaster;
    use crate::workflow::types::Workflow;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(Uuid, Value, WriteContext)>>,
        fail_table: Option<Uuid>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl RecordWriter for RecordingWriter {
        async fn create_record(&self, table_id: Uuid, payload: &Value, ctx: &WriteContext) -> Result<Record, ServiceError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if Some(table_id) == self.fail_table {
                return Err(ServiceError::TableNotFound(table_id.to_string()));
            }
            let mut writes = self.writes.lock().unwrap();
            writes.push((table_id, payload.clone(), ctx.clone()));
            let mut record = payload.as_object().cloned().unwrap_or_default();
            record.insert("id".to_string(), json!(writes.len()));
            Ok(record)
        }
    }

    fn event(price: Value) -> SharedEvent {
        Arc::new(RecordChangeEvent {
            id: Uuid::new_v4(),
            table_id: Uuid::new_v4(),
            table_name: "inventory".to_string(),
            operation: RecordOperation::Insert,
            record_id: 1,
            before: None,
            after: json!({"id": 1, "item_name": "Gold Watch", "price": price}).as_object().cloned(),
            actor: Some("alice".to_string()),
            depth: 0,
            occurred_at: Utc::now(),
        })
    }

    fn workflow(table_id: Uuid, alerts: Uuid, audit: Uuid) -> Arc<CompiledWorkflow> {
        let workflow: Workflow = serde_json::from_value(json!({
            "name": "high value",
            "triggerType": "RECORD_CREATED",
            "tableId": table_id,
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "c", "type": "condition", "data": {"field": "price", "operator": "gt", "value": 1000}},
                {"id": "alert", "type": "action", "data": {
                    "action": "create_record", "tableId": alerts,
                    "fields": {"message": "High Value Item Added: {{trigger.item_name}}"}
                }},
                {"id": "after-alert", "type": "action", "data": {"action": "broadcast", "channel": "ops", "message": "{{trigger.price}}"}},
                {"id": "audit", "type": "action", "data": {
                    "action": "create_record", "tableId": audit, "fields": {"note": "checked {{trigger.item_name}}"}
                }},
                {"id": "cheap", "type": "action", "data": {"action": "broadcast", "channel": "ops", "message": "cheap"}}
            ],
            "edges": [
                {"source": "t", "target": "c"},
                {"source": "t", "target": "audit"},
                {"source": "c", "target": "alert", "label": "true"},
                {"source": "c", "target": "cheap", "label": "false"},
                {"source": "alert", "target": "after-alert"}
            ]
        }))
        .unwrap();
        Arc::new(CompiledWorkflow::compile(workflow).unwrap())
    }

    fn engine(writer: Arc<RecordingWriter>, timeout: Duration) -> WorkflowEngine {
        WorkflowEngine::new(writer, Arc::new(ChannelBroadcaster::new(8)), timeout)
    }

    #[tokio::test]
    async fn takes_the_true_branch_and_renders_templates() {
        let (alerts, audit) = (Uuid::new_v4(), Uuid::new_v4());
        let writer = Arc::new(RecordingWriter::default());
        let ev = event(json!(1500));
        let wf = workflow(ev.table_id, alerts, audit);

        let execution = engine(writer.clone(), Duration::from_secs(5)).run(wf.clone(), ev.clone()).await;

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.outcome_of("alert"), Some(NodeOutcome::Succeeded));
        assert_eq!(execution.outcome_of("after-alert"), Some(NodeOutcome::Succeeded));
        assert_eq!(execution.outcome_of("cheap"), Some(NodeOutcome::Skipped));
        assert_eq!(execution.path.first().map(String::as_str), Some("t"));

        let writes = writer.writes.lock().unwrap();
        let (table, payload, ctx) = writes.iter().find(|(t, _, _)| *t == alerts).unwrap();
        assert_eq!(*table, alerts);
        assert_eq!(payload["message"], json!("High Value Item Added: Gold Watch"));
        assert_eq!(ctx.depth, 1);
        assert_eq!(ctx.actor.as_deref(), Some(format!("workflow:{}", wf.id()).as_str()));
    }

    #[tokio::test]
    async fn false_and_unreadable_values_take_the_false_branch() {
        for price in [json!(900), json!("abc")] {
            let writer = Arc::new(RecordingWriter::default());
            let ev = event(price);
            let wf = workflow(ev.table_id, Uuid::new_v4(), Uuid::new_v4());

            let execution = engine(writer, Duration::from_secs(5)).run(wf, ev).await;
            assert_eq!(execution.outcome_of("alert"), Some(NodeOutcome::Skipped));
            assert_eq!(execution.outcome_of("after-alert"), Some(NodeOutcome::Skipped));
            assert_eq!(execution.outcome_of("cheap"), Some(NodeOutcome::Succeeded));
        }
    }

    #[tokio::test]
    async fn failed_action_skips_its_subtree_only() {
        let (alerts, audit) = (Uuid::new_v4(), Uuid::new_v4());
        let writer = Arc::new(RecordingWriter {
            fail_table: Some(alerts),
            ..Default::default()
        });
        let ev = event(json!(1500));
        let wf = workflow(ev.table_id, alerts, audit);

        let execution = engine(writer.clone(), Duration::from_secs(5)).run(wf, ev).await;

        assert_eq!(execution.status, ExecutionStatus::PartialFailure);
        assert_eq!(execution.outcome_of("alert"), Some(NodeOutcome::Failed));
        assert_eq!(execution.outcome_of("after-alert"), Some(NodeOutcome::Skipped));
        assert_eq!(execution.outcome_of("audit"), Some(NodeOutcome::Succeeded));
        assert_eq!(writer.writes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn slow_actions_time_out() {
        let writer = Arc::new(RecordingWriter {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let ev = event(json!(1500));
        let wf = workflow(ev.table_id, Uuid::new_v4(), Uuid::new_v4());

        let execution = engine(writer, Duration::from_millis(20)).run(wf, ev).await;
        assert_eq!(execution.status, ExecutionStatus::PartialFailure);
        assert_eq!(execution.outcome_of("audit"), Some(NodeOutcome::Failed));
        assert_eq!(execution.outcome_of("alert"), Some(NodeOutcome::Failed));
    }
}
