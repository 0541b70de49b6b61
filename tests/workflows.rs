mod common;

use common::{harness, required, table, Harness};
use serde_json::{json, Value};
use tabflow::data::WriteContext;
use tabflow::errors::{ServiceError, WorkflowError};
use tabflow::workflow::{ExecutionStatus, NodeOutcome, Workflow};
use tabflow::FieldDefinition;
use uuid::Uuid;

fn workflow(value: Value) -> Workflow {
    serde_json::from_value(value).expect("workflow json")
}

/// inventory (item_name, price) and alerts (message)
async fn inventory_and_alerts(h: &Harness) -> (Uuid, Uuid) {
    let inventory = h
        .create_table(table(
            "inventory",
            vec![required("item_name", "TEXT"), FieldDefinition::new("price", "TEXT")],
        ))
        .await;
    let alerts = h.create_table(table("alerts", vec![required("message", "TEXT")])).await;
    (inventory, alerts)
}

fn high_value_alert(inventory: Uuid, alerts: Uuid) -> Workflow {
    workflow(json!({
        "name": "High value alert",
        "triggerType": "RECORD_CREATED",
        "tableId": inventory,
        "nodes": [
            {"id": "trigger", "type": "trigger", "data": {}},
            {"id": "is-expensive", "type": "condition", "data": {"field": "price", "operator": "gt", "value": 1000}},
            {"id": "alert", "type": "action", "data": {
                "action": "create_record",
                "tableId": alerts,
                "fields": {"message": "High Value Item Added: {{trigger.item_name}}"}
            }},
            {"id": "log-cheap", "type": "action", "data": {
                "action": "broadcast", "channel": "inventory", "message": {"cheap": "{{trigger.item_name}}"}
            }}
        ],
        "edges": [
            {"source": "trigger", "target": "is-expensive"},
            {"source": "is-expensive", "target": "alert", "label": "true"},
            {"source": "is-expensive", "target": "log-cheap", "label": "false"}
        ]
    }))
}

#[tokio::test]
async fn high_value_items_raise_alerts() {
    let h = harness().await;
    let (inventory, alerts) = inventory_and_alerts(&h).await;
    let wf = h
        .app
        .state
        .workflows
        .create(high_value_alert(inventory, alerts))
        .await
        .unwrap();
    let mut broadcasts = h.app.broadcaster.subscribe();
    let data = &h.app.state.data;
    let ctx = WriteContext::actor("clerk");

    data.create(inventory, &json!({"item_name": "Gold Watch", "price": 1500}), &ctx)
        .await
        .unwrap();
    assert!(h.wait_for_runs(wf.id, 1).await);

    let alert_rows = h.records(alerts).await;
    assert_eq!(alert_rows.len(), 1);
    assert_eq!(alert_rows[0]["message"], "High Value Item Added: Gold Watch");
    assert_eq!(
        alert_rows[0]["created_by"].as_str(),
        Some(format!("workflow:{}", wf.id).as_str())
    );

    // 900 and an unreadable price both take the false branch
    data.create(inventory, &json!({"item_name": "Pen", "price": 900}), &ctx)
        .await
        .unwrap();
    data.create(inventory, &json!({"item_name": "Mystery", "price": "abc"}), &ctx)
        .await
        .unwrap();
    assert!(h.wait_for_runs(wf.id, 3).await);
    assert_eq!(h.records(alerts).await.len(), 1);

    let mut cheap = Vec::new();
    while let Ok(message) = broadcasts.try_recv() {
        assert_eq!(message.channel, "inventory");
        cheap.push(message.message["cheap"].as_str().unwrap_or_default().to_string());
    }
    cheap.sort();
    assert_eq!(cheap, vec!["Mystery".to_string(), "Pen".to_string()]);

    let runs = h.app.state.workflows.executions(wf.id, 10).await.unwrap();
    assert!(runs.iter().all(|r| r.status == ExecutionStatus::Completed));
    assert_eq!(
        runs.iter()
            .filter(|r| r.outcome_of("alert") == Some(NodeOutcome::Skipped))
            .count(),
        2
    );
}

#[tokio::test]
async fn cyclic_workflows_are_rejected_and_not_stored() {
    let h = harness().await;
    let (inventory, alerts) = inventory_and_alerts(&h).await;

    let cyclic = workflow(json!({
        "name": "loop",
        "triggerType": "RECORD_CHANGED",
        "tableId": inventory,
        "nodes": [
            {"id": "t", "type": "trigger", "data": {}},
            {"id": "a", "type": "action", "data": {"action": "broadcast", "channel": "x", "message": "a"}},
            {"id": "b", "type": "action", "data": {
                "action": "create_record", "tableId": alerts, "fields": {"message": "b"}
            }}
        ],
        "edges": [
            {"source": "t", "target": "a"},
            {"source": "a", "target": "b"},
            {"source": "b", "target": "a"}
        ]
    }));

    let err = h.app.state.workflows.create(cyclic).await.unwrap_err();
    assert!(matches!(err, WorkflowError::Cycle(_) | WorkflowError::InvalidGraph(_)));
    assert!(h.app.state.workflows.list().await.unwrap().is_empty());
    assert!(h.app.registry.is_empty());
}

#[tokio::test]
async fn workflows_must_reference_existing_tables() {
    let h = harness().await;
    let (inventory, _) = inventory_and_alerts(&h).await;

    let err = h
        .app
        .state
        .workflows
        .create(high_value_alert(inventory, Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TableNotFound(_)));

    let err = h
        .app
        .state
        .workflows
        .create(high_value_alert(Uuid::new_v4(), inventory))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::TableNotFound(_)));
    assert!(h.app.state.workflows.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_action_marks_the_run_as_partial_failure() {
    let h = harness().await;
    let orders = h.create_table(table("orders", vec![required("code", "TEXT")])).await;
    let invoices = h
        .create_table(table(
            "invoices",
            vec![required("order_code", "TEXT"), required("amount", "INTEGER")],
        ))
        .await;

    let wf = h
        .app
        .state
        .workflows
        .create(workflow(json!({
            "name": "invoice",
            "triggerType": "RECORD_CREATED",
            "tableId": orders,
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "invoice", "type": "action", "data": {
                    "action": "create_record", "tableId": invoices,
                    "fields": {"order_code": "{{trigger.code}}"}
                }},
                {"id": "notify", "type": "action", "data": {"action": "broadcast", "channel": "billing", "message": "invoiced"}},
                {"id": "audit", "type": "action", "data": {"action": "broadcast", "channel": "audit", "message": "{{event.operation}}"}}
            ],
            "edges": [
                {"source": "t", "target": "invoice"},
                {"source": "invoice", "target": "notify"},
                {"source": "t", "target": "audit"}
            ]
        })))
        .await
        .unwrap();

    h.app
        .state
        .data
        .create(orders, &json!({"code": "O-1"}), &WriteContext::default())
        .await
        .unwrap();
    assert!(h.wait_for_runs(wf.id, 1).await);

    let run = h.app.state.workflows.executions(wf.id, 1).await.unwrap().remove(0);
    assert_eq!(run.status, ExecutionStatus::PartialFailure);
    assert_eq!(run.outcome_of("invoice"), Some(NodeOutcome::Failed));
    assert_eq!(run.outcome_of("notify"), Some(NodeOutcome::Skipped));
    assert_eq!(run.outcome_of("audit"), Some(NodeOutcome::Succeeded));
    assert!(h.records(invoices).await.is_empty());
}

#[tokio::test]
async fn self_triggering_workflows_stop_at_the_chain_depth() {
    let h = harness().await;
    let pings = h.create_table(table("pings", vec![required("note", "TEXT")])).await;

    let wf = h
        .app
        .state
        .workflows
        .create(workflow(json!({
            "name": "echo",
            "triggerType": "RECORD_CREATED",
            "tableId": pings,
            "nodes": [
                {"id": "t", "type": "trigger", "data": {}},
                {"id": "echo", "type": "action", "data": {
                    "action": "create_record", "tableId": pings, "fields": {"note": "echo {{trigger.note}}"}
                }}
            ],
            "edges": [{"source": "t", "target": "echo"}]
        })))
        .await
        .unwrap();

    h.app
        .state
        .data
        .create(pings, &json!({"note": "hi"}), &WriteContext::default())
        .await
        .unwrap();

    // depths 0..=3 are dispatched, the record created at depth 4 is not
    assert!(h.wait_for_runs(wf.id, 4).await);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(h.executions(wf.id).await, 4);
    assert_eq!(h.records(pings).await.len(), 5);
}

#[tokio::test]
async fn edits_apply_to_later_events_and_deletes_stop_runs() {
    let h = harness().await;
    let (inventory, alerts) = inventory_and_alerts(&h).await;
    let service = &h.app.state.workflows;
    let wf = service.create(high_value_alert(inventory, alerts)).await.unwrap();

    let mut inactive = wf.clone();
    inactive.is_active = false;
    let updated = service.update(wf.id, inactive).await.unwrap();
    assert_eq!(updated.created_at, wf.created_at);

    h.app
        .state
        .data
        .create(inventory, &json!({"item_name": "Crown", "price": 5000}), &WriteContext::default())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(h.executions(wf.id).await, 0);

    service.delete(wf.id).await.unwrap();
    assert!(h.app.registry.get(wf.id).is_none());
    assert!(matches!(service.get(wf.id).await, Err(WorkflowError::NotFound(_))));
}

#[tokio::test]
async fn tables_used_by_workflows_cannot_be_deleted() {
    let h = harness().await;
    let (inventory, alerts) = inventory_and_alerts(&h).await;
    let wf = h
        .app
        .state
        .workflows
        .create(high_value_alert(inventory, alerts))
        .await
        .unwrap();
    let tables = &h.app.state.tables;

    // watched table and action target are both protected
    for table_id in [inventory, alerts] {
        match tables.delete_table(table_id).await {
            Err(ServiceError::TableInUse { dependents, .. }) => {
                assert_eq!(dependents.len(), 1);
                assert!(dependents[0].contains("High value alert"));
            }
            other => panic!("expected TableInUse, got {other:?}"),
        }
        assert!(tables.get(table_id).await.is_ok());
    }
    assert_eq!(h.db.table_names().await.len(), 4);
    assert!(h.app.registry.get(wf.id).is_some());

    h.app.state.workflows.delete(wf.id).await.unwrap();
    tables.delete_table(alerts).await.unwrap();
    tables.delete_table(inventory).await.unwrap();
    assert!(h.db.table_names().await.is_empty());
}
