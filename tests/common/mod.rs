#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tabflow::config::{Config, DatabaseConfig, PagingConfig, RuntimeConfig, ServerConfig};
use tabflow::storage::InMemoryDatabase;
use tabflow::table::{InMemoryTableRegistry, PrecisionPolicy};
use tabflow::workflow::InMemoryWorkflowStore;
use tabflow::{build_application, Application, Backends, FieldDefinition, TableDefinition};
use uuid::Uuid;

pub struct Harness {
    pub app: Application,
    pub db: Arc<InMemoryDatabase>,
    pub backends: Backends,
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: String::new(),
            schema: "public".to_string(),
            max_connections: 1,
        },
        runtime: RuntimeConfig {
            action_timeout_ms: 2_000,
            event_buffer: 256,
            event_overflow_wait_ms: 1_000,
            max_chain_depth: 3,
            precision_policy: PrecisionPolicy::Reject,
        },
        paging: PagingConfig {
            default_page_size: 50,
            max_page_size: 1000,
        },
    }
}

pub async fn harness() -> Harness {
    let db = Arc::new(InMemoryDatabase::new());
    let backends = Backends {
        tables: Arc::new(InMemoryTableRegistry::new()),
        db: db.clone(),
        workflows: Arc::new(InMemoryWorkflowStore::new()),
    };
    let app = build_application(&test_config(), backends.clone())
        .await
        .expect("application builds on in-memory backends");
    Harness { app, db, backends }
}

pub fn table(name: &str, fields: Vec<FieldDefinition>) -> TableDefinition {
    TableDefinition {
        name: name.to_string(),
        fields,
        ..TableDefinition::default()
    }
}

pub fn required(name: &str, data_type: &str) -> FieldDefinition {
    FieldDefinition {
        is_required: true,
        ..FieldDefinition::new(name, data_type)
    }
}

impl Harness {
    pub async fn create_table(&self, def: TableDefinition) -> Uuid {
        self.app.state.tables.create_table(def).await.expect("table is created").id
    }

    pub async fn records(&self, table_id: Uuid) -> Vec<serde_json::Map<String, Value>> {
        self.app
            .state
            .data
            .list(table_id, Default::default())
            .await
            .expect("records list")
    }
}

impl Harness {
    pub async fn executions(&self, workflow_id: Uuid) -> usize {
        self.app
            .state
            .workflows
            .executions(workflow_id, 100)
            .await
            .expect("executions list")
            .len()
    }

    /// Poll until `count` executions of the workflow are recorded (two seconds at most)
    pub async fn wait_for_runs(&self, workflow_id: Uuid, count: usize) -> bool {
        for _ in 0..200 {
            if self.executions(workflow_id).await == count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}
