/// Database manager for the Postgres/PostGIS backend
///
/// Owns the shared connection pool and bootstraps the service's own schema:
/// - postgis extension (spatial column types and GiST indexes)
/// - custom_tables / custom_table_fields: the logical-table registry
/// - workflows / workflow_executions: workflow definitions and audit trail
///
/// Custom tables themselves are created on demand by the schema translator.

use crate::config::DatabaseConfig;
use crate::table::ddl::validate_identifier;
use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// Shared pool plus schema bootstrap
#[derive(Debug, Clone)]
pub struct DatabaseManager {
    pool: PgPool,
    schema: String,
}

impl DatabaseManager {
    /// Connect using the database configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        validate_identifier(&config.schema)
            .map_err(|e| anyhow::anyhow!("Invalid database schema name: {}", e))?;

        tracing::info!("🗄️ Creating database pool (max {} connections)", config.max_connections);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

        Ok(Self {
            pool,
            schema: config.schema.clone(),
        })
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Create the extension and the service-owned tables
    ///
    /// Safe to call on every startup (IF NOT EXISTS throughout).
    pub async fn init_schema(&self) -> Result<()> {
        let schema = &self.schema;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS postgis")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{schema}\""))
            .execute(&self.pool)
            .await?;

        // Logical-table registry; the UNIQUE name is what makes concurrent
        // create-table requests resolve to exactly one winner
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{schema}"."custom_tables" (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                display_name TEXT NOT NULL DEFAULT '',
                description TEXT,
                icon TEXT,
                created_by TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{schema}"."custom_table_fields" (
                table_id UUID NOT NULL REFERENCES "{schema}"."custom_tables"(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                position INTEGER NOT NULL,
                definition JSONB NOT NULL,
                PRIMARY KEY (table_id, name)
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        // no cascade: a table still watched by a workflow cannot be unregistered
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{schema}"."workflows" (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                table_id UUID NOT NULL REFERENCES "{schema}"."custom_tables"(id),
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                definition JSONB NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{schema}"."workflow_executions" (
                id UUID PRIMARY KEY,
                workflow_id UUID NOT NULL REFERENCES "{schema}"."workflows"(id) ON DELETE CASCADE,
                status TEXT NOT NULL,
                execution JSONB NOT NULL,
                started_at TIMESTAMPTZ NOT NULL
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        // Indexes for the lookups the services run
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_workflows_table_id ON \"{schema}\".\"workflows\"(table_id)"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_workflow_executions_workflow ON \"{schema}\".\"workflow_executions\"(workflow_id, started_at)"
        ))
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Database schema '{}' initialized", schema);

        Ok(())
    }
}
