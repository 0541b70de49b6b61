/// Schema translator
///
/// Pure translation from a `TableDefinition` to an ordered list of DDL
/// operations. Nothing here talks to a database: identifiers are checked
/// against an allow-list before they are ever interpolated, and the resulting
/// plan is applied by a `PhysicalDatabase` inside one transaction.
///
/// Plan order for a new table:
/// 1. base table with system columns and all non-geometry fields
/// 2. per geometry field: `AddGeometryColumn`, then `SET NOT NULL` if required
/// 3. foreign keys for relation fields
/// 4. spatial (GiST) indexes, then timeseries indexes
/// 5. history shadow table and its record index

use crate::errors::SchemaError;
use crate::storage::PhysicalSnapshot;
use crate::table::data_types::{ColumnType, GeometryKind};
use crate::table::types::{
    FieldDefinition, FieldShape, OnDelete, TableDefinition, HISTORY_SUFFIX, RESERVED_TABLE_NAMES, SYSTEM_COLUMNS,
};
use serde::Serialize;
use std::collections::HashSet;

/// Postgres truncates identifiers beyond this many bytes
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Dimension passed to `AddGeometryColumn`
pub const GEOMETRY_DIMENSION: u8 = 2;

/// System columns with their catalog type and nullability
pub const SYSTEM_COLUMN_TYPES: [(&str, &str, bool); 6] = [
    ("id", "int8", true),
    ("created_at", "timestamptz", true),
    ("updated_at", "timestamptz", true),
    ("deleted_at", "timestamptz", false),
    ("created_by", "text", false),
    ("updated_by", "text", false),
];

/// Envelope columns of a history table with their catalog type and nullability
pub const HISTORY_ENVELOPE_TYPES: [(&str, &str, bool); 5] = [
    ("history_id", "int8", true),
    ("record_id", "int8", true),
    ("operation", "text", true),
    ("actor", "text", false),
    ("changed_at", "timestamptz", true),
];

/// Check an identifier against the allow-list `^[a-z][a-z0-9_]*$` (max 63 bytes)
///
/// Identifiers cannot be bound as parameters, so anything that does not match
/// is rejected outright rather than escaped.
pub fn validate_identifier(ident: &str) -> Result<(), SchemaError> {
    let mut chars = ident.chars();
    let starts_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    if !starts_ok || !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_') {
        return Err(SchemaError::InvalidIdentifier(ident.to_string()));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(SchemaError::IdentifierTooLong(ident.to_string()));
    }
    Ok(())
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", quote(schema), quote(table))
}

/// One column in a generated table or `ADD COLUMN`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    pub unique: bool,
}

impl ColumnSpec {
    fn sql(&self) -> String {
        let mut sql = format!("{} {}", quote(&self.name), self.column_type.sql());
        if self.not_null {
            sql.push_str(" NOT NULL");
        }
        if self.unique {
            sql.push_str(" UNIQUE");
        }
        sql
    }
}

/// One generated DDL step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DdlOperation {
    CreateTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    AddColumn {
        table: String,
        column: ColumnSpec,
    },
    AddGeometryColumn {
        table: String,
        column: String,
        srid: i32,
        kind: GeometryKind,
        dimension: u8,
    },
    SetNotNull {
        table: String,
        column: String,
    },
    AddForeignKey {
        table: String,
        column: String,
        constraint: String,
        ref_table: String,
        ref_column: String,
        on_delete: OnDelete,
    },
    CreateSpatialIndex {
        index: String,
        table: String,
        column: String,
    },
    CreateIndex {
        index: String,
        table: String,
        column: String,
    },
    CreateHistoryTable {
        table: String,
        columns: Vec<ColumnSpec>,
    },
    DropTable {
        table: String,
    },
}

impl DdlOperation {
    /// Table the operation touches
    pub fn table(&self) -> &str {
        match self {
            Self::CreateTable { table, .. }
            | Self::AddColumn { table, .. }
            | Self::AddGeometryColumn { table, .. }
            | Self::SetNotNull { table, .. }
            | Self::AddForeignKey { table, .. }
            | Self::CreateSpatialIndex { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::CreateHistoryTable { table, .. }
            | Self::DropTable { table } => table,
        }
    }

    /// Render as a single SQL statement against `schema`
    pub fn to_sql(&self, schema: &str) -> String {
        match self {
            Self::CreateTable { table, columns } => {
                let mut defs = vec![
                    "\"id\" BIGSERIAL PRIMARY KEY".to_string(),
                    "\"created_at\" TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
                    "\"updated_at\" TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
                    "\"deleted_at\" TIMESTAMPTZ".to_string(),
                    "\"created_by\" TEXT".to_string(),
                    "\"updated_by\" TEXT".to_string(),
                ];
                defs.extend(columns.iter().map(ColumnSpec::sql));
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    qualified(schema, table),
                    defs.join(", ")
                )
            }
            Self::AddColumn { table, column } => format!(
                "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {}",
                qualified(schema, table),
                column.sql()
            ),
            Self::AddGeometryColumn {
                table,
                column,
                srid,
                kind,
                dimension,
            } => format!(
                "SELECT AddGeometryColumn('{schema}', '{table}', '{column}', {srid}, '{}', {dimension})",
                kind.as_str()
            ),
            Self::SetNotNull { table, column } => format!(
                "ALTER TABLE {} ALTER COLUMN {} SET NOT NULL",
                qualified(schema, table),
                quote(column)
            ),
            Self::AddForeignKey {
                table,
                column,
                constraint,
                ref_table,
                ref_column,
                on_delete,
            } => format!(
                "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
                qualified(schema, table),
                quote(constraint),
                quote(column),
                qualified(schema, ref_table),
                quote(ref_column),
                on_delete.sql()
            ),
            Self::CreateSpatialIndex { index, table, column } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} USING GIST ({})",
                quote(index),
                qualified(schema, table),
                quote(column)
            ),
            Self::CreateIndex { index, table, column } => format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                quote(index),
                qualified(schema, table),
                quote(column)
            ),
            Self::CreateHistoryTable { table, columns } => {
                let mut defs = vec![
                    "\"history_id\" BIGSERIAL PRIMARY KEY".to_string(),
                    "\"record_id\" BIGINT NOT NULL".to_string(),
                    "\"operation\" TEXT NOT NULL CHECK (\"operation\" IN ('INSERT', 'UPDATE', 'DELETE'))".to_string(),
                    "\"actor\" TEXT".to_string(),
                    "\"changed_at\" TIMESTAMPTZ NOT NULL DEFAULT now()".to_string(),
                    "\"created_at\" TIMESTAMPTZ".to_string(),
                    "\"updated_at\" TIMESTAMPTZ".to_string(),
                    "\"deleted_at\" TIMESTAMPTZ".to_string(),
                    "\"created_by\" TEXT".to_string(),
                    "\"updated_by\" TEXT".to_string(),
                ];
                defs.extend(columns.iter().map(ColumnSpec::sql));
                format!(
                    "CREATE TABLE IF NOT EXISTS {} ({})",
                    qualified(schema, table),
                    defs.join(", ")
                )
            }
            Self::DropTable { table } => format!("DROP TABLE IF EXISTS {}", qualified(schema, table)),
        }
    }
}

/// Translates logical table definitions into DDL plans
#[derive(Debug, Clone)]
pub struct SchemaTranslator {
    schema: String,
}

impl SchemaTranslator {
    /// Create a translator rendering against `schema` (validated like any identifier)
    pub fn new(schema: impl Into<String>) -> Result<Self, SchemaError> {
        let schema = schema.into();
        validate_identifier(&schema)?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Validate a definition and resolve every field's shape
    pub fn validate<'a>(&self, def: &'a TableDefinition) -> Result<Vec<(&'a FieldDefinition, FieldShape)>, SchemaError> {
        validate_identifier(&def.name)?;
        if RESERVED_TABLE_NAMES.contains(&def.name.as_str()) {
            return Err(SchemaError::ReservedTable(def.name.clone()));
        }
        // `x_history` would map onto the shadow of table `x`
        if def.name.ends_with(HISTORY_SUFFIX) {
            return Err(SchemaError::HistorySuffix(def.name.clone()));
        }
        validate_identifier(&def.history_name())?;
        validate_identifier(&format!("idx_{}_record", def.history_name()))?;

        let mut seen = HashSet::new();
        let mut shaped = Vec::with_capacity(def.fields.len());

        for field in def.ordered_fields() {
            validate_identifier(&field.name)?;
            if SYSTEM_COLUMNS.contains(&field.name.as_str()) {
                return Err(SchemaError::ReservedField(field.name.clone()));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }

            let shape = field.shape()?;
            match &shape {
                FieldShape::Geometry { .. } => {
                    validate_identifier(&spatial_index_name(def, field))?;
                }
                FieldShape::Relation { table, field: ref_field, .. } => {
                    validate_identifier(table)?;
                    if table.ends_with(HISTORY_SUFFIX) {
                        return Err(SchemaError::InvalidField {
                            field: field.name.clone(),
                            reason: format!("relation cannot target audit table '{table}'"),
                        });
                    }
                    validate_identifier(ref_field)?;
                    validate_identifier(&format!("custom_{table}"))?;
                    validate_identifier(&foreign_key_name(def, field))?;
                }
                FieldShape::Scalar(_) => {}
            }
            if field.is_timeseries {
                validate_identifier(&timeseries_index_name(def, field))?;
            }

            shaped.push((field, shape));
        }

        Ok(shaped)
    }

    /// Full plan that materialises `def` from nothing
    pub fn translate(&self, def: &TableDefinition) -> Result<Vec<DdlOperation>, SchemaError> {
        let shaped = self.validate(def)?;
        let table = def.physical_name();
        let history = def.history_name();

        let mut plan = Vec::new();

        // 1. base table with every non-geometry column
        let columns = shaped
            .iter()
            .filter(|(_, shape)| !shape.is_geometry())
            .map(|(field, shape)| ColumnSpec {
                name: field.name.clone(),
                column_type: field.column_type(shape),
                not_null: field.is_required,
                unique: field.is_unique,
            })
            .collect();
        plan.push(DdlOperation::CreateTable {
            table: table.clone(),
            columns,
        });

        // 2. geometry columns must exist before any NOT NULL on them
        for (field, shape) in &shaped {
            if let FieldShape::Geometry { kind, srid } = shape {
                plan.push(DdlOperation::AddGeometryColumn {
                    table: table.clone(),
                    column: field.name.clone(),
                    srid: *srid,
                    kind: *kind,
                    dimension: GEOMETRY_DIMENSION,
                });
                if field.is_required {
                    plan.push(DdlOperation::SetNotNull {
                        table: table.clone(),
                        column: field.name.clone(),
                    });
                }
            }
        }

        // 3. relations
        for (field, shape) in &shaped {
            if let FieldShape::Relation {
                table: ref_table,
                field: ref_column,
                on_delete,
                ..
            } = shape
            {
                plan.push(DdlOperation::AddForeignKey {
                    table: table.clone(),
                    column: field.name.clone(),
                    constraint: foreign_key_name(def, field),
                    ref_table: format!("custom_{ref_table}"),
                    ref_column: ref_column.clone(),
                    on_delete: *on_delete,
                });
            }
        }

        // 4. indexes
        for (field, shape) in &shaped {
            if shape.is_geometry() {
                plan.push(DdlOperation::CreateSpatialIndex {
                    index: spatial_index_name(def, field),
                    table: table.clone(),
                    column: field.name.clone(),
                });
            }
        }
        for (field, _) in shaped.iter().filter(|(field, _)| field.is_timeseries) {
            plan.push(DdlOperation::CreateIndex {
                index: timeseries_index_name(def, field),
                table: table.clone(),
                column: field.name.clone(),
            });
        }

        // 5. history shadow mirrors every field, geometry as GeoJSON
        let history_columns = shaped
            .iter()
            .map(|(field, shape)| history_column(field, shape))
            .collect();
        plan.push(DdlOperation::CreateHistoryTable {
            table: history.clone(),
            columns: history_columns,
        });
        plan.push(DdlOperation::CreateIndex {
            index: format!("idx_{history}_record"),
            table: history,
            column: "record_id".to_string(),
        });

        Ok(plan)
    }

    /// Drop the history shadow and the base table
    pub fn drop_plan(&self, def: &TableDefinition) -> Result<Vec<DdlOperation>, SchemaError> {
        validate_identifier(&def.name)?;
        Ok(vec![
            DdlOperation::DropTable {
                table: def.history_name(),
            },
            DdlOperation::DropTable {
                table: def.physical_name(),
            },
        ])
    }

    /// Trim a plan down to what is missing from the existing physical structures
    ///
    /// Existing tables turn into `ADD COLUMN` steps for their missing columns,
    /// existing columns/indexes/constraints are skipped, and a column that
    /// exists with a different type fails with [`SchemaError::Drift`].
    pub fn reconcile(&self, plan: Vec<DdlOperation>, snapshot: &PhysicalSnapshot) -> Result<Vec<DdlOperation>, SchemaError> {
        let mut reconciled = Vec::with_capacity(plan.len());

        for op in plan {
            match op {
                DdlOperation::CreateTable { ref table, ref columns }
                | DdlOperation::CreateHistoryTable { ref table, ref columns } => {
                    if !snapshot.table_exists(table) {
                        reconciled.push(op);
                        continue;
                    }
                    for column in columns {
                        match snapshot.column(table, &column.name) {
                            Some(existing) => check_drift(table, &column.name, column.column_type.udt_name(), &existing.udt_name)?,
                            None => reconciled.push(DdlOperation::AddColumn {
                                table: table.clone(),
                                column: column.clone(),
                            }),
                        }
                    }
                }
                DdlOperation::AddColumn { ref table, ref column } => match snapshot.column(table, &column.name) {
                    Some(existing) => check_drift(table, &column.name, column.column_type.udt_name(), &existing.udt_name)?,
                    None => reconciled.push(op),
                },
                DdlOperation::AddGeometryColumn { ref table, ref column, .. } => match snapshot.column(table, column) {
                    Some(existing) => check_drift(table, column, "geometry", &existing.udt_name)?,
                    None => reconciled.push(op),
                },
                DdlOperation::SetNotNull { ref table, ref column } => {
                    let already = snapshot.column(table, column).map(|c| c.not_null).unwrap_or(false);
                    if !already {
                        reconciled.push(op);
                    }
                }
                DdlOperation::AddForeignKey { ref constraint, .. } => {
                    if !snapshot.has_constraint(constraint) {
                        reconciled.push(op);
                    }
                }
                DdlOperation::CreateSpatialIndex { ref index, .. } | DdlOperation::CreateIndex { ref index, .. } => {
                    if !snapshot.has_index(index) {
                        reconciled.push(op);
                    }
                }
                DdlOperation::DropTable { ref table } => {
                    if snapshot.table_exists(table) {
                        reconciled.push(op);
                    }
                }
            }
        }

        Ok(reconciled)
    }

    /// Render a plan for preview or logging
    pub fn render(&self, plan: &[DdlOperation]) -> Vec<String> {
        plan.iter().map(|op| op.to_sql(&self.schema)).collect()
    }
}

fn check_drift(table: &str, column: &str, expected: &str, found: &str) -> Result<(), SchemaError> {
    if expected == found {
        return Ok(());
    }
    Err(SchemaError::Drift {
        table: table.to_string(),
        column: column.to_string(),
        expected: expected.to_string(),
        found: found.to_string(),
    })
}

fn history_column(field: &FieldDefinition, shape: &FieldShape) -> ColumnSpec {
    let column_type = if shape.is_geometry() {
        ColumnType::Jsonb
    } else {
        field.column_type(shape)
    };
    ColumnSpec {
        name: field.name.clone(),
        column_type,
        not_null: false,
        unique: false,
    }
}

/// Deterministic spatial index name: `idx_<table>_<field>_gist`
pub fn spatial_index_name(def: &TableDefinition, field: &FieldDefinition) -> String {
    format!("idx_{}_{}_gist", def.physical_name(), field.name)
}

fn timeseries_index_name(def: &TableDefinition, field: &FieldDefinition) -> String {
    format!("idx_{}_{}_ts", def.physical_name(), field.name)
}

fn foreign_key_name(def: &TableDefinition, field: &FieldDefinition) -> String {
    format!("fk_{}_{}", def.physical_name(), field.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ColumnState;

    fn translator() -> SchemaTranslator {
        SchemaTranslator::new("public").unwrap()
    }

    fn site_table() -> TableDefinition {
        TableDefinition {
            name: "sites".to_string(),
            fields: vec![
                FieldDefinition {
                    is_required: true,
                    is_unique: true,
                    max_length: Some(120),
                    ..FieldDefinition::new("code", "VARCHAR")
                },
                FieldDefinition {
                    is_required: true,
                    ..FieldDefinition::new("location", "GEOMETRY_POINT")
                },
                FieldDefinition::new("footprint", "POLYGON"),
                FieldDefinition {
                    is_timeseries: true,
                    ..FieldDefinition::new("observed_at", "TIMESTAMP")
                },
            ],
            ..TableDefinition::default()
        }
    }

    fn position(plan: &[DdlOperation], pred: impl Fn(&DdlOperation) -> bool) -> usize {
        plan.iter().position(pred).expect("operation present")
    }

    #[test]
    fn geometry_registration_precedes_not_null_and_index() {
        let plan = translator().translate(&site_table()).unwrap();

        for column in ["location", "footprint"] {
            let add = position(&plan, |op| {
                matches!(op, DdlOperation::AddGeometryColumn { column: c, .. } if c == column)
            });
            let index = position(&plan, |op| {
                matches!(op, DdlOperation::CreateSpatialIndex { column: c, .. } if c == column)
            });
            assert!(add < index, "{column} registered before its index");
        }

        let add = position(&plan, |op| {
            matches!(op, DdlOperation::AddGeometryColumn { column, .. } if column == "location")
        });
        let not_null = position(&plan, |op| {
            matches!(op, DdlOperation::SetNotNull { column, .. } if column == "location")
        });
        assert!(add < not_null);

        // optional geometry gets no NOT NULL step
        assert!(!plan
            .iter()
            .any(|op| matches!(op, DdlOperation::SetNotNull { column, .. } if column == "footprint")));
    }

    #[test]
    fn base_table_excludes_geometry_and_maps_constraints() {
        let plan = translator().translate(&site_table()).unwrap();
        let sql = plan[0].to_sql("public");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"custom_sites\""));
        assert!(sql.contains("\"code\" VARCHAR(120) NOT NULL UNIQUE"));
        assert!(sql.contains("\"observed_at\" TIMESTAMPTZ"));
        assert!(!sql.contains("location"));

        let rendered = translator().render(&plan);
        assert!(rendered.contains(
            &"SELECT AddGeometryColumn('public', 'custom_sites', 'location', 4326, 'POINT', 2)".to_string()
        ));
        assert!(rendered.contains(
            &"CREATE INDEX IF NOT EXISTS \"idx_custom_sites_location_gist\" ON \"public\".\"custom_sites\" USING GIST (\"location\")"
                .to_string()
        ));
        assert!(rendered
            .iter()
            .any(|s| s.contains("\"idx_custom_sites_observed_at_ts\"")));
    }

    #[test]
    fn history_table_mirrors_fields_with_geometry_as_json() {
        let plan = translator().translate(&site_table()).unwrap();
        let history = plan
            .iter()
            .find_map(|op| match op {
                DdlOperation::CreateHistoryTable { table, columns } => Some((table, columns)),
                _ => None,
            })
            .unwrap();
        assert_eq!(history.0, "custom_sites_history");
        let names: Vec<&str> = history.1.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["code", "location", "footprint", "observed_at"]);
        assert!(history.1.iter().all(|c| !c.not_null && !c.unique));
        assert_eq!(history.1[1].column_type, ColumnType::Jsonb);
        assert!(matches!(plan.last(), Some(DdlOperation::CreateIndex { column, .. }) if column == "record_id"));
    }

    #[test]
    fn rejects_identifiers_outside_allow_list() {
        for bad in ["Sites", "sites; drop table x", "1sites", "", "sites-2", "sïtes"] {
            let def = TableDefinition {
                name: bad.to_string(),
                ..TableDefinition::default()
            };
            assert!(
                matches!(translator().translate(&def), Err(SchemaError::InvalidIdentifier(_))),
                "{bad:?} should be rejected"
            );
        }

        let def = TableDefinition {
            name: "sites".to_string(),
            fields: vec![FieldDefinition::new("bad name", "TEXT")],
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&def), Err(SchemaError::InvalidIdentifier(_))));
    }

    #[test]
    fn rejects_reserved_duplicate_and_overlong_names() {
        let reserved = TableDefinition {
            name: "sites".to_string(),
            fields: vec![FieldDefinition::new("created_at", "TIMESTAMP")],
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&reserved), Err(SchemaError::ReservedField(_))));

        let duplicate = TableDefinition {
            name: "sites".to_string(),
            fields: vec![FieldDefinition::new("code", "TEXT"), FieldDefinition::new("code", "INTEGER")],
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&duplicate), Err(SchemaError::DuplicateField(_))));

        let long_field = "a".repeat(50);
        let overlong = TableDefinition {
            name: "sites".to_string(),
            fields: vec![FieldDefinition::new(long_field, "POINT")],
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&overlong), Err(SchemaError::IdentifierTooLong(_))));

        let shadowing = TableDefinition {
            name: "sites_history".to_string(),
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&shadowing), Err(SchemaError::HistorySuffix(_))));

        let audit_target = TableDefinition {
            name: "visits".to_string(),
            fields: vec![FieldDefinition {
                relation_table: Some("sites_history".to_string()),
                relation_field: Some("id".to_string()),
                on_delete: Some(OnDelete::Restrict),
                ..FieldDefinition::new("site_id", "BIGINT")
            }],
            ..TableDefinition::default()
        };
        assert!(matches!(translator().translate(&audit_target), Err(SchemaError::InvalidField { .. })));
    }

    #[test]
    fn relation_fields_become_foreign_keys_after_base_table() {
        let def = TableDefinition {
            name: "rooms".to_string(),
            fields: vec![FieldDefinition {
                relation_table: Some("floors".to_string()),
                relation_field: Some("id".to_string()),
                on_delete: Some(OnDelete::Cascade),
                ..FieldDefinition::new("floor_id", "BIGINT")
            }],
            ..TableDefinition::default()
        };
        let plan = translator().translate(&def).unwrap();
        let fk = position(&plan, |op| matches!(op, DdlOperation::AddForeignKey { .. }));
        assert!(fk > 0);
        assert_eq!(
            plan[fk].to_sql("public"),
            "ALTER TABLE \"public\".\"custom_rooms\" ADD CONSTRAINT \"fk_custom_rooms_floor_id\" FOREIGN KEY (\"floor_id\") REFERENCES \"public\".\"custom_floors\" (\"id\") ON DELETE CASCADE"
        );
    }

    fn materialized_snapshot(def: &TableDefinition) -> PhysicalSnapshot {
        let mut snapshot = PhysicalSnapshot::default();
        for op in translator().translate(def).unwrap() {
            snapshot.record(&op);
        }
        snapshot
    }

    #[test]
    fn reconcile_against_materialized_table_is_empty() {
        let def = site_table();
        let snapshot = materialized_snapshot(&def);
        let plan = translator().translate(&def).unwrap();
        assert!(translator().reconcile(plan, &snapshot).unwrap().is_empty());
    }

    #[test]
    fn reconcile_adds_only_missing_columns() {
        let def = site_table();
        let snapshot = materialized_snapshot(&def);

        let mut extended = def.clone();
        extended.fields.push(FieldDefinition::new("notes", "TEXT"));
        extended.fields.push(FieldDefinition::new("entrance", "POINT"));

        let plan = translator()
            .reconcile(translator().translate(&extended).unwrap(), &snapshot)
            .unwrap();
        let summary: Vec<(String, &str)> = plan
            .iter()
            .map(|op| {
                let kind = match op {
                    DdlOperation::AddColumn { column, .. } => format!("add:{}", column.name),
                    DdlOperation::AddGeometryColumn { column, .. } => format!("geom:{column}"),
                    DdlOperation::CreateSpatialIndex { column, .. } => format!("gist:{column}"),
                    other => format!("other:{other:?}"),
                };
                (kind, op.table())
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                ("add:notes".to_string(), "custom_sites"),
                ("geom:entrance".to_string(), "custom_sites"),
                ("gist:entrance".to_string(), "custom_sites"),
                ("add:notes".to_string(), "custom_sites_history"),
                ("add:entrance".to_string(), "custom_sites_history"),
            ]
        );
    }

    #[test]
    fn reconcile_reports_type_drift() {
        let def = site_table();
        let mut snapshot = materialized_snapshot(&def);
        snapshot
            .tables
            .get_mut("custom_sites")
            .unwrap()
            .insert("observed_at".to_string(), ColumnState {
                udt_name: "text".to_string(),
                not_null: false,
            });

        let err = translator()
            .reconcile(translator().translate(&def).unwrap(), &snapshot)
            .unwrap_err();
        assert!(matches!(err, SchemaError::Drift { ref column, .. } if column == "observed_at"));
    }
}
