/// Logical table definitions
///
/// A `TableDefinition` is the user-supplied description of a custom table; it
/// is stored in the logical-table registry and translated into physical DDL.
/// Field attributes arrive loosely typed from the editor and are resolved into
/// a closed [`FieldShape`] before anything touches the database.

use crate::errors::SchemaError;
use crate::table::data_types::{
    self, ColumnType, DataType, GeometryKind, ScalarType, TypeConstraints, TypeResolution, DEFAULT_SRID,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix of every physical table backing a logical table
pub const TABLE_PREFIX: &str = "custom_";

/// Suffix of the audit shadow table
pub const HISTORY_SUFFIX: &str = "_history";

/// Columns every physical table carries; field names may not reuse them
pub const SYSTEM_COLUMNS: [&str; 6] = ["id", "created_at", "updated_at", "deleted_at", "created_by", "updated_by"];

/// Logical names whose physical table would collide with the registry's own tables
pub const RESERVED_TABLE_NAMES: [&str; 2] = ["tables", "table_fields"];

/// A record is an opaque column -> value mapping
pub type Record = Map<String, Value>;

/// Primary key of a stored record, if present
pub fn record_id(record: &Record) -> Option<i64> {
    record.get("id").and_then(Value::as_i64)
}

/// User-defined table schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Physical-safe identifier; immutable once created
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDefinition>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Default for TableDefinition {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: String::new(),
            display_name: String::new(),
            description: None,
            icon: None,
            fields: Vec::new(),
            created_by: None,
            created_at: Utc::now(),
        }
    }
}

impl TableDefinition {
    /// Name of the physical table, e.g. `custom_assets`
    pub fn physical_name(&self) -> String {
        format!("{TABLE_PREFIX}{}", self.name)
    }

    /// Name of the audit shadow table, e.g. `custom_assets_history`
    pub fn history_name(&self) -> String {
        format!("{TABLE_PREFIX}{}{HISTORY_SUFFIX}", self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields sorted by `order`, ties keep declaration order
    pub fn ordered_fields(&self) -> Vec<&FieldDefinition> {
        let mut fields: Vec<&FieldDefinition> = self.fields.iter().collect();
        fields.sort_by_key(|f| f.order);
        fields
    }
}

/// Referential action for relation fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnDelete {
    Cascade,
    #[serde(alias = "SET NULL")]
    SetNull,
    Restrict,
    #[serde(alias = "NO ACTION")]
    NoAction,
}

impl OnDelete {
    pub fn sql(&self) -> &'static str {
        match self {
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::Restrict => "RESTRICT",
            Self::NoAction => "NO ACTION",
        }
    }
}

/// One column of a logical table, as declared by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    /// Unique within the table; immutable once created
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    pub data_type: String,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub is_unique: bool,
    #[serde(default)]
    pub is_timeseries: bool,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub precision: Option<u32>,
    #[serde(default)]
    pub scale: Option<u32>,
    #[serde(default)]
    pub srid: Option<i32>,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub relation_table: Option<String>,
    #[serde(default)]
    pub relation_field: Option<String>,
    #[serde(default)]
    pub on_delete: Option<OnDelete>,
    #[serde(default)]
    pub order: i32,
}

/// Resolved, validated shape of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldShape {
    Scalar(ScalarType),
    Geometry {
        kind: GeometryKind,
        srid: i32,
    },
    Relation {
        data_type: ScalarType,
        table: String,
        field: String,
        on_delete: OnDelete,
    },
}

impl FieldShape {
    pub fn is_geometry(&self) -> bool {
        matches!(self, Self::Geometry { .. })
    }

    /// Scalar type carried by the column, if not geometry
    pub fn scalar(&self) -> Option<ScalarType> {
        match self {
            Self::Scalar(scalar) => Some(*scalar),
            Self::Relation { data_type, .. } => Some(*data_type),
            Self::Geometry { .. } => None,
        }
    }
}

impl FieldDefinition {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            data_type: data_type.into(),
            ..Self::default()
        }
    }

    pub fn constraints(&self) -> TypeConstraints {
        TypeConstraints {
            max_length: self.max_length,
            precision: self.precision,
            scale: self.scale,
        }
    }

    fn invalid(&self, reason: impl Into<String>) -> SchemaError {
        SchemaError::InvalidField {
            field: self.name.clone(),
            reason: reason.into(),
        }
    }

    /// Resolve the declared type and check attribute invariants
    ///
    /// Geometry attributes (`srid`, `geometryType`) are allowed only on geometry
    /// fields; `onDelete` only together with a relation.
    pub fn shape(&self) -> Result<FieldShape, SchemaError> {
        let data_type = match data_types::resolve(&self.data_type) {
            TypeResolution::Known(data_type) => data_type,
            TypeResolution::Suspicious(declared) => {
                return Err(SchemaError::DataType {
                    field: self.name.clone(),
                    source: crate::errors::DataTypeError::Suspicious(declared),
                })
            }
            TypeResolution::Unknown(declared) => {
                return Err(SchemaError::DataType {
                    field: self.name.clone(),
                    source: crate::errors::DataTypeError::Unsupported(declared),
                })
            }
        };

        let has_relation = self.relation_table.is_some() || self.relation_field.is_some();

        match data_type {
            DataType::Geometry(declared_kind) => {
                if has_relation || self.on_delete.is_some() {
                    return Err(self.invalid("geometry fields cannot declare a relation"));
                }
                if self.max_length.is_some() || self.precision.is_some() || self.scale.is_some() {
                    return Err(self.invalid("geometry fields do not take length/precision/scale"));
                }
                if self.is_unique {
                    return Err(self.invalid("unique constraints are not supported on geometry fields"));
                }
                if self.is_timeseries {
                    return Err(self.invalid("geometry fields cannot be timeseries fields"));
                }

                let attribute_kind = match self.geometry_type.as_deref() {
                    Some(declared) => Some(GeometryKind::parse(declared).ok_or_else(|| {
                        SchemaError::InvalidGeometryType {
                            field: self.name.clone(),
                            declared: declared.to_string(),
                        }
                    })?),
                    None => None,
                };

                let kind = match (declared_kind, attribute_kind) {
                    (Some(kind), Some(attr)) if kind != attr => {
                        return Err(self.invalid(format!(
                            "geometryType {} conflicts with data type {}",
                            attr.as_str(),
                            kind.as_str()
                        )))
                    }
                    (Some(kind), _) => kind,
                    (None, Some(attr)) => attr,
                    (None, None) => {
                        return Err(SchemaError::InvalidGeometryType {
                            field: self.name.clone(),
                            declared: self.data_type.clone(),
                        })
                    }
                };

                let srid = self.srid.unwrap_or(DEFAULT_SRID);
                if srid <= 0 {
                    return Err(self.invalid(format!("invalid SRID {srid}")));
                }

                Ok(FieldShape::Geometry { kind, srid })
            }
            DataType::Scalar(scalar) => {
                if self.srid.is_some() || self.geometry_type.is_some() {
                    return Err(self.invalid("srid/geometryType are only valid on geometry fields"));
                }
                self.check_constraints(scalar)?;

                match (&self.relation_table, &self.relation_field) {
                    (Some(table), Some(field)) => {
                        let on_delete = self
                            .on_delete
                            .ok_or_else(|| self.invalid("relation fields must declare onDelete"))?;
                        if !matches!(scalar, ScalarType::Integer | ScalarType::BigInt | ScalarType::Uuid | ScalarType::Text | ScalarType::Varchar) {
                            return Err(self.invalid("relation fields must be INTEGER, BIGINT, UUID or text typed"));
                        }
                        Ok(FieldShape::Relation {
                            data_type: scalar,
                            table: table.clone(),
                            field: field.clone(),
                            on_delete,
                        })
                    }
                    (None, None) => {
                        if self.on_delete.is_some() {
                            return Err(self.invalid("onDelete requires relationTable and relationField"));
                        }
                        Ok(FieldShape::Scalar(scalar))
                    }
                    _ => Err(self.invalid("relationTable and relationField must be declared together")),
                }
            }
        }
    }

    fn check_constraints(&self, scalar: ScalarType) -> Result<(), SchemaError> {
        if self.max_length.is_some() && !scalar.is_textual() {
            return Err(self.invalid("maxLength only applies to text fields"));
        }
        if let Some(max_length) = self.max_length {
            if max_length == 0 || max_length > 10_485_760 {
                return Err(self.invalid(format!("maxLength {max_length} is out of range")));
            }
        }

        if (self.precision.is_some() || self.scale.is_some()) && scalar != ScalarType::Decimal {
            return Err(self.invalid("precision/scale only apply to DECIMAL fields"));
        }
        if scalar == ScalarType::Decimal {
            let constraints = self.constraints();
            let precision = constraints.precision.unwrap_or(data_types::DEFAULT_PRECISION);
            let scale = constraints.scale.unwrap_or(data_types::DEFAULT_SCALE);
            if precision == 0 || precision > 1000 {
                return Err(self.invalid(format!("precision {precision} is out of range")));
            }
            if scale > precision {
                return Err(self.invalid(format!("scale {scale} exceeds precision {precision}")));
            }
        }

        Ok(())
    }

    /// Physical column type for this field's shape
    pub fn column_type(&self, shape: &FieldShape) -> ColumnType {
        match shape {
            FieldShape::Geometry { kind, srid } => ColumnType::Geometry { kind: *kind, srid: *srid },
            FieldShape::Scalar(scalar) | FieldShape::Relation { data_type: scalar, .. } => {
                data_types::scalar_column_type(*scalar, &self.constraints())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_kind_can_come_from_attribute() {
        let field = FieldDefinition {
            geometry_type: Some("polygon".to_string()),
            srid: Some(3857),
            ..FieldDefinition::new("outline", "GEOMETRY")
        };
        assert_eq!(
            field.shape().unwrap(),
            FieldShape::Geometry {
                kind: GeometryKind::Polygon,
                srid: 3857
            }
        );
    }

    #[test]
    fn generic_geometry_without_kind_is_invalid_geometry_type() {
        let field = FieldDefinition::new("outline", "GEOMETRY");
        assert!(matches!(field.shape(), Err(SchemaError::InvalidGeometryType { .. })));

        let field = FieldDefinition {
            geometry_type: Some("CIRCLE".to_string()),
            ..FieldDefinition::new("outline", "GEOMETRY")
        };
        assert!(matches!(field.shape(), Err(SchemaError::InvalidGeometryType { .. })));
    }

    #[test]
    fn geometry_attributes_only_on_geometry_fields() {
        let field = FieldDefinition {
            srid: Some(4326),
            ..FieldDefinition::new("label", "TEXT")
        };
        assert!(matches!(field.shape(), Err(SchemaError::InvalidField { .. })));
    }

    #[test]
    fn on_delete_requires_relation_and_vice_versa() {
        let dangling = FieldDefinition {
            on_delete: Some(OnDelete::Cascade),
            ..FieldDefinition::new("owner", "INTEGER")
        };
        assert!(dangling.shape().is_err());

        let missing_policy = FieldDefinition {
            relation_table: Some("owners".to_string()),
            relation_field: Some("id".to_string()),
            ..FieldDefinition::new("owner", "BIGINT")
        };
        assert!(missing_policy.shape().is_err());

        let relation = FieldDefinition {
            on_delete: Some(OnDelete::SetNull),
            ..missing_policy
        };
        assert_eq!(
            relation.shape().unwrap(),
            FieldShape::Relation {
                data_type: ScalarType::BigInt,
                table: "owners".to_string(),
                field: "id".to_string(),
                on_delete: OnDelete::SetNull
            }
        );
    }

    #[test]
    fn deserializes_camel_case_definition() {
        let json = serde_json::json!({
            "name": "assets",
            "displayName": "Assets",
            "fields": [
                {"name": "price", "dataType": "DECIMAL", "precision": 12, "scale": 2, "isRequired": true, "order": 2},
                {"name": "label", "dataType": "TEXT", "order": 1},
                {"name": "owner", "dataType": "INTEGER", "relationTable": "owners", "relationField": "id", "onDelete": "SET NULL"}
            ]
        });
        let table: TableDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(table.physical_name(), "custom_assets");
        assert_eq!(table.history_name(), "custom_assets_history");
        let names: Vec<&str> = table.ordered_fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["owner", "label", "price"]);
        assert_eq!(table.field("owner").unwrap().on_delete, Some(OnDelete::SetNull));
    }
}
