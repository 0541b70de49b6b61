/// Data-type registry
///
/// Maps the logical field types users declare (TEXT, INTEGER, GEOMETRY_POINT, ...)
/// to physical Postgres/PostGIS column types. Type names arrive as free-form
/// strings from the table editor, so resolution has three outcomes: a known
/// type, a name that merely *looks* spatial (reported so diagnostic tooling can
/// surface it), or an unknown name.

use crate::errors::DataTypeError;
use crate::table::types::TableDefinition;
use serde::{Deserialize, Serialize};

/// SRID used when a geometry field does not declare one (WGS 84)
pub const DEFAULT_SRID: i32 = 4326;

/// Default VARCHAR length when `maxLength` is omitted
pub const DEFAULT_VARCHAR_LENGTH: u32 = 255;

/// Default NUMERIC precision/scale when omitted
pub const DEFAULT_PRECISION: u32 = 10;
pub const DEFAULT_SCALE: u32 = 2;

/// Substrings that make an unrecognised type name look spatial
const SPATIAL_MARKERS: [&str; 7] = ["GEO", "POINT", "POLYGON", "LINESTRING", "SPATIAL", "WKT", "WKB"];

/// Non-spatial logical types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScalarType {
    Text,
    Varchar,
    Integer,
    BigInt,
    Decimal,
    Float,
    Boolean,
    Date,
    Timestamp,
    Json,
    Uuid,
}

impl ScalarType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt | Self::Decimal | Self::Float)
    }

    pub fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Varchar)
    }
}

/// Supported spatial shapes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GeometryKind {
    Point,
    Polygon,
    LineString,
    MultiPoint,
    MultiPolygon,
}

impl GeometryKind {
    /// PostGIS type name, as passed to `AddGeometryColumn`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Point => "POINT",
            Self::Polygon => "POLYGON",
            Self::LineString => "LINESTRING",
            Self::MultiPoint => "MULTIPOINT",
            Self::MultiPolygon => "MULTIPOLYGON",
        }
    }

    /// GeoJSON `type` member for this kind
    pub fn geojson_type(&self) -> &'static str {
        match self {
            Self::Point => "Point",
            Self::Polygon => "Polygon",
            Self::LineString => "LineString",
            Self::MultiPoint => "MultiPoint",
            Self::MultiPolygon => "MultiPolygon",
        }
    }

    /// Parse a bare spatial-standard name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "POINT" => Some(Self::Point),
            "POLYGON" => Some(Self::Polygon),
            "LINESTRING" => Some(Self::LineString),
            "MULTIPOINT" => Some(Self::MultiPoint),
            "MULTIPOLYGON" => Some(Self::MultiPolygon),
            _ => None,
        }
    }
}

/// A recognised logical type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Scalar(ScalarType),
    /// Geometry column; `None` is the generic `GEOMETRY` name whose kind
    /// must come from the field's `geometryType` attribute.
    Geometry(Option<GeometryKind>),
}

/// Outcome of resolving a declared type name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeResolution {
    Known(DataType),
    Suspicious(String),
    Unknown(String),
}

/// Resolve a declared type name against the registry
pub fn resolve(name: &str) -> TypeResolution {
    let normalized = name.trim().to_ascii_uppercase();

    let scalar = match normalized.as_str() {
        "TEXT" | "STRING" => Some(ScalarType::Text),
        "VARCHAR" => Some(ScalarType::Varchar),
        "INTEGER" | "INT" => Some(ScalarType::Integer),
        "BIGINT" => Some(ScalarType::BigInt),
        "DECIMAL" | "NUMERIC" => Some(ScalarType::Decimal),
        "FLOAT" | "DOUBLE" => Some(ScalarType::Float),
        "BOOLEAN" | "BOOL" => Some(ScalarType::Boolean),
        "DATE" => Some(ScalarType::Date),
        "TIMESTAMP" | "DATETIME" => Some(ScalarType::Timestamp),
        "JSON" | "JSONB" => Some(ScalarType::Json),
        "UUID" => Some(ScalarType::Uuid),
        _ => None,
    };
    if let Some(scalar) = scalar {
        return TypeResolution::Known(DataType::Scalar(scalar));
    }

    if normalized == "GEOMETRY" {
        return TypeResolution::Known(DataType::Geometry(None));
    }

    // Canonical logical names first, then bare spatial-standard names
    let bare = normalized.strip_prefix("GEOMETRY_").unwrap_or(&normalized);
    if let Some(kind) = GeometryKind::parse(bare) {
        return TypeResolution::Known(DataType::Geometry(Some(kind)));
    }

    if SPATIAL_MARKERS.iter().any(|marker| normalized.contains(marker)) {
        TypeResolution::Suspicious(name.to_string())
    } else {
        TypeResolution::Unknown(name.to_string())
    }
}

/// Whether the name resolves to a geometry type
pub fn is_geometry_type(name: &str) -> bool {
    matches!(resolve(name), TypeResolution::Known(DataType::Geometry(_)))
}

/// Resolve the geometry kind encoded in a type name
pub fn geometry_kind(name: &str) -> Result<GeometryKind, DataTypeError> {
    match resolve(name) {
        TypeResolution::Known(DataType::Geometry(Some(kind))) => Ok(kind),
        TypeResolution::Suspicious(declared) => Err(DataTypeError::Suspicious(declared)),
        _ => Err(DataTypeError::Unsupported(name.to_string())),
    }
}

/// Type-specific constraints that shape the physical column
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeConstraints {
    pub max_length: Option<u32>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

/// Physical column type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    Text,
    Varchar { length: u32 },
    Integer,
    BigInt,
    Numeric { precision: u32, scale: u32 },
    DoublePrecision,
    Boolean,
    Date,
    TimestampTz,
    Jsonb,
    Uuid,
    Geometry { kind: GeometryKind, srid: i32 },
}

impl ColumnType {
    /// SQL spelling used in column definitions and casts
    pub fn sql(&self) -> String {
        match self {
            Self::Text => "TEXT".to_string(),
            Self::Varchar { length } => format!("VARCHAR({length})"),
            Self::Integer => "INTEGER".to_string(),
            Self::BigInt => "BIGINT".to_string(),
            Self::Numeric { precision, scale } => format!("NUMERIC({precision},{scale})"),
            Self::DoublePrecision => "DOUBLE PRECISION".to_string(),
            Self::Boolean => "BOOLEAN".to_string(),
            Self::Date => "DATE".to_string(),
            Self::TimestampTz => "TIMESTAMPTZ".to_string(),
            Self::Jsonb => "JSONB".to_string(),
            Self::Uuid => "UUID".to_string(),
            Self::Geometry { kind, srid } => format!("geometry({},{srid})", kind.as_str()),
        }
    }

    /// Catalog spelling (`information_schema.columns.udt_name`)
    pub fn udt_name(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Varchar { .. } => "varchar",
            Self::Integer => "int4",
            Self::BigInt => "int8",
            Self::Numeric { .. } => "numeric",
            Self::DoublePrecision => "float8",
            Self::Boolean => "bool",
            Self::Date => "date",
            Self::TimestampTz => "timestamptz",
            Self::Jsonb => "jsonb",
            Self::Uuid => "uuid",
            Self::Geometry { .. } => "geometry",
        }
    }

    pub fn is_geometry(&self) -> bool {
        matches!(self, Self::Geometry { .. })
    }
}

/// Physical column type for a scalar logical type
pub fn scalar_column_type(scalar: ScalarType, constraints: &TypeConstraints) -> ColumnType {
    match scalar {
        ScalarType::Text => ColumnType::Text,
        ScalarType::Varchar => ColumnType::Varchar {
            length: constraints.max_length.unwrap_or(DEFAULT_VARCHAR_LENGTH),
        },
        ScalarType::Integer => ColumnType::Integer,
        ScalarType::BigInt => ColumnType::BigInt,
        ScalarType::Decimal => ColumnType::Numeric {
            precision: constraints.precision.unwrap_or(DEFAULT_PRECISION),
            scale: constraints.scale.unwrap_or(DEFAULT_SCALE),
        },
        ScalarType::Float => ColumnType::DoublePrecision,
        ScalarType::Boolean => ColumnType::Boolean,
        ScalarType::Date => ColumnType::Date,
        ScalarType::Timestamp => ColumnType::TimestampTz,
        ScalarType::Json => ColumnType::Jsonb,
        ScalarType::Uuid => ColumnType::Uuid,
    }
}

/// Physical column type for a declared type name
///
/// Geometry names map to a column with the default SRID; the generic
/// `GEOMETRY` name has no kind and is unsupported here.
pub fn physical_type(name: &str, constraints: &TypeConstraints) -> Result<ColumnType, DataTypeError> {
    match resolve(name) {
        TypeResolution::Known(DataType::Scalar(scalar)) => Ok(scalar_column_type(scalar, constraints)),
        TypeResolution::Known(DataType::Geometry(Some(kind))) => Ok(ColumnType::Geometry {
            kind,
            srid: DEFAULT_SRID,
        }),
        TypeResolution::Known(DataType::Geometry(None)) => Err(DataTypeError::Unsupported(name.to_string())),
        TypeResolution::Suspicious(declared) => Err(DataTypeError::Suspicious(declared)),
        TypeResolution::Unknown(declared) => Err(DataTypeError::Unsupported(declared)),
    }
}

/// Why a declared type was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeIssue {
    Suspicious,
    Unsupported,
    MissingGeometryKind,
}

/// One field whose declared type is ambiguous or unusable
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDiagnostic {
    pub table: String,
    pub field: String,
    pub declared: String,
    pub issue: TypeIssue,
}

/// Enumerate fields whose declared type does not cleanly resolve
pub fn diagnose(tables: &[TableDefinition]) -> Vec<TypeDiagnostic> {
    let mut diagnostics = Vec::new();

    for table in tables {
        for field in &table.fields {
            let issue = match resolve(&field.data_type) {
                TypeResolution::Known(DataType::Geometry(None)) => {
                    let kind_resolves = field
                        .geometry_type
                        .as_deref()
                        .and_then(GeometryKind::parse)
                        .is_some();
                    if kind_resolves {
                        continue;
                    }
                    TypeIssue::MissingGeometryKind
                }
                TypeResolution::Known(_) => continue,
                TypeResolution::Suspicious(_) => TypeIssue::Suspicious,
                TypeResolution::Unknown(_) => TypeIssue::Unsupported,
            };

            diagnostics.push(TypeDiagnostic {
                table: table.name.clone(),
                field: field.name.clone(),
                declared: field.data_type.clone(),
                issue,
            });
        }
    }

    diagnostics
}
