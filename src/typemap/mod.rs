//! Native column type → generation defaults.
//!
//! Pure lookup with no I/O. A native type string is normalised to a
//! [`TypeFamily`] first; every family has one row of defaults. Unknown types
//! land in [`TypeFamily::Other`] so the mapping is total.

use strum::{Display, IntoStaticStr};

use crate::models::{CodeGeneratorColumn, ColumnMetadata, DbType, HtmlType, QueryType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TypeFamily {
    Text,
    Integer,
    Boolean,
    Decimal,
    DateTime,
    Json,
    Binary,
    Other,
}

/// Generation defaults for one native type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeMapping {
    pub family: TypeFamily,
    pub mapped_type: &'static str,
    pub html_type: HtmlType,
    /// `None` when the column is not searchable by default.
    pub query_type: Option<QueryType>,
}

/// Target-language types the renderer knows how to emit.
pub const MAPPED_TYPES: &[&str] = &["string", "number", "boolean", "Date"];

impl TypeFamily {
    pub fn mapping(self) -> TypeMapping {
        let (mapped_type, html_type, query_type) = match self {
            TypeFamily::Text => ("string", HtmlType::Input, Some(QueryType::LIKE)),
            TypeFamily::Integer => ("number", HtmlType::Input, Some(QueryType::EQ)),
            TypeFamily::Boolean => ("boolean", HtmlType::Radio, Some(QueryType::EQ)),
            TypeFamily::Decimal => ("number", HtmlType::Input, Some(QueryType::BETWEEN)),
            TypeFamily::DateTime => ("Date", HtmlType::Datetime, Some(QueryType::BETWEEN)),
            TypeFamily::Json => ("string", HtmlType::Textarea, None),
            TypeFamily::Binary => ("string", HtmlType::Upload, None),
            TypeFamily::Other => ("string", HtmlType::Input, Some(QueryType::EQ)),
        };
        TypeMapping {
            family: self,
            mapped_type,
            html_type,
            query_type,
        }
    }

    /// Whether a widget still makes sense for values of this family.
    pub fn accepts(self, html: HtmlType) -> bool {
        use HtmlType::*;
        match self {
            TypeFamily::Text | TypeFamily::Other => true,
            TypeFamily::Integer => matches!(html, Input | Select | Radio | Checkbox),
            TypeFamily::Boolean => matches!(html, Radio | Checkbox | Select),
            TypeFamily::Decimal => matches!(html, Input | Select),
            TypeFamily::DateTime => matches!(html, Datetime | Input),
            TypeFamily::Json => matches!(html, Textarea | Input),
            TypeFamily::Binary => matches!(html, Upload | Image),
        }
    }
}

/// Split `varchar(50)` / `int unsigned` / `character varying(20)` into the
/// lower-cased base word and the parenthesised arguments.
fn normalize(native_type: &str) -> (String, String) {
    let lowered = native_type.trim().to_lowercase();
    let (head, args) = match lowered.split_once('(') {
        Some((head, rest)) => (
            head.trim().to_string(),
            rest.split(')').next().unwrap_or("").trim().to_string(),
        ),
        None => (lowered.clone(), String::new()),
    };
    let base = head
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_string();
    (base, args)
}

pub fn type_family(dialect: DbType, native_type: &str) -> TypeFamily {
    let lowered = native_type.trim().to_lowercase();
    if lowered.ends_with("[]") || (dialect == DbType::Postgres && lowered.starts_with('_')) {
        return TypeFamily::Json;
    }

    let (base, args) = normalize(native_type);
    if base == "tinyint" && args == "1" {
        return TypeFamily::Boolean;
    }
    // rowversion alias, not a point in time
    if dialect == DbType::Mssql && base == "timestamp" {
        return TypeFamily::Binary;
    }

    match base.as_str() {
        "bool" | "boolean" | "bit" => TypeFamily::Boolean,
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "int2" | "int4"
        | "int8" | "serial" | "smallserial" | "bigserial" | "serial4" | "serial8" | "year" => {
            TypeFamily::Integer
        }
        "decimal" | "numeric" | "dec" | "float" | "float4" | "float8" | "double" | "real"
        | "money" | "smallmoney" => TypeFamily::Decimal,
        "date" | "datetime" | "datetime2" | "smalldatetime" | "timestamp" | "timestamptz"
        | "datetimeoffset" => TypeFamily::DateTime,
        "char" | "varchar" | "character" | "nchar" | "nvarchar" | "text" | "tinytext"
        | "mediumtext" | "longtext" | "ntext" | "citext" | "clob" | "uuid"
        | "uniqueidentifier" | "enum" | "set" | "time" | "timetz" | "interval" | "xml"
        | "inet" | "cidr" | "macaddr" | "bpchar" | "name" => TypeFamily::Text,
        "json" | "jsonb" => TypeFamily::Json,
        "blob" | "tinyblob" | "mediumblob" | "longblob" | "bytea" | "binary" | "varbinary"
        | "image" | "rowversion" => TypeFamily::Binary,
        _ if dialect == DbType::Sqlite => sqlite_affinity(&lowered),
        _ => TypeFamily::Other,
    }
}

/// SQLite's declared-type affinity rules, for types it accepts but the
/// table above does not name.
fn sqlite_affinity(declared: &str) -> TypeFamily {
    if declared.contains("int") {
        TypeFamily::Integer
    } else if declared.contains("char") || declared.contains("clob") || declared.contains("text")
    {
        TypeFamily::Text
    } else if declared.contains("blob") {
        TypeFamily::Binary
    } else if declared.contains("real") || declared.contains("floa") || declared.contains("doub")
    {
        TypeFamily::Decimal
    } else {
        TypeFamily::Other
    }
}

pub fn map_type(dialect: DbType, native_type: &str) -> TypeMapping {
    type_family(dialect, native_type).mapping()
}

/// Fully-defaulted, unattached column draft. `sort` is the 1-based ordinal.
pub fn draft_column(dialect: DbType, meta: &ColumnMetadata, sort: i32) -> CodeGeneratorColumn {
    let mapping = map_type(dialect, &meta.native_type);
    let is_pk = meta.is_primary;
    let is_increment = meta.is_auto_increment && is_pk;
    let searchable = mapping.query_type.is_some();

    let mut column = CodeGeneratorColumn {
        id: None,
        generator_id: None,
        column_name: meta.name.clone(),
        column_comment: meta.comment.clone(),
        column_type: meta.native_type.clone(),
        mapped_type: mapping.mapped_type.to_string(),
        is_pk,
        is_increment,
        is_required: false,
        is_insert: true,
        is_edit: true,
        is_list: searchable,
        is_query: searchable,
        query_type: mapping.query_type.unwrap_or(QueryType::EQ),
        html_type: mapping.html_type,
        dict_type: None,
        sort,
    };
    apply_structural_flags(&mut column, meta);
    if column.is_pk {
        column.is_query = false;
        column.is_insert = false;
        column.is_edit = false;
        column.is_list = true;
    }
    column
}

/// Flags read straight off the live structure. Sync re-applies these on
/// every run; inclusion flags stay with the operator.
pub fn apply_structural_flags(column: &mut CodeGeneratorColumn, meta: &ColumnMetadata) {
    column.is_pk = meta.is_primary;
    column.is_increment = meta.is_auto_increment && meta.is_primary;
    column.is_required = !meta.nullable && meta.default_value.is_none() && !column.is_increment;
}
