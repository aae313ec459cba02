use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A table as reported by a dialect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub table_name: String,
    #[serde(default)]
    pub table_comment: String,
}

/// Raw column structure from introspection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMetadata {
    pub name: String,
    pub native_type: String,
    pub nullable: bool,
    #[serde(rename = "default")]
    pub default_value: Option<String>,
    pub is_primary: bool,
    pub is_unique: bool,
    pub is_index: bool,
    pub is_foreign: bool,
    pub is_auto_increment: bool,
    #[serde(default)]
    pub comment: String,
}

impl ColumnMetadata {
    /// Bare column of the given type; every flag off.
    pub fn new(name: impl Into<String>, native_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            native_type: native_type.into(),
            nullable: true,
            default_value: None,
            is_primary: false,
            is_unique: false,
            is_index: false,
            is_foreign: false,
            is_auto_increment: false,
            comment: String::new(),
        }
    }
}

/// Which template groups a generator emits.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorOptions {
    #[serde(default)]
    pub generate_api: bool,
    #[serde(default)]
    pub generate_crud: bool,
    #[serde(default)]
    pub generate_routes: bool,
    #[serde(default)]
    pub generate_test: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeGeneratorConfig {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub table_name: String,
    pub module_name: String,
    pub business_name: String,
    /// Connection to introspect; falls back to the configured default.
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub options: GeneratorOptions,
    #[serde(default)]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum QueryType {
    EQ,
    NE,
    GT,
    GTE,
    LT,
    LTE,
    LIKE,
    BETWEEN,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HtmlType {
    Input,
    Textarea,
    Select,
    Checkbox,
    Radio,
    Datetime,
    Upload,
    Image,
}

/// Curated, persisted per-column generation metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CodeGeneratorColumn {
    #[serde(default)]
    pub id: Option<String>,
    /// `None` while the column is an unattached import draft.
    #[serde(default)]
    pub generator_id: Option<String>,
    pub column_name: String,
    #[serde(default)]
    pub column_comment: String,
    pub column_type: String,
    pub mapped_type: String,
    pub is_pk: bool,
    pub is_increment: bool,
    pub is_required: bool,
    pub is_insert: bool,
    pub is_edit: bool,
    pub is_list: bool,
    pub is_query: bool,
    pub query_type: QueryType,
    pub html_type: HtmlType,
    #[serde(default)]
    pub dict_type: Option<String>,
    pub sort: i32,
}

impl CodeGeneratorColumn {
    /// Label used in generated comments and UI titles.
    pub fn label(&self) -> &str {
        if self.column_comment.trim().is_empty() {
            &self.column_name
        } else {
            self.column_comment.trim()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub content: String,
}

/// Zip payload plus transport hints.
#[derive(Debug, Clone)]
pub struct GeneratedArchive {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: String,
}
