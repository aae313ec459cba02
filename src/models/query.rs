use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub name: String,
    /// Dialect type name as reported by the driver, e.g. `INT4` or `VARCHAR`.
    pub type_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub fields: Vec<FieldDescriptor>,
    pub rows: Vec<Map<String, Value>>,
    pub row_count: usize,
    /// Milliseconds.
    pub execution_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AffectedRows {
    pub affected_rows: u64,
    pub execution_time: u64,
}

/// Result of an arbitrary statement: a row set or a DML count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SqlOutcome {
    Rows(QueryResult),
    Affected(AffectedRows),
}

impl SqlOutcome {
    pub fn execution_time(&self) -> u64 {
        match self {
            SqlOutcome::Rows(r) => r.execution_time,
            SqlOutcome::Affected(a) => a.execution_time,
        }
    }
}

/// One page of a table browse.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TablePage {
    #[serde(flatten)]
    pub result: QueryResult,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}
