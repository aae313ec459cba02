mod connection;
mod generator;
mod query;

pub use connection::{
    ConnectionStatus, ConnectionSummary, ConnectionTestResult, DatabaseConnection, DbType,
};
pub use generator::{
    CodeGeneratorColumn, CodeGeneratorConfig, ColumnMetadata, GeneratedArchive, GeneratedFile,
    GeneratorOptions, HtmlType, QueryType, TableInfo,
};
pub use query::{AffectedRows, FieldDescriptor, QueryResult, SqlOutcome, TablePage};
