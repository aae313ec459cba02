pub mod codegen;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod introspect;
pub mod logging;
pub mod models;
pub mod sqlexec;
pub mod state;
pub mod storage;
pub mod sync;
pub mod typemap;

pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use state::AppState;
