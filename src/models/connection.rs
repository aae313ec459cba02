use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{CoreError, Result};

/// Supported database dialects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[strum(to_string = "mysql")]
    Mysql,
    #[strum(to_string = "postgres", serialize = "postgresql", serialize = "pg")]
    Postgres,
    #[strum(to_string = "mssql", serialize = "sqlserver")]
    Mssql,
    #[strum(to_string = "mariadb")]
    Mariadb,
    #[strum(to_string = "sqlite")]
    Sqlite,
}

impl DbType {
    /// Conventional server port; SQLite has none.
    pub fn default_port(self) -> Option<u16> {
        match self {
            DbType::Mysql | DbType::Mariadb => Some(3306),
            DbType::Postgres => Some(5432),
            DbType::Mssql => Some(1433),
            DbType::Sqlite => None,
        }
    }

    pub fn is_file_based(self) -> bool {
        matches!(self, DbType::Sqlite)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    #[default]
    #[strum(to_string = "enabled")]
    Enabled,
    #[strum(to_string = "disabled")]
    Disabled,
}

/// A stored connection descriptor.
///
/// The password serializes in clear text because this is the shape the
/// metadata store persists; anything returned to callers goes through
/// [`ConnectionSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConnection {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: DbType,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, serialize_with = "expose_password")]
    pub password: Option<SecretString>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub is_system: bool,
}

fn expose_password<S: Serializer>(
    password: &Option<SecretString>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match password {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

impl DatabaseConnection {
    /// Check the dialect/location invariant.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("connection name is required".into()));
        }

        if self.db_type.is_file_based() {
            if self.filename.as_deref().map_or(true, |f| f.trim().is_empty()) {
                return Err(CoreError::Validation(
                    "sqlite connections require a filename".into(),
                ));
            }
            if self.host.is_some()
                || self.port.is_some()
                || self.username.is_some()
                || self.password.is_some()
            {
                return Err(CoreError::Validation(
                    "sqlite connections must not carry host, port, username or password".into(),
                ));
            }
        } else {
            if self.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                return Err(CoreError::Validation(format!(
                    "{} connections require a host",
                    self.db_type
                )));
            }
            if self.username.as_deref().map_or(true, |u| u.trim().is_empty()) {
                return Err(CoreError::Validation(format!(
                    "{} connections require a username",
                    self.db_type
                )));
            }
            if self.filename.is_some() {
                return Err(CoreError::Validation(format!(
                    "{} connections must not carry a filename",
                    self.db_type
                )));
            }
        }

        Ok(())
    }

    /// Fill in the dialect's port when none was given.
    pub fn with_default_port(mut self) -> Self {
        if self.port.is_none() {
            self.port = self.db_type.default_port();
        }
        self
    }

    pub fn port_or_default(&self) -> u16 {
        self.port
            .or_else(|| self.db_type.default_port())
            .unwrap_or_default()
    }

    pub fn password_str(&self) -> &str {
        self.password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .unwrap_or("")
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ConnectionStatus::Enabled
    }

    /// True when both records address the same server with the same credentials.
    pub fn same_endpoint(&self, other: &DatabaseConnection) -> bool {
        self.db_type == other.db_type
            && self.host == other.host
            && self.port_or_default() == other.port_or_default()
            && self.username == other.username
            && self.password_str() == other.password_str()
            && self.database == other.database
            && self.filename == other.filename
            && self.ssl == other.ssl
    }

    /// Human-readable location for logs; never includes credentials.
    pub fn display_target(&self) -> String {
        match &self.filename {
            Some(file) if self.db_type.is_file_based() => format!("sqlite:{}", file),
            _ => format!(
                "{}://{}:{}/{}",
                self.db_type,
                self.host.as_deref().unwrap_or(""),
                self.port_or_default(),
                self.database.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Outward-facing view of a connection, without the password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub db_type: DbType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub has_password: bool,
    pub database: Option<String>,
    pub filename: Option<String>,
    pub ssl: bool,
    pub status: ConnectionStatus,
    pub is_system: bool,
}

impl From<&DatabaseConnection> for ConnectionSummary {
    fn from(conn: &DatabaseConnection) -> Self {
        Self {
            id: conn.id.clone(),
            name: conn.name.clone(),
            db_type: conn.db_type,
            host: conn.host.clone(),
            port: conn.port,
            username: conn.username.clone(),
            has_password: conn.password.is_some(),
            database: conn.database.clone(),
            filename: conn.filename.clone(),
            ssl: conn.ssl,
            status: conn.status,
            is_system: conn.is_system,
        }
    }
}

/// Outcome of a connectivity check. Failure is a normal result, not an error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTestResult {
    pub ok: bool,
    pub message: String,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }
}
