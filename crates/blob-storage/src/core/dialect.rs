//! SQL dialect detection and the dialect catalog.
//!
//! The dialect is detected from the product name the server reports once a
//! connection is open. Every dialect-specific SQL fragment the storage area emits
//! comes from one [`DialectProfile`] in a static catalog, so supporting another
//! engine means adding one catalog entry.

use std::fmt;

use crate::error::DialectError;

/// Marker in DDL templates replaced by the dialect's binary column type.
pub const BINARY_PLACEHOLDER: &str = "${BINARY}";

/// SQL dialect spoken by a connected server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// SQLite 3.
    Sqlite,
    /// PostgreSQL.
    PostgreSql,
    /// MySQL and MariaDB.
    MySql,
    /// Microsoft SQL Server.
    MsSql,
    /// The server is reachable but speaks no dialect the catalog knows.
    Unsupported,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Sqlite => write!(f, "SQLite"),
            Dialect::PostgreSql => write!(f, "PostgreSQL"),
            Dialect::MySql => write!(f, "MySQL"),
            Dialect::MsSql => write!(f, "MSSQL"),
            Dialect::Unsupported => write!(f, "unsupported"),
        }
    }
}

/// Optional behaviors a dialect offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectCapability {
    /// Substring extraction over binary columns, used for partial reads.
    RangeRead,
    /// A named server-side lock, used to serialize table bootstrap.
    AdvisoryLock,
}

/// How positional parameters are written in statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?1`, `?2`, ...
    NumberedQuestion,
    /// `$1`, `$2`, ...
    Dollar,
    /// `?` for every parameter
    Question,
    /// `@P1`, `@P2`, ...
    AtP,
}

impl PlaceholderStyle {
    /// Renders the placeholder for a 1-based parameter index.
    pub fn render(self, index: usize) -> String {
        match self {
            PlaceholderStyle::NumberedQuestion => format!("?{}", index),
            PlaceholderStyle::Dollar => format!("${}", index),
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::AtP => format!("@P{}", index),
        }
    }

    /// Returns true if placeholders carry an index and may be repeated.
    pub fn is_numbered(self) -> bool {
        !matches!(self, PlaceholderStyle::Question)
    }
}

/// Everything dialect-specific the storage area needs.
#[derive(Debug)]
pub struct DialectProfile {
    /// Dialect this entry describes.
    pub dialect: Dialect,
    /// Column type for opaque binary payloads.
    pub binary_type: &'static str,
    /// Parameter marker syntax.
    pub placeholder: PlaceholderStyle,
    /// Returns a row if the table named by `${table}` exists.
    pub table_exists_sql: &'static str,
    /// Byte length of a binary column.
    pub size_function: &'static str,
    /// 1-based `(column, start, length)` substring over a binary column.
    pub range_function: &'static str,
    /// Statement taking the bootstrap lock inside the creating transaction.
    pub bootstrap_lock_sql: Option<&'static str>,
    /// Statement releasing a session-scoped bootstrap lock once the transaction ended.
    pub bootstrap_unlock_sql: Option<&'static str>,
    /// Optional behaviors of the dialect.
    pub capabilities: &'static [DialectCapability],
}

impl DialectProfile {
    /// Returns true if the dialect offers `capability`.
    pub fn supports(&self, capability: DialectCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

static CATALOG: [DialectProfile; 4] = [
    DialectProfile {
        dialect: Dialect::Sqlite,
        binary_type: "BLOB",
        placeholder: PlaceholderStyle::NumberedQuestion,
        table_exists_sql: "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ${table}",
        size_function: "length",
        range_function: "substr",
        bootstrap_lock_sql: None,
        bootstrap_unlock_sql: None,
        capabilities: &[],
    },
    DialectProfile {
        dialect: Dialect::PostgreSql,
        binary_type: "BYTEA",
        placeholder: PlaceholderStyle::Dollar,
        table_exists_sql: "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = current_schema() AND table_name = CAST(${table} AS TEXT)",
        size_function: "octet_length",
        range_function: "substr",
        bootstrap_lock_sql: Some("SELECT pg_advisory_xact_lock(hashtext('storagearea'))"),
        bootstrap_unlock_sql: None,
        capabilities: &[DialectCapability::RangeRead, DialectCapability::AdvisoryLock],
    },
    DialectProfile {
        dialect: Dialect::MySql,
        binary_type: "LONGBLOB",
        placeholder: PlaceholderStyle::Question,
        table_exists_sql: "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_name = ${table}",
        size_function: "LENGTH",
        range_function: "SUBSTRING",
        // GET_LOCK belongs to the session and survives the implicit commit of DDL
        bootstrap_lock_sql: Some("SELECT GET_LOCK('storagearea', 30)"),
        bootstrap_unlock_sql: Some("SELECT RELEASE_LOCK('storagearea')"),
        capabilities: &[DialectCapability::RangeRead, DialectCapability::AdvisoryLock],
    },
    DialectProfile {
        dialect: Dialect::MsSql,
        binary_type: "VARBINARY(MAX)",
        placeholder: PlaceholderStyle::AtP,
        table_exists_sql: "SELECT 1 FROM INFORMATION_SCHEMA.TABLES \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = ${table}",
        size_function: "DATALENGTH",
        range_function: "SUBSTRING",
        bootstrap_lock_sql: Some(
            "EXEC sp_getapplock @Resource = 'storagearea', @LockMode = 'Exclusive', \
             @LockOwner = 'Transaction'",
        ),
        bootstrap_unlock_sql: None,
        capabilities: &[DialectCapability::AdvisoryLock],
    },
];

impl Dialect {
    /// Maps a server's self-reported product name to a dialect.
    pub fn detect(dbms_name: &str) -> Dialect {
        let name = dbms_name.to_ascii_lowercase();
        if name.contains("sqlite") {
            Dialect::Sqlite
        } else if name.contains("postgresql") {
            Dialect::PostgreSql
        } else if name.contains("mysql") || name.contains("mariadb") {
            Dialect::MySql
        } else if name.contains("microsoft sql server") || name.starts_with("sql server") {
            Dialect::MsSql
        } else {
            Dialect::Unsupported
        }
    }

    /// All dialects with a catalog entry.
    pub fn supported() -> impl Iterator<Item = Dialect> {
        CATALOG.iter().map(|profile| profile.dialect)
    }

    /// Returns true for every dialect except [`Dialect::Unsupported`].
    pub fn is_supported(self) -> bool {
        self != Dialect::Unsupported
    }

    /// Catalog entry for this dialect.
    pub fn profile(self) -> Result<&'static DialectProfile, DialectError> {
        CATALOG
            .iter()
            .find(|profile| profile.dialect == self)
            .ok_or_else(|| DialectError::Unsupported {
                dbms_name: self.to_string(),
            })
    }

    /// Returns true if the dialect's catalog entry offers `capability`.
    pub fn supports(self, capability: DialectCapability) -> bool {
        self.profile().is_ok_and(|profile| profile.supports(capability))
    }

    /// Replaces every [`BINARY_PLACEHOLDER`] in `template` with this dialect's
    /// binary column type.
    pub fn substitute_binary_type(self, template: &str) -> Result<String, DialectError> {
        let profile = self.profile()?;
        Ok(template.replace(BINARY_PLACEHOLDER, profile.binary_type))
    }
}
