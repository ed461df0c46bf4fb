//! Declarative schema for the depot tables and the DDL generated from it.

use depot_common::{log_debug, Logger};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: i64 = 1;

pub const CERTIFICATES_TABLE: &str = "certificates";
pub const CA_KEYS_TABLE: &str = "ca_keys";
pub const CHALLENGES_TABLE: &str = "challenges";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub primary_key: bool,
    pub autoincrement: bool,
    pub not_null: bool,
    pub unique: bool,
    pub default: Option<String>,
    pub check: Option<String>,
    /// `table(column)` this column references
    pub references: Option<String>,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            primary_key: false,
            autoincrement: false,
            not_null: false,
            unique: false,
            default: None,
            check: None,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn autoincrement(mut self) -> Self {
        self.autoincrement = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_value(mut self, value: &str) -> Self {
        self.default = Some(value.to_string());
        self
    }

    pub fn check(mut self, expr: &str) -> Self {
        self.check = Some(expr.to_string());
        self
    }

    pub fn references(mut self, target: &str) -> Self {
        self.references = Some(target.to_string());
        self
    }

    fn ddl(&self) -> String {
        let col_type = match self.data_type {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
        };
        let mut ddl = format!("{} {}", self.name, col_type);
        if self.primary_key {
            ddl.push_str(" PRIMARY KEY");
            if self.autoincrement {
                // AUTOINCREMENT requires INTEGER PRIMARY KEY
                ddl.push_str(" AUTOINCREMENT");
            }
        }
        if self.not_null {
            ddl.push_str(" NOT NULL");
        }
        if self.unique {
            ddl.push_str(" UNIQUE");
        }
        if let Some(default) = &self.default {
            ddl.push_str(&format!(" DEFAULT {default}"));
        }
        if let Some(check) = &self.check {
            ddl.push_str(&format!(" CHECK ({check})"));
        }
        if let Some(target) = &self.references {
            ddl.push_str(&format!(" REFERENCES {target}"));
        }
        ddl
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub table_name: String,
    pub columns: Vec<String>,
    pub unique: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub tables: Vec<TableDefinition>,
    pub indexes: Vec<IndexDefinition>,
}

impl Schema {
    /// Idempotent DDL for every table and index, using IF NOT EXISTS
    pub fn to_ddl(&self) -> String {
        let mut ddl_batch = String::new();

        for table in &self.tables {
            let columns: Vec<String> = table.columns.iter().map(ColumnDefinition::ddl).collect();
            ddl_batch.push_str(&format!(
                "CREATE TABLE IF NOT EXISTS {} ({});\n",
                table.name,
                columns.join(", ")
            ));
        }

        for index in &self.indexes {
            if index.columns.is_empty() {
                continue;
            }
            let unique = if index.unique { "UNIQUE " } else { "" };
            ddl_batch.push_str(&format!(
                "CREATE {}INDEX IF NOT EXISTS {} ON {} ({});\n",
                unique,
                index.name,
                index.table_name,
                index.columns.join(", ")
            ));
        }

        ddl_batch
    }
}

/// Tables backing the certificate records, the authority key and the challenges
pub fn depot_schema() -> Schema {
    Schema {
        tables: vec![
            TableDefinition {
                name: CERTIFICATES_TABLE.to_string(),
                columns: vec![
                    ColumnDefinition::new("id", DataType::Integer)
                        .primary_key()
                        .autoincrement(),
                    ColumnDefinition::new("name", DataType::Text).not_null(),
                    ColumnDefinition::new("serial", DataType::Integer)
                        .not_null()
                        .unique(),
                    ColumnDefinition::new("not_valid_before", DataType::Integer).not_null(),
                    ColumnDefinition::new("not_valid_after", DataType::Integer).not_null(),
                    ColumnDefinition::new("certificate_pem", DataType::Text).not_null(),
                ],
            },
            TableDefinition {
                name: CA_KEYS_TABLE.to_string(),
                columns: vec![
                    ColumnDefinition::new("certificate_id", DataType::Integer)
                        .primary_key()
                        .references("certificates(id)"),
                    // one authority per store
                    ColumnDefinition::new("slot", DataType::Integer)
                        .not_null()
                        .unique()
                        .default_value("1")
                        .check("slot = 1"),
                    ColumnDefinition::new("key_pem", DataType::Text).not_null(),
                ],
            },
            TableDefinition {
                name: CHALLENGES_TABLE.to_string(),
                columns: vec![
                    ColumnDefinition::new("challenge", DataType::Text)
                        .not_null()
                        .unique(),
                    ColumnDefinition::new("created_at", DataType::Integer).not_null(),
                ],
            },
        ],
        indexes: vec![
            IndexDefinition {
                name: "certificates_name_idx".to_string(),
                table_name: CERTIFICATES_TABLE.to_string(),
                columns: vec!["name".to_string()],
                unique: false,
            },
            IndexDefinition {
                name: "challenges_created_at_idx".to_string(),
                table_name: CHALLENGES_TABLE.to_string(),
                columns: vec!["created_at".to_string()],
                unique: false,
            },
        ],
    }
}

/// Apply the schema and stamp `user_version`. Refuses databases written by a newer schema.
pub(crate) fn apply_schema(
    conn: &Connection,
    schema: &Schema,
    logger: &Logger,
) -> rusqlite::Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        logger.error(format!(
            "Database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        ));
        return Err(rusqlite::Error::InvalidQuery);
    }

    let ddl_batch = schema.to_ddl();
    log_debug!(logger, "Applying schema DDL:\n{ddl_batch}");
    conn.execute_batch(&ddl_batch)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
