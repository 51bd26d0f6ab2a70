//! Table descriptors handed to the reconciler.
//!
//! Descriptors are built in code with the builder methods below or loaded
//! from a TOML schema file:
//!
//! ```toml
//! [[tables]]
//! name = "users"
//!
//! [[tables.columns]]
//! name = "id"
//! type = "big_serial"
//! primary_key = true
//!
//! [[tables.columns]]
//! name = "email"
//! type = { varchar = 255 }
//! unique = true
//! ```

use crate::error::BootstrapError;
use figment::{
    Figment,
    providers::{Format, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Serial,
    BigSerial,
    Real,
    Double,
    Boolean,
    Text,
    Varchar(u32),
    Date,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Jsonb,
    Bytes,
    /// Raw SQL type, passed through verbatim and never type-checked.
    Custom(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub table: String,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ColumnType,
    /// Columns are `NOT NULL` unless marked nullable.
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    /// SQL expression used as the column default, e.g. `now()` or `0`.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub references: Option<ForeignKey>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            primary_key: false,
            unique: false,
            default: None,
            references: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default_sql(mut self, expr: impl Into<String>) -> Self {
        self.default = Some(expr.into());
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: impl Into<String>) -> Self {
        self.references = Some(ForeignKey {
            table: table.into(),
            column: column.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl Index {
    pub fn new<I, S>(name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Names of other tables this one holds foreign keys to.
    fn referenced_tables(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter_map(|c| c.references.as_ref())
            .map(|fk| fk.table.as_str())
            .filter(move |t| *t != self.name)
    }
}

/// Order tables so referenced tables come before the tables referencing them.
///
/// Stable: independent tables keep the caller's order. A reference cycle
/// falls back to caller order for the tables involved.
pub fn dependency_order(tables: &[Table]) -> Vec<&Table> {
    let known: HashSet<&str> = tables.iter().map(|t| t.name.as_str()).collect();
    let mut placed: HashSet<&str> = HashSet::with_capacity(tables.len());
    let mut pending: Vec<&Table> = tables.iter().collect();
    let mut ordered = Vec::with_capacity(tables.len());

    while !pending.is_empty() {
        let next = pending
            .iter()
            .position(|t| {
                t.referenced_tables()
                    .all(|dep| !known.contains(dep) || placed.contains(dep))
            })
            .unwrap_or(0);
        let table = pending.remove(next);
        placed.insert(table.name.as_str());
        ordered.push(table);
    }
    ordered
}

#[derive(Debug, Default, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    tables: Vec<Table>,
}

/// Load table descriptors from a TOML schema file.
pub fn load_tables(path: &Path) -> Result<Vec<Table>, BootstrapError> {
    if !path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("schema file {} not found", path.display()),
        )
        .into());
    }
    let file: SchemaFile = Figment::from(Toml::file(path)).extract()?;
    Ok(file.tables)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names<'a>(tables: &[&'a Table]) -> Vec<&'a str> {
        tables.iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn independent_tables_keep_caller_order() {
        let tables = vec![Table::new("b"), Table::new("a"), Table::new("c")];
        assert_eq!(names(&dependency_order(&tables)), ["b", "a", "c"]);
    }

    #[test]
    fn referenced_tables_come_first() {
        let tables = vec![
            Table::new("profiles")
                .column(Column::new("user_id", ColumnType::BigInt).references("users", "id")),
            Table::new("recovery_codes")
                .column(Column::new("user_id", ColumnType::BigInt).references("users", "id")),
            Table::new("users").column(Column::new("id", ColumnType::BigSerial).primary_key()),
        ];
        assert_eq!(
            names(&dependency_order(&tables)),
            ["users", "profiles", "recovery_codes"]
        );
    }

    #[test]
    fn self_and_external_references_are_ignored() {
        let tables = vec![
            Table::new("nodes")
                .column(Column::new("parent", ColumnType::BigInt).references("nodes", "id"))
                .column(Column::new("owner", ColumnType::BigInt).references("accounts", "id")),
            Table::new("tags"),
        ];
        assert_eq!(names(&dependency_order(&tables)), ["nodes", "tags"]);
    }

    #[test]
    fn cycles_fall_back_to_caller_order() {
        let tables = vec![
            Table::new("a").column(Column::new("b_id", ColumnType::Integer).references("b", "id")),
            Table::new("b").column(Column::new("a_id", ColumnType::Integer).references("a", "id")),
        ];
        assert_eq!(names(&dependency_order(&tables)), ["a", "b"]);
    }

    #[test]
    fn loads_tables_from_toml() {
        let mut path = std::env::temp_dir();
        path.push(format!("db-bootstrap-schema-{}.toml", std::process::id()));
        std::fs::write(
            &path,
            r#"
            [[tables]]
            name = "users"

            [[tables.columns]]
            name = "id"
            type = "big_serial"
            primary_key = true

            [[tables.columns]]
            name = "email"
            type = { varchar = 255 }
            unique = true

            [[tables.indexes]]
            name = "idx_users_email"
            columns = ["email"]
            "#,
        )
        .expect("failed to write schema file");

        let tables = load_tables(&path).expect("schema file should parse");
        let _ = std::fs::remove_file(&path);

        assert_eq!(
            tables,
            vec![
                Table::new("users")
                    .column(Column::new("id", ColumnType::BigSerial).primary_key())
                    .column(Column::new("email", ColumnType::Varchar(255)).unique())
                    .index(Index::new("idx_users_email", ["email"]))
            ]
        );
    }

    #[test]
    fn missing_schema_file_is_an_error() {
        let err = load_tables(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, BootstrapError::Io(_)));
    }
}
