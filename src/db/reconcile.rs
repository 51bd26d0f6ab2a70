//! Additive schema planning.
//!
//! [`plan`] compares the declared tables with a [`SchemaSnapshot`] of the live
//! catalog and returns the DDL needed to close the gap. It only ever creates
//! tables, adds columns and creates indexes; existing structure is left alone.

use crate::db::schema::{Column, ColumnType, Index, Table, dependency_order};
use crate::error::SchemaError;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    fn sql_type(self, column: &Column) -> String {
        use ColumnType::*;
        let ty = match (self, &column.kind) {
            (_, Custom(raw)) => return raw.clone(),
            (_, Varchar(len)) => return format!("VARCHAR({len})"),
            (_, SmallInt) => "SMALLINT",
            (_, Integer) => "INTEGER",
            (_, BigInt) => "BIGINT",
            (_, Real) => "REAL",
            (_, Boolean) => "BOOLEAN",
            (_, Text) => "TEXT",
            (_, Date) => "DATE",
            (_, Timestamp) => "TIMESTAMP",
            (_, TimestampTz) => "TIMESTAMPTZ",
            (Dialect::Postgres, Serial) => "SERIAL",
            (Dialect::Postgres, BigSerial) => "BIGSERIAL",
            (Dialect::Postgres, Double) => "DOUBLE PRECISION",
            (Dialect::Postgres, Uuid) => "UUID",
            (Dialect::Postgres, Json) => "JSON",
            (Dialect::Postgres, Jsonb) => "JSONB",
            (Dialect::Postgres, Bytes) => "BYTEA",
            (Dialect::Sqlite, Serial | BigSerial) => "INTEGER",
            (Dialect::Sqlite, Double) => "DOUBLE",
            (Dialect::Sqlite, Uuid | Json | Jsonb) => "TEXT",
            (Dialect::Sqlite, Bytes) => "BLOB",
        };
        ty.to_string()
    }

    /// Type name the catalog reports for `kind`; `None` means the type is not checked.
    fn catalog_type(self, column: &Column) -> Option<String> {
        use ColumnType::*;
        match self {
            Dialect::Sqlite => match column.kind {
                Custom(_) => None,
                _ => Some(self.sql_type(column)),
            },
            Dialect::Postgres => {
                let name = match column.kind {
                    Custom(_) => return None,
                    SmallInt => "smallint",
                    Integer | Serial => "integer",
                    BigInt | BigSerial => "bigint",
                    Real => "real",
                    Double => "double precision",
                    Boolean => "boolean",
                    Text => "text",
                    Varchar(_) => "character varying",
                    Date => "date",
                    Timestamp => "timestamp without time zone",
                    TimestampTz => "timestamp with time zone",
                    Uuid => "uuid",
                    Json => "json",
                    Jsonb => "jsonb",
                    Bytes => "bytea",
                };
                Some(name.to_string())
            }
        }
    }

    fn column_definition(
        self,
        column: &Column,
        inline_pk: bool,
        inline_unique: bool,
    ) -> Result<String, SchemaError> {
        let mut def = format!("{} {}", quote_ident(&column.name)?, self.sql_type(column));
        if inline_pk {
            def.push_str(" PRIMARY KEY");
            if self == Dialect::Sqlite
                && matches!(column.kind, ColumnType::Serial | ColumnType::BigSerial)
            {
                def.push_str(" AUTOINCREMENT");
            }
        } else if !column.nullable && !column.primary_key {
            def.push_str(" NOT NULL");
        }
        if inline_unique && column.unique && !inline_pk {
            def.push_str(" UNIQUE");
        }
        if let Some(expr) = &column.default {
            def.push_str(" DEFAULT ");
            def.push_str(expr);
        }
        if let Some(fk) = &column.references {
            def.push_str(&format!(
                " REFERENCES {}({})",
                quote_ident(&fk.table)?,
                quote_ident(&fk.column)?
            ));
        }
        Ok(def)
    }

    fn create_table(self, table: &Table) -> Result<String, SchemaError> {
        let pk: Vec<&Column> = table.columns.iter().filter(|c| c.primary_key).collect();
        let inline_pk = pk.len() == 1;

        let mut defs = table
            .columns
            .iter()
            .map(|c| self.column_definition(c, inline_pk && c.primary_key, true))
            .collect::<Result<Vec<_>, _>>()?;
        if pk.len() > 1 {
            let cols = pk
                .iter()
                .map(|c| quote_ident(&c.name))
                .collect::<Result<Vec<_>, _>>()?;
            defs.push(format!("PRIMARY KEY ({})", cols.join(", ")));
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&table.name)?,
            defs.join(", ")
        ))
    }

    /// SQLite rejects `UNIQUE` in `ADD COLUMN`; uniqueness of an added
    /// column comes from [`unique_index`] instead.
    fn add_column(self, table: &Table, column: &Column) -> Result<String, SchemaError> {
        Ok(format!(
            "ALTER TABLE {} ADD COLUMN {}",
            quote_ident(&table.name)?,
            self.column_definition(column, false, false)?
        ))
    }

    fn create_index(self, table: &Table, index: &Index) -> Result<String, SchemaError> {
        let cols = index
            .columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            quote_ident(&index.name)?,
            quote_ident(&table.name)?,
            cols.join(", ")
        ))
    }
}

/// Unique index backing a unique column added to an existing table.
fn unique_index(table: &Table, column: &Column) -> Index {
    Index::new(format!("{}_{}_key", table.name, column.name), [column.name.as_str()]).unique()
}

/// Double-quote an identifier, rejecting names that cannot be quoted safely.
pub fn quote_ident(name: &str) -> Result<String, SchemaError> {
    if name.is_empty() || name.contains('"') || name.contains('\0') {
        return Err(SchemaError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{name}\""))
}

/// What the live catalog currently holds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaSnapshot {
    /// table -> column -> declared type as the catalog reports it
    pub tables: BTreeMap<String, BTreeMap<String, String>>,
    pub indexes: BTreeSet<String>,
}

impl SchemaSnapshot {
    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn column_type(&self, table: &str, column: &str) -> Option<&str> {
        self.tables.get(table)?.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChange {
    CreateTable {
        table: String,
        sql: String,
    },
    AddColumn {
        table: String,
        column: String,
        sql: String,
    },
    CreateIndex {
        table: String,
        index: String,
        sql: String,
    },
}

impl SchemaChange {
    pub fn sql(&self) -> &str {
        match self {
            Self::CreateTable { sql, .. }
            | Self::AddColumn { sql, .. }
            | Self::CreateIndex { sql, .. } => sql,
        }
    }

    /// Wrap a driver failure while applying this change.
    pub(crate) fn failed(&self, source: sqlx::Error) -> SchemaError {
        match self {
            Self::CreateTable { table, .. } => SchemaError::CreateTable {
                table: table.clone(),
                source,
            },
            Self::AddColumn { table, column, .. } => SchemaError::AddColumn {
                table: table.clone(),
                column: column.clone(),
                source,
            },
            Self::CreateIndex { table, index, .. } => SchemaError::CreateIndex {
                table: table.clone(),
                index: index.clone(),
                source,
            },
        }
    }
}

impl fmt::Display for SchemaChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateTable { table, .. } => write!(f, "create table {table}"),
            Self::AddColumn { table, column, .. } => write!(f, "add column {table}.{column}"),
            Self::CreateIndex { table, index, .. } => write!(f, "create index {index} on {table}"),
        }
    }
}

/// Changes applied by one reconciliation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub changes: Vec<SchemaChange>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Compute the additive changes that bring `existing` up to `tables`.
///
/// Fails with [`SchemaError::ColumnConflict`] when a present column's type
/// does not match its declaration. Tables are visited in dependency order so
/// foreign-key targets are created first.
pub fn plan(
    existing: &SchemaSnapshot,
    tables: &[Table],
    dialect: Dialect,
) -> Result<Vec<SchemaChange>, SchemaError> {
    let mut working = existing.clone();
    let mut changes = Vec::new();

    for table in dependency_order(tables) {
        match working.tables.get_mut(&table.name) {
            None => {
                changes.push(SchemaChange::CreateTable {
                    table: table.name.clone(),
                    sql: dialect.create_table(table)?,
                });
                working.tables.insert(
                    table.name.clone(),
                    table
                        .columns
                        .iter()
                        .map(|c| (c.name.clone(), dialect.sql_type(c)))
                        .collect(),
                );
            }
            Some(columns) => {
                for column in &table.columns {
                    match columns.get(&column.name) {
                        None => {
                            changes.push(SchemaChange::AddColumn {
                                table: table.name.clone(),
                                column: column.name.clone(),
                                sql: dialect.add_column(table, column)?,
                            });
                            columns.insert(column.name.clone(), dialect.sql_type(column));
                            if column.unique && !column.primary_key {
                                let index = unique_index(table, column);
                                if working.indexes.insert(index.name.clone()) {
                                    changes.push(SchemaChange::CreateIndex {
                                        table: table.name.clone(),
                                        index: index.name.clone(),
                                        sql: dialect.create_index(table, &index)?,
                                    });
                                }
                            }
                        }
                        Some(found) => {
                            if let Some(declared) = dialect.catalog_type(column)
                                && !declared.eq_ignore_ascii_case(found)
                                && !dialect.sql_type(column).eq_ignore_ascii_case(found)
                            {
                                return Err(SchemaError::ColumnConflict {
                                    table: table.name.clone(),
                                    column: column.name.clone(),
                                    declared,
                                    found: found.clone(),
                                });
                            }
                        }
                    }
                }
            }
        }

        for index in &table.indexes {
            if working.indexes.insert(index.name.clone()) {
                changes.push(SchemaChange::CreateIndex {
                    table: table.name.clone(),
                    index: index.name.clone(),
                    sql: dialect.create_index(table, index)?,
                });
            }
        }
    }
    Ok(changes)
}
