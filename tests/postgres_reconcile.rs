//! Runs against a live server when `DATABASE_URL` is set; otherwise each test
//! returns early. Every test works in its own throwaway schema.

use db_bootstrap::SchemaError;
use db_bootstrap::db::postgres;
use db_bootstrap::db::{Column, ColumnType, Index, Table};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

struct Scratch {
    admin: PgPool,
    pool: PgPool,
    schema: String,
}

impl Scratch {
    async fn new(label: &str) -> Option<Self> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping {label}");
            return None;
        };
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before UNIX_EPOCH")
            .as_nanos();
        let schema = format!("dbb_{label}_{}_{}", std::process::id(), nanos);

        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&url)
            .await
            .expect("failed to connect to DATABASE_URL");
        sqlx::query(&format!(r#"CREATE SCHEMA "{schema}""#))
            .execute(&admin)
            .await
            .expect("failed to create scratch schema");

        let options = PgConnectOptions::from_str(&url)
            .expect("DATABASE_URL should parse")
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .expect("failed to connect to scratch schema");
        Some(Self {
            admin,
            pool,
            schema,
        })
    }

    async fn cleanup(self) {
        self.pool.close().await;
        sqlx::query(&format!(r#"DROP SCHEMA "{}" CASCADE"#, self.schema))
            .execute(&self.admin)
            .await
            .expect("failed to drop scratch schema");
        self.admin.close().await;
    }
}

fn app_tables() -> Vec<Table> {
    vec![
        Table::new("profiles")
            .column(Column::new("id", ColumnType::Serial).primary_key())
            .column(Column::new("user_id", ColumnType::BigInt).references("users", "id"))
            .column(Column::new("bio", ColumnType::Text).nullable())
            .index(Index::new("idx_profiles_user", ["user_id"]).unique()),
        Table::new("users")
            .column(Column::new("id", ColumnType::BigSerial).primary_key())
            .column(Column::new("email", ColumnType::Varchar(255)).unique())
            .column(Column::new("active", ColumnType::Boolean).default_sql("TRUE"))
            .column(Column::new("created_at", ColumnType::TimestampTz).default_sql("now()")),
    ]
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let Some(db) = Scratch::new("idempotent").await else {
        return;
    };
    let tables = app_tables();

    let first = postgres::reconcile(&db.pool, &tables)
        .await
        .expect("first reconciliation should succeed");
    let created: Vec<String> = first.changes.iter().map(ToString::to_string).collect();
    assert_eq!(
        created,
        [
            "create table users",
            "create table profiles",
            "create index idx_profiles_user on profiles"
        ]
    );

    let after_first = postgres::snapshot(&db.pool).await.expect("snapshot");
    assert_eq!(after_first.column_type("users", "id"), Some("bigint"));
    assert_eq!(
        after_first.column_type("users", "email"),
        Some("character varying")
    );
    assert_eq!(after_first.column_type("users", "active"), Some("boolean"));
    assert_eq!(
        after_first.column_type("users", "created_at"),
        Some("timestamp with time zone")
    );
    assert_eq!(after_first.column_type("profiles", "id"), Some("integer"));
    assert!(after_first.indexes.contains("idx_profiles_user"));

    let second = postgres::reconcile(&db.pool, &tables)
        .await
        .expect("second reconciliation should succeed");
    assert!(second.is_noop(), "{:?}", second.changes);
    assert_eq!(
        postgres::snapshot(&db.pool).await.expect("snapshot"),
        after_first
    );

    db.cleanup().await;
}

#[tokio::test]
async fn missing_columns_are_added_without_touching_existing_ones() {
    let Some(db) = Scratch::new("add_column").await else {
        return;
    };
    sqlx::query(r#"CREATE TABLE "users" ("id" INTEGER PRIMARY KEY, "legacy" TEXT)"#)
        .execute(&db.pool)
        .await
        .unwrap();
    sqlx::query(r#"INSERT INTO "users" ("id", "legacy") VALUES (1, 'kept'), (2, 'also kept')"#)
        .execute(&db.pool)
        .await
        .unwrap();

    let users = Table::new("users")
        .column(Column::new("id", ColumnType::Integer).primary_key())
        .column(Column::new("nickname", ColumnType::Text).nullable())
        .column(Column::new("active", ColumnType::Boolean).default_sql("TRUE"))
        .column(Column::new("email", ColumnType::Varchar(120)).nullable().unique());
    let report = postgres::reconcile(&db.pool, std::slice::from_ref(&users))
        .await
        .expect("reconciliation should succeed");

    let applied: Vec<String> = report.changes.iter().map(ToString::to_string).collect();
    assert_eq!(
        applied,
        [
            "add column users.nickname",
            "add column users.active",
            "add column users.email",
            "create index users_email_key on users"
        ]
    );

    let row: (String, Option<String>, bool) =
        sqlx::query_as(r#"SELECT "legacy", "nickname", "active" FROM "users" WHERE "id" = 1"#)
            .fetch_one(&db.pool)
            .await
            .unwrap();
    assert_eq!(row, ("kept".to_string(), None, true));

    sqlx::query(r#"UPDATE "users" SET "email" = 'a@example.com' WHERE "id" = 1"#)
        .execute(&db.pool)
        .await
        .unwrap();
    let duplicate = sqlx::query(r#"UPDATE "users" SET "email" = 'a@example.com' WHERE "id" = 2"#)
        .execute(&db.pool)
        .await;
    assert!(duplicate.is_err(), "duplicate email should be rejected");

    let again = postgres::reconcile(&db.pool, &[users])
        .await
        .expect("second reconciliation should succeed");
    assert!(again.is_noop(), "{:?}", again.changes);

    db.cleanup().await;
}

#[tokio::test]
async fn incompatible_existing_column_is_a_schema_error() {
    let Some(db) = Scratch::new("conflict").await else {
        return;
    };
    sqlx::query(r#"CREATE TABLE "users" ("id" TEXT)"#)
        .execute(&db.pool)
        .await
        .unwrap();

    let users = Table::new("users").column(Column::new("id", ColumnType::Integer));
    let err = postgres::reconcile(&db.pool, &[users]).await.unwrap_err();
    assert!(
        matches!(err, SchemaError::ColumnConflict { ref declared, ref found, .. }
            if declared == "integer" && found == "text")
    );

    db.cleanup().await;
}

#[tokio::test]
async fn failed_change_rolls_back_the_whole_run() {
    let Some(db) = Scratch::new("rollback").await else {
        return;
    };
    sqlx::query(r#"CREATE TABLE "users" ("id" INTEGER PRIMARY KEY)"#)
        .execute(&db.pool)
        .await
        .unwrap();
    sqlx::query(r#"INSERT INTO "users" ("id") VALUES (1)"#)
        .execute(&db.pool)
        .await
        .unwrap();

    let tables = vec![
        Table::new("audit_log").column(Column::new("id", ColumnType::Integer).primary_key()),
        // existing rows cannot satisfy NOT NULL without a default
        Table::new("users")
            .column(Column::new("id", ColumnType::Integer).primary_key())
            .column(Column::new("tenant", ColumnType::Text)),
    ];
    let err = postgres::reconcile(&db.pool, &tables).await.unwrap_err();
    assert!(
        matches!(err, SchemaError::AddColumn { ref table, ref column, .. }
            if table == "users" && column == "tenant")
    );

    let snapshot = postgres::snapshot(&db.pool).await.expect("snapshot");
    assert!(!snapshot.has_table("audit_log"));
    assert_eq!(snapshot.column_type("users", "tenant"), None);
    assert_eq!(snapshot.column_type("users", "id"), Some("integer"));

    db.cleanup().await;
}

