//! Integration tests for the PostgreSQL credential store
//!
//! These tests need a reachable PostgreSQL instance (`DATABASE_URL`) and
//! create their own `configs` table, so they are ignored by default:
//! `cargo test -p common -- --ignored`.

use common::{
    CredentialStatus, ExpiryMode, InvalidReason, Outcome, SESSION_COOKIE_KEY,
    database::{DatabaseConfig, health_check, init_pool},
    store::{CredentialBatch, CredentialStore, DueFilter, PgCredentialStore},
};
use chrono::{NaiveDate, TimeZone, Utc};
use serial_test::serial;
use sqlx::{PgPool, Row};

async fn create_table(expires_type: &str) -> Result<PgPool, Box<dyn std::error::Error>> {
    let config = DatabaseConfig::from_env()?;
    let pool = init_pool(&config).await?;
    assert!(health_check(&pool).await?, "Database health check failed");

    sqlx::query("DROP TABLE IF EXISTS configs").execute(&pool).await?;
    sqlx::query(&format!(
        r#"
        CREATE TABLE configs (
            id SERIAL PRIMARY KEY,
            key VARCHAR(255) NOT NULL,
            value TEXT,
            "group" VARCHAR(128) NOT NULL,
            expired_to INTEGER NOT NULL DEFAULT 0,
            status INTEGER NOT NULL DEFAULT 1,
            expires {expires_type},
            updated_date TIMESTAMP
        )
        "#
    ))
    .execute(&pool)
    .await?;

    Ok(pool)
}

async fn setup() -> Result<PgPool, Box<dyn std::error::Error>> {
    let pool = create_table("BIGINT").await?;

    sqlx::query(
        r#"
        INSERT INTO configs (key, value, "group", status, expires, updated_date) VALUES
            ($1, 'SID=a;HSID=x', 'a@example.com', 1, NULL, NULL),
            ($1, 'SID=b', 'b@example.com', 1, 1, '2026-01-01 00:00:00'),
            ($1, 'SID=c', 'c@example.com', 0, 1, NULL),
            ($1, '', 'd@example.com', 1, NULL, NULL),
            ($1, 'SID=e', 'e@example.com', 1, 4102444800, NULL)
        "#,
    )
    .bind(SESSION_COOKIE_KEY)
    .execute(&pool)
    .await?;

    Ok(pool)
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
#[serial]
async fn test_select_and_commit_round_trip() -> Result<(), Box<dyn std::error::Error>> {
    let pool = setup().await?;
    let store = PgCredentialStore::new(pool.clone(), ExpiryMode::EpochSeconds);

    let mut batch = store.begin().await?;
    let filter = DueFilter::new(SESSION_COOKIE_KEY, 10).due_before(Some(chrono::Utc::now()));
    let due = batch.select_due(&filter).await?;

    let groups: Vec<&str> = due.iter().map(|c| c.group.as_str()).collect();
    assert_eq!(groups, vec!["a@example.com", "b@example.com"]);

    batch.apply_outcome(
        "a@example.com",
        SESSION_COOKIE_KEY,
        &Outcome::Renewed {
            value: "SID=a2;HSID=x".to_string(),
            expires: chrono::DateTime::from_timestamp(1_792_567_680, 0),
        },
    );
    batch.apply_outcome(
        "b@example.com",
        SESSION_COOKIE_KEY,
        &Outcome::Invalid(InvalidReason::Status(401)),
    );
    assert_eq!(batch.commit().await?, 2);

    let row = sqlx::query(r#"SELECT value, expires FROM configs WHERE "group" = 'a@example.com'"#)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<String, _>("value"), "SID=a2;HSID=x");
    assert_eq!(row.get::<Option<i64>, _>("expires"), Some(1_792_567_680));

    let row = sqlx::query(r#"SELECT status FROM configs WHERE "group" = 'b@example.com'"#)
        .fetch_one(&pool)
        .await?;
    assert_eq!(
        row.get::<i32, _>("status"),
        CredentialStatus::Inactive.as_i32()
    );

    Ok(())
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
#[serial]
async fn test_concurrent_batches_skip_locked_rows() -> Result<(), Box<dyn std::error::Error>> {
    let pool = setup().await?;
    let store = PgCredentialStore::new(pool, ExpiryMode::EpochSeconds);
    let filter = DueFilter::new(SESSION_COOKIE_KEY, 1);

    let mut first = store.begin().await?;
    let mut second = store.begin().await?;
    let a = first.select_due(&filter).await?;
    let b = second.select_due(&filter).await?;

    assert_eq!(a.len(), 1);
    assert_eq!(b.len(), 1);
    assert_ne!(a[0].id, b[0].id);

    first.rollback().await?;
    second.rollback().await?;
    Ok(())
}

#[tokio::test]
#[ignore = "requires a running PostgreSQL instance"]
#[serial]
async fn test_date_expiry_column() -> Result<(), Box<dyn std::error::Error>> {
    let pool = create_table("DATE").await?;
    sqlx::query(
        r#"
        INSERT INTO configs (key, value, "group", status, expires) VALUES
            ($1, 'SID=a', 'a@example.com', 1, '2026-10-19'),
            ($1, 'SID=b', 'b@example.com', 1, '2026-10-25'),
            ($1, 'SID=c', 'c@example.com', 1, NULL)
        "#,
    )
    .bind(SESSION_COOKIE_KEY)
    .execute(&pool)
    .await?;

    let store = PgCredentialStore::new(pool.clone(), ExpiryMode::Date);
    let mut batch = store.begin().await?;
    let filter = DueFilter::new(SESSION_COOKIE_KEY, 10)
        .due_before(Some(Utc.with_ymd_and_hms(2026, 10, 20, 12, 0, 0).unwrap()));
    let due = batch.select_due(&filter).await?;

    let groups: Vec<&str> = due.iter().map(|c| c.group.as_str()).collect();
    assert_eq!(groups, vec!["c@example.com", "a@example.com"]);
    assert_eq!(due[0].expires, None);
    assert_eq!(
        due[1].expires,
        Some(Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap())
    );

    batch.apply_outcome(
        "a@example.com",
        SESSION_COOKIE_KEY,
        &Outcome::Renewed {
            value: "SID=a2".to_string(),
            expires: Some(Utc.with_ymd_and_hms(2026, 10, 21, 7, 28, 0).unwrap()),
        },
    );
    batch.apply_outcome(
        "c@example.com",
        SESSION_COOKIE_KEY,
        &Outcome::Renewed {
            value: "SID=c2".to_string(),
            expires: None,
        },
    );
    assert_eq!(batch.commit().await?, 2);

    let row = sqlx::query(r#"SELECT value, expires FROM configs WHERE "group" = 'a@example.com'"#)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<String, _>("value"), "SID=a2");
    assert_eq!(
        row.get::<Option<NaiveDate>, _>("expires"),
        NaiveDate::from_ymd_opt(2026, 10, 21)
    );

    let row = sqlx::query(r#"SELECT expires FROM configs WHERE "group" = 'c@example.com'"#)
        .fetch_one(&pool)
        .await?;
    assert_eq!(row.get::<Option<NaiveDate>, _>("expires"), None);

    Ok(())
}
