//! Stored row types and the table layout
//!
//! Dates are stored as Unix milliseconds so that equality lookups (measure
//! de-duplication) compare integers rather than formatted strings.

use crate::{DbError, DbResult};
use chrono::{DateTime, Utc};
use greenhouse_core::{
    FarmbotLogSumup, Measure, OccupancyModule, Sensor, User, UserType,
};
use sqlx::FromRow;

/// Collection names
pub mod tables {
    pub const USERS: &str = "users";
    pub const MEASURES: &str = "measures";
    pub const FARMBOT_LOGS: &str = "farmbotlogs";
    pub const OCCUPANCY_MODULES: &str = "occupancy_rate_modules";
}

/// Statements run by [`crate::DbClient::migrate`], all idempotent
pub const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        user_type TEXT NOT NULL,
        token TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS measures (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sensor TEXT NOT NULL,
        capture_date INTEGER NOT NULL,
        value REAL NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS measures_identity
        ON measures (sensor, capture_date, value)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS farmbotlogs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date INTEGER NOT NULL,
        completed_sequences TEXT NOT NULL,
        uncompleted_sequences TEXT NOT NULL,
        error_logs TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS occupancy_rate_modules (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        version INTEGER NOT NULL,
        document TEXT NOT NULL
    )
    "#,
];

pub fn to_millis(date: &DateTime<Utc>) -> i64 {
    date.timestamp_millis()
}

pub fn from_millis(millis: i64) -> DbResult<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| DbError::InvalidValue(format!("timestamp {millis} out of range")))
}

#[derive(Debug, Clone, FromRow)]
pub struct MeasureRow {
    pub id: i64,
    pub sensor: String,
    pub capture_date: i64,
    pub value: f64,
}

impl TryFrom<MeasureRow> for Measure {
    type Error = DbError;

    fn try_from(row: MeasureRow) -> DbResult<Self> {
        let sensor =
            Sensor::from_name(&row.sensor).map_err(|e| DbError::InvalidValue(e.to_string()))?;
        Ok(Measure {
            sensor,
            capture_date: from_millis(row.capture_date)?,
            value: row.value,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SumupRow {
    pub id: i64,
    pub date: i64,
    pub completed_sequences: String,
    pub uncompleted_sequences: String,
    pub error_logs: String,
}

impl TryFrom<SumupRow> for FarmbotLogSumup {
    type Error = DbError;

    fn try_from(row: SumupRow) -> DbResult<Self> {
        Ok(FarmbotLogSumup {
            date: from_millis(row.date)?,
            completed_sequences: serde_json::from_str(&row.completed_sequences)?,
            uncompleted_sequences: serde_json::from_str(&row.uncompleted_sequences)?,
            error_logs: serde_json::from_str(&row.error_logs)?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OccupancyModuleRow {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub document: String,
}

impl TryFrom<OccupancyModuleRow> for OccupancyModule {
    type Error = DbError;

    fn try_from(row: OccupancyModuleRow) -> DbResult<Self> {
        let mut module: OccupancyModule = serde_json::from_str(&row.document)?;
        module.name = row.name;
        module.version = row.version;
        Ok(module)
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password_hash: String,
    pub user_type: String,
    pub token: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = DbError;

    fn try_from(row: UserRow) -> DbResult<Self> {
        let user_type: UserType = row
            .user_type
            .parse()
            .map_err(|e: greenhouse_core::UnknownUserType| DbError::InvalidValue(e.to_string()))?;
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            user_type,
            token: row.token,
        })
    }
}
