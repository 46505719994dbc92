//! Query operations for each collection

use crate::schema::{to_millis, MeasureRow, OccupancyModuleRow, SumupRow, UserRow};
use crate::{DbClient, DbError, DbResult};
use chrono::{DateTime, Utc};
use greenhouse_core::{
    FarmbotLogSumup, Measure, MeasureField, MeasureQuery, NewUser, OccupancyModule, User,
};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::{debug, instrument};

fn column(field: MeasureField) -> &'static str {
    match field {
        MeasureField::Sensor => "sensor",
        MeasureField::CaptureDate => "capture_date",
        MeasureField::Value => "value",
    }
}

fn unique_violation(err: sqlx::Error, what: &str) -> DbError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            DbError::ConstraintViolation(format!("{what} already exists"))
        }
        _ => DbError::Query(err),
    }
}

// ---- Measures ----------------------------------------------------------------

impl DbClient {
    /// Insert a single measure
    #[instrument(skip(self, measure), fields(sensor = %measure.sensor))]
    pub async fn insert_measure(&self, measure: &Measure) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO measures (sensor, capture_date, value, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(measure.sensor.as_str())
        .bind(to_millis(&measure.capture_date))
        .bind(measure.value)
        .bind(to_millis(&Utc::now()))
        .execute(self.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Whether a measure with the same sensor, capture date and value exists
    #[instrument(skip(self, measure))]
    pub async fn measure_exists(&self, measure: &Measure) -> DbResult<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM measures
                WHERE sensor = ? AND capture_date = ? AND value = ?
            ) AS found
            "#,
        )
        .bind(measure.sensor.as_str())
        .bind(to_millis(&measure.capture_date))
        .bind(measure.value)
        .fetch_one(self.pool())
        .await?;

        Ok(row.get::<i64, _>("found") != 0)
    }

    /// Run a filtered, sorted and limited measure query
    #[instrument(skip(self))]
    pub async fn find_measures(&self, query: &MeasureQuery) -> DbResult<Vec<Measure>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, sensor, capture_date, value FROM measures WHERE capture_date >= ",
        );
        builder.push_bind(to_millis(&query.since));
        builder.push(" AND capture_date <= ");
        builder.push_bind(to_millis(&query.until));

        if !query.sensors.is_empty() {
            builder.push(" AND sensor IN (");
            let mut sensors = builder.separated(", ");
            for sensor in &query.sensors {
                sensors.push_bind(sensor.as_str());
            }
            sensors.push_unseparated(")");
        }

        let sort = if query.sort.is_empty() {
            MeasureQuery::default_sort()
        } else {
            query.sort.clone()
        };
        builder.push(" ORDER BY ");
        for (i, key) in sort.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(column(key.field));
            builder.push(if key.descending { " DESC" } else { " ASC" });
        }

        builder.push(" LIMIT ");
        builder.push_bind(i64::from(query.limit));

        let rows = builder
            .build_query_as::<MeasureRow>()
            .fetch_all(self.pool())
            .await?;

        debug!(count = rows.len(), "measures retrieved");
        rows.into_iter().map(Measure::try_from).collect()
    }

    /// Most recent measures, newest first
    #[instrument(skip(self))]
    pub async fn latest_measures(&self, limit: u32) -> DbResult<Vec<Measure>> {
        let rows = sqlx::query_as::<_, MeasureRow>(
            r#"
            SELECT id, sensor, capture_date, value FROM measures
            ORDER BY capture_date DESC, sensor ASC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(Measure::try_from).collect()
    }

    /// Get count of stored measures
    #[instrument(skip(self))]
    pub async fn count_measures(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM measures")
            .fetch_one(self.pool())
            .await?;

        Ok(row.get("count"))
    }
}

// ---- FarmBot sum-ups ---------------------------------------------------------

impl DbClient {
    #[instrument(skip(self, sumup), fields(date = %sumup.date))]
    pub async fn insert_sumup(&self, sumup: &FarmbotLogSumup) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO farmbotlogs (date, completed_sequences, uncompleted_sequences, error_logs)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(to_millis(&sumup.date))
        .bind(serde_json::to_string(&sumup.completed_sequences)?)
        .bind(serde_json::to_string(&sumup.uncompleted_sequences)?)
        .bind(serde_json::to_string(&sumup.error_logs)?)
        .execute(self.pool())
        .await?;

        debug!(id = result.last_insert_rowid(), "sum-up stored");
        Ok(result.last_insert_rowid())
    }

    /// Sum-ups dated within `[since, until]`, oldest first
    #[instrument(skip(self))]
    pub async fn find_sumups(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<FarmbotLogSumup>> {
        let rows = sqlx::query_as::<_, SumupRow>(
            r#"
            SELECT id, date, completed_sequences, uncompleted_sequences, error_logs
            FROM farmbotlogs
            WHERE date >= ? AND date <= ?
            ORDER BY date ASC
            "#,
        )
        .bind(to_millis(&since))
        .bind(to_millis(&until))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(FarmbotLogSumup::try_from).collect()
    }
}

// ---- Occupancy-rate modules --------------------------------------------------

impl DbClient {
    /// Create an empty module unless one with that name exists.
    /// Returns whether a module was created.
    #[instrument(skip(self))]
    pub async fn ensure_occupancy_module(&self, name: &str) -> DbResult<bool> {
        let document = serde_json::to_string(&OccupancyModule::new(name))?;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO occupancy_rate_modules (name, version, document)
            VALUES (?, 0, ?)
            "#,
        )
        .bind(name)
        .bind(document)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self))]
    pub async fn find_occupancy_module(&self, name: &str) -> DbResult<Option<OccupancyModule>> {
        let row = sqlx::query_as::<_, OccupancyModuleRow>(
            r#"
            SELECT id, name, version, document FROM occupancy_rate_modules
            WHERE name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(self.pool())
        .await?;

        row.map(OccupancyModule::try_from).transpose()
    }

    #[instrument(skip(self))]
    pub async fn list_occupancy_modules(&self) -> DbResult<Vec<OccupancyModule>> {
        let rows = sqlx::query_as::<_, OccupancyModuleRow>(
            "SELECT id, name, version, document FROM occupancy_rate_modules ORDER BY id ASC",
        )
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(OccupancyModule::try_from).collect()
    }

    /// Save the whole module if nobody saved it since it was loaded.
    /// On success `module.version` is bumped to the stored revision.
    #[instrument(skip(self, module), fields(name = %module.name, version = module.version))]
    pub async fn save_occupancy_module(&self, module: &mut OccupancyModule) -> DbResult<()> {
        let document = serde_json::to_string(module)?;
        let result = sqlx::query(
            r#"
            UPDATE occupancy_rate_modules
            SET document = ?, version = version + 1
            WHERE name = ? AND version = ?
            "#,
        )
        .bind(document)
        .bind(&module.name)
        .bind(module.version)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return match self.find_occupancy_module(&module.name).await? {
                Some(_) => Err(DbError::Conflict(module.name.clone())),
                None => Err(DbError::NotFound),
            };
        }

        module.version += 1;
        debug!(version = module.version, "module saved");
        Ok(())
    }
}

// ---- Users -------------------------------------------------------------------

impl DbClient {
    #[instrument(skip(self, user), fields(email = %user.email))]
    pub async fn insert_user(&self, user: &NewUser) -> DbResult<User> {
        let result = sqlx::query(
            r#"
            INSERT INTO users (email, password_hash, user_type, token)
            VALUES (?, ?, ?, NULL)
            "#,
        )
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(user.user_type.as_str())
        .execute(self.pool())
        .await
        .map_err(|e| unique_violation(e, "user"))?;

        Ok(User {
            id: result.last_insert_rowid(),
            email: user.email.clone(),
            password_hash: user.password_hash.clone(),
            user_type: user.user_type,
            token: None,
        })
    }

    #[instrument(skip(self))]
    pub async fn find_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, user_type, token FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(self.pool())
        .await?;

        row.map(User::try_from).transpose()
    }

    #[instrument(skip(self))]
    pub async fn find_user_by_id(&self, id: i64) -> DbResult<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, email, password_hash, user_type, token FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        row.map(User::try_from).transpose()
    }

    /// Store or clear the session token of a user
    #[instrument(skip(self, token))]
    pub async fn set_user_token(&self, id: i64, token: Option<&str>) -> DbResult<()> {
        let result = sqlx::query("UPDATE users SET token = ? WHERE id = ?")
            .bind(token)
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn count_users(&self) -> DbResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM users")
            .fetch_one(self.pool())
            .await?;

        Ok(row.get("count"))
    }
}
