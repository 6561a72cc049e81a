//! # PostgreSQL Service Store
//!
//! Maps to the `jacs_service_data` table created by `migrations/`:
//!
//! ```sql
//! CREATE TABLE jacs_service_data (
//!   id UUID PRIMARY KEY,
//!   name VARCHAR NOT NULL,
//!   owner VARCHAR NOT NULL,
//!   args JSONB NOT NULL,
//!   state VARCHAR NOT NULL,
//!   processing_location VARCHAR NOT NULL,
//!   parent_service_id UUID REFERENCES jacs_service_data (id),
//!   child_service_ids JSONB NOT NULL,
//!   depends_on JSONB NOT NULL,
//!   workspace VARCHAR,
//!   stringified_result TEXT,
//!   events JSONB NOT NULL,
//!   -- ... timestamps
//! );
//! ```
//!
//! State updates lock the row (`SELECT ... FOR UPDATE`) inside a transaction, check the expected
//! state, and write the whole mutable part of the record back before committing.

use super::{JacsServiceDataPersistence, PersistenceError, PersistenceResult, StateUpdate};
use crate::models::{JacsServiceData, JacsServiceEvent, ProcessingLocation, ServiceId};
use crate::state_machine::JacsServiceState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use tracing::{debug, info};

const SELECT_COLUMNS: &str = "id, name, owner, args, state, processing_location, \
     parent_service_id, child_service_ids, depends_on, workspace, stringified_result, events, \
     process_start_time, created_at, updated_at";

/// Raw row of `jacs_service_data`
#[derive(Debug, Clone, FromRow)]
struct ServiceDataRow {
    id: ServiceId,
    name: String,
    owner: String,
    args: Json<Vec<String>>,
    state: String,
    processing_location: String,
    parent_service_id: Option<ServiceId>,
    child_service_ids: Json<Vec<ServiceId>>,
    depends_on: Json<Vec<ServiceId>>,
    workspace: Option<String>,
    stringified_result: Option<String>,
    events: Json<Vec<JacsServiceEvent>>,
    process_start_time: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ServiceDataRow> for JacsServiceData {
    type Error = PersistenceError;

    fn try_from(row: ServiceDataRow) -> Result<Self, Self::Error> {
        let state = row
            .state
            .parse::<JacsServiceState>()
            .map_err(PersistenceError::InvalidData)?;
        let processing_location = row
            .processing_location
            .parse::<ProcessingLocation>()
            .map_err(PersistenceError::InvalidData)?;
        Ok(JacsServiceData {
            id: row.id,
            name: row.name,
            owner: row.owner,
            args: row.args.0,
            state,
            processing_location,
            parent_service_id: row.parent_service_id,
            child_service_ids: row.child_service_ids.0,
            depends_on: row.depends_on.0,
            workspace: row.workspace,
            stringified_result: row.stringified_result,
            events: row.events.0,
            process_start_time: row.process_start_time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// sqlx-backed implementation of [`JacsServiceDataPersistence`]
#[derive(Debug, Clone)]
pub struct PgServiceDataPersistence {
    pool: PgPool,
}

impl PgServiceDataPersistence {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> PersistenceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        info!(max_connections, "🗄️ PERSISTENCE: Connected to PostgreSQL service store");
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> PersistenceResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn lock_record(
        tx: &mut Transaction<'_, Postgres>,
        id: ServiceId,
    ) -> PersistenceResult<JacsServiceData> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jacs_service_data WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, ServiceDataRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(PersistenceError::NotFound(id))?;
        row.try_into()
    }
}

#[async_trait]
impl JacsServiceDataPersistence for PgServiceDataPersistence {
    async fn create(&self, data: &JacsServiceData) -> PersistenceResult<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO jacs_service_data (
                id, name, owner, args, state, processing_location, parent_service_id,
                child_service_ids, depends_on, workspace, stringified_result, events,
                process_start_time, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(data.id)
        .bind(&data.name)
        .bind(&data.owner)
        .bind(Json(&data.args))
        .bind(data.state.to_string())
        .bind(data.processing_location.to_string())
        .bind(data.parent_service_id)
        .bind(Json(&data.child_service_ids))
        .bind(Json(&data.depends_on))
        .bind(&data.workspace)
        .bind(&data.stringified_result)
        .bind(Json(&data.events))
        .bind(data.process_start_time)
        .bind(data.created_at)
        .bind(data.updated_at)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(PersistenceError::AlreadyExists(data.id));
        }
        debug!(service_id = %data.id, service_name = %data.name, "Persisted new service record");
        Ok(())
    }

    async fn find_by_id(&self, id: ServiceId) -> PersistenceResult<Option<JacsServiceData>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jacs_service_data WHERE id = $1");
        sqlx::query_as::<_, ServiceDataRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(JacsServiceData::try_from)
            .transpose()
    }

    async fn find_child_services(
        &self,
        parent_id: ServiceId,
    ) -> PersistenceResult<Vec<JacsServiceData>> {
        let parent = self
            .find_by_id(parent_id)
            .await?
            .ok_or(PersistenceError::NotFound(parent_id))?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM jacs_service_data WHERE parent_service_id = $1"
        );
        let mut by_id: HashMap<ServiceId, JacsServiceData> = HashMap::new();
        for row in sqlx::query_as::<_, ServiceDataRow>(&sql)
            .bind(parent_id)
            .fetch_all(&self.pool)
            .await?
        {
            let child = JacsServiceData::try_from(row)?;
            by_id.insert(child.id, child);
        }
        Ok(parent
            .child_service_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect())
    }

    async fn find_by_states(
        &self,
        states: &[JacsServiceState],
    ) -> PersistenceResult<Vec<JacsServiceData>> {
        let names: Vec<String> = states.iter().map(ToString::to_string).collect();
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM jacs_service_data WHERE state = ANY($1) ORDER BY created_at"
        );
        sqlx::query_as::<_, ServiceDataRow>(&sql)
            .bind(names)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(JacsServiceData::try_from)
            .collect()
    }

    async fn add_child_service(
        &self,
        parent_id: ServiceId,
        child_id: ServiceId,
    ) -> PersistenceResult<()> {
        let mut tx = self.pool.begin().await?;
        let mut parent = Self::lock_record(&mut tx, parent_id).await?;
        if parent.add_child(child_id) {
            sqlx::query(
                "UPDATE jacs_service_data SET child_service_ids = $2, updated_at = $3 WHERE id = $1",
            )
            .bind(parent_id)
            .bind(Json(&parent.child_service_ids))
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_state(
        &self,
        id: ServiceId,
        expected: JacsServiceState,
        update: StateUpdate,
    ) -> PersistenceResult<JacsServiceData> {
        let mut tx = self.pool.begin().await?;
        let mut record = Self::lock_record(&mut tx, id).await?;
        if record.state != expected {
            return Err(PersistenceError::ConcurrentModification {
                service_id: id,
                expected,
                actual: record.state,
            });
        }
        update.apply_to(&mut record, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE jacs_service_data
            SET state = $2, stringified_result = $3, events = $4,
                process_start_time = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.state.to_string())
        .bind(&record.stringified_result)
        .bind(Json(&record.events))
        .bind(record.process_start_time)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn count_by_state(&self) -> PersistenceResult<HashMap<JacsServiceState, u64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM jacs_service_data GROUP BY state")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(state, count)| {
                let state = state
                    .parse::<JacsServiceState>()
                    .map_err(PersistenceError::InvalidData)?;
                Ok((state, count.max(0) as u64))
            })
            .collect()
    }
}
