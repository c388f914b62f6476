//! Relational persistence of frames, one row per frame with the PNG payload.
//!
//! A run holds exactly one database connection. The orchestrator opens it as
//! a [`DbSession`] before grabbing and closes it on every exit path; the sink
//! only borrows it. The session serializes access, so at most one statement
//! is in flight at a time.

use crate::config::DatabaseConfig;
use crate::error::SinkError;
use crate::frame::Frame;
use crate::metadata::FrameRecord;
use crate::report::SinkOutcome;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use std::future::Future;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// Table holding one row per captured frame.
pub const TABLE_NAME: &str = "camera_src";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS camera_src (
        id          BIGINT        PRIMARY KEY NOT NULL,
        file_name   VARCHAR(100)  NOT NULL,
        date_time   TIMESTAMP     NOT NULL,
        image_size  TEXT          NOT NULL,
        image_path  VARCHAR(100)  NOT NULL,
        image_src   BYTEA
    )
"#;

const TABLE_EXISTS_SQL: &str = r#"
    SELECT EXISTS (
        SELECT 1 FROM information_schema.tables
        WHERE table_schema = current_schema() AND table_name = $1
    )
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO camera_src (
        id, file_name, date_time, image_size, image_path, image_src
    ) VALUES (
        $1, $2, $3, $4, $5, $6
    )
"#;

/// Result of schema setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaStatus {
    Created,
    AlreadyExists,
}

/// One row of the frame table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameRow {
    pub id: i64,
    pub file_name: String,
    pub date_time: NaiveDateTime,
    pub image_size: String,
    pub image_path: String,
    pub image_src: Vec<u8>,
}

impl FrameRow {
    /// Build the row for `record`, embedding `frame` as PNG.
    pub fn build(frame: &Frame, record: &FrameRecord) -> Result<Self, SinkError> {
        Self::from_record(record, frame.encode_png()?)
    }

    /// Build the row for `record` around an already encoded PNG.
    pub fn from_record(record: &FrameRecord, image_src: Vec<u8>) -> Result<Self, SinkError> {
        let id = i64::try_from(record.sequence).map_err(|_| {
            SinkError::serialization(format!("sequence {} exceeds BIGINT", record.sequence))
        })?;

        Ok(Self {
            id,
            file_name: record.file_name.clone(),
            date_time: record.captured_at,
            image_size: record.dimensions.clone(),
            image_path: record.archive_path.display().to_string(),
            image_src,
        })
    }
}

/// Backend able to hold the frame table.
#[async_trait]
pub trait FrameTable: Send + Sync {
    type Connection: Send;

    async fn connect(&self) -> Result<Self::Connection, SinkError>;

    /// Create the table unless it exists.
    async fn ensure_schema(&self, conn: &mut Self::Connection) -> Result<SchemaStatus, SinkError>;

    async fn insert(&self, conn: &mut Self::Connection, row: &FrameRow) -> Result<(), SinkError>;

    async fn close(&self, conn: Self::Connection) -> Result<(), SinkError>;
}

/// The run's single database connection.
pub struct DbSession<C> {
    conn: Mutex<C>,
}

impl<C> DbSession<C> {
    fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, C> {
        self.conn.lock().await
    }

    fn into_inner(self) -> C {
        self.conn.into_inner()
    }
}

/// Writes frames to a [`FrameTable`] through a borrowed [`DbSession`].
pub struct RelationalSink<T: FrameTable> {
    table: T,
    connect_timeout: Duration,
    statement_timeout: Duration,
}

impl<T: FrameTable> RelationalSink<T> {
    pub fn new(table: T, connect_timeout: Duration, statement_timeout: Duration) -> Self {
        Self {
            table,
            connect_timeout,
            statement_timeout,
        }
    }

    pub fn from_config(table: T, config: &DatabaseConfig) -> Self {
        Self::new(table, config.connect_timeout(), config.statement_timeout())
    }

    pub fn table(&self) -> &T {
        &self.table
    }

    /// Open the connection for a run.
    pub async fn open_session(&self) -> Result<DbSession<T::Connection>, SinkError> {
        let conn = match tokio::time::timeout(self.connect_timeout, self.table.connect()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(SinkError::timeout(format!(
                    "connect exceeded {}s",
                    self.connect_timeout.as_secs_f64()
                )))
            }
        };
        info!("Database session opened");
        Ok(DbSession::new(conn))
    }

    /// Close the run's connection. Errors are logged; the connection is gone
    /// either way.
    pub async fn close_session(&self, session: DbSession<T::Connection>) {
        match self.table.close(session.into_inner()).await {
            Ok(()) => info!("Database session closed"),
            Err(e) => warn!(error = %e, "Database session closed with error"),
        }
    }

    /// Create the frame table if absent. An existing table counts as success.
    pub async fn ensure_schema(
        &self,
        session: &DbSession<T::Connection>,
    ) -> Result<SchemaStatus, SinkError> {
        let mut conn = session.lock().await;
        let status = self
            .bounded("schema setup", self.table.ensure_schema(&mut conn))
            .await?;

        match status {
            SchemaStatus::Created => info!(table = TABLE_NAME, "Table created"),
            SchemaStatus::AlreadyExists => info!(table = TABLE_NAME, "Table already exists"),
        }
        Ok(status)
    }

    /// Insert one row for `frame`. One attempt, no retry.
    #[instrument(skip(self, session, frame, record), fields(sequence = record.sequence))]
    pub async fn insert(
        &self,
        session: &DbSession<T::Connection>,
        frame: &Frame,
        record: &FrameRecord,
    ) -> SinkOutcome {
        let result = self.try_insert(session, frame, record).await;
        match &result {
            Ok(()) => info!(file_name = %record.file_name, "Record inserted"),
            Err(e) => warn!(file_name = %record.file_name, error = %e, "Record insert failed"),
        }
        result.into()
    }

    async fn try_insert(
        &self,
        session: &DbSession<T::Connection>,
        frame: &Frame,
        record: &FrameRecord,
    ) -> Result<(), SinkError> {
        let row = FrameRow::from_record(record, frame.encode_png_blocking().await?)?;
        let mut conn = session.lock().await;
        self.bounded("insert", self.table.insert(&mut conn, &row))
            .await
    }

    async fn bounded<R>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<R, SinkError>>,
    ) -> Result<R, SinkError> {
        match tokio::time::timeout(self.statement_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::timeout(format!(
                "{operation} exceeded {}s",
                self.statement_timeout.as_secs_f64()
            ))),
        }
    }
}

/// PostgreSQL frame table.
pub struct PostgresFrameTable {
    options: PgConnectOptions,
}

impl PostgresFrameTable {
    pub fn new(config: &DatabaseConfig) -> Self {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.name)
            .application_name("capture-service");

        Self { options }
    }
}

#[async_trait]
impl FrameTable for PostgresFrameTable {
    type Connection = PgConnection;

    async fn connect(&self) -> Result<PgConnection, SinkError> {
        let conn = self.options.connect().await.map_err(classify_sqlx_error)?;
        debug!("Connected to PostgreSQL");
        Ok(conn)
    }

    async fn ensure_schema(&self, conn: &mut PgConnection) -> Result<SchemaStatus, SinkError> {
        let existed: bool = sqlx::query_scalar(TABLE_EXISTS_SQL)
            .bind(TABLE_NAME)
            .fetch_one(&mut *conn)
            .await
            .map_err(classify_sqlx_error)?;

        match sqlx::query(CREATE_TABLE_SQL).execute(&mut *conn).await {
            Ok(_) if existed => Ok(SchemaStatus::AlreadyExists),
            Ok(_) => Ok(SchemaStatus::Created),
            Err(e) if is_duplicate_table(&e) => Ok(SchemaStatus::AlreadyExists),
            Err(e) => Err(classify_sqlx_error(e)),
        }
    }

    async fn insert(&self, conn: &mut PgConnection, row: &FrameRow) -> Result<(), SinkError> {
        sqlx::query(INSERT_SQL)
            .bind(row.id)
            .bind(&row.file_name)
            .bind(row.date_time)
            .bind(&row.image_size)
            .bind(&row.image_path)
            .bind(&row.image_src)
            .execute(&mut *conn)
            .await
            .map_err(classify_sqlx_error)?;
        Ok(())
    }

    async fn close(&self, conn: PgConnection) -> Result<(), SinkError> {
        conn.close().await.map_err(classify_sqlx_error)
    }
}

/// SQLSTATE 42P07: duplicate_table.
fn is_duplicate_table(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.code().as_deref() == Some("42P07"))
}

/// Map a sqlx error onto the sink error kinds.
pub fn classify_sqlx_error(err: sqlx::Error) -> SinkError {
    let message = err.to_string();
    match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            // statement_timeout / query_canceled
            Some("57014") => SinkError::timeout(message),
            // data exceptions: value too long, bad encoding, out of range
            Some(code) if code.starts_with("22") => SinkError::serialization(message),
            // connection exceptions, bad credentials, unknown database, shutdown
            Some(code)
                if ["08", "28", "3D", "57P"]
                    .iter()
                    .any(|class| code.starts_with(class)) =>
            {
                SinkError::connection(message)
            }
            _ => SinkError::constraint(message),
        },
        sqlx::Error::Encode(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. } => SinkError::serialization(message),
        sqlx::Error::PoolTimedOut => SinkError::timeout(message),
        _ => SinkError::connection(message),
    }
}
