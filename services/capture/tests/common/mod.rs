//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use capture_service::config::{
    ArchiveConfig, BrokerConfig, CameraConfig, Config, DatabaseConfig, ProcessingConfig,
    ServiceConfig,
};
use capture_service::relational::TABLE_NAME;
use capture_service::{FrameRow, FrameTable, QueueTransport, SchemaStatus, SinkError};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// State behind an [`InMemoryFrameTable`], shared by all its connections.
#[derive(Debug, Default)]
pub struct Database {
    pub tables: HashSet<String>,
    pub rows: BTreeMap<i64, FrameRow>,
    pub open_connections: usize,
    /// Ids whose insert is rejected as a constraint violation
    pub reject_ids: HashSet<i64>,
}

/// Frame table kept in process memory with Postgres-like key semantics.
#[derive(Clone, Default)]
pub struct InMemoryFrameTable {
    db: Arc<Mutex<Database>>,
    refuse_connections: bool,
}

impl InMemoryFrameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose server cannot be reached.
    pub fn unreachable() -> Self {
        Self {
            refuse_connections: true,
            ..Self::default()
        }
    }

    pub fn reject_id(&self, id: i64) {
        self.db.lock().unwrap().reject_ids.insert(id);
    }

    pub fn row_ids(&self) -> Vec<i64> {
        self.db.lock().unwrap().rows.keys().copied().collect()
    }

    pub fn row(&self, id: i64) -> Option<FrameRow> {
        self.db.lock().unwrap().rows.get(&id).cloned()
    }

    pub fn table_count(&self) -> usize {
        self.db.lock().unwrap().tables.len()
    }

    pub fn open_connections(&self) -> usize {
        self.db.lock().unwrap().open_connections
    }
}

pub struct InMemoryConnection {
    db: Arc<Mutex<Database>>,
}

#[async_trait]
impl FrameTable for InMemoryFrameTable {
    type Connection = InMemoryConnection;

    async fn connect(&self) -> Result<InMemoryConnection, SinkError> {
        if self.refuse_connections {
            return Err(SinkError::connection("connection refused"));
        }
        self.db.lock().unwrap().open_connections += 1;
        Ok(InMemoryConnection {
            db: self.db.clone(),
        })
    }

    async fn ensure_schema(
        &self,
        conn: &mut InMemoryConnection,
    ) -> Result<SchemaStatus, SinkError> {
        let mut db = conn.db.lock().unwrap();
        if db.tables.insert(TABLE_NAME.to_string()) {
            Ok(SchemaStatus::Created)
        } else {
            Ok(SchemaStatus::AlreadyExists)
        }
    }

    async fn insert(&self, conn: &mut InMemoryConnection, row: &FrameRow) -> Result<(), SinkError> {
        let mut db = conn.db.lock().unwrap();
        if !db.tables.contains(TABLE_NAME) {
            return Err(SinkError::constraint("relation \"camera_src\" does not exist"));
        }
        if db.reject_ids.contains(&row.id) || db.rows.contains_key(&row.id) {
            return Err(SinkError::constraint(format!(
                "duplicate key value violates unique constraint (id)=({})",
                row.id
            )));
        }
        db.rows.insert(row.id, row.clone());
        Ok(())
    }

    async fn close(&self, conn: InMemoryConnection) -> Result<(), SinkError> {
        conn.db.lock().unwrap().open_connections -= 1;
        Ok(())
    }
}

/// Broker that refuses every connection.
pub struct UnreachableBroker;

#[async_trait]
impl QueueTransport for UnreachableBroker {
    async fn publish(&self, _queue: &str, _payload: &[u8]) -> Result<(), SinkError> {
        Err(SinkError::connection("Connection refused"))
    }
}

/// Broker that keeps every payload it receives.
#[derive(Clone, Default)]
pub struct RecordingBroker {
    pub published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

#[async_trait]
impl QueueTransport for RecordingBroker {
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), SinkError> {
        self.published
            .lock()
            .unwrap()
            .push((queue.to_string(), payload.to_vec()));
        Ok(())
    }
}

/// Configuration rooted in a scratch directory, test pattern of `frames`
/// 40x30 images.
pub fn test_config(root: &Path, frames: u32) -> Config {
    Config {
        service: ServiceConfig::default(),
        broker: BrokerConfig::default(),
        database: DatabaseConfig {
            user: "capture".to_string(),
            password: "capture".to_string(),
            host: "localhost".to_string(),
            port: 5432,
            name: "capture".to_string(),
            connect_timeout_secs: 1,
            statement_timeout_secs: 1,
        },
        archive: ArchiveConfig {
            archive_dir: root.join("logger"),
            log_dir: root.join("json"),
            metadata_log_file: "logger.json".to_string(),
        },
        processing: ProcessingConfig::default(),
        camera: CameraConfig {
            staging_dir: root.join("staging"),
            generate_test_pattern: frames > 0,
            test_pattern_count: frames,
            test_pattern_width: 40,
            test_pattern_height: 30,
            ..CameraConfig::default()
        },
    }
}

/// Sorted names of the files in `dir`.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
