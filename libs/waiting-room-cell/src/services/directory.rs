// libs/waiting-room-cell/src/services/directory.rs
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::WaitingRoomError;
use crate::models::ConsultationRecord;

/// Read-only access to consultation records owned by the persistence layer.
#[async_trait]
pub trait ConsultationDirectory: Send + Sync {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError>;

    async fn find_by_link_token(&self, token: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError>;
}

/// Consultation lookup backed by the Supabase REST API.
pub struct SupabaseConsultationDirectory {
    supabase: Arc<SupabaseClient>,
    table: String,
}

impl SupabaseConsultationDirectory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
            table: config.consultations_table.clone(),
        }
    }

    async fn find_by(&self, column: &str, value: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        debug!("Looking up consultation by {}", column);

        self.supabase
            .select_one::<ConsultationRecord>(&self.table, column, value)
            .await
            .map_err(|e| {
                error!("Consultation lookup by {} failed: {}", column, e);
                WaitingRoomError::ExternalService(format!("Consultation lookup failed: {}", e))
            })
    }
}

#[async_trait]
impl ConsultationDirectory for SupabaseConsultationDirectory {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        self.find_by("room_id", room_id).await
    }

    async fn find_by_link_token(&self, token: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        self.find_by("consultation_token", token).await
    }
}

/// Directory kept in process memory, keyed by room id. Used by tests and local runs.
#[derive(Default)]
pub struct InMemoryConsultationDirectory {
    records: RwLock<HashMap<String, ConsultationRecord>>,
}

impl InMemoryConsultationDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = ConsultationRecord>) -> Self {
        let records = records
            .into_iter()
            .map(|record| (record.room_id.clone(), record))
            .collect();

        Self {
            records: RwLock::new(records),
        }
    }

    pub async fn insert(&self, record: ConsultationRecord) {
        self.records.write().await.insert(record.room_id.clone(), record);
    }

    pub async fn remove(&self, room_id: &str) -> Option<ConsultationRecord> {
        self.records.write().await.remove(room_id)
    }
}

#[async_trait]
impl ConsultationDirectory for InMemoryConsultationDirectory {
    async fn find_by_room(&self, room_id: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        Ok(self.records.read().await.get(room_id).cloned())
    }

    async fn find_by_link_token(&self, token: &str) -> Result<Option<ConsultationRecord>, WaitingRoomError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.consultation_token.as_deref() == Some(token))
            .cloned())
    }
}
