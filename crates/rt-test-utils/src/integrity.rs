//! Audit sink that keeps records in memory for assertions.

use async_trait::async_trait;
use rt_service::integrity::{AuditRecord, IntegrityError, IntegrityService};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RecordingIntegrityService {
    records: Mutex<Vec<AuditRecord>>,
    fail: Mutex<bool>,
}

impl RecordingIntegrityService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `record` calls fail.
    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl IntegrityService for RecordingIntegrityService {
    async fn record(&self, record: AuditRecord) -> Result<(), IntegrityError> {
        if *self.fail.lock().unwrap() {
            return Err(IntegrityError("recording disabled".to_string()));
        }
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}
