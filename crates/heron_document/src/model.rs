//! Schema descriptors and DDL job records, JSON-serialized into the meta
//! namespace.

use serde::{Deserialize, Serialize};

use heron_common::error::DocumentError;

/// Lifecycle state of a schema object during an online schema change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SchemaState {
    #[default]
    None,
    DeleteOnly,
    WriteOnly,
    Reorg,
    Public,
}

/// DDL action kinds. The worker dispatches on this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    #[default]
    None,
    CreateSchema,
    DropSchema,
    CreateCollection,
    DropCollection,
    AddIndex,
    DropIndex,
}

/// DDL job lifecycle states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobState {
    #[default]
    None,
    Running,
    Done,
    Cancelled,
    Cancelling,
    Synced,
    RollbackDone,
}

/// Database descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbInfo {
    pub id: i64,
    pub name: String,
    pub state: SchemaState,
    #[serde(default)]
    pub collections: Vec<CollectionInfo>,
}

/// Collection descriptor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: i64,
    pub name: String,
    pub state: SchemaState,
    #[serde(default)]
    pub indices: Vec<IndexInfo>,
}

/// Index descriptor. Secondary indexes are not implemented; the descriptor
/// exists so collection schemas round-trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: i64,
    pub name: String,
    pub state: SchemaState,
}

/// Typed error recorded on a failed job, so submitters get the original
/// error kind back out of history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub code: JobErrorCode,
    pub msg: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobErrorCode {
    DbAlreadyExists,
    InvalidJobKind,
    Other,
}

impl JobError {
    pub fn into_document_error(self) -> DocumentError {
        match self.code {
            JobErrorCode::DbAlreadyExists => DocumentError::DbAlreadyExists(self.msg),
            JobErrorCode::InvalidJobKind => DocumentError::JobCancelled(self.msg),
            JobErrorCode::Other => DocumentError::JobCancelled(self.msg),
        }
    }
}

pub fn job_error_from(err: &DocumentError) -> JobError {
    let code = match err {
        DocumentError::DbAlreadyExists(_) => JobErrorCode::DbAlreadyExists,
        DocumentError::InvalidJobKind(_) => JobErrorCode::InvalidJobKind,
        _ => JobErrorCode::Other,
    };
    JobError {
        code,
        msg: err.to_string(),
    }
}

/// One DDL job, as stored in the job queue and history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub kind: ActionKind,
    pub state: JobState,
    pub schema_state: SchemaState,
    /// Action-specific argument, decoded lazily by the handler.
    #[serde(default)]
    pub raw_arg: serde_json::Value,
    #[serde(default)]
    pub error: Option<JobError>,
    #[serde(default)]
    pub error_count: i32,
    #[serde(default)]
    pub schema_version: i64,
}

impl Job {
    pub fn new(id: i64, kind: ActionKind, arg: &impl Serialize) -> Result<Self, DocumentError> {
        Ok(Self {
            id,
            kind,
            raw_arg: serde_json::to_value(arg).map_err(|e| DocumentError::Codec(e.to_string()))?,
            ..Default::default()
        })
    }

    pub fn decode_arg<T: serde::de::DeserializeOwned>(&self) -> Result<T, DocumentError> {
        serde_json::from_value(self.raw_arg.clone())
            .map_err(|e| DocumentError::Codec(e.to_string()))
    }

    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn is_rollback_done(&self) -> bool {
        self.state == JobState::RollbackDone
    }

    pub fn is_cancelled(&self) -> bool {
        self.state == JobState::Cancelled
    }

    pub fn is_cancelling(&self) -> bool {
        self.state == JobState::Cancelling
    }

    pub fn is_synced(&self) -> bool {
        self.state == JobState::Synced
    }

    /// Terminal or settled states the runner must not re-execute.
    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            JobState::Done | JobState::Cancelled | JobState::Synced | JobState::RollbackDone
        )
    }

    /// Settle a database-level job: record the terminal state, the schema
    /// state reached, the version that change published, and the final arg.
    pub fn finish_db_job(
        &mut self,
        state: JobState,
        schema_state: SchemaState,
        schema_version: i64,
        db_info: &DbInfo,
    ) -> Result<(), DocumentError> {
        self.state = state;
        self.schema_state = schema_state;
        self.schema_version = schema_version;
        self.raw_arg =
            serde_json::to_value(db_info).map_err(|e| DocumentError::Codec(e.to_string()))?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        serde_json::to_vec(self).map_err(|e| DocumentError::Codec(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, DocumentError> {
        serde_json::from_slice(raw).map_err(|e| DocumentError::Codec(e.to_string()))
    }
}

/// What changed at a given schema version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDiff {
    pub version: i64,
    pub kind: ActionKind,
    #[serde(default)]
    pub collection_ids: Vec<i64>,
    #[serde(default)]
    pub raw_arg: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_json_roundtrip() {
        let db = DbInfo {
            id: 7,
            name: "orders".into(),
            state: SchemaState::Public,
            collections: vec![CollectionInfo {
                id: 8,
                name: "items".into(),
                state: SchemaState::Public,
                indices: vec![],
            }],
        };
        let job = Job::new(9, ActionKind::CreateSchema, &db).unwrap();
        let raw = job.encode().unwrap();
        let back = Job::decode(&raw).unwrap();
        assert_eq!(back, job);
        assert_eq!(back.decode_arg::<DbInfo>().unwrap(), db);
    }

    #[test]
    fn test_job_state_predicates() {
        let mut job = Job::default();
        assert!(!job.is_finished());
        job.state = JobState::Done;
        assert!(job.is_done());
        assert!(job.is_finished());
        job.state = JobState::Cancelling;
        assert!(job.is_cancelling());
        assert!(!job.is_finished());
        job.state = JobState::RollbackDone;
        assert!(job.is_finished());
    }

    #[test]
    fn test_finish_db_job_records_outcome() {
        let db = DbInfo {
            id: 1,
            name: "d".into(),
            ..Default::default()
        };
        let mut job = Job::new(2, ActionKind::CreateSchema, &db).unwrap();
        job.finish_db_job(JobState::Done, SchemaState::Public, 5, &db)
            .unwrap();
        assert!(job.is_done());
        assert_eq!(job.schema_version, 5);
        assert_eq!(job.schema_state, SchemaState::Public);
    }

    #[test]
    fn test_job_error_mapping() {
        let err = DocumentError::DbAlreadyExists("d".into());
        let je = job_error_from(&err);
        assert_eq!(je.code, JobErrorCode::DbAlreadyExists);
        assert!(matches!(
            je.into_document_error(),
            DocumentError::DbAlreadyExists(_)
        ));
    }
}
