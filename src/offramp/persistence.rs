use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fd_lock::RwLock as FileLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::state::{OfframpingPhase, OfframpingState};
use crate::clients::TxHash;
use crate::tokens::Chain;

/// Errors that can occur during state persistence operations
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Lock acquisition failed: {reason}")]
    LockError { reason: String },

    #[error("Storage task failed: {0}")]
    TaskFailed(String),
}

/// Write-ahead record of an on-chain submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSubmission {
    pub key: String,
    pub workflow_id: String,
    pub phase: OfframpingPhase,
    pub chain: Chain,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable home of the single in-flight workflow and its recovery records
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn read(&self) -> Result<Option<OfframpingState>, PersistenceError>;

    /// Atomic overwrite
    async fn write(&self, state: &OfframpingState) -> Result<(), PersistenceError>;

    /// Remove the workflow and every recovery record
    async fn clear(&self) -> Result<(), PersistenceError>;

    async fn read_submission(&self, key: &str) -> Result<Option<PendingSubmission>, PersistenceError>;

    async fn write_submission(&self, record: &PendingSubmission) -> Result<(), PersistenceError>;

    async fn list_submissions(&self) -> Result<Vec<PendingSubmission>, PersistenceError>;
}

pub const STATE_FORMAT_VERSION: &str = "1";

const STATE_FILE: &str = "offramp_state.json";
const SUBMISSIONS_FILE: &str = "pending_submissions.json";
const LOCK_FILE: &str = "store.lock";

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateEnvelope {
    version: String,
    checksum: String,
    hostname: String,
    last_persisted: DateTime<Utc>,
    state: serde_json::Value,
}

/// 64-bit FNV-1a, stable across toolchains and platforms
fn checksum(payload: &str) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in payload.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("{hash:016x}")
}

/// JSON files in a directory, guarded by an advisory lock file
#[derive(Debug, Clone)]
pub struct FileSystemStore {
    dir: Arc<PathBuf>,
}

impl FileSystemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Arc::new(dir.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    async fn blocking<T, F>(&self, exclusive: bool, operation: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, PersistenceError> + Send + 'static,
    {
        let dir = Arc::clone(&self.dir);
        tokio::task::spawn_blocking(move || with_lock(&dir, exclusive, || operation(&dir)))
            .await
            .map_err(|e| PersistenceError::TaskFailed(e.to_string()))?
    }
}

fn with_lock<T>(
    dir: &Path,
    exclusive: bool,
    operation: impl FnOnce() -> Result<T, PersistenceError>,
) -> Result<T, PersistenceError> {
    fs::create_dir_all(dir)?;
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(dir.join(LOCK_FILE))?;
    let mut lock = FileLock::new(lock_file);
    let lock_error = |e: io::Error| PersistenceError::LockError {
        reason: e.to_string(),
    };
    if exclusive {
        let _guard = lock.write().map_err(lock_error)?;
        operation()
    } else {
        let _guard = lock.read().map_err(lock_error)?;
        operation()
    }
}

fn read_optional(path: &Path) -> Result<Option<String>, PersistenceError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write to a temporary sibling, flush, then rename over the target
fn write_atomic(path: &Path, contents: &str) -> Result<(), PersistenceError> {
    let temp = path.with_extension("json.tmp");
    {
        let mut file = File::create(&temp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&temp, path)?;
    Ok(())
}

fn remove_optional(path: &Path) -> Result<(), PersistenceError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Decode a state file. Anything unreadable counts as absent.
fn decode_state(path: &Path, contents: &str) -> Option<OfframpingState> {
    let envelope: StateEnvelope = match serde_json::from_str(contents) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(file = ?path, error = %e, "State file is not a valid envelope, treating as absent");
            return None;
        }
    };

    if envelope.version != STATE_FORMAT_VERSION {
        warn!(
            file = ?path,
            expected = STATE_FORMAT_VERSION,
            found = %envelope.version,
            "State format version mismatch, treating as absent"
        );
        return None;
    }

    let payload = envelope.state.to_string();
    if checksum(&payload) != envelope.checksum {
        warn!(file = ?path, "State integrity check failed, treating as absent");
        return None;
    }

    match serde_json::from_value::<OfframpingState>(envelope.state) {
        Ok(state) => {
            debug!(
                workflow_id = %state.workflow_id,
                phase = %state.phase,
                hostname = %envelope.hostname,
                last_persisted = %envelope.last_persisted,
                "State loaded"
            );
            Some(state)
        }
        Err(e) => {
            warn!(file = ?path, error = %e, "State record does not parse, treating as absent");
            None
        }
    }
}

fn load_submissions(path: &Path) -> Result<BTreeMap<String, PendingSubmission>, PersistenceError> {
    let Some(contents) = read_optional(path)? else {
        return Ok(BTreeMap::new());
    };
    match serde_json::from_str(&contents) {
        Ok(records) => Ok(records),
        Err(e) => {
            warn!(file = ?path, error = %e, "Recovery records are corrupt, ignoring them");
            Ok(BTreeMap::new())
        }
    }
}

#[async_trait]
impl StateStore for FileSystemStore {
    async fn read(&self) -> Result<Option<OfframpingState>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(None);
        }
        self.blocking(false, |dir| {
            let path = dir.join(STATE_FILE);
            Ok(read_optional(&path)?.and_then(|contents| decode_state(&path, &contents)))
        })
        .await
    }

    async fn write(&self, state: &OfframpingState) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(state)?;
        let envelope = StateEnvelope {
            version: STATE_FORMAT_VERSION.to_string(),
            checksum: checksum(&value.to_string()),
            hostname: hostname::get()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            last_persisted: Utc::now(),
            state: value,
        };
        let serialized = serde_json::to_string_pretty(&envelope)?;
        let workflow_id = state.workflow_id.clone();
        let phase = state.phase;

        self.blocking(true, move |dir| write_atomic(&dir.join(STATE_FILE), &serialized))
            .await?;

        debug!(workflow_id = %workflow_id, phase = %phase, "State persisted");
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        if !self.dir.exists() {
            return Ok(());
        }
        self.blocking(true, |dir| {
            remove_optional(&dir.join(STATE_FILE))?;
            remove_optional(&dir.join(SUBMISSIONS_FILE))
        })
        .await?;
        info!(dir = ?self.dir, "Offramp state cleared");
        Ok(())
    }

    async fn read_submission(&self, key: &str) -> Result<Option<PendingSubmission>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(None);
        }
        let key = key.to_string();
        self.blocking(false, move |dir| {
            Ok(load_submissions(&dir.join(SUBMISSIONS_FILE))?.remove(&key))
        })
        .await
    }

    async fn write_submission(&self, record: &PendingSubmission) -> Result<(), PersistenceError> {
        let record = record.clone();
        self.blocking(true, move |dir| {
            let path = dir.join(SUBMISSIONS_FILE);
            let mut records = load_submissions(&path)?;
            records.insert(record.key.clone(), record);
            write_atomic(&path, &serde_json::to_string_pretty(&records)?)
        })
        .await
    }

    async fn list_submissions(&self) -> Result<Vec<PendingSubmission>, PersistenceError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        self.blocking(false, |dir| {
            Ok(load_submissions(&dir.join(SUBMISSIONS_FILE))?.into_values().collect())
        })
        .await
    }
}

/// Process-local store for tests and the sandbox
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<Option<OfframpingState>>,
    submissions: RwLock<BTreeMap<String, PendingSubmission>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn read(&self) -> Result<Option<OfframpingState>, PersistenceError> {
        Ok(self.state.read().await.clone())
    }

    async fn write(&self, state: &OfframpingState) -> Result<(), PersistenceError> {
        *self.state.write().await = Some(state.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.state.write().await = None;
        self.submissions.write().await.clear();
        Ok(())
    }

    async fn read_submission(&self, key: &str) -> Result<Option<PendingSubmission>, PersistenceError> {
        Ok(self.submissions.read().await.get(key).cloned())
    }

    async fn write_submission(&self, record: &PendingSubmission) -> Result<(), PersistenceError> {
        self.submissions
            .write()
            .await
            .insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn list_submissions(&self) -> Result<Vec<PendingSubmission>, PersistenceError> {
        Ok(self.submissions.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::SessionResult;
    use crate::ephemeral::EphemeralSecret;
    use crate::offramp::state::{ExecutionInput, InitialStateParams, Phase};
    use crate::tokens::{InputTokenType, OutputTokenType};
    use tempfile::TempDir;

    fn sample_state() -> OfframpingState {
        OfframpingState::new(InitialStateParams {
            sep24_id: "sep24-test".to_string(),
            stellar_ephemeral_secret: EphemeralSecret::generate(),
            pendulum_ephemeral_seed: EphemeralSecret::generate(),
            execution_input: ExecutionInput {
                input_token_type: InputTokenType::Usdc,
                output_token_type: OutputTokenType::Eurc,
                amount_in_units: "100".to_string(),
                min_amount_out_units: "95.23".to_string(),
                source_account: "0x7ba99e99bc669b3508aff9cc0a898e869459f877".to_string(),
            },
            session_result: SessionResult {
                amount: "95.23".to_string(),
                memo: "memo".to_string(),
                memo_type: "text".to_string(),
                offramping_account: "GANCHOR".to_string(),
            },
        })
        .unwrap()
    }

    fn sample_submission(workflow_id: &str) -> PendingSubmission {
        PendingSubmission {
            key: format!("{workflow_id}:nabla-swap"),
            workflow_id: workflow_id.to_string(),
            phase: OfframpingPhase::NablaSwap,
            chain: Chain::Pendulum,
            description: "swap".to_string(),
            tx_hash: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path().join("state"));
        assert!(store.read().await.unwrap().is_none());

        let state = sample_state();
        store.write(&state).await.unwrap();
        assert_eq!(store.read().await.unwrap(), Some(state.clone()));

        let advanced = state.advanced_to(Phase::Active(OfframpingPhase::SquidRouter));
        store.write(&advanced).await.unwrap();
        let loaded = store.read().await.unwrap().unwrap();
        assert_eq!(loaded.phase, Phase::Active(OfframpingPhase::SquidRouter));
    }

    #[tokio::test]
    async fn test_clear_removes_state_and_records() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path());
        let state = sample_state();
        store.write(&state).await.unwrap();
        store.write_submission(&sample_submission(&state.workflow_id)).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.read().await.unwrap().is_none());
        assert!(store.list_submissions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path());
        std::fs::write(store.state_file(), "{ not json").unwrap();
        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tampered_state_fails_integrity_check() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path());
        store.write(&sample_state()).await.unwrap();

        let contents = std::fs::read_to_string(store.state_file()).unwrap();
        let tampered = contents.replace("\"100\"", "\"100000\"");
        assert_ne!(contents, tampered);
        std::fs::write(store.state_file(), tampered).unwrap();

        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_version_mismatch_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path());
        store.write(&sample_state()).await.unwrap();

        let contents = std::fs::read_to_string(store.state_file()).unwrap();
        std::fs::write(
            store.state_file(),
            contents.replace("\"version\": \"1\"", "\"version\": \"0\""),
        )
        .unwrap();

        assert!(store.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_submission_records_are_keyed() {
        let dir = TempDir::new().unwrap();
        let store = FileSystemStore::new(dir.path());
        let mut record = sample_submission("wf-1");
        store.write_submission(&record).await.unwrap();

        record.tx_hash = Some(TxHash::new("0xabc"));
        store.write_submission(&record).await.unwrap();

        let loaded = store.read_submission(&record.key).await.unwrap().unwrap();
        assert_eq!(loaded.tx_hash, Some(TxHash::new("0xabc")));
        assert!(store.read_submission("wf-1:other").await.unwrap().is_none());
        assert_eq!(store.list_submissions().await.unwrap().len(), 1);
    }

    #[test]
    fn test_in_memory_store() {
        tokio_test::block_on(async {
            let store = InMemoryStore::new();
            let state = sample_state();
            store.write(&state).await.unwrap();
            store.write_submission(&sample_submission(&state.workflow_id)).await.unwrap();
            assert_eq!(store.read().await.unwrap(), Some(state));

            store.clear().await.unwrap();
            assert!(store.read().await.unwrap().is_none());
            assert!(store.list_submissions().await.unwrap().is_empty());
        });
    }
}
