//! StateStore — redb-backed persistence for the scheduler.
//!
//! Typed CRUD over framework identity, jobs, tasks, and resource pools.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing). Task runtime updates go through a compare-and-set on the
//! row's revision so concurrent writers fail with a `Conflict` instead of
//! silently clobbering each other.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(FRAMEWORK).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(TASKS).map_err(map_err!(Table))?;
        txn.open_table(POOLS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Framework identity ─────────────────────────────────────────

    /// Load the identity record for a framework name.
    pub fn get_framework(&self, name: &str) -> StateResult<Option<FrameworkRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(FRAMEWORK).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: FrameworkRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Persist the framework id assigned by the master.
    pub fn set_framework_id(&self, name: &str, framework_id: &str) -> StateResult<()> {
        self.mutate_framework(name, |record| {
            record.framework_id = Some(framework_id.to_string());
        })?;
        debug!(%name, %framework_id, "framework id stored");
        Ok(())
    }

    /// Persist (or clear) the stream id of the current subscription.
    pub fn set_stream_id(&self, name: &str, stream_id: Option<&str>) -> StateResult<()> {
        self.mutate_framework(name, |record| {
            record.stream_id = stream_id.map(str::to_string);
        })
    }

    fn mutate_framework(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut FrameworkRecord),
    ) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FRAMEWORK).map_err(map_err!(Table))?;
            let mut record = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => FrameworkRecord {
                    name: name.to_string(),
                    ..FrameworkRecord::default()
                },
            };
            mutate(&mut record);
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Jobs ───────────────────────────────────────────────────────

    /// Insert or update a job row.
    pub fn put_job(&self, row: &JobRow) -> StateResult<()> {
        let key = row.config.job_id.clone();
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(job_id = %key, "job stored");
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, job_id: &str) -> StateResult<Option<JobRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        match table.get(job_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: JobRow =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Update only the runtime of an existing job.
    pub fn update_job_runtime(&self, job_id: &str, runtime: &JobRuntime) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(JOBS).map_err(map_err!(Table))?;
            let mut row: JobRow = match table.get(job_id).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("job {job_id}"))),
            };
            row.runtime = runtime.clone();
            let value = serde_json::to_vec(&row).map_err(map_err!(Serialize))?;
            table
                .insert(job_id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// List all jobs.
    pub fn list_jobs(&self) -> StateResult<Vec<JobRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: JobRow =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(row);
        }
        Ok(results)
    }

    /// Delete a job and all of its task rows. Returns true if the job existed.
    pub fn delete_job(&self, job_id: &str) -> StateResult<bool> {
        let task_keys: Vec<String> = self
            .list_tasks_for_job(job_id)?
            .iter()
            .map(TaskRow::table_key)
            .collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
            existed = jobs.remove(job_id).map_err(map_err!(Write))?.is_some();
            let mut tasks = txn.open_table(TASKS).map_err(map_err!(Table))?;
            for key in &task_keys {
                tasks.remove(key.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%job_id, existed, tasks_removed = task_keys.len(), "job deleted");
        Ok(existed)
    }

    // ── Tasks ──────────────────────────────────────────────────────

    /// Insert or overwrite a task row without a revision check. Used only
    /// for row creation; lifecycle updates go through `cas_task_runtime`.
    pub fn put_task(&self, row: &TaskRow) -> StateResult<()> {
        let key = row.table_key();
        let value = serde_json::to_vec(row).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a task by job id and instance id.
    pub fn get_task(&self, job_id: &str, instance_id: u32) -> StateResult<Option<TaskRow>> {
        let key = task_table_key(job_id, instance_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let row: TaskRow =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    /// Compare-and-set a task's runtime: the write succeeds only if the
    /// stored revision still equals `expected_revision`. The new runtime's
    /// revision is bumped inside the same transaction. Returns the row as
    /// written.
    pub fn cas_task_runtime(
        &self,
        job_id: &str,
        instance_id: u32,
        expected_revision: u64,
        mut runtime: TaskRuntime,
    ) -> StateResult<TaskRow> {
        let key = task_table_key(job_id, instance_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let row;
        {
            let mut table = txn.open_table(TASKS).map_err(map_err!(Table))?;
            let mut current: TaskRow = match table.get(key.as_str()).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("task {key}"))),
            };
            if current.runtime.revision != expected_revision {
                return Err(StateError::Conflict {
                    key,
                    expected: expected_revision,
                    actual: current.runtime.revision,
                });
            }
            runtime.revision = expected_revision + 1;
            current.runtime = runtime;
            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            row = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(row)
    }

    /// List all task rows for a job, ordered by instance id.
    pub fn list_tasks_for_job(&self, job_id: &str) -> StateResult<Vec<TaskRow>> {
        let prefix = format!("{job_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let row: TaskRow =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(row);
            }
        }
        results.sort_by_key(|r| r.instance_id);
        Ok(results)
    }

    /// List every task not yet in a terminal state, across all jobs.
    pub fn list_nonterminal_tasks(&self) -> StateResult<Vec<TaskRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TASKS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let row: TaskRow =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if !row.runtime.state.is_terminal() {
                results.push(row);
            }
        }
        results.sort_by(|a, b| (&a.job_id, a.instance_id).cmp(&(&b.job_id, b.instance_id)));
        Ok(results)
    }

    // ── Resource pools ─────────────────────────────────────────────

    /// Insert or update a pool definition.
    pub fn put_pool(&self, pool: &ResourcePoolConfig) -> StateResult<()> {
        let value = serde_json::to_vec(pool).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            table
                .insert(pool.id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a pool by id.
    pub fn get_pool(&self, pool_id: &str) -> StateResult<Option<ResourcePoolConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        match table.get(pool_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let pool: ResourcePoolConfig =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    /// List all pool definitions.
    pub fn list_pools(&self) -> StateResult<Vec<ResourcePoolConfig>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(POOLS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let pool: ResourcePoolConfig =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(pool);
        }
        results.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(results)
    }

    /// Delete a pool by id. Returns true if it existed.
    pub fn delete_pool(&self, pool_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(POOLS).map_err(map_err!(Table))?;
            existed = table.remove(pool_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peloton_core::ResourceVector;

    fn test_job(job_id: &str, instances: u32) -> JobRow {
        JobRow {
            config: JobConfig {
                job_id: job_id.to_string(),
                name: job_id.to_string(),
                r#type: JobType::Batch,
                instance_count: instances,
                pool_id: "prod".to_string(),
                priority: 5,
                task: TaskSpec {
                    command: "echo hi".to_string(),
                    resources: ResourceVector::new(1.0, 512.0),
                    num_ports: 0,
                    constraints: Default::default(),
                    max_failures: 3,
                },
                config_version: 1,
            },
            runtime: JobRuntime {
                state: JobState::Pending,
                goal_state: JobState::Succeeded,
                config_version: 1,
                creation_time_ms: 1000,
                start_time_ms: None,
                completion_time_ms: None,
            },
        }
    }

    fn test_task(job_id: &str, instance_id: u32) -> TaskRow {
        TaskRow {
            job_id: job_id.to_string(),
            instance_id,
            config_version: 1,
            runtime: TaskRuntime::initial(job_id, instance_id),
        }
    }

    fn test_pool(id: &str) -> ResourcePoolConfig {
        ResourcePoolConfig {
            id: id.to_string(),
            parent: None,
            reservation: ResourceVector::new(10.0, 10240.0),
            limit: ResourceVector::new(100.0, 102400.0),
            share: 1.0,
            policy: PoolPolicy::Fair,
        }
    }

    // ── Framework identity ─────────────────────────────────────────

    #[test]
    fn framework_identity_round_trip() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.get_framework("peloton").unwrap().is_none());

        store.set_framework_id("peloton", "fw-123").unwrap();
        store.set_stream_id("peloton", Some("stream-1")).unwrap();

        let record = store.get_framework("peloton").unwrap().unwrap();
        assert_eq!(record.framework_id.as_deref(), Some("fw-123"));
        assert_eq!(record.stream_id.as_deref(), Some("stream-1"));
    }

    #[test]
    fn stream_id_cleared_without_touching_framework_id() {
        let store = StateStore::open_in_memory().unwrap();
        store.set_framework_id("peloton", "fw-123").unwrap();
        store.set_stream_id("peloton", Some("stream-1")).unwrap();

        store.set_stream_id("peloton", None).unwrap();

        let record = store.get_framework("peloton").unwrap().unwrap();
        assert_eq!(record.framework_id.as_deref(), Some("fw-123"));
        assert!(record.stream_id.is_none());
    }

    // ── Job CRUD ───────────────────────────────────────────────────

    #[test]
    fn job_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let job = test_job("etl", 3);

        store.put_job(&job).unwrap();
        assert_eq!(store.get_job("etl").unwrap(), Some(job));
        assert!(store.get_job("nope").unwrap().is_none());
    }

    #[test]
    fn job_runtime_update() {
        let store = StateStore::open_in_memory().unwrap();
        let job = test_job("etl", 3);
        store.put_job(&job).unwrap();

        let mut runtime = job.runtime.clone();
        runtime.state = JobState::Running;
        runtime.start_time_ms = Some(2000);
        store.update_job_runtime("etl", &runtime).unwrap();

        let stored = store.get_job("etl").unwrap().unwrap();
        assert_eq!(stored.runtime.state, JobState::Running);
        assert_eq!(stored.runtime.start_time_ms, Some(2000));
    }

    #[test]
    fn job_runtime_update_missing_job_fails() {
        let store = StateStore::open_in_memory().unwrap();
        let runtime = test_job("x", 1).runtime;
        assert!(matches!(
            store.update_job_runtime("x", &runtime),
            Err(StateError::NotFound(_))
        ));
    }

    #[test]
    fn job_delete_removes_tasks() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_job(&test_job("etl", 2)).unwrap();
        store.put_task(&test_task("etl", 0)).unwrap();
        store.put_task(&test_task("etl", 1)).unwrap();
        store.put_task(&test_task("other", 0)).unwrap();

        assert!(store.delete_job("etl").unwrap());
        assert!(store.get_job("etl").unwrap().is_none());
        assert!(store.list_tasks_for_job("etl").unwrap().is_empty());
        assert_eq!(store.list_tasks_for_job("other").unwrap().len(), 1);
        assert!(!store.delete_job("etl").unwrap());
    }

    // ── Task CRUD and CAS ──────────────────────────────────────────

    #[test]
    fn task_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let task = test_task("etl", 0);

        store.put_task(&task).unwrap();
        assert_eq!(store.get_task("etl", 0).unwrap(), Some(task));
        assert!(store.get_task("etl", 1).unwrap().is_none());
    }

    #[test]
    fn cas_succeeds_at_expected_revision_and_bumps() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_task(&test_task("etl", 0)).unwrap();

        let mut runtime = store.get_task("etl", 0).unwrap().unwrap().runtime;
        runtime.state = TaskState::Pending;
        let written = store.cas_task_runtime("etl", 0, 0, runtime).unwrap();

        assert_eq!(written.runtime.state, TaskState::Pending);
        assert_eq!(written.runtime.revision, 1);
    }

    #[test]
    fn cas_rejects_stale_revision() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_task(&test_task("etl", 0)).unwrap();

        let mut runtime = store.get_task("etl", 0).unwrap().unwrap().runtime;
        runtime.state = TaskState::Pending;
        store.cas_task_runtime("etl", 0, 0, runtime.clone()).unwrap();

        // Second writer still believes revision 0.
        runtime.state = TaskState::Ready;
        let err = store.cas_task_runtime("etl", 0, 0, runtime).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn list_tasks_sorted_by_instance() {
        let store = StateStore::open_in_memory().unwrap();
        for i in [2u32, 0, 1] {
            store.put_task(&test_task("etl", i)).unwrap();
        }

        let tasks = store.list_tasks_for_job("etl").unwrap();
        let ids: Vec<u32> = tasks.iter().map(|t| t.instance_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn nonterminal_listing_skips_finished_tasks() {
        let store = StateStore::open_in_memory().unwrap();
        let mut done = test_task("etl", 0);
        done.runtime.state = TaskState::Succeeded;
        store.put_task(&done).unwrap();
        store.put_task(&test_task("etl", 1)).unwrap();

        let open = store.list_nonterminal_tasks().unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].instance_id, 1);
    }

    // ── Pool CRUD ──────────────────────────────────────────────────

    #[test]
    fn pool_crud() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_pool(&test_pool("prod")).unwrap();
        store.put_pool(&test_pool("batch")).unwrap();

        assert!(store.get_pool("prod").unwrap().is_some());
        let pools = store.list_pools().unwrap();
        assert_eq!(pools.len(), 2);
        // Sorted by id.
        assert_eq!(pools[0].id, "batch");

        assert!(store.delete_pool("batch").unwrap());
        assert!(!store.delete_pool("batch").unwrap());
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("peloton.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.set_framework_id("peloton", "fw-9").unwrap();
            store.put_job(&test_job("etl", 1)).unwrap();
            store.put_task(&test_task("etl", 0)).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(
            store
                .get_framework("peloton")
                .unwrap()
                .unwrap()
                .framework_id
                .as_deref(),
            Some("fw-9")
        );
        assert!(store.get_job("etl").unwrap().is_some());
        assert!(store.get_task("etl", 0).unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_jobs().unwrap().is_empty());
        assert!(store.list_pools().unwrap().is_empty());
        assert!(store.list_nonterminal_tasks().unwrap().is_empty());
        assert!(store.list_tasks_for_job("any").unwrap().is_empty());
        assert!(!store.delete_job("nope").unwrap());
        assert!(!store.delete_pool("nope").unwrap());
    }
}
