//! Framework identity persistence, separated from the transport so tests
//! can substitute either side of the driver independently.

use std::collections::HashMap;
use std::sync::Mutex;

use peloton_state::{StateError, StateResult, StateStore};

/// Read/write access to the persisted framework identity.
pub trait FrameworkInfoStore: Send + Sync {
    fn framework_id(&self, name: &str) -> StateResult<Option<String>>;
    fn save_framework_id(&self, name: &str, id: &str) -> StateResult<()>;
    fn stream_id(&self, name: &str) -> StateResult<Option<String>>;
    fn save_stream_id(&self, name: &str, id: &str) -> StateResult<()>;
    fn clear_stream_id(&self, name: &str) -> StateResult<()>;
}

impl FrameworkInfoStore for StateStore {
    fn framework_id(&self, name: &str) -> StateResult<Option<String>> {
        Ok(self.get_framework(name)?.and_then(|r| r.framework_id))
    }

    fn save_framework_id(&self, name: &str, id: &str) -> StateResult<()> {
        self.set_framework_id(name, id)
    }

    fn stream_id(&self, name: &str) -> StateResult<Option<String>> {
        Ok(self.get_framework(name)?.and_then(|r| r.stream_id))
    }

    fn save_stream_id(&self, name: &str, id: &str) -> StateResult<()> {
        self.set_stream_id(name, Some(id))
    }

    fn clear_stream_id(&self, name: &str) -> StateResult<()> {
        self.set_stream_id(name, None)
    }
}

/// In-memory identity store for tests.
#[derive(Default)]
pub struct MemoryFrameworkStore {
    records: Mutex<HashMap<String, (Option<String>, Option<String>)>>,
    /// When set, every operation fails with this message.
    fail_with: Mutex<Option<String>>,
}

impl MemoryFrameworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_framework_id(name: &str, id: &str) -> Self {
        let store = Self::default();
        store
            .records
            .lock()
            .unwrap()
            .insert(name.to_string(), (Some(id.to_string()), None));
        store
    }

    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock().unwrap() = Some(message.to_string());
    }

    fn check_failure(&self) -> StateResult<()> {
        match self.fail_with.lock().unwrap().as_ref() {
            Some(message) => Err(StateError::Write(message.clone())),
            None => Ok(()),
        }
    }
}

impl FrameworkInfoStore for MemoryFrameworkStore {
    fn framework_id(&self, name: &str) -> StateResult<Option<String>> {
        self.check_failure()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(name)
            .and_then(|(fid, _)| fid.clone()))
    }

    fn save_framework_id(&self, name: &str, id: &str) -> StateResult<()> {
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let entry = records.entry(name.to_string()).or_default();
        entry.0 = Some(id.to_string());
        Ok(())
    }

    fn stream_id(&self, name: &str) -> StateResult<Option<String>> {
        self.check_failure()?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(name)
            .and_then(|(_, sid)| sid.clone()))
    }

    fn save_stream_id(&self, name: &str, id: &str) -> StateResult<()> {
        self.check_failure()?;
        let mut records = self.records.lock().unwrap();
        let entry = records.entry(name.to_string()).or_default();
        entry.1 = Some(id.to_string());
        Ok(())
    }

    fn clear_stream_id(&self, name: &str) -> StateResult<()> {
        self.check_failure()?;
        if let Some(entry) = self.records.lock().unwrap().get_mut(name) {
            entry.1 = None;
        }
        Ok(())
    }
}
