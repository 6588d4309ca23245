//! Process-scoped registry of live sub-agent runs.
//!
//! Tracks which session spawned which children and at what depth, so the
//! workflow engine can enforce `max_spawn_depth` before admitting work.
//! Shared state; all mutation goes through the inner lock.

use std::collections::HashMap;

use parking_lot::RwLock;

/// One live child run.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub child_session_key: String,
    pub label: String,
    pub depth: u32,
}

#[derive(Debug, Default)]
struct RegistryState {
    /// Spawn depth per session key. Absent keys are depth 0 (top-level).
    depths: HashMap<String, u32>,
    /// Active child runs keyed by the parent session.
    children: HashMap<String, Vec<RunRecord>>,
}

#[derive(Debug, Default)]
pub struct SubagentRegistry {
    state: RwLock<RegistryState>,
}

impl SubagentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current spawn depth of a session; 0 when the session is unknown.
    pub fn depth_of(&self, session_key: &str) -> u32 {
        self.state
            .read()
            .depths
            .get(session_key)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_depth(&self, session_key: &str, depth: u32) {
        self.state
            .write()
            .depths
            .insert(session_key.to_string(), depth);
    }

    /// Record a spawned child under its parent and remember the child depth.
    pub fn register_run(&self, parent_session_key: &str, record: RunRecord) {
        let mut state = self.state.write();
        state
            .depths
            .insert(record.child_session_key.clone(), record.depth);
        state
            .children
            .entry(parent_session_key.to_string())
            .or_default()
            .push(record);
    }

    pub fn release_run(&self, parent_session_key: &str, run_id: &str) {
        let mut state = self.state.write();
        if let Some(runs) = state.children.get_mut(parent_session_key) {
            runs.retain(|r| r.run_id != run_id);
            if runs.is_empty() {
                state.children.remove(parent_session_key);
            }
        }
    }

    pub fn active_children(&self, parent_session_key: &str) -> usize {
        self.state
            .read()
            .children
            .get(parent_session_key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
