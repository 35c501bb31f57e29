// stage.rs — Stage metadata consulted by the splitting passes.
//
// A read-only mapping from stage name to scheduling metadata. The splitting
// passes only test the `is_async` flag; the rest of the schedule lives with
// the scheduler. Lookup is allowed to fail — a `Realize` naming an unknown
// stage is an internal-invariant violation reported by the pass.

use std::collections::HashMap;

/// Scheduling metadata for one pipeline stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInfo {
    pub name: String,
    /// Producer and consumer halves run as parallel tasks when set.
    pub is_async: bool,
}

impl StageInfo {
    pub fn synchronous(name: impl Into<String>) -> StageInfo {
        StageInfo {
            name: name.into(),
            is_async: false,
        }
    }

    pub fn asynchronous(name: impl Into<String>) -> StageInfo {
        StageInfo {
            name: name.into(),
            is_async: true,
        }
    }
}

/// Read-only stage environment keyed by stage name.
#[derive(Debug, Default, Clone)]
pub struct StageEnv {
    stages: HashMap<String, StageInfo>,
}

impl StageEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, info: StageInfo) {
        self.stages.insert(info.name.clone(), info);
    }

    pub fn lookup(&self, name: &str) -> Option<&StageInfo> {
        self.stages.get(name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
