use std::path::PathBuf;

use crate::cancel::Cancellation;
use crate::paths;
use crate::stage::StageStore;
use crate::template::BuildInfo;

/// Everything an action may consult while it is built and run.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub cancel: Cancellation,
    /// Template context, absent when templating is disabled.
    pub build: Option<BuildInfo>,
    pub state_dir: PathBuf,
}

impl ExecContext {
    pub fn new(cancel: Cancellation, build: Option<BuildInfo>, state_dir: PathBuf) -> Self {
        Self {
            cancel,
            build,
            state_dir,
        }
    }

    pub fn stage_store(&self) -> StageStore {
        StageStore::new(&self.state_dir)
    }
}

impl Default for ExecContext {
    fn default() -> Self {
        Self::new(Cancellation::never(), None, paths::default_state_dir())
    }
}
