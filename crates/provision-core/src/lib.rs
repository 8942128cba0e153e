pub mod actions;
pub mod cancel;
pub mod context;
pub mod document;
pub mod error;
pub mod fetch;
pub mod io;
pub mod loader;
pub mod paths;
pub mod policy;
pub mod resolve;
pub mod retry;
pub mod run_options;
pub mod runner;
pub mod settings;
pub mod stage;
pub mod template;
pub mod validate;

pub use actions::{Action, ActionError, ActionRegistry};
pub use cancel::{CancelHandle, Cancellation, Cancelled};
pub use context::ExecContext;
pub use document::{ConfigDocument, TaskEntry, TaskList, GATE_KEY};
pub use error::{ProvisionError, Result};
pub use fetch::{Fetch, FetchError, Fetcher};
pub use loader::load_config;
pub use runner::{RunSummary, Runner};
pub use settings::EngineSettings;
pub use template::BuildInfo;
pub use validate::{validate, ValidationReport};
