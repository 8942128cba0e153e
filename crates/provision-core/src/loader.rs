//! Recursive configuration loading.
//!
//! A load walks the include graph depth-first from a root origin, expanding
//! every `include` in place before the including document's own tasks. The
//! set of visited origins lives for exactly one load; reaching any origin a
//! second time (a cycle or a diamond) stops the load.

use std::collections::HashSet;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, info};

use crate::cancel::Cancellation;
use crate::document::{ConfigDocument, TaskList};
use crate::error::{ProvisionError, Result};
use crate::fetch::Fetch;
use crate::resolve::{normalize_origin, resolve_include};

/// Load `origin` and everything it includes into one ordered task list.
pub async fn load_config(fetcher: &dyn Fetch, cancel: &Cancellation, origin: &str) -> Result<TaskList> {
    let mut traversal = Traversal {
        fetcher,
        cancel,
        visited: HashSet::new(),
    };
    let tasks = traversal.visit(normalize_origin(origin)).await?;
    info!(
        origin,
        documents = traversal.visited.len(),
        tasks = tasks.len(),
        "config loaded"
    );
    Ok(tasks)
}

struct Traversal<'a> {
    fetcher: &'a dyn Fetch,
    cancel: &'a Cancellation,
    visited: HashSet<String>,
}

impl<'a> Traversal<'a> {
    fn visit(&mut self, origin: String) -> BoxFuture<'_, Result<TaskList>> {
        async move {
            if !self.visited.insert(origin.clone()) {
                return Err(ProvisionError::CircularInclude { origin });
            }
            self.cancel.check().map_err(ProvisionError::Cancelled)?;

            debug!(origin = %origin, "fetching config document");
            let data = self
                .fetcher
                .fetch(self.cancel, &origin)
                .await
                .map_err(|source| ProvisionError::Fetch {
                    origin: origin.clone(),
                    source,
                })?;
            let doc = ConfigDocument::parse(&origin, &data)?;

            let mut tasks = TaskList::new();
            for target in &doc.include {
                let resolved = resolve_include(&origin, target)?;
                debug!(from = %origin, include = %resolved, "following include");
                tasks.extend(self.visit(resolved).await?);
            }
            tasks.extend(doc.tasks);
            Ok(tasks)
        }
        .boxed()
    }
}
