//! Document source abstraction.
//!
//! A [`DocumentSource`] is where documents live: a local folder, a cloud
//! drive folder, anything that can be listed and fetched. The watcher
//! polls `list()` and diffs; the processor calls `fetch()` when a change
//! event arrives.

use async_trait::async_trait;

use crate::errors::PipelineError;
use crate::models::{FetchedDocument, SourceEntry};

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label used in logs (e.g. `"filesystem"`, `"drive"`).
    fn name(&self) -> &str;

    /// List every item currently in the source folder. Order does not
    /// matter; the watcher diffs by id.
    async fn list(&self) -> Result<Vec<SourceEntry>, PipelineError>;

    /// Fetch raw bytes and the declared mime type for one item.
    async fn fetch(&self, id: &str) -> Result<FetchedDocument, PipelineError>;
}
