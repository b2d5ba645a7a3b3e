//! Source watcher: polls the document source and publishes change events.
//!
//! Each poll cycle lists the source, diffs against the last-seen map
//! (`source_id` → modification time), and publishes one [`ChangeEvent`]
//! per difference. Cycles never overlap: the loop awaits one cycle before
//! sleeping toward the next.
//!
//! The last-seen map is rebuilt at startup from the vector store's known
//! sources, so changes and deletions that happened while the process was
//! down are picked up on the first cycle. Publishing is optimistic
//! (the map updates when the event is published, not when processing
//! finishes); a processing failure clears the entry via the
//! [`failure_subscriber`](SourceWatcher::failure_subscriber) so the next
//! cycle re-emits the event. The idempotent processor makes the resulting
//! at-least-once delivery harmless.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::bus::{BusMessage, MessageBus, Subscriber, TOPIC_CHANGES, TOPIC_FAILED};
use crate::errors::PipelineError;
use crate::models::{ChangeEvent, ChangeKind};
use crate::source::DocumentSource;
use crate::store::VectorStore;

#[derive(Debug, Clone)]
struct SeenEntry {
    name: String,
    mime_type: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub created: usize,
    pub modified: usize,
    pub deleted: usize,
}

pub struct SourceWatcher {
    source: Arc<dyn DocumentSource>,
    bus: Arc<MessageBus>,
    last_seen: Arc<Mutex<HashMap<String, SeenEntry>>>,
}

impl SourceWatcher {
    pub fn new(source: Arc<dyn DocumentSource>, bus: Arc<MessageBus>) -> Self {
        Self {
            source,
            bus,
            last_seen: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Rebuild the last-seen map from what the store already holds.
    pub async fn seed_from_store(&self, store: &dyn VectorStore) -> Result<(), PipelineError> {
        let known = store.sources().await?;
        let mut seen = self.last_seen.lock().unwrap();
        seen.clear();
        for source in known {
            seen.insert(
                source.source_id,
                SeenEntry {
                    name: source.name,
                    mime_type: String::new(),
                    modified: source.modified,
                },
            );
        }
        info!(count = seen.len(), "watcher seeded from store");
        Ok(())
    }

    /// One discrete poll cycle: list, diff, publish. A cycle that fails
    /// before diffing is reported on the failed-document topic as a
    /// [`BusMessage::PollFailed`] in addition to the returned error.
    pub async fn poll(&self) -> Result<PollStats, PipelineError> {
        let (stats, events) = match self.scan().await {
            Ok(scanned) => scanned,
            Err(err) => {
                self.bus.publish(
                    TOPIC_FAILED,
                    BusMessage::PollFailed {
                        source: self.source.name().to_string(),
                        error: err.to_string(),
                    },
                );
                return Err(err);
            }
        };
        for event in events {
            self.bus.publish(TOPIC_CHANGES, BusMessage::Change(event));
        }
        if stats != PollStats::default() {
            info!(
                created = stats.created,
                modified = stats.modified,
                deleted = stats.deleted,
                "poll cycle published changes"
            );
        }
        Ok(stats)
    }

    /// List and diff without publishing. Used by one-shot sync, where the
    /// caller processes the returned events itself.
    pub async fn scan(&self) -> Result<(PollStats, Vec<ChangeEvent>), PipelineError> {
        let entries = self.source.list().await?;
        let mut stats = PollStats::default();
        let mut events = Vec::new();

        {
            let mut seen = self.last_seen.lock().unwrap();

            for entry in &entries {
                let kind = match seen.get(&entry.id) {
                    None => Some(ChangeKind::Created),
                    Some(prev) if prev.modified != entry.modified => Some(ChangeKind::Modified),
                    Some(_) => None,
                };
                if let Some(kind) = kind {
                    match kind {
                        ChangeKind::Created => stats.created += 1,
                        ChangeKind::Modified => stats.modified += 1,
                        ChangeKind::Deleted => {}
                    }
                    events.push(ChangeEvent {
                        source_id: entry.id.clone(),
                        name: entry.name.clone(),
                        mime_type: entry.mime_type.clone(),
                        kind,
                        modified: entry.modified,
                    });
                    seen.insert(
                        entry.id.clone(),
                        SeenEntry {
                            name: entry.name.clone(),
                            mime_type: entry.mime_type.clone(),
                            modified: entry.modified,
                        },
                    );
                }
            }

            let current_ids: std::collections::HashSet<&str> =
                entries.iter().map(|e| e.id.as_str()).collect();
            let deleted_ids: Vec<String> = seen
                .keys()
                .filter(|id| !current_ids.contains(id.as_str()))
                .cloned()
                .collect();
            for id in deleted_ids {
                let prev = seen.remove(&id).expect("id came from the map");
                stats.deleted += 1;
                events.push(ChangeEvent {
                    source_id: id,
                    name: prev.name,
                    mime_type: prev.mime_type,
                    kind: ChangeKind::Deleted,
                    modified: prev.modified,
                });
            }
        }

        Ok((stats, events))
    }

    /// Subscriber for the failed-document topic: clears the last-seen entry
    /// so the next cycle re-publishes the change.
    pub fn failure_subscriber(&self) -> Arc<dyn Subscriber> {
        Arc::new(FailureReset {
            last_seen: Arc::clone(&self.last_seen),
        })
    }

    /// Poll on a timer until `shutdown` flips. A failing cycle is logged
    /// and the loop continues; the next cycle retries from the same state.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if let Err(err) = self.poll().await {
                error!(%err, "poll cycle failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    info!("watcher stopping");
                    return;
                }
            }
        }
    }
}

struct FailureReset {
    last_seen: Arc<Mutex<HashMap<String, SeenEntry>>>,
}

#[async_trait]
impl Subscriber for FailureReset {
    async fn handle(&self, message: &BusMessage) -> Result<(), PipelineError> {
        if let BusMessage::Failed {
            source_id,
            retryable: true,
            ..
        } = message
        {
            self.last_seen.lock().unwrap().remove(source_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FetchedDocument, SourceEntry};
    use chrono::TimeZone;

    struct ScriptedSource {
        listings: Mutex<Vec<Vec<SourceEntry>>>,
    }

    #[async_trait]
    impl DocumentSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn list(&self) -> Result<Vec<SourceEntry>, PipelineError> {
            let mut listings = self.listings.lock().unwrap();
            if listings.is_empty() {
                return Ok(Vec::new());
            }
            Ok(listings.remove(0))
        }
        async fn fetch(&self, _id: &str) -> Result<FetchedDocument, PipelineError> {
            unreachable!("watcher never fetches")
        }
    }

    fn entry(id: &str, ts: i64) -> SourceEntry {
        SourceEntry {
            id: id.to_string(),
            name: format!("{id}.txt"),
            mime_type: "text/plain".to_string(),
            modified: Utc.timestamp_opt(ts, 0).single().unwrap(),
        }
    }

    fn watcher_with(listings: Vec<Vec<SourceEntry>>) -> SourceWatcher {
        SourceWatcher::new(
            Arc::new(ScriptedSource {
                listings: Mutex::new(listings),
            }),
            Arc::new(MessageBus::new()),
        )
    }

    #[tokio::test]
    async fn first_cycle_reports_everything_created() {
        let watcher = watcher_with(vec![vec![entry("a", 100), entry("b", 100)]]);
        let stats = watcher.poll().await.unwrap();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.modified, 0);
        assert_eq!(stats.deleted, 0);
    }

    #[tokio::test]
    async fn unchanged_listing_is_quiet() {
        let listing = vec![entry("a", 100)];
        let watcher = watcher_with(vec![listing.clone(), listing]);
        watcher.poll().await.unwrap();
        let stats = watcher.poll().await.unwrap();
        assert_eq!(stats, PollStats::default());
    }

    #[tokio::test]
    async fn detects_modification_and_deletion() {
        let watcher = watcher_with(vec![
            vec![entry("a", 100), entry("b", 100)],
            vec![entry("a", 200)],
        ]);
        watcher.poll().await.unwrap();
        let stats = watcher.poll().await.unwrap();
        assert_eq!(stats.modified, 1);
        assert_eq!(stats.deleted, 1);
    }

    #[tokio::test]
    async fn failure_event_causes_republish() {
        let watcher = watcher_with(vec![
            vec![entry("a", 100)],
            vec![entry("a", 100)],
        ]);
        watcher.poll().await.unwrap();

        let reset = watcher.failure_subscriber();
        reset
            .handle(&BusMessage::Failed {
                source_id: "a".to_string(),
                error: "embed failed".to_string(),
                retryable: true,
            })
            .await
            .unwrap();

        let stats = watcher.poll().await.unwrap();
        assert_eq!(stats.created, 1);
    }

    #[tokio::test]
    async fn failed_poll_cycle_is_published_as_error_event() {
        struct DownSource;

        #[async_trait]
        impl DocumentSource for DownSource {
            fn name(&self) -> &str {
                "down"
            }
            async fn list(&self) -> Result<Vec<SourceEntry>, PipelineError> {
                Err(PipelineError::Transient("listing unavailable".to_string()))
            }
            async fn fetch(&self, _id: &str) -> Result<FetchedDocument, PipelineError> {
                unreachable!("watcher never fetches")
            }
        }

        struct PollFailures {
            seen: Mutex<Vec<(String, String)>>,
            notify: tokio::sync::Notify,
        }

        #[async_trait]
        impl Subscriber for PollFailures {
            async fn handle(&self, message: &BusMessage) -> Result<(), PipelineError> {
                if let BusMessage::PollFailed { source, error } = message {
                    self.seen
                        .lock()
                        .unwrap()
                        .push((source.clone(), error.clone()));
                    self.notify.notify_one();
                }
                Ok(())
            }
        }

        let bus = Arc::new(MessageBus::new());
        let failures = Arc::new(PollFailures {
            seen: Mutex::new(Vec::new()),
            notify: tokio::sync::Notify::new(),
        });
        bus.subscribe(TOPIC_FAILED, Arc::clone(&failures) as Arc<dyn Subscriber>);

        let watcher = SourceWatcher::new(Arc::new(DownSource), Arc::clone(&bus));
        let err = watcher.poll().await.unwrap_err();
        assert!(err.is_retryable());

        tokio::time::timeout(Duration::from_secs(2), failures.notify.notified())
            .await
            .expect("poll failure never reached the bus");
        let seen = failures.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "down");
        assert!(seen[0].1.contains("listing unavailable"));
    }

    #[tokio::test]
    async fn seed_marks_known_sources_as_seen() {
        use crate::store_memory::MemoryStore;
        let store = MemoryStore::new();
        store
            .replace_source(
                &crate::models::SourceRecord {
                    source_id: "a".to_string(),
                    name: "a.txt".to_string(),
                    content_hash: "h".to_string(),
                    context_type: "docs".to_string(),
                    modified: Utc.timestamp_opt(100, 0).single().unwrap(),
                },
                &[],
                &[],
            )
            .await
            .unwrap();

        let watcher = watcher_with(vec![vec![entry("a", 100), entry("b", 100)]]);
        watcher.seed_from_store(&store).await.unwrap();

        let stats = watcher.poll().await.unwrap();
        // "a" is already indexed; only "b" is new.
        assert_eq!(stats.created, 1);
        assert_eq!(stats.modified, 0);
    }
}
