//! The always-running event ingestion loop.
//!
//! One dedicated background thread drains the reorder buffer and drives
//! the change applier. No per-event failure terminates the loop: store
//! errors are logged and the event is consumed (not retried), duplicate
//! effects are logged at low severity, and zero-row applications are
//! surfaced as warnings. Every event produces exactly one outcome log
//! line; nothing is swallowed silently.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::applier::{Applier, ApplyOutcome};
use crate::buffer::ReorderBuffer;
use crate::state::MirrorState;
use crate::store::MirrorStore;

/// Counters accumulated by the ingestion loop; returned when the buffer
/// is closed and drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Events that changed at least one row.
    pub applied: usize,
    /// Duplicate creates/deletes whose effect already matched the mirror.
    pub ignored: usize,
    /// Events consumed with zero effect: store errors and zero-row
    /// updates.
    pub failed: usize,
}

/// The ingestion pipeline: reorder buffer in, mirror-store writes out.
pub struct IngestPipeline {
    buffer: Arc<ReorderBuffer>,
    state: Arc<MirrorState>,
    store: Arc<dyn MirrorStore>,
}

impl IngestPipeline {
    #[must_use]
    pub fn new(
        buffer: Arc<ReorderBuffer>,
        state: Arc<MirrorState>,
        store: Arc<dyn MirrorStore>,
    ) -> Self {
        Self {
            buffer,
            state,
            store,
        }
    }

    /// Spawn the consumer loop on a named background thread.
    ///
    /// # Errors
    ///
    /// Returns an error only if the OS refuses to spawn the thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<PipelineStats>> {
        thread::Builder::new()
            .name("mynah-ingest".to_owned())
            .spawn(move || self.run())
    }

    /// Run the consumer loop on the current thread until the buffer is
    /// closed and drained. The long-running service never reaches the
    /// return; it exists for one-shot ingestion and tests.
    pub fn run(&self) -> PipelineStats {
        let applier = Applier::new(self.store.as_ref());
        let mut stats = PipelineStats::default();

        while let Some(event) = self
            .buffer
            .dequeue_next_ready(|entity_type| self.state.is_ready(entity_type))
        {
            // The buffer only releases events whose entity type is ready,
            // so a missing schema here means the state was torn down
            // under us.
            let Some(schema) = self.state.schema(&event.entity_type) else {
                tracing::error!(
                    entity_type = %event.entity_type,
                    object_id = %event.object_id,
                    "no schema for released event"
                );
                stats.failed += 1;
                continue;
            };

            match applier.apply(&schema, &event) {
                Ok(outcome) => {
                    log_outcome(&outcome);
                    if outcome.ignored {
                        stats.ignored += 1;
                    } else if outcome.rows_affected > 0 {
                        stats.applied += 1;
                    } else {
                        stats.failed += 1;
                    }
                }
                Err(error) => {
                    // Failed-but-consumed: no retry, or a poison event
                    // would wedge the loop forever.
                    tracing::error!(
                        entity_type = %event.entity_type,
                        object_id = %event.object_id,
                        action = %event.action(),
                        error = %error,
                        "change application failed"
                    );
                    stats.failed += 1;
                }
            }
        }

        tracing::debug!(?stats, "ingestion loop drained");
        stats
    }
}

fn log_outcome(outcome: &ApplyOutcome) {
    let user = outcome.user.as_deref().unwrap_or("unknown");
    if outcome.ignored {
        tracing::debug!(
            entity_type = %outcome.entity_type,
            object_id = %outcome.object_id,
            action = %outcome.action,
            user,
            "duplicate change ignored"
        );
    } else if outcome.rows_affected > 0 {
        tracing::info!(
            entity_type = %outcome.entity_type,
            object_id = %outcome.object_id,
            action = %outcome.action,
            fields = ?outcome.fields,
            rows = outcome.rows_affected,
            user,
            "change applied"
        );
    } else {
        tracing::warn!(
            entity_type = %outcome.entity_type,
            object_id = %outcome.object_id,
            action = %outcome.action,
            fields = ?outcome.fields,
            user,
            "change affected no rows"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ChangeEvent, ChangePayload};
    use crate::schema::{EntitySchema, Record};
    use crate::store::SqliteMirrorStore;
    use serde_json::json;
    use std::time::Duration;

    fn created(object_id: &str, ts: i64) -> ChangeEvent {
        ChangeEvent {
            entity_type: "Defect".to_owned(),
            object_id: object_id.to_owned(),
            created_ts_ms: ts,
            user: None,
            payload: ChangePayload::Created {
                state: [("Name".to_owned(), json!("x"))].into_iter().collect(),
            },
        }
    }

    fn ready_world() -> (Arc<ReorderBuffer>, Arc<MirrorState>, Arc<SqliteMirrorStore>) {
        let record: Record = json!({"ObjectUUID": "seed", "Name": "seed"})
            .as_object()
            .expect("record")
            .clone();
        let schema = EntitySchema::infer(&[record]);

        let store =
            Arc::new(SqliteMirrorStore::in_memory(&["Defect".to_owned()]).expect("store"));
        store.create_table("Defect", &schema).expect("create table");

        let state = Arc::new(MirrorState::new());
        state.publish("Defect", schema);

        let buffer = Arc::new(ReorderBuffer::new(Duration::ZERO));
        (buffer, state, store)
    }

    #[test]
    fn drains_and_counts_outcomes() {
        let (buffer, state, store) = ready_world();

        buffer.enqueue(created("u-1", 100));
        buffer.enqueue(created("u-1", 101)); // duplicate create -> ignored
        buffer.enqueue(ChangeEvent {
            entity_type: "Defect".to_owned(),
            object_id: "u-404".to_owned(),
            created_ts_ms: 102,
            user: None,
            payload: ChangePayload::Recycled, // absent -> ignored
        });
        buffer.close();

        let pipeline = IngestPipeline::new(buffer, state, Arc::clone(&store));
        let stats = pipeline.run();

        assert_eq!(
            stats,
            PipelineStats {
                applied: 1,
                ignored: 2,
                failed: 0
            }
        );
        assert_eq!(store.count_where_key("Defect", "u-1").expect("count"), 1);
    }

    #[test]
    fn background_thread_applies_while_producer_enqueues() {
        let (buffer, state, store) = ready_world();
        let pipeline =
            IngestPipeline::new(Arc::clone(&buffer), state, Arc::clone(&store));
        let handle = pipeline.spawn().expect("spawn");

        buffer.enqueue(created("u-1", 100));
        buffer.enqueue(created("u-2", 101));
        buffer.close();

        let stats = handle.join().expect("join");
        assert_eq!(stats.applied, 2);
        assert_eq!(store.count_where_key("Defect", "u-2").expect("count"), 1);
    }
}
