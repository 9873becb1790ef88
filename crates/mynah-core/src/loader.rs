//! Initial bulk load: seed the mirror and freeze each entity type's schema.
//!
//! Runs once at startup (when enabled) before live event consumption.
//! Work proceeds in four stages, each a full barrier across entity types,
//! because row building depends on every schema being final:
//!
//! 1. fetch all records per entity type (bounded worker fan-out);
//! 2. infer one schema per entity type;
//! 3. create the mirror tables;
//! 4. build and insert the seed rows.
//!
//! A finalize step then publishes the surviving schemas into
//! [`MirrorState`] in one shot. That publish is the only place schemas are
//! written, and it is what flips an entity type to "ready" for the reorder
//! buffer. A failure in any stage removes that entity type from the later
//! stages but never aborts the others.

use std::time::{Duration, Instant};

use crate::config::MirrorConfig;
use crate::schema::{EntitySchema, Record};
use crate::state::MirrorState;
use crate::store::MirrorStore;
use crate::value::Value;

/// Fetches full entity datasets from the upstream service. The production
/// implementation wraps the remote API client; tests and the CLI use
/// file-backed stand-ins.
pub trait RecordFetcher: Send + Sync {
    /// Fetch every available record for one entity type, paging by
    /// `page_size` and stopping at `limit` records.
    ///
    /// # Errors
    ///
    /// May fail per entity type; the loader isolates the failure.
    fn fetch_all(
        &self,
        entity_type: &str,
        page_size: usize,
        limit: usize,
    ) -> anyhow::Result<Vec<Record>>;
}

/// Per-entity success detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityLoad {
    pub entity_type: String,
    pub rows: usize,
    pub columns: usize,
}

/// Per-entity failure detail, isolated from the rest of the load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityFailure {
    pub entity_type: String,
    pub stage: &'static str,
    pub error: String,
}

/// Report returned after a bulk load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub loaded: Vec<EntityLoad>,
    pub failed: Vec<EntityFailure>,
    pub elapsed: Duration,
}

impl LoadReport {
    /// Total seed rows inserted across all loaded entity types.
    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.loaded.iter().map(|l| l.rows).sum()
    }
}

/// Staged bulk-load pipeline.
pub struct BulkLoader<'a> {
    config: &'a MirrorConfig,
    fetcher: &'a dyn RecordFetcher,
    store: &'a dyn MirrorStore,
    state: &'a MirrorState,
}

impl<'a> BulkLoader<'a> {
    #[must_use]
    pub const fn new(
        config: &'a MirrorConfig,
        fetcher: &'a dyn RecordFetcher,
        store: &'a dyn MirrorStore,
        state: &'a MirrorState,
    ) -> Self {
        Self {
            config,
            fetcher,
            store,
            state,
        }
    }

    /// Run all stages to completion and publish the surviving schemas.
    pub fn run(&self) -> LoadReport {
        let start = Instant::now();
        let mut report = LoadReport::default();

        // Stage 1: fetch.
        let datasets = self.fetch_stage(&mut report);

        // Stage 2: infer one schema per entity type.
        let inferred = infer_stage(datasets);

        // Stage 3: create tables.
        let created = self.create_stage(inferred, &mut report);

        // Stage 4: build and insert rows.
        let seeded = self.insert_stage(created, &mut report);

        // Finalize: publish all surviving schemas at once; only now do
        // these entity types start accepting live events.
        for (entity_type, schema, rows) in seeded {
            let columns = schema.len();
            self.state.publish(&entity_type, schema);
            tracing::info!(%entity_type, rows, columns, "entity type loaded");
            report.loaded.push(EntityLoad {
                entity_type,
                rows,
                columns,
            });
        }

        report.elapsed = start.elapsed();
        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            total_rows = report.total_rows(),
            elapsed_ms = report.elapsed.as_millis(),
            "bulk load complete"
        );
        report
    }

    fn fetch_stage(&self, report: &mut LoadReport) -> Vec<(String, Vec<Record>)> {
        let workers = self.config.effective_fetch_workers();
        let mut datasets = Vec::new();

        for chunk in self.config.entity_types.chunks(workers) {
            std::thread::scope(|scope| {
                let handles: Vec<_> = chunk
                    .iter()
                    .map(|entity_type| {
                        scope.spawn(move || {
                            tracing::info!(%entity_type, "fetching records");
                            self.fetcher.fetch_all(
                                entity_type,
                                self.config.fetch_page_size,
                                self.config.fetch_limit,
                            )
                        })
                    })
                    .collect();

                for (entity_type, handle) in chunk.iter().zip(handles) {
                    match handle.join() {
                        Ok(Ok(records)) => datasets.push((entity_type.clone(), records)),
                        Ok(Err(error)) => {
                            record_failure(report, entity_type, "fetch", &error.to_string());
                        }
                        Err(_) => {
                            record_failure(report, entity_type, "fetch", "fetch worker panicked");
                        }
                    }
                }
            });
        }
        datasets
    }

    fn create_stage(
        &self,
        inferred: Vec<(String, Vec<Record>, EntitySchema)>,
        report: &mut LoadReport,
    ) -> Vec<(String, Vec<Record>, EntitySchema)> {
        let mut created = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = inferred
                .into_iter()
                .map(|(entity_type, records, schema)| {
                    scope.spawn(move || {
                        let result = self.store.create_table(&entity_type, &schema);
                        (entity_type, records, schema, result)
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok((entity_type, records, schema, Ok(()))) => {
                        created.push((entity_type, records, schema));
                    }
                    Ok((entity_type, _, _, Err(error))) => {
                        record_failure(report, &entity_type, "create-table", &error.to_string());
                    }
                    Err(_) => {
                        record_failure(report, "<unknown>", "create-table", "worker panicked");
                    }
                }
            }
        });
        created
    }

    fn insert_stage(
        &self,
        created: Vec<(String, Vec<Record>, EntitySchema)>,
        report: &mut LoadReport,
    ) -> Vec<(String, EntitySchema, usize)> {
        let mut seeded = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = created
                .into_iter()
                .map(|(entity_type, records, schema)| {
                    scope.spawn(move || {
                        let rows: Vec<Vec<Value>> = records
                            .iter()
                            .filter_map(|record| record_row(&schema, record))
                            .collect();
                        let inserted = self.store.insert_rows(&entity_type, &rows);
                        (entity_type, schema, inserted)
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok((entity_type, schema, Ok(rows))) => {
                        seeded.push((entity_type, schema, rows));
                    }
                    Ok((entity_type, _, Err(error))) => {
                        record_failure(report, &entity_type, "insert", &error.to_string());
                    }
                    Err(_) => {
                        // Entity name is lost with the panicked thread.
                        record_failure(report, "<unknown>", "insert", "insert worker panicked");
                    }
                }
            }
        });
        seeded
    }
}

/// Stage 2 runs inference per entity type on scoped workers; inference is
/// pure, so there is nothing to fail.
fn infer_stage(datasets: Vec<(String, Vec<Record>)>) -> Vec<(String, Vec<Record>, EntitySchema)> {
    let mut inferred = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = datasets
            .into_iter()
            .map(|(entity_type, records)| {
                scope.spawn(move || {
                    let schema = EntitySchema::infer(&records);
                    (entity_type, records, schema)
                })
            })
            .collect();

        for handle in handles {
            if let Ok(result) = handle.join() {
                inferred.push(result);
            }
        }
    });
    inferred
}

/// Build one seed row in schema column order, or `None` when the record
/// carries no non-null value for any schema column (such rows are absent
/// from the mirror, not all-null).
fn record_row(schema: &EntitySchema, record: &Record) -> Option<Vec<Value>> {
    use crate::schema::sanitize_column_name;
    use std::collections::HashMap;

    let by_sanitized: HashMap<&str, &serde_json::Value> = record
        .iter()
        .map(|(name, value)| (sanitize_column_name(name), value))
        .collect();

    let row: Vec<Value> = schema
        .columns()
        .map(|(column, column_type)| {
            by_sanitized
                .get(column)
                .map_or(Value::Null, |raw| Value::from_record_json(raw).coerce(column_type))
        })
        .collect();

    if row.iter().all(Value::is_null) {
        return None;
    }
    Some(row)
}

fn record_failure(report: &mut LoadReport, entity_type: &str, stage: &'static str, error: &str) {
    tracing::error!(entity_type, stage, error, "bulk load failed for entity type");
    report.failed.push(EntityFailure {
        entity_type: entity_type.to_owned(),
        stage,
        error: error.to_owned(),
    });
}
