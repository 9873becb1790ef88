//! mynah-core: schema inference, reorder buffering, and idempotent change
//! application for a locally mirrored snapshot of a work-tracking service.
//!
//! The mirror is seeded once by the [`loader`] (bulk fetch → schema
//! inference → table creation → seed rows), then kept current by the
//! [`pipeline`]: a producer enqueues [`event::ChangeEvent`]s into the
//! [`buffer`], and a dedicated background thread applies them to the
//! [`store`] in upstream creation-time order.
//!
//! # Conventions
//!
//! - **Errors**: typed [`store::StoreError`] at the storage seam,
//!   `anyhow::Result` with context elsewhere.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).
//!   Every applied, ignored, or failed event produces one outcome line.

pub mod applier;
pub mod buffer;
pub mod config;
pub mod event;
pub mod loader;
pub mod pipeline;
pub mod schema;
pub mod state;
pub mod store;
pub mod value;
