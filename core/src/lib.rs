pub mod calendar;
pub mod cleaning_stage;
pub mod cohort;
pub mod config;
pub mod csv_io;
pub mod derivation_stage;
pub mod engine;
pub mod error;
pub mod event;
pub mod export_stage;
pub mod funnel;
pub mod generation_stage;
pub mod ingest_stage;
pub mod kpi;
pub mod ledger;
pub mod mrr_bridge;
pub mod rng;
pub mod segmentation;
pub mod snapshot;
pub mod stage;
pub mod store;
pub mod types;
pub mod user_tables;
pub mod validation_stage;
