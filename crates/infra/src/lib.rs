//! Infrastructure layer: Postgres hold store and the scheduled reaper sweep.

pub mod postgres;
pub mod sweep;

pub use postgres::PostgresHoldStore;
pub use sweep::{run_reaper_sweep, SweepConfig, SweepStats};
