//! Periodic background work for the learning core: practice rounds and
//! external knowledge ingestion, each driven by a [`CycleRunner`].

pub mod cycles;
pub mod runner;

pub use cycles::{IngestionCycle, PracticeCycle};
pub use runner::{Cycle, CycleRunner};
