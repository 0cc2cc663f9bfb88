//! Process-level test harness for the `caravel` binary.

pub mod harness;
