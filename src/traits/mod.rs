//! Capability traits injected into the funding core.

pub mod counter;

pub use counter::CounterStore;
