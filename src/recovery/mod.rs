// Connectivity recovery: health probes, the state machine, and the reset actions it may take.
pub mod controller;
pub mod handoff;
pub mod monitor;
pub mod probe;
