pub mod lock;
pub mod signal;
