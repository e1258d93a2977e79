// Command implementations split by subcommand.
pub mod query;
pub mod serve;

pub use query::{run_location, run_status};
pub use serve::run_serve;
