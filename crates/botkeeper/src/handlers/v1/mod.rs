//! V1 API handlers.

mod env;
mod processes;
mod stats;
mod stream;

pub use env::parse_env;
pub use processes::{
    create_process, delete_process, get_process, list_processes, process_history, process_logs,
    process_metrics, restart_process, start_process, stop_process, update_process,
};
pub use stats::stats;
pub use stream::{UPDATE_EVENT, stream_processes};
