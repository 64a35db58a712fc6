//! CLI command handlers.

mod context;
mod search;
mod transfer;
mod watch;

pub use context::AppContext;
pub use search::{run_resolve_command, run_search_command};
pub use transfer::{
    run_cancel_command, run_download_command, run_list_command, run_resume_command,
};
