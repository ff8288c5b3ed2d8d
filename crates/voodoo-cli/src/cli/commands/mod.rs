//! CLI command handlers, one file per command.

mod completions;
mod fetch;
mod queue;

pub use completions::run_completions;
pub use fetch::{run_fetch, FetchArgs};
pub use queue::{run_queue, QueueArgs};

#[cfg(test)]
pub(crate) use fetch::{destination_in, format_progress};
