pub mod config;
pub mod listeners;
pub mod logging;
pub mod queue;
pub mod sampler;
pub mod task;
pub mod transfer;
pub mod url_name;
