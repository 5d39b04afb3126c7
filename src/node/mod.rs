pub mod cli;
pub mod config;
pub mod node;
pub mod service_handle;

pub use cli::run_cli;
pub use config::ControllerConfig;
pub use node::{Controller, RunningController};
pub use service_handle::ServiceHandle;
