pub mod memory;
pub mod ssh;
pub mod types;

pub use memory::{ExecutedCommand, MemoryExecutor};
pub use ssh::{SshExecutor, SshOptions};
pub use types::{CommandOutput, RemoteExecutor};
