//! Process lifecycle plumbing.

mod shutdown;

pub use shutdown::Shutdown;
