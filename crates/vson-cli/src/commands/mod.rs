//! Command implementations for the CLI.

mod add;
mod read;
mod scan;
mod watch;

pub use add::cmd_add;
pub use read::cmd_read;
pub use scan::cmd_scan;
pub use watch::cmd_watch;
