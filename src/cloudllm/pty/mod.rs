//! Process-group-isolated pseudo-terminal sessions for interactive shell use.
//!
//! Grounded on `original_source/reagent/pty/*.py`.

pub mod buffer;
pub mod manager;
pub mod session;

pub use buffer::RollingBuffer;
pub use manager::{PtyManager, SessionSnapshot};
pub use session::{PtySession, SessionStatus};
