//! External service clients: log source, sheet storage, preview markup.

pub mod logs;
pub mod markup;
pub mod storage;

pub use logs::{FetchError, LogClient, LogKind};
pub use markup::MarkupClient;
pub use storage::{ListItem, Sheet, SheetClient};
