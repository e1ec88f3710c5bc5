mod activity_log;
mod session_index;

pub use activity_log::ActivityLogStore;
pub use session_index::SessionIndexStore;
