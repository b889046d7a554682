mod search;
mod session_impl;

pub use search::{FIND_OBJECTS_BATCH_SIZE, ObjectSearch};
pub use session_impl::Session;
