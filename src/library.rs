mod manager;

pub use manager::{IssueGraphInsert, IssueInsert, LibraryError, LibraryManager};
