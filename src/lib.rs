// Library exports for the binary, integration tests and reusable components

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod db;
pub mod import;
pub mod issue_number;
pub mod library;
pub mod slug;

// Test support (only available with test-utils feature)
#[cfg(feature = "test-utils")]
pub mod test_support;
