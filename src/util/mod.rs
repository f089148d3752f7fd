//! Small shared helpers.
//!
//! - **Base URL validation**: refuse to send session cookies over plain HTTP
//! - **Task panics**: turn a panicking background future into an error value
//! - **Text**: terminal-safe, width-limited rendering of story titles

mod base_url;
mod task;
mod text;

pub use base_url::{validate_base_url, BaseUrlError};
pub use task::catch_task_panic;
pub use text::{strip_control_chars, truncate_to_width};
