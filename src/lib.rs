//! Headless story pagination for NewsBlur-style readers.
//!
//! The [`loader`] module is the core; [`transport`] and [`storage`] supply
//! the network and offline-cache collaborators it is built against.

pub mod config;
pub mod loader;
pub mod storage;
pub mod story;
pub mod transport;
pub mod util;
