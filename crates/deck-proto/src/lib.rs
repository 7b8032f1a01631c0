//! Album catalog and playback state shared by the songdeck binaries.

pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod fetch;
pub mod index;
pub mod platform;
pub mod protocol;
pub mod state;
