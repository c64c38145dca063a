#![forbid(unsafe_code)]

//! Scrapes a bilibili user's uploads into a spreadsheet and fetches the ones
//! missing from disk with an external downloader.

pub mod cleanup;
pub mod client;
pub mod config;
pub mod downloads;
pub mod listing;
pub mod spreadsheet;
pub mod user_agent;
pub mod wbi;
