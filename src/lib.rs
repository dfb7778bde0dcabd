//! Offline-first personal time tracker for the terminal. Tracks time against
//! named tasks, keeps every record on disk first, and replicates to a sync
//! server in the background when logged in.

pub mod cli;
pub mod remote;
pub mod storage;
pub mod timer;
pub mod utils;
