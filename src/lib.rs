// src/lib.rs

//! adwatch: classifieds search poller

pub mod error;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
