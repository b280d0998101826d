// src/lib.rs

//! Election result crawler library.
//!
//! Downloads per-location result reports from the NEC statistics portal,
//! extracts them into CSV, merges them into one dataset and aggregates it
//! by administrative level.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
