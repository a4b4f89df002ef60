pub mod cache;
pub mod classify;
pub mod clock;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod ontology;
pub mod output;
pub mod pipeline;
pub mod rate_limit;
pub mod retry;
pub mod tracker;
pub mod transport;
