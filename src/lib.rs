pub mod common;
pub mod config;
pub mod engine;
pub mod files;
pub mod map_reduce_apps;
pub mod map_reduce_seq;
pub mod mr_distributed;
