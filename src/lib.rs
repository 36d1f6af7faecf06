// src/lib.rs

pub mod chunk;
pub mod config;
pub mod error;
pub mod export;
pub mod grid;
pub mod interp;
pub mod pipeline;
pub mod render;
pub mod slice;
pub mod summary;
pub mod sweep;
pub mod task;
pub mod vector_field;
