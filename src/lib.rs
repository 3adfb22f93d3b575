// src/lib.rs
pub mod config;
pub mod utils;
pub mod pipelines;
pub mod cli;
pub mod reference;
pub use cli::{AmbiguousPolicy, Arguments, SelectionMode};
