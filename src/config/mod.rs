//! Configuration management for seqlog

pub mod settings;

pub use settings::Config;
