//! Client-side producer API.

pub mod producer;

pub use producer::LogProducer;
