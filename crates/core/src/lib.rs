//! Attention sensing pipeline.
//!
//! A background capture thread reads camera frames, runs a two-stage
//! face → eye detection pass, reduces it to an attention signal and hands
//! the result to a single-threaded presentation consumer that drives media
//! playback.

pub mod attention;
pub mod capture;
pub mod detection;
pub mod pipeline;
pub mod presentation;
pub mod shared;
