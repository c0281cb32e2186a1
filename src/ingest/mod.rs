//! Frame sources.
//!
//! Camera capture and video decoding are external concerns. The built-in
//! source is synthetic (`stub://camera<N>`) and produces `Frame`s of the
//! configured size for bench runs and tests.

pub mod synthetic;

pub use synthetic::{SourceStats, SyntheticConfig, SyntheticSource};
