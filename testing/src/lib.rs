//! Shared test doubles for Glossa integration tests.
//!
//! - [`ScriptedBackend`]: a backend that replays scripted results
//! - [`FakeContextHost`]: an in-memory execution context
//! - [`RecordingSleeper`]: captures retry delays without waiting
//!
//! Helpers such as [`engine_with`] assemble a full [`engine::Engine`] over
//! these doubles with immediate retries.

mod fixtures;

pub use fixtures::*;
