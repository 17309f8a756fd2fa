//! Durable result storage backends.

pub mod local;

pub use local::LocalResultStorage;
