//! Core library for the `h2surge` CLI.
//!
//! This crate drives protocol-level load tests: a [`engine::Pool`] fans a
//! test out across independent connections, each running an
//! admission-controlled request pump with an optional burst/even rate
//! limiter, and merges the per-connection statistics back into totals and
//! averages. The primary user-facing interface is the `h2surge`
//! command-line application; the library surface is what the binary is
//! built from.
//!
//! ```no_run
//! use h2surge::config::TestConfig;
//! use h2surge::engine::Pool;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = Pool::new(TestConfig {
//!     url: "https://localhost:8443".to_string(),
//!     requests: 500,
//!     clients: 4,
//!     streams: 100,
//!     rps: 100,
//!     ..TestConfig::default()
//! })?;
//!
//! pool.connect().await?;
//! pool.run().await?;
//! pool.wait().await;
//!
//! println!("{}", pool.stats_summary());
//! # Ok(())
//! # }
//! ```
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod types;
