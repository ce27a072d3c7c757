//! Session cookie renewal worker
//!
//! Selects due cookies from the `configs` table, renews them against the
//! authenticated landing page and writes the results back in one
//! transaction per batch.

pub mod config;
pub mod cookie;
pub mod dispatcher;
pub mod driver;
pub mod renewal;

#[cfg(test)]
mod test_support;
