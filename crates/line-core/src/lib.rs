//! # Line-Core
//!
//! Line provisioning and consistency for a telephony configuration store.
//!
//! This crate provides:
//! - Lines and trunks bound to SIP, SCCP, IAX or custom endpoints
//! - Extension and user links with a single main link per line
//! - Fixes that recompute every denormalized field after a change
//! - Provisioning code and endpoint name generation
//! - A transactional service facade and the `line-fix` resync tool
//!
//! ## Architecture
//!
//! Every storage call takes the caller's `SqliteConnection`, so a change and
//! the fix that follows it share one transaction. [`LineService`] wraps that
//! pattern over a pool.

pub mod error;
pub mod model;
pub mod endpoint;
pub mod caller_id;
pub mod generators;
pub mod store;
pub mod association;
pub mod fix;
pub mod config;
pub mod logging;
pub mod db;
pub mod service;

pub use error::{Error, Result};
pub use model::{Extension, Line, QueueMember, RegisterRef, Trunk, User};
pub use endpoint::{Endpoint, EndpointProtocol, EndpointRef, Protocol};
pub use caller_id::CallerId;
pub use fix::{FixReport, LineFixes, TrunkFixes};
pub use config::LineCoreConfig;
pub use service::{LineService, ResyncSummary};

/// Connect to the configured database and build a service over it.
pub async fn init(config: &LineCoreConfig) -> Result<LineService> {
    let pool = db::connect(&config.database).await?;
    Ok(LineService::new(pool))
}
