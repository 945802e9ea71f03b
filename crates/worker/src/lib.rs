//! The Larder caching worker core.
//!
//! An offline-first HTTP caching proxy in the shape of a browser service
//! worker: the [`Driver`] interposes on intercepted requests, pins each
//! client to one manifest version for the client's lifetime, serves
//! hash-pinned assets and LRU/TTL-bounded dynamic data out of named response
//! caches, and falls through to the network whenever it abstains.
//!
//! The surrounding runtime supplies the seams in [`adapter`] and
//! [`transport`]: request interception with client identity, the network,
//! time, timers, and lifetime extension for background work.

pub mod adapter;
pub mod app_version;
pub mod assets;
pub mod data;
pub mod db;
pub mod driver;
pub mod error;
pub mod idle;
pub mod lru;
pub mod state;
pub mod transport;
pub mod update;

pub use adapter::{Adapter, EventContext, SystemAdapter, TokioContext};
pub use app_version::AppVersion;
pub use driver::{Driver, DriverConfig, DriverState};
pub use error::{Error, Result};
pub use idle::IdleScheduler;
pub use transport::{NetworkTransport, ReqwestTransport};
pub use update::UpdateSource;
