//! Shared handles threaded through the worker.

use crate::adapter::Adapter;
use crate::db::Database;
use crate::idle::IdleScheduler;
use crate::transport::NetworkTransport;
use larder_storage::CacheStorage;
use std::sync::Arc;

/// The collaborators every cache component needs: storage, the table
/// database over it, the runtime adapter, the network, and the idle
/// scheduler. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct WorkerContext {
    pub storage: Arc<dyn CacheStorage>,
    pub db: Arc<Database>,
    pub adapter: Arc<dyn Adapter>,
    pub transport: Arc<dyn NetworkTransport>,
    pub idle: Arc<IdleScheduler>,
}
