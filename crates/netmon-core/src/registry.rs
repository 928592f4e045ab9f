//! Runtime registry: the explicitly constructed object graph.
//!
//! Built once at startup and passed by reference into whatever needs it —
//! never ambient, never a package-level global. HTTP handlers and pollers
//! (external collaborators) reach the telemetry core exclusively through
//! this registry.

use crate::bus::EventBus;
use crate::pipeline::PipelineHandle;
use crate::query::{self, MetricsQuery, QueryError, QueryResponse};
use crate::store::PgPool;

/// The wired telemetry core of one process.
pub struct Runtime {
    /// Event coordination backbone.
    pub bus: EventBus,
    /// Intake handle of the ingestion pipeline.
    pub pipeline: PipelineHandle,
    /// Connection pool shared by the ingestion and query paths.
    pub pool: PgPool,
}

impl Runtime {
    pub fn new(bus: EventBus, pipeline: PipelineHandle, pool: PgPool) -> Self {
        Self {
            bus,
            pipeline,
            pool,
        }
    }

    /// Runs a metrics query against the shared pool.
    pub async fn query(&self, request: MetricsQuery) -> Result<QueryResponse, QueryError> {
        query::execute(&self.pool, request).await
    }
}
