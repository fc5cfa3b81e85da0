//! Cache key constants and builders for Consulta
//!
//! Every key is namespaced by the configured prefix so several deployments can
//! share one Redis.
//!
//! # Key Patterns
//!
//! - `{ns}:worker:{worker_id}` - Availability record of one worker
//! - `{ns}:workers` - Set of worker ids that may have a record
//! - `{ns}:quality:{worker_id}` - Last network quality assessment
//!
//! # Example
//!
//! ```
//! use consulta_cache::keys;
//!
//! assert_eq!(keys::worker_key("consulta", 42), "consulta:worker:42");
//! assert_eq!(keys::workers_index_key("consulta"), "consulta:workers");
//! ```

/// Prefix for worker availability records
pub const WORKER_PREFIX: &str = "worker";

/// Name of the worker index set
pub const WORKERS_INDEX: &str = "workers";

/// Prefix for quality assessments
pub const QUALITY_PREFIX: &str = "quality";

/// Build the key of a worker's availability record
pub fn worker_key(namespace: &str, worker_id: i64) -> String {
    format!("{}:{}:{}", namespace, WORKER_PREFIX, worker_id)
}

/// Build the key of the worker index set
pub fn workers_index_key(namespace: &str) -> String {
    format!("{}:{}", namespace, WORKERS_INDEX)
}

/// Build the key of a worker's quality assessment
///
/// # Example
///
/// ```
/// use consulta_cache::keys::quality_key;
///
/// assert_eq!(quality_key("staging", 7), "staging:quality:7");
/// ```
pub fn quality_key(namespace: &str, worker_id: i64) -> String {
    format!("{}:{}:{}", namespace, QUALITY_PREFIX, worker_id)
}
