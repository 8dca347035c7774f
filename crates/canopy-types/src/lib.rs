//! Shared data model for the Canopy placement engine.
//!
//! Every type here is plain data: serializable with serde, cheap to clone,
//! and free of behaviour that needs I/O. The crates above it (discovery,
//! placement, scheduler, engine) exchange these types.
//!
//! # Modules
//!
//! - **`workspace`**: hierarchical workspace paths (`root:org:team`)
//! - **`cluster`**: cluster targets, taints, locations, running workloads
//! - **`workload`**: the thing being placed
//! - **`policy`**: placement policies (tolerations, spread, affinity, rules)
//! - **`decision`**: evaluation results, scored targets, placement decisions
//! - **`selector`**: Kubernetes-style label selectors
//! - **`quantity`**: resource quantity parsing (`500m`, `4Gi`)
//! - **`context`**: cancellation and deadlines for long operations

pub mod cluster;
pub mod context;
pub mod decision;
pub mod error;
pub mod policy;
pub mod quantity;
pub mod selector;
pub mod workload;
pub mod workspace;

pub use cluster::*;
pub use context::{Interrupted, OpContext};
pub use decision::*;
pub use error::{ModelError, ModelResult};
pub use policy::*;
pub use quantity::{ResourceAmounts, ResourceList, parse_quantity, parse_resources};
pub use selector::{LabelSelector, SelectorOperator, SelectorRequirement};
pub use workload::Workload;
pub use workspace::*;

/// Label and annotation maps. Ordered so that equality, hashing of
/// decisions and serialized output are deterministic.
pub type Labels = std::collections::BTreeMap<String, String>;
