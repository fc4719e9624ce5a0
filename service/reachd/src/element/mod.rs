//! Window/tree element-operator bookkeeping: the operator registry, the
//! tree id pool, per-window connections and request correlation.

pub mod id_pool;
pub mod registry;
pub mod requests;
pub mod window;

pub use id_pool::TreeIdPool;
pub use registry::ElementOperatorRegistry;
pub use requests::{OperatorCallback, OperatorResponse, RequestTable};
pub use window::{WindowConnection, ROOT_TREE_ID};
