mod handler;
mod model;

pub use handler::{evict_tenant, tenant_status};
pub use model::{EvictResponse, TenantStatus};
