// Remote API modules
pub mod client;
pub mod instances;
pub mod session;

// Re-export commonly used items
pub use client::{api_call, build_http_client, set_trace, ApiResponse};
pub use instances::{InstanceQuery, InstanceRegistry, ListFilter};
pub use session::{Session, SessionManager, Token};
