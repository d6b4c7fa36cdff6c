pub(crate) mod auth;
pub(crate) mod core;
pub(crate) mod directory;
pub(crate) mod errors;
pub(crate) mod gateway_events;
pub(crate) mod handle;
pub(crate) mod metrics;
pub(crate) mod realtime;
pub(crate) mod router;

pub use self::core::{GatewayConfig, SfuConfig};
pub use errors::init_tracing;
pub use handle::GatewayHandle;
pub use router::{build_gateway, build_router};
