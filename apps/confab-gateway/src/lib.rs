#![forbid(unsafe_code)]

mod server;

pub use server::{build_gateway, build_router, init_tracing, GatewayConfig, GatewayHandle, SfuConfig};
