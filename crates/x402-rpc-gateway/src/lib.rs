//! Payment-gated JSON-RPC reverse proxy.
//!
//! Sits in front of an upstream RPC node and charges clients in on-chain
//! stablecoin: a client either presents a batch credit token (one credit per
//! call) or pays with an x402 signed transfer authorization and receives a
//! fresh token in exchange.

pub mod config;
pub mod middleware;
pub mod proxy;
pub mod replay;

pub use config::GatewayConfig;
pub use middleware::{GateConfig, PaymentGate, Upstream};
pub use proxy::RpcProxy;
