//! Configuration for ws_router_rust

use anyhow::{anyhow, Context, Result};
use mirrorx_core::utils::env::{parse_or, string_or};
use std::net::SocketAddr;

pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub bind_addr: SocketAddr,
    /// Per-connection outbound queue length.
    pub outbound_capacity: usize,
}

impl RouterConfig {
    pub fn from_env() -> Result<Self> {
        let raw_addr = string_or("ROUTER_BIND_ADDR", "0.0.0.0:8081");
        let bind_addr = raw_addr
            .parse()
            .with_context(|| format!("ROUTER_BIND_ADDR is not a socket address: {}", raw_addr))?;

        let outbound_capacity = parse_or("ROUTER_OUTBOUND_CAPACITY", DEFAULT_OUTBOUND_CAPACITY)?;
        if outbound_capacity == 0 {
            return Err(anyhow!("ROUTER_OUTBOUND_CAPACITY must be > 0"));
        }

        Ok(Self {
            bind_addr,
            outbound_capacity,
        })
    }
}
