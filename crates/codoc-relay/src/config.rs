use std::net::{IpAddr, SocketAddr};

use clap::Parser;

use crate::error::RelayError;

/// Relay server configuration
#[derive(Debug, Clone, Parser)]
#[command(name = "codoc-relay")]
#[command(about = "Forwards collaborative editing traffic between clients of the same document")]
pub struct RelayConfig {
    /// Interface to listen on
    #[arg(long, env = "CODOC_RELAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "CODOC_RELAY_PORT", default_value_t = 8000)]
    pub port: u16,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl RelayConfig {
    pub fn addr(&self) -> Result<SocketAddr, RelayError> {
        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| RelayError::InvalidAddress {
                value: self.host.clone(),
                source,
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}
