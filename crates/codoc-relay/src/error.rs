use miette::Diagnostic;
use thiserror::Error;

/// Relay server errors
#[derive(Debug, Error, Diagnostic)]
pub enum RelayError {
    #[error("invalid listen address {value:?}")]
    #[diagnostic(
        code(relay::address),
        help("set CODOC_RELAY_HOST to an IP address such as 0.0.0.0")
    )]
    InvalidAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("failed to bind to {addr}")]
    #[diagnostic(code(relay::bind))]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated unexpectedly")]
    #[diagnostic(code(relay::serve))]
    Serve {
        #[source]
        source: std::io::Error,
    },
}
