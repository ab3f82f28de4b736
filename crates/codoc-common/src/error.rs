//! Error type shared by the codoc client crates.

/// Errors from decoding wire messages or resolving service URLs.
#[derive(thiserror::Error, Debug)]
pub enum CommonError {
    /// postcard encode/decode failure
    #[error("wire codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Malformed base URL or page origin
    #[error("invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// URL scheme that has no WebSocket counterpart
    #[error("unsupported url scheme `{0}`")]
    UnsupportedScheme(String),

    /// URL that cannot carry path segments (e.g. `mailto:`)
    #[error("url `{0}` cannot be used as a base")]
    CannotBeABase(String),
}
