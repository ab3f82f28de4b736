//! Client-side service URL resolution.
//!
//! The relay and the export backend live on the backend origin. In
//! production that is the page's own origin; in local development the
//! frontend dev server runs on port 3000 and the backend on 8000.

use url::Url;

use crate::error::CommonError;

/// Environment variable that overrides the backend base URL.
pub const BACKEND_URL_ENV: &str = "CODOC_BACKEND_BASE_URL";

pub const DEV_FRONTEND_PORT: u16 = 3000;
pub const DEV_BACKEND_PORT: u16 = 8000;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientConfig {
    /// Explicit backend base URL; wins over origin-derived resolution.
    pub backend_base_url: Option<Url>,
}

impl ClientConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, CommonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CommonError> {
        let backend_base_url = lookup(BACKEND_URL_ENV)
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(|raw| Url::parse(&raw))
            .transpose()?;
        Ok(Self { backend_base_url })
    }

    /// Backend base URL for a page served from `page_origin`.
    pub fn backend_base_url(&self, page_origin: &str) -> Result<Url, CommonError> {
        if let Some(url) = &self.backend_base_url {
            return Ok(url.clone());
        }
        let mut url = Url::parse(page_origin)?;
        if url.port() == Some(DEV_FRONTEND_PORT) {
            // Only fails for cannot-be-a-base URLs, which have no port.
            let _ = url.set_port(Some(DEV_BACKEND_PORT));
        }
        url.set_path("/");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }

    /// Relay WebSocket URL for `doc_id`, as seen from `page_origin`.
    pub fn relay_url(&self, page_origin: &str, doc_id: &str) -> Result<Url, CommonError> {
        relay_url(&self.backend_base_url(page_origin)?, doc_id)
    }
}

/// `http(s)://host[/prefix]` to `ws(s)://host[/prefix]/relay/{doc_id}`.
pub fn relay_url(base: &Url, doc_id: &str) -> Result<Url, CommonError> {
    let scheme = match base.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(CommonError::UnsupportedScheme(other.to_string())),
    };

    let mut url = base.clone();
    url.set_scheme(scheme)
        .map_err(|_| CommonError::UnsupportedScheme(base.scheme().to_string()))?;
    url.set_query(None);
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| CommonError::CannotBeABase(base.to_string()))?
        .pop_if_empty()
        .push("relay")
        .push(doc_id);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_port_is_remapped() {
        let config = ClientConfig::default();
        let url = config.backend_base_url("http://localhost:3000/doc/abc?x=1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/");

        let url = config.backend_base_url("https://codoc.example.org").unwrap();
        assert_eq!(url.as_str(), "https://codoc.example.org/");

        let url = config.backend_base_url("http://10.0.0.2:5173").unwrap();
        assert_eq!(url.port(), Some(5173));
    }

    #[test]
    fn test_env_override_wins() {
        let config = ClientConfig::from_lookup(|key| {
            (key == BACKEND_URL_ENV).then(|| "https://api.example.org/codoc/".to_string())
        })
        .unwrap();
        let url = config.relay_url("http://localhost:3000", "notes").unwrap();
        assert_eq!(url.as_str(), "wss://api.example.org/codoc/relay/notes");

        assert_eq!(ClientConfig::from_lookup(|_| Some("  ".into())).unwrap(), ClientConfig::default());
        assert!(ClientConfig::from_lookup(|_| Some("not a url".into())).is_err());
    }

    #[test]
    fn test_relay_url_schemes() {
        let base = Url::parse("http://localhost:8000").unwrap();
        assert_eq!(
            relay_url(&base, "my doc").unwrap().as_str(),
            "ws://localhost:8000/relay/my%20doc"
        );

        let base = Url::parse("ftp://files.example.org").unwrap();
        assert!(matches!(
            relay_url(&base, "x"),
            Err(CommonError::UnsupportedScheme(_))
        ));
    }
}
