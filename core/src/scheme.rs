//! URL scheme gate.
//!
//! Runs before any cancellation wiring, so a rejected URL never leaves a
//! listener behind on a shared signal.

use url::Url;

use crate::error::Error;

/// Schemes `fetch` will load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Data,
    Http,
    Https,
}

impl Scheme {
    /// Classify `url`, failing with [`Error::UnsupportedScheme`] for anything
    /// outside the allow-set.
    pub fn of(url: &Url) -> Result<Scheme, Error> {
        match url.scheme() {
            "data" => Ok(Scheme::Data),
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::UnsupportedScheme {
                url: url.to_string(),
                scheme: other.to_string(),
            }),
        }
    }
}
