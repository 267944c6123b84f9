use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;

/// Path suffixes that different integrations append to the same site URL.
/// A site registered as `https://example.com/wp-json` is the same source as
/// `https://example.com/`.
const KNOWN_SUFFIXES: &[&str] = &["/wp-json", "/wp-admin", "/index.php", "/wp-login.php"];

/// The canonical comparison key of a source site.
///
/// Every `source` column in the store holds a `SourceKey`, never the raw URL a
/// webhook or configuration supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct SourceKey(String);

impl SourceKey {
    pub fn normalize(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::MissingSourceUrl);
        }

        let mut key = match Url::parse(trimmed) {
            // Url lowercases scheme and host for us. Default ports are dropped as well.
            Ok(mut url) if url.has_host() => {
                url.set_query(None);
                url.set_fragment(None);
                url.to_string()
            }
            _ => trimmed.to_owned(),
        };

        loop {
            let before = key.len();
            while key.ends_with('/') {
                key.pop();
            }
            for suffix in KNOWN_SUFFIXES {
                if key.len() > suffix.len() && key.ends_with(suffix) {
                    key.truncate(key.len() - suffix.len());
                }
            }
            if key.len() == before {
                break;
            }
        }

        if key.is_empty() {
            return Err(ConfigError::MissingSourceUrl);
        }

        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the URL of a collection endpoint hosted by this source.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.0, path.trim_start_matches('/'))
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
