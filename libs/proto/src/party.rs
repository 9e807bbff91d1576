//! Remote client identity.

use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use nodeshare_id::{NameError, PartyName};
use thiserror::Error;
use url::Url;

use crate::namespace::namespace_for;

/// Reasons a party descriptor is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PartyError {
    #[error("invalid party name: {0}")]
    Name(#[from] NameError),

    #[error("invalid party url '{url}': {reason}")]
    Url { url: String, reason: String },
}

/// A remote client system authorized to borrow nodes from the pool.
///
/// Two parties are equal when name, normalized URL and credential reference
/// are equal. A party belongs to a single config repository: the endpoint
/// derived from the first repository URL it is asked about is cached for the
/// party's lifetime.
#[derive(Debug, Clone)]
pub struct Party {
    url: Url,
    name: PartyName,
    credential_id: Option<String>,
    endpoint: OnceLock<Url>,
}

impl Party {
    /// Build a party, validating the name and normalizing the URL so that it
    /// always ends with a slash.
    pub fn new(url: &str, name: &str, credential_id: Option<&str>) -> Result<Self, PartyError> {
        let name = PartyName::parse(name)?;

        let mut raw = url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }

        let url = Url::parse(&raw).map_err(|e| PartyError::Url {
            url: raw.clone(),
            reason: e.to_string(),
        })?;

        if url.cannot_be_a_base() || url.host_str().is_none() {
            return Err(PartyError::Url {
                url: raw,
                reason: "not a hierarchical URL with a host".to_string(),
            });
        }

        let credential_id = credential_id
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self {
            url,
            name,
            credential_id,
            endpoint: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &PartyName {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn credential_id(&self) -> Option<&str> {
        self.credential_id.as_deref()
    }

    /// Endpoint on the party serving resources of the given repository.
    pub fn endpoint(&self, config_repo_url: &str) -> &Url {
        self.endpoint.get_or_init(|| {
            let namespace = namespace_for(config_repo_url);
            self.url
                .join(&format!("{namespace}/"))
                .unwrap_or_else(|_| self.url.clone())
        })
    }
}

impl PartialEq for Party {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.url == other.url
            && self.credential_id == other.credential_id
    }
}

impl Eq for Party {}

impl Hash for Party {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.url.as_str().hash(state);
        self.credential_id.hash(state);
    }
}

impl std::fmt::Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.url)
    }
}
