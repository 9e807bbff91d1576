//! Validated view of one config repository revision.
//!
//! Repository layout:
//!
//! ```text
//! config                  properties file, must declare `orchestrator.url`
//! parties/<any>.toml      name, url, optional credential_id
//! nodes/<node-name>.toml  labels, optional description, [launch] table
//! ```
//!
//! Parsing is all or nothing: a single broken manifest rejects the whole
//! revision so the pool never runs on a partially applied configuration.

use std::collections::BTreeMap;

use nodeshare_id::{NameError, NodeName, PartyName};
use nodeshare_proto::{Party, PartyError};
use nodeshare_reconcile::SpecHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::repo::FileTree;

pub const CONFIG_FILE: &str = "config";
pub const PARTIES_DIR: &str = "parties";
pub const NODES_DIR: &str = "nodes";
pub const MANIFEST_EXTENSION: &str = ".toml";
pub const ORCHESTRATOR_URL_KEY: &str = "orchestrator.url";

/// Reasons a repository revision is rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no config file found in config repository (expected '{}')", CONFIG_FILE)]
    MissingConfigFile,

    #[error(
        "no base URL specified by config repository (expected key '{}')",
        ORCHESTRATOR_URL_KEY
    )]
    MissingBaseUrl,

    #[error("invalid manifest '{path}': {message}")]
    Manifest { path: String, message: String },

    #[error("invalid node manifest name '{path}': {source}")]
    NodeName {
        path: String,
        #[source]
        source: NameError,
    },

    #[error("invalid party in '{path}': {source}")]
    Party {
        path: String,
        #[source]
        source: PartyError,
    },

    #[error("party '{0}' is declared more than once")]
    DuplicateParty(PartyName),
}

/// Declarative description of one shared node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeDefinition {
    /// Whitespace separated label atoms.
    pub labels: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Opaque parameters handed to the node engine.
    #[serde(default)]
    pub launch: BTreeMap<String, String>,
}

impl NodeDefinition {
    pub fn label_atoms(&self) -> impl Iterator<Item = &str> {
        self.labels.split_whitespace()
    }

    /// Content hash, stable across formatting differences in the manifest.
    pub fn spec_hash(&self) -> SpecHash {
        SpecHash::of(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartyManifest {
    name: String,
    url: String,
    #[serde(default)]
    credential_id: Option<String>,
}

/// Immutable, fully validated repository content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSnapshot {
    config: BTreeMap<String, String>,
    parties: BTreeMap<PartyName, Party>,
    nodes: BTreeMap<NodeName, NodeDefinition>,
}

impl ConfigSnapshot {
    /// Validate a repository revision.
    pub fn parse(tree: &FileTree) -> Result<Self, ConfigError> {
        let config = tree
            .get(CONFIG_FILE)
            .map(parse_properties)
            .ok_or(ConfigError::MissingConfigFile)?;

        if config
            .get(ORCHESTRATOR_URL_KEY)
            .is_none_or(|url| url.is_empty())
        {
            return Err(ConfigError::MissingBaseUrl);
        }

        let mut parties = BTreeMap::new();
        for (file, content) in tree.dir(PARTIES_DIR) {
            if !file.ends_with(MANIFEST_EXTENSION) {
                continue;
            }
            let path = format!("{PARTIES_DIR}/{file}");
            let manifest: PartyManifest =
                toml::from_str(content).map_err(|e| ConfigError::Manifest {
                    path: path.clone(),
                    message: e.message().to_string(),
                })?;
            let party = Party::new(
                &manifest.url,
                &manifest.name,
                manifest.credential_id.as_deref(),
            )
            .map_err(|source| ConfigError::Party {
                path: path.clone(),
                source,
            })?;

            let name = party.name().clone();
            if parties.insert(name.clone(), party).is_some() {
                return Err(ConfigError::DuplicateParty(name));
            }
        }

        let mut nodes = BTreeMap::new();
        for (file, content) in tree.dir(NODES_DIR) {
            let Some(stem) = file.strip_suffix(MANIFEST_EXTENSION) else {
                continue;
            };
            let path = format!("{NODES_DIR}/{file}");
            let name = NodeName::parse(stem).map_err(|source| ConfigError::NodeName {
                path: path.clone(),
                source,
            })?;
            let definition: NodeDefinition =
                toml::from_str(content).map_err(|e| ConfigError::Manifest {
                    path,
                    message: e.message().to_string(),
                })?;
            nodes.insert(name, definition);
        }

        Ok(Self {
            config,
            parties,
            nodes,
        })
    }

    /// Key/value pairs of the `config` file.
    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    /// Base URL under which the orchestrator is reachable.
    pub fn orchestrator_url(&self) -> &str {
        self.config
            .get(ORCHESTRATOR_URL_KEY)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn parties(&self) -> &BTreeMap<PartyName, Party> {
        &self.parties
    }

    pub fn party(&self, name: &PartyName) -> Option<&Party> {
        self.parties.get(name)
    }

    pub fn nodes(&self) -> &BTreeMap<NodeName, NodeDefinition> {
        &self.nodes
    }

    pub fn node(&self, name: &NodeName) -> Option<&NodeDefinition> {
        self.nodes.get(name)
    }
}

/// Properties file: `key=value` or `key: value`, `#` and `!` comments.
fn parse_properties(text: &str) -> BTreeMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| match line.find(['=', ':']) {
            Some(at) => (line[..at].trim(), line[at + 1..].trim()),
            None => (line, ""),
        })
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
