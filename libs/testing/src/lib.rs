//! Config repository fixtures.
//!
//! Tests describe a repository as a map from relative path to file content.
//! [`ConfigRepoFixture::dummy`] is the reference pool used across suites:
//! two parties and two nodes.

use std::collections::BTreeMap;

/// URL the dummy repository pretends to live at.
pub const DUMMY_REPO_URL: &str = "https://git.acme.com/node-sharing/config.git";

/// Orchestrator base URL declared by the dummy repository.
pub const DUMMY_ORCHESTRATOR_URL: &str = "https://dummy.test";

/// Builder for an in-memory config repository.
#[derive(Debug, Clone, Default)]
pub struct ConfigRepoFixture {
    files: BTreeMap<String, String>,
}

impl ConfigRepoFixture {
    /// An empty repository with no files at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The reference repository: `jenkins1`/`jenkins2` parties,
    /// `win1.acme.com` ("windows w2k12") and `solaris1.acme.com`
    /// ("solaris11 sparc") nodes.
    pub fn dummy() -> Self {
        Self::empty()
            .with_config(&[("orchestrator.url", DUMMY_ORCHESTRATOR_URL)])
            .with_party("jenkins1", "https://jenkins1.acme.com", None)
            .with_party("jenkins2", "https://jenkins2.acme.com", None)
            .with_node("win1.acme.com", "windows w2k12")
            .with_node("solaris1.acme.com", "solaris11 sparc")
    }

    /// Replace the `config` file with the given properties.
    pub fn with_config(mut self, entries: &[(&str, &str)]) -> Self {
        let mut body = String::from("# node sharing pool configuration\n");
        for (key, value) in entries {
            body.push_str(&format!("{key}={value}\n"));
        }
        self.files.insert("config".to_string(), body);
        self
    }

    /// Add or replace a party manifest.
    pub fn with_party(mut self, name: &str, url: &str, credential_id: Option<&str>) -> Self {
        let mut body = format!("name = \"{name}\"\nurl = \"{url}\"\n");
        if let Some(credential_id) = credential_id {
            body.push_str(&format!("credential_id = \"{credential_id}\"\n"));
        }
        self.files.insert(format!("parties/{name}.toml"), body);
        self
    }

    /// Add or replace a node manifest with default launch parameters.
    pub fn with_node(self, name: &str, labels: &str) -> Self {
        let host = name.to_string();
        self.with_node_launch(name, labels, &[("host", host.as_str()), ("port", "22")])
    }

    /// Add or replace a node manifest with explicit launch parameters.
    pub fn with_node_launch(mut self, name: &str, labels: &str, launch: &[(&str, &str)]) -> Self {
        let mut body = format!("labels = \"{labels}\"\n\n[launch]\n");
        for (key, value) in launch {
            body.push_str(&format!("{key} = \"{value}\"\n"));
        }
        self.files.insert(format!("nodes/{name}.toml"), body);
        self
    }

    /// Rename a node manifest without touching its content.
    pub fn rename_node(mut self, from: &str, to: &str) -> Self {
        if let Some(body) = self.files.remove(&format!("nodes/{from}.toml")) {
            self.files.insert(format!("nodes/{to}.toml"), body);
        }
        self
    }

    /// Add or replace an arbitrary file.
    pub fn with_file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.to_string());
        self
    }

    /// Remove a file.
    pub fn without(mut self, path: &str) -> Self {
        self.files.remove(path);
        self
    }

    /// Remove a node manifest.
    pub fn without_node(self, name: &str) -> Self {
        self.without(&format!("nodes/{name}.toml"))
    }

    /// Relative path to content map.
    pub fn files(&self) -> &BTreeMap<String, String> {
        &self.files
    }

    pub fn into_files(self) -> BTreeMap<String, String> {
        self.files
    }
}
