use fuels::prelude::ContractId;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
};
use thiserror::Error;

pub const DEPLOYMENTS_ROOT: &str = ".deployments";
const DEPLOYMENTS_FILE: &str = "deployments.json";

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("deployment records at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed deployment records at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    NoCompatible(String),
    #[error("deployment record contains an invalid contract id: {0}")]
    InvalidContractId(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeploymentEnv {
    Dev,
    Test,
    Local,
}

impl DeploymentEnv {
    pub fn dir_name(self) -> &'static str {
        match self {
            DeploymentEnv::Dev => "dev",
            DeploymentEnv::Test => "test",
            DeploymentEnv::Local => "local",
        }
    }
}

impl fmt::Display for DeploymentEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentEnv::Dev => "Devnet",
            DeploymentEnv::Test => "Testnet",
            DeploymentEnv::Local => "Local",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub deployed_at: String,
    pub contract_id: String,
    /// SHA-256 of the ABI JSON the contract was deployed with.
    pub abi_hash: String,
    pub network_url: String,
}

impl DeploymentRecord {
    pub fn is_compatible_with_hash(&self, hash: &str) -> bool {
        self.abi_hash == hash
    }

    pub fn contract_id(&self) -> Result<ContractId, DeploymentError> {
        let trimmed = self.contract_id.trim_start_matches("fuel");
        ContractId::from_str(trimmed)
            .map_err(|_| DeploymentError::InvalidContractId(self.contract_id.clone()))
    }
}

/// Read-only view over `.deployments/<env>/deployments.json`.
#[derive(Debug)]
pub struct DeploymentStore {
    env: DeploymentEnv,
    path: PathBuf,
}

impl DeploymentStore {
    pub fn new(env: DeploymentEnv) -> Self {
        Self::at(Path::new(DEPLOYMENTS_ROOT), env)
    }

    pub fn at(root: &Path, env: DeploymentEnv) -> Self {
        Self {
            env,
            path: root.join(env.dir_name()).join(DEPLOYMENTS_FILE),
        }
    }

    /// A missing file means nothing was deployed yet.
    pub fn load(&self) -> Result<Vec<DeploymentRecord>, DeploymentError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = fs::read(&self.path).map_err(|source| DeploymentError::Io {
            path: self.path.clone(),
            source,
        })?;
        if data.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&data).map_err(|source| DeploymentError::Json {
            path: self.path.clone(),
            source,
        })
    }

    /// Most recent record whose ABI matches, or an explanation listing what is recorded.
    pub fn latest_compatible(
        &self,
        abi_hash: &str,
        url: &str,
    ) -> Result<DeploymentRecord, DeploymentError> {
        let records = self.load()?;
        if let Some(record) = records
            .iter()
            .rev()
            .find(|r| r.is_compatible_with_hash(abi_hash))
        {
            return Ok(record.clone());
        }
        Err(DeploymentError::NoCompatible(self.summary(
            &records, abi_hash, url,
        )))
    }

    fn summary(&self, records: &[DeploymentRecord], abi_hash: &str, url: &str) -> String {
        let env = self.env;
        let mut message = format!(
            "No compatible lottery deployment recorded for {env} at {url}.\n\nRecorded deployments for {env}:",
        );
        if records.is_empty() {
            message.push_str("\n  (none recorded)");
        }
        for record in records {
            message.push_str(&format!(
                "\n  {} - {} @ {} (abi {})",
                record.deployed_at,
                record.contract_id,
                record.network_url,
                hash_preview(&record.abi_hash),
            ));
        }
        message.push_str(&format!(
            "\n\nClient ABI hash: {}\nDeployment records file: {}",
            hash_preview(abi_hash),
            self.path.display()
        ));
        message.push_str("\n\nPass --contract-id to target a contract directly.");
        message
    }
}

fn hash_preview(hash: &str) -> String {
    let mut chars = hash.chars();
    let mut preview: String = chars.by_ref().take(16).collect();
    if chars.next().is_some() {
        preview.push_str("...");
    }
    preview
}
