use crate::gateway::GatewayError;
use eth_keystore::decrypt_key;
use fuels::{
    crypto::SecretKey,
    prelude::derivation::DEFAULT_DERIVATION_PATH,
};
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf, GatewayError> {
    let home = std::env::var("HOME").map_err(|_| {
        GatewayError::NoWallet("HOME environment variable not set".to_string())
    })?;
    Ok(PathBuf::from(home).join(".fuel").join("wallets"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf, GatewayError> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Keystore profiles (`*.wallet` files) in `dir`, sorted by name.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>, GatewayError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| {
        GatewayError::NoWallet(format!(
            "failed to read wallet directory {}: {e}",
            dir.display()
        ))
    })?;
    let mut wallets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            GatewayError::NoWallet(format!("failed to read wallet entry: {e}"))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("wallet") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        wallets.push(WalletDescriptor::new(name, path.clone()));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor, GatewayError> {
    list_wallets(dir)?
        .into_iter()
        .find(|w| w.name == name)
        .ok_or_else(|| GatewayError::UnknownAccount(name.to_string()))
}

/// Decrypts a keystore holding either a raw secret key or a mnemonic phrase.
pub fn decrypt_secret(
    descriptor: &WalletDescriptor,
    password: &str,
) -> Result<SecretKey, GatewayError> {
    let unlock_error = |reason: &str| GatewayError::Unlock {
        name: descriptor.name.clone(),
        reason: reason.to_string(),
    };

    let secret = decrypt_key(&descriptor.path, password.as_bytes())
        .map_err(|_| unlock_error("invalid password"))?;

    if let Ok(secret_key) = SecretKey::try_from(secret.as_slice()) {
        return Ok(secret_key);
    }

    if let Ok(mnemonic) = std::str::from_utf8(&secret)
        && mnemonic.split_whitespace().count() >= 12
    {
        return SecretKey::new_from_mnemonic_phrase_with_path(
            mnemonic,
            DEFAULT_DERIVATION_PATH,
        )
        .map_err(|e| unlock_error(&e.to_string()));
    }

    Err(unlock_error("unsupported key material"))
}
