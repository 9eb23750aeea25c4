//! Connection to the user's signing accounts.
//!
//! The gateway owns the unlocked accounts and the currently active identity.
//! Identity changes are published through a `watch` channel, so a listener that
//! falls behind only ever sees the latest account.

use crate::{
    contract::{
        SigningAgent,
        SigningRequest,
    },
    short_identity,
    wallets::{
        decrypt_secret,
        find_wallet,
    },
};
use fuels::{
    accounts::ViewOnlyAccount,
    prelude::{
        Provider,
        Wallet,
        private_key::PrivateKeySigner,
    },
    types::Identity,
};
use rpassword::prompt_password;
use std::{
    future::Future,
    path::PathBuf,
    sync::{
        OnceLock,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
};
use thiserror::Error;
use tokio::sync::{
    mpsc,
    oneshot,
    watch,
};
use tracing::{
    info,
    warn,
};

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum GatewayError {
    #[error("no signing agent available: {0}")]
    NoWallet(String),
    #[error("a connection prompt is already outstanding")]
    PromptPending,
    #[error("unable to unlock wallet '{name}': {reason}")]
    Unlock { name: String, reason: String },
    #[error("unknown account '{0}'")]
    UnknownAccount(String),
}

/// Something that can turn a profile name into an unlocked signing account.
pub trait AccountSource: Send + Sync + 'static {
    type Signer: Clone + Send + Sync + 'static;

    /// Profiles to unlock, in order. The first one becomes the active account.
    fn profiles(&self) -> Vec<String>;

    fn unlock(
        &self,
        profile: &str,
    ) -> impl Future<Output = Result<(Identity, Self::Signer), GatewayError>> + Send;
}

#[derive(Clone, Debug)]
pub struct Account<S> {
    pub name: String,
    pub identity: Identity,
    pub signer: S,
}

pub struct LedgerGateway<S: AccountSource> {
    source: S,
    accounts: OnceLock<Vec<Account<S::Signer>>>,
    connecting: AtomicBool,
    current: watch::Sender<Option<Identity>>,
}

struct ConnectGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, GatewayError> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| GatewayError::PromptPending)?;
        Ok(Self { flag })
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl<S: AccountSource> LedgerGateway<S> {
    pub fn new(source: S) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            source,
            accounts: OnceLock::new(),
            connecting: AtomicBool::new(false),
            current,
        }
    }

    /// Unlocks every configured profile and activates the first one.
    ///
    /// Once connected, further calls return the active identity without prompting.
    pub async fn connect(&self) -> Result<Identity, GatewayError> {
        if let Some(identity) = self.current_identity() {
            return Ok(identity);
        }
        let _guard = ConnectGuard::acquire(&self.connecting)?;

        let profiles = self.source.profiles();
        if profiles.is_empty() {
            return Err(GatewayError::NoWallet(
                "no wallet profiles configured".to_string(),
            ));
        }

        let mut accounts = Vec::with_capacity(profiles.len());
        for name in profiles {
            let (identity, signer) = self.source.unlock(&name).await?;
            info!(account = %name, identity = %short_identity(&identity), "account unlocked");
            accounts.push(Account {
                name,
                identity,
                signer,
            });
        }

        let active = accounts[0].identity.clone();
        if self.accounts.set(accounts).is_err() {
            warn!("accounts were already unlocked; keeping the first set");
        }
        self.publish(active.clone());
        Ok(active)
    }

    pub fn current_identity(&self) -> Option<Identity> {
        self.current.borrow().clone()
    }

    pub fn on_identity_change(&self) -> watch::Receiver<Option<Identity>> {
        self.current.subscribe()
    }

    pub fn accounts(&self) -> &[Account<S::Signer>] {
        self.accounts.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn active_account(&self) -> Option<&Account<S::Signer>> {
        let identity = self.current_identity()?;
        self.accounts().iter().find(|a| a.identity == identity)
    }

    pub fn switch_account(&self, name: &str) -> Result<Identity, GatewayError> {
        let accounts = self.connected_accounts()?;
        let account = accounts
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| GatewayError::UnknownAccount(name.to_string()))?;
        self.publish(account.identity.clone());
        Ok(account.identity.clone())
    }

    /// Cycles to the next unlocked account, wrapping around.
    pub fn next_account(&self) -> Result<Identity, GatewayError> {
        let accounts = self.connected_accounts()?;
        let current = self.current_identity();
        let position = accounts
            .iter()
            .position(|a| Some(&a.identity) == current.as_ref())
            .unwrap_or(0);
        let next = &accounts[(position + 1) % accounts.len()];
        info!(account = %next.name, "switching account");
        self.publish(next.identity.clone());
        Ok(next.identity.clone())
    }

    fn connected_accounts(&self) -> Result<&[Account<S::Signer>], GatewayError> {
        match self.accounts.get() {
            Some(accounts) if !accounts.is_empty() => Ok(accounts),
            _ => Err(GatewayError::NoWallet("not connected".to_string())),
        }
    }

    fn publish(&self, identity: Identity) {
        self.current.send_if_modified(|slot| {
            if slot.as_ref() == Some(&identity) {
                return false;
            }
            *slot = Some(identity);
            true
        });
    }
}

/// forc-wallet keystore profiles, unlocked with a terminal password prompt.
pub struct KeystoreSource {
    dir: PathBuf,
    profiles: Vec<String>,
    provider: Provider,
}

impl KeystoreSource {
    pub fn new(dir: PathBuf, profiles: Vec<String>, provider: Provider) -> Self {
        Self {
            dir,
            profiles,
            provider,
        }
    }
}

impl AccountSource for KeystoreSource {
    type Signer = Wallet;

    fn profiles(&self) -> Vec<String> {
        self.profiles.clone()
    }

    async fn unlock(&self, profile: &str) -> Result<(Identity, Wallet), GatewayError> {
        let descriptor = find_wallet(&self.dir, profile)?;
        let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
        let password = tokio::task::spawn_blocking(move || prompt_password(prompt))
            .await
            .map_err(|e| GatewayError::Unlock {
                name: profile.to_string(),
                reason: format!("password prompt aborted: {e}"),
            })?
            .map_err(|e| GatewayError::Unlock {
                name: profile.to_string(),
                reason: format!("failed to read password: {e}"),
            })?;

        let secret = decrypt_secret(&descriptor, &password)?;
        let wallet = Wallet::new(PrivateKeySigner::new(secret), self.provider.clone());
        Ok((Identity::Address(wallet.address()), wallet))
    }
}

/// A signing confirmation waiting for the user's answer.
#[derive(Debug)]
pub struct SigningPrompt {
    pub request: SigningRequest,
    reply: oneshot::Sender<bool>,
}

impl SigningPrompt {
    pub fn respond(self, approved: bool) {
        if self.reply.send(approved).is_err() {
            warn!(kind = %self.request.kind, "signing answer arrived after the write was dropped");
        }
    }
}

/// Forwards signing requests to the UI loop and waits for the y/n answer.
#[derive(Clone, Debug)]
pub struct PromptAgent {
    prompts: mpsc::UnboundedSender<SigningPrompt>,
}

impl PromptAgent {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SigningPrompt>) {
        let (prompts, rx) = mpsc::unbounded_channel();
        (Self { prompts }, rx)
    }
}

impl SigningAgent for PromptAgent {
    async fn authorize(&self, request: SigningRequest) -> bool {
        let (reply, answer) = oneshot::channel();
        if self.prompts.send(SigningPrompt { request, reply }).is_err() {
            warn!("no UI is listening for signing prompts; declining");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}
