use crate::lottery_types::Lottery;
use futures::future::BoxFuture;
use fuels::{
    accounts::{
        ViewOnlyAccount,
        wallet::Wallet,
    },
    prelude::{
        AssetId,
        CallParameters,
        ContractId,
        Execution,
        Provider,
        TxPolicies,
    },
    types::{
        Identity,
        errors::{
            Error as FuelError,
            transaction::Reason,
        },
    },
};
use std::{
    fmt,
    future::Future,
};
use thiserror::Error;
use tracing::{
    debug,
    info,
};

pub const DEFAULT_SAFE_SCRIPT_GAS_LIMIT: u64 = 29_000_000;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TxKind {
    Enter,
    PickWinner,
    ClaimPrize,
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxKind::Enter => "enter",
            TxKind::PickWinner => "pick winner",
            TxKind::ClaimPrize => "claim prize",
        };
        write!(f, "{name}")
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ContractError {
    #[error("no ledger provider is reachable: {0}")]
    RpcUnavailable(String),
    #[error("read reverted against the current contract state: {0}")]
    CallReverted(String),
    /// Only a declined signature.
    #[error("transaction was not signed: {0}")]
    TxRejected(String),
    /// Refused before it reached the chain: funding, encoding or the node's pool.
    #[error("transaction could not be submitted: {0}")]
    SubmissionFailed(String),
    #[error("transaction reverted on chain: {0}")]
    TxReverted(String),
}

impl ContractError {
    fn from_read(err: FuelError) -> Self {
        match err {
            FuelError::Provider(msg) | FuelError::IO(msg) => Self::RpcUnavailable(msg),
            FuelError::Transaction(Reason::Failure { reason, .. }) => {
                Self::CallReverted(reason)
            }
            other => Self::CallReverted(other.to_string()),
        }
    }

    fn from_write(err: FuelError) -> Self {
        match err {
            FuelError::Provider(msg) | FuelError::IO(msg) => Self::RpcUnavailable(msg),
            FuelError::Transaction(Reason::Failure { reason, .. }) => {
                Self::TxReverted(reason)
            }
            other => Self::SubmissionFailed(other.to_string()),
        }
    }
}

/// What the signing agent is asked to approve before a write is submitted.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningRequest {
    pub kind: TxKind,
    pub contract_id: ContractId,
    pub amount: u64,
    /// The account whose key signs the transaction.
    pub signer: Identity,
}

pub trait SigningAgent: Send + Sync {
    /// Resolves to `false` when the user declines.
    fn authorize(&self, request: SigningRequest) -> impl Future<Output = bool> + Send;
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Receipt {
    pub tx_id: Option<String>,
}

/// A submitted transaction that has not settled yet.
pub trait TxHandle: Send + 'static {
    /// Known as soon as the transaction is submitted.
    fn tx_id(&self) -> Option<String>;

    fn await_confirmation(
        self,
    ) -> impl Future<Output = Result<Receipt, ContractError>> + Send;
}

/// Typed surface over the lottery contract, bound to one signing account.
pub trait LotteryContract: Clone + Send + Sync + 'static {
    type Handle: TxHandle;

    fn get_manager(&self) -> impl Future<Output = Result<Identity, ContractError>> + Send;

    /// The zero address while no winner has been drawn.
    fn get_winner(&self) -> impl Future<Output = Result<Identity, ContractError>> + Send;

    fn is_complete(&self) -> impl Future<Output = Result<bool, ContractError>> + Send;

    fn is_claimed(&self) -> impl Future<Output = Result<bool, ContractError>> + Send;

    fn latest_block_height(
        &self,
    ) -> impl Future<Output = Result<u32, ContractError>> + Send;

    fn enter(
        &self,
        stake: u64,
    ) -> impl Future<Output = Result<Self::Handle, ContractError>> + Send;

    fn pick_winner(
        &self,
    ) -> impl Future<Output = Result<Self::Handle, ContractError>> + Send;

    fn claim_prize(
        &self,
    ) -> impl Future<Output = Result<Self::Handle, ContractError>> + Send;
}

pub struct FuelTxHandle {
    tx_id: String,
    confirmation: BoxFuture<'static, Result<Receipt, ContractError>>,
}

impl TxHandle for FuelTxHandle {
    fn tx_id(&self) -> Option<String> {
        Some(self.tx_id.clone())
    }

    async fn await_confirmation(self) -> Result<Receipt, ContractError> {
        self.confirmation.await
    }
}

#[derive(Clone)]
pub struct FuelLottery<A> {
    instance: Lottery<Wallet>,
    provider: Provider,
    agent: A,
    signer: Identity,
    contract_id: ContractId,
    base_asset_id: AssetId,
    safe_script_gas_limit: u64,
}

impl<A> FuelLottery<A> {
    pub fn new(
        contract_id: ContractId,
        wallet: Wallet,
        agent: A,
        base_asset_id: AssetId,
        safe_script_gas_limit: u64,
    ) -> Self {
        let provider = wallet.provider().clone();
        let signer = Identity::Address(wallet.address());
        Self {
            instance: Lottery::new(contract_id, wallet),
            provider,
            agent,
            signer,
            contract_id,
            base_asset_id,
            safe_script_gas_limit,
        }
    }

    fn script_policies(&self) -> TxPolicies {
        TxPolicies::default().with_script_gas_limit(self.safe_script_gas_limit)
    }

    fn signing_request(&self, kind: TxKind, amount: u64) -> SigningRequest {
        SigningRequest {
            kind,
            contract_id: self.contract_id,
            amount,
            signer: self.signer.clone(),
        }
    }
}

impl<A: SigningAgent> FuelLottery<A> {
    async fn authorize(&self, kind: TxKind, amount: u64) -> Result<(), ContractError> {
        let approved = self
            .agent
            .authorize(self.signing_request(kind, amount))
            .await;
        if approved {
            Ok(())
        } else {
            info!(%kind, "signing request declined");
            Err(ContractError::TxRejected("declined by user".to_string()))
        }
    }
}

impl<A> LotteryContract for FuelLottery<A>
where
    A: SigningAgent + Clone + 'static,
{
    type Handle = FuelTxHandle;

    async fn get_manager(&self) -> Result<Identity, ContractError> {
        let response = self
            .instance
            .methods()
            .get_manager()
            .with_tx_policies(self.script_policies())
            .simulate(Execution::realistic())
            .await
            .map_err(ContractError::from_read)?;
        Ok(response.value)
    }

    async fn get_winner(&self) -> Result<Identity, ContractError> {
        let response = self
            .instance
            .methods()
            .get_winner()
            .with_tx_policies(self.script_policies())
            .simulate(Execution::realistic())
            .await
            .map_err(ContractError::from_read)?;
        Ok(response.value)
    }

    async fn is_complete(&self) -> Result<bool, ContractError> {
        let response = self
            .instance
            .methods()
            .is_complete()
            .with_tx_policies(self.script_policies())
            .simulate(Execution::realistic())
            .await
            .map_err(ContractError::from_read)?;
        Ok(response.value)
    }

    async fn is_claimed(&self) -> Result<bool, ContractError> {
        let response = self
            .instance
            .methods()
            .claimed()
            .with_tx_policies(self.script_policies())
            .simulate(Execution::realistic())
            .await
            .map_err(ContractError::from_read)?;
        Ok(response.value)
    }

    async fn latest_block_height(&self) -> Result<u32, ContractError> {
        self.provider
            .latest_block_height()
            .await
            .map_err(ContractError::from_read)
    }

    async fn enter(&self, stake: u64) -> Result<FuelTxHandle, ContractError> {
        self.authorize(TxKind::Enter, stake).await?;
        let call = CallParameters::new(stake, self.base_asset_id, self.safe_script_gas_limit);
        let submitted = self
            .instance
            .methods()
            .enter()
            .call_params(call)
            .map_err(ContractError::from_write)?
            .with_tx_policies(self.script_policies())
            .submit()
            .await
            .map_err(ContractError::from_write)?;
        let tx_id = hex::encode(submitted.tx_id());
        debug!(stake, "enter submitted");
        Ok(FuelTxHandle {
            tx_id,
            confirmation: Box::pin(async move {
                let response = submitted
                    .response()
                    .await
                    .map_err(ContractError::from_write)?;
                Ok(Receipt {
                    tx_id: response.tx_id.map(hex::encode),
                })
            }),
        })
    }

    async fn pick_winner(&self) -> Result<FuelTxHandle, ContractError> {
        self.authorize(TxKind::PickWinner, 0).await?;
        let submitted = self
            .instance
            .methods()
            .pick_winner()
            .with_tx_policies(self.script_policies())
            .submit()
            .await
            .map_err(ContractError::from_write)?;
        let tx_id = hex::encode(submitted.tx_id());
        debug!("pick winner submitted");
        Ok(FuelTxHandle {
            tx_id,
            confirmation: Box::pin(async move {
                let response = submitted
                    .response()
                    .await
                    .map_err(ContractError::from_write)?;
                Ok(Receipt {
                    tx_id: response.tx_id.map(hex::encode),
                })
            }),
        })
    }

    async fn claim_prize(&self) -> Result<FuelTxHandle, ContractError> {
        self.authorize(TxKind::ClaimPrize, 0).await?;
        let submitted = self
            .instance
            .methods()
            .claim_prize()
            .with_tx_policies(self.script_policies())
            .submit()
            .await
            .map_err(ContractError::from_write)?;
        let tx_id = hex::encode(submitted.tx_id());
        debug!("claim prize submitted");
        Ok(FuelTxHandle {
            tx_id,
            confirmation: Box::pin(async move {
                let response = submitted
                    .response()
                    .await
                    .map_err(ContractError::from_write)?;
                Ok(Receipt {
                    tx_id: response.tx_id.map(hex::encode),
                })
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn from_read__maps_provider_failures_to_unavailable() {
        // given
        let err = FuelError::Provider("connection refused".to_string());

        // when
        let mapped = ContractError::from_read(err);

        // then
        assert_eq!(
            mapped,
            ContractError::RpcUnavailable("connection refused".to_string())
        );
    }

    #[test]
    fn from_write__refusals_before_the_chain_are_submission_failures() {
        // given
        let squeezed = FuelError::Transaction(Reason::SqueezedOut("pool full".to_string()));
        let unfunded = FuelError::Other("not enough coins to fit the target".to_string());

        // when
        let squeezed = ContractError::from_write(squeezed);
        let unfunded = ContractError::from_write(unfunded);

        // then
        assert!(matches!(squeezed, ContractError::SubmissionFailed(_)));
        assert!(matches!(unfunded, ContractError::SubmissionFailed(_)));
    }

    #[test]
    fn tx_kind__renders_human_readable_names() {
        assert_eq!(TxKind::Enter.to_string(), "enter");
        assert_eq!(TxKind::PickWinner.to_string(), "pick winner");
        assert_eq!(TxKind::ClaimPrize.to_string(), "claim prize");
    }
}
