use fuels::types::{
    Address,
    Identity,
};
use sha2::{
    Digest,
    Sha256,
};

pub mod client;
pub mod contract;
pub mod deployment;
pub mod gateway;
pub mod orchestrator;
pub mod state;
pub mod sync;
pub mod ui;
pub mod view;
pub mod wallets;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub mod lottery_types {
    use fuels::macros::abigen;

    abigen!(Contract(
        name = "Lottery",
        abi = "abi/lottery-abi.json"
    ));
}

/// The lottery ABI the client was compiled against.
pub const LOTTERY_ABI_JSON: &str = include_str!("../abi/lottery-abi.json");

pub fn lottery_abi_hash() -> String {
    let mut hasher = Sha256::new();
    hasher.update(LOTTERY_ABI_JSON.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// The contract reports "no winner yet" as the zero address.
pub fn unset_identity() -> Identity {
    Identity::Address(Address::zeroed())
}

pub fn is_unset(identity: &Identity) -> bool {
    *identity == unset_identity()
}

pub fn identity_hex(identity: &Identity) -> String {
    let bytes: &[u8] = match identity {
        Identity::Address(address) => address.as_slice(),
        Identity::ContractId(contract_id) => contract_id.as_slice(),
    };
    format!("0x{}", hex::encode(bytes))
}

pub fn short_identity(identity: &Identity) -> String {
    let full = identity_hex(identity);
    if full.len() <= 14 {
        return full;
    }
    format!("{}…{}", &full[..8], &full[full.len() - 4..])
}
