//! stakeprobe types - values shared by the RPC client, the wallet bridge and
//! the staking workflow.
//!
//! - Account addresses (opaque bech32 strings such as `one1...`)
//! - Fixed-point amount scaling (`10^18` base units per token)
//! - Validator commission rates and their random generation
//! - BLS public keys as produced by the wallet CLI

pub mod address;
pub mod amount;
pub mod bls;
pub mod commission;

pub use address::Address;
pub use amount::{base_units_from_json, to_base_units, BASE_UNITS_PER_TOKEN};
pub use bls::{same_bls_key, BlsKey};
pub use commission::{format_rate, rate_matches, CommissionRates};

/// Observed network epoch.
pub type Epoch = u64;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        base_units_from_json, format_rate, rate_matches, same_bls_key, to_base_units, Address,
        BlsKey, CommissionRates, Epoch, BASE_UNITS_PER_TOKEN,
    };
}
