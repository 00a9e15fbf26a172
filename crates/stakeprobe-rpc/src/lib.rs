//! stakeprobe RPC - observing the network under test.
//!
//! - [`RpcClient`]: `hmy_getShardingStructure` / `hmy_latestHeader` calls
//! - [`EpochGate`]: blocking waits on epochs and shard liveness
//! - free-standing predicates that degrade to `false` instead of failing,
//!   for use inside poll loops

pub mod client;
pub mod error;
pub mod gate;
pub mod header;
pub mod shard;

pub use client::{is_after_epoch, is_shard_active, resolve_endpoint, RpcClient, ShardEndpoint};
pub use error::{Result, RpcError};
pub use gate::{EpochGate, EpochSource, DEFAULT_POLL_INTERVAL};
pub use header::{header_is_fresh, parse_header_timestamp, Header, DEFAULT_DELAY_TOLERANCE};
pub use shard::shard_from_endpoint;
