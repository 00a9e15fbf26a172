//! stakeprobe core - the staking lifecycle under test.
//!
//! - [`workflow`]: the stage machine creating, verifying, editing and
//!   undelegating validators and delegators
//! - [`reference`]: what the run expects the chain to hold
//! - [`reconcile`]: pure comparisons of chain documents with the reference
//! - [`context`]: keystore entries to remove at teardown
//! - [`scenario`]: pass/fail bookkeeping and the continuation policy

pub mod context;
pub mod error;
pub mod reconcile;
pub mod reference;
pub mod scenario;
pub mod workflow;

pub use context::{account_name, TestContext, ACCOUNT_NAME_PREFIX};
pub use error::{Mismatch, Result, WorkflowError};
pub use reconcile::{CheckResult, EpochMatch, UndelegationConfirmation};
pub use reference::{
    AccountRef, DelegationEntry, DelegatorRef, ReferenceStore, UndelegationRecord, ValidatorRef,
};
pub use scenario::{run_scenario, RunReport, ScenarioError, ScenarioResult};
pub use workflow::{Stage, StakingWorkflow, WorkflowSettings};
