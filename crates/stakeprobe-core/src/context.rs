//! Resources created during a run and their teardown.

use stakeprobe_wallet::{CommandRunner, Wallet};
use tracing::{info, warn};

/// Keystore prefix of every account the run creates or imports.
pub const ACCOUNT_NAME_PREFIX: &str = "_Test_key_";

/// Keystore entries created during the run, in creation order.
///
/// Passed to every step that adds an account and consumed by [`cleanup`] at
/// teardown, including after a fatal error or an interrupt.
///
/// [`cleanup`]: TestContext::cleanup
#[derive(Debug, Default)]
pub struct TestContext {
    accounts: Vec<String>,
}

impl TestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a keystore entry for removal at teardown.
    pub fn record_account(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.accounts.contains(&name) {
            self.accounts.push(name);
        }
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Remove every recorded entry from the keystore, best effort.
    ///
    /// Returns the number of entries removed. Failures are logged and do not
    /// stop the removal of the remaining entries.
    pub async fn cleanup<R: CommandRunner>(&mut self, wallet: &Wallet<R>) -> usize {
        if self.accounts.is_empty() {
            return 0;
        }
        info!(count = self.accounts.len(), "Removing imported keys from the wallet keystore");
        let mut removed = 0;
        for name in self.accounts.drain(..) {
            match wallet.remove_account(&name).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(account = %name, error = %e, "failed to remove keystore entry"),
            }
        }
        removed
    }
}

/// Keystore name for a generated account, e.g. `_Test_key_validator0`.
pub fn account_name(role: &str, index: usize) -> String {
    format!("{}{}{}", ACCOUNT_NAME_PREFIX, role, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use stakeprobe_wallet::{CommandOutput, Session, WalletError, WalletSettings};
    use std::time::Duration;

    struct NoopRunner;

    #[async_trait]
    impl CommandRunner for NoopRunner {
        async fn run(&self, _args: &[String], _timeout: Duration) -> stakeprobe_wallet::Result<CommandOutput> {
            Ok(CommandOutput::default())
        }

        async fn spawn(&self, _args: &[String]) -> stakeprobe_wallet::Result<Session> {
            Err(WalletError::UnexpectedOutput("no sessions".to_string()))
        }
    }

    #[test]
    fn test_account_names() {
        assert_eq!(account_name("funding_", 2), "_Test_key_funding_2");
        assert_eq!(account_name("validator", 0), "_Test_key_validator0");
    }

    #[tokio::test]
    async fn test_cleanup_removes_recorded_accounts() {
        let keystore = tempfile::tempdir().unwrap();
        for name in ["_Test_key_funding_0", "_Test_key_validator0", "default"] {
            std::fs::create_dir(keystore.path().join(name)).unwrap();
        }
        let wallet = Wallet::new(
            NoopRunner,
            WalletSettings {
                keystore_dir: keystore.path().to_path_buf(),
                ..WalletSettings::default()
            },
        );

        let mut ctx = TestContext::new();
        ctx.record_account("_Test_key_funding_0");
        ctx.record_account("_Test_key_validator0");
        ctx.record_account("_Test_key_validator0");
        ctx.record_account("_Test_key_never_created");
        assert_eq!(ctx.accounts().len(), 3);

        assert_eq!(ctx.cleanup(&wallet).await, 3);
        assert!(ctx.is_empty());
        assert!(!keystore.path().join("_Test_key_funding_0").exists());
        assert!(keystore.path().join("default").exists());
        assert_eq!(ctx.cleanup(&wallet).await, 0);
    }
}
