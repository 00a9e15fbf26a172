//! API regression tests through an external collection runner (`newman`).
//!
//! The collection directory holds `test.json`, `global.json` and `env.json`.
//! Variables in the latter two are patched for the target network, then the
//! collection is run until it passes or the attempts run out.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use stakeprobe_wallet::{CommandRunner, TransferRequest, Wallet};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Transfer amount of the signed cross-shard transaction.
pub const RAW_TRANSACTION_AMOUNT: f64 = 1e-9;

/// Source-shard balance an account needs to sign the transaction.
pub const RAW_TRANSACTION_MIN_BALANCE: f64 = 5.0;

/// Collection flavour, from the collection's `info.name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionVariant {
    NoExplorer,
    OnlyExplorer,
    Default,
}

impl CollectionVariant {
    pub fn detect(collection: &Value) -> Self {
        let name = collection
            .pointer("/info/name")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if name.contains("no-explorer") {
            CollectionVariant::NoExplorer
        } else if name.contains("only-explorer") {
            CollectionVariant::OnlyExplorer
        } else {
            CollectionVariant::Default
        }
    }

    fn uses_explorer(self) -> bool {
        self != CollectionVariant::NoExplorer
    }
}

/// Values patched into the collection variables.
#[derive(Debug, Clone)]
pub struct RegressionSettings {
    pub test_dir: PathBuf,
    pub iterations: u32,
    pub endpoint_src: String,
    pub endpoint_dst: String,
    pub exp_endpoint: String,
    /// Seconds
    pub txn_delay: u64,
    pub source_shard: u32,
    pub destination_shard: u32,
}

/// The three collection documents.
#[derive(Debug, Clone)]
pub struct CollectionFiles {
    dir: PathBuf,
    pub test: Value,
    pub global: Value,
    pub env: Value,
}

impl CollectionFiles {
    pub async fn load(dir: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            dir: dir.to_path_buf(),
            test: read_json(&dir.join("test.json")).await?,
            global: read_json(&dir.join("global.json")).await?,
            env: read_json(&dir.join("env.json")).await?,
        })
    }

    /// Rewrite `global.json` and `env.json`.
    pub async fn save(&self) -> anyhow::Result<()> {
        write_json(&self.dir.join("global.json"), &self.global).await?;
        write_json(&self.dir.join("env.json"), &self.env).await
    }

    /// Patch the variables the variant reads.
    pub fn patch(&mut self, variant: CollectionVariant, settings: &RegressionSettings, raw_transaction: &str) {
        set_variable(&mut self.env, "rawTransaction", json!(raw_transaction));
        set_variable(&mut self.env, "txn_delay", json!(settings.txn_delay));
        if variant.uses_explorer() {
            set_variable(&mut self.env, "tx_beta_endpoint", json!(settings.exp_endpoint));
            set_variable(&mut self.env, "source_shard", json!(settings.source_shard));
        }

        set_variable(&mut self.global, "hmy_endpoint_src", json!(settings.endpoint_src));
        if variant != CollectionVariant::OnlyExplorer {
            set_variable(&mut self.global, "hmy_endpoint_dst", json!(settings.endpoint_dst));
        }
        if variant.uses_explorer() {
            set_variable(&mut self.global, "hmy_exp_endpoint", json!(settings.exp_endpoint));
        }
    }
}

async fn read_json(path: &Path) -> anyhow::Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parse {}", path.display()))
}

async fn write_json(path: &Path, value: &Value) -> anyhow::Result<()> {
    tokio::fs::write(path, serde_json::to_vec(value)?)
        .await
        .with_context(|| format!("write {}", path.display()))
}

/// Set every `values[*]` entry keyed `key`. Returns whether one was found.
pub fn set_variable(document: &mut Value, key: &str, value: Value) -> bool {
    let Some(values) = document.get_mut("values").and_then(Value::as_array_mut) else {
        return false;
    };
    let mut found = false;
    for entry in values.iter_mut() {
        if entry.get("key").and_then(Value::as_str) == Some(key) {
            entry["value"] = value.clone();
            found = true;
        }
    }
    found
}

/// Sign a small cross-shard transfer without submitting it.
///
/// Uses the first of `accounts` holding enough on the source shard and sends
/// to a random other account.
pub async fn raw_cross_shard_transaction<R: CommandRunner>(
    wallet: &Wallet<R>,
    accounts: &[String],
    settings: &RegressionSettings,
    rng: &mut impl Rng,
) -> anyhow::Result<String> {
    if accounts.len() < 2 {
        anyhow::bail!("need at least 2 loaded accounts, have {}", accounts.len());
    }
    for name in accounts {
        let from = wallet.require_address(name).await?;
        let balance = wallet.balance_on(&from, settings.source_shard).await?;
        if balance < RAW_TRANSACTION_MIN_BALANCE {
            continue;
        }
        let others: Vec<&String> = accounts.iter().filter(|other| *other != name).collect();
        let Some(recipient) = others.choose(rng) else {
            continue;
        };
        let request = TransferRequest {
            from,
            to: wallet.require_address(recipient).await?,
            from_shard: settings.source_shard,
            to_shard: settings.destination_shard,
            amount: RAW_TRANSACTION_AMOUNT,
        };
        info!(
            node = %settings.endpoint_src,
            from = %request.from,
            to = %request.to,
            from_shard = request.from_shard,
            to_shard = request.to_shard,
            "signing raw cross-shard transaction"
        );
        return Ok(wallet.dry_run_transfer(&request).await?);
    }
    Err(anyhow!(
        "None of the loaded accounts have funds on shard {}",
        settings.source_shard
    ))
}

/// Executes a collection once.
#[async_trait]
pub trait CollectionRunner: Send + Sync {
    /// Exit code of the run.
    async fn run(&self, dir: &Path) -> anyhow::Result<i32>;
}

/// `newman run test.json -e env.json -g global.json`.
#[derive(Debug, Clone)]
pub struct Newman {
    program: PathBuf,
}

impl Default for Newman {
    fn default() -> Self {
        Self {
            program: PathBuf::from("newman"),
        }
    }
}

#[async_trait]
impl CollectionRunner for Newman {
    async fn run(&self, dir: &Path) -> anyhow::Result<i32> {
        let status = tokio::process::Command::new(&self.program)
            .arg("run")
            .arg(dir.join("test.json"))
            .arg("-e")
            .arg(dir.join("env.json"))
            .arg("-g")
            .arg(dir.join("global.json"))
            .status()
            .await
            .with_context(|| format!("spawn {}", self.program.display()))?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Run the collection until it exits 0, at most `iterations` times.
/// Returns the last exit code.
pub async fn run_with_retries<C: CollectionRunner>(
    runner: &C,
    dir: &Path,
    iterations: u32,
) -> anyhow::Result<i32> {
    let mut exit_code = 0;
    for attempt in 1..=iterations {
        info!(attempt, iterations, "running collection");
        exit_code = runner.run(dir).await?;
        if exit_code == 0 {
            info!(attempts = attempt, "collection succeeded");
            break;
        }
        warn!(attempt, exit_code, "collection failed");
    }
    Ok(exit_code)
}

/// Prepare the collection files and run the collection.
pub async fn run_regression<R: CommandRunner, C: CollectionRunner>(
    wallet: &Wallet<R>,
    accounts: &[String],
    settings: &RegressionSettings,
    runner: &C,
    rng: &mut impl Rng,
) -> anyhow::Result<i32> {
    let mut files = CollectionFiles::load(&settings.test_dir).await?;
    let variant = CollectionVariant::detect(&files.test);
    info!(?variant, dir = %settings.test_dir.display(), "preparing collection");

    if variant.uses_explorer()
        && (settings.endpoint_src.contains("localhost") || settings.exp_endpoint.contains("localhost"))
    {
        warn!("this collection is meant for testnet or mainnet");
    }
    if !settings.endpoint_src.contains(&settings.source_shard.to_string()) {
        warn!(shard = settings.source_shard, endpoint = %settings.endpoint_src, "source shard may not match source endpoint");
    }
    if !settings.endpoint_dst.contains(&settings.destination_shard.to_string()) {
        warn!(shard = settings.destination_shard, endpoint = %settings.endpoint_dst, "destination shard may not match destination endpoint");
    }

    let raw_transaction = raw_cross_shard_transaction(wallet, accounts, settings, rng).await?;
    files.patch(variant, settings, &raw_transaction);
    files.save().await?;

    run_with_retries(runner, &settings.test_dir, settings.iterations).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use stakeprobe_wallet::{CommandOutput, Session, WalletSettings};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn settings(dir: &Path) -> RegressionSettings {
        RegressionSettings {
            test_dir: dir.to_path_buf(),
            iterations: 3,
            endpoint_src: "https://api.s0.b.hmny.io/".to_string(),
            endpoint_dst: "https://api.s1.b.hmny.io/".to_string(),
            exp_endpoint: "http://e0.b.hmny.io:5000/".to_string(),
            txn_delay: 45,
            source_shard: 0,
            destination_shard: 1,
        }
    }

    fn variables(keys: &[&str]) -> Value {
        let values: Vec<Value> = keys.iter().map(|k| json!({"key": k, "value": ""})).collect();
        json!({ "values": values })
    }

    fn variable<'a>(document: &'a Value, key: &str) -> Option<&'a Value> {
        document["values"]
            .as_array()?
            .iter()
            .find(|v| v["key"] == key)
            .map(|v| &v["value"])
    }

    fn collection(name: &str) -> CollectionFiles {
        CollectionFiles {
            dir: PathBuf::from("."),
            test: json!({"info": {"name": name}}),
            global: variables(&["hmy_endpoint_src", "hmy_endpoint_dst", "hmy_exp_endpoint"]),
            env: variables(&["rawTransaction", "txn_delay", "tx_beta_endpoint", "source_shard"]),
        }
    }

    #[test]
    fn test_variant_detection() {
        let detect = |name: &str| CollectionVariant::detect(&json!({"info": {"name": name}}));
        assert_eq!(detect("Harmony API Tests - no-explorer"), CollectionVariant::NoExplorer);
        assert_eq!(detect("Harmony API Tests - only-explorer"), CollectionVariant::OnlyExplorer);
        assert_eq!(detect("Harmony API Tests"), CollectionVariant::Default);
        assert_eq!(CollectionVariant::detect(&json!({})), CollectionVariant::Default);
    }

    #[test]
    fn test_patch_no_explorer() {
        let mut files = collection("Harmony API Tests - no-explorer");
        files.patch(CollectionVariant::NoExplorer, &settings(Path::new(".")), "0xf86c");

        assert_eq!(variable(&files.env, "rawTransaction"), Some(&json!("0xf86c")));
        assert_eq!(variable(&files.env, "txn_delay"), Some(&json!(45)));
        assert_eq!(variable(&files.env, "tx_beta_endpoint"), Some(&json!("")));
        assert_eq!(variable(&files.global, "hmy_endpoint_dst"), Some(&json!("https://api.s1.b.hmny.io/")));
        assert_eq!(variable(&files.global, "hmy_exp_endpoint"), Some(&json!("")));
    }

    #[test]
    fn test_patch_only_explorer() {
        let mut files = collection("Harmony API Tests - only-explorer");
        files.patch(CollectionVariant::OnlyExplorer, &settings(Path::new(".")), "0xf86c");

        assert_eq!(variable(&files.env, "source_shard"), Some(&json!(0)));
        assert_eq!(variable(&files.env, "tx_beta_endpoint"), Some(&json!("http://e0.b.hmny.io:5000/")));
        assert_eq!(variable(&files.global, "hmy_exp_endpoint"), Some(&json!("http://e0.b.hmny.io:5000/")));
        assert_eq!(variable(&files.global, "hmy_endpoint_dst"), Some(&json!("")));
    }

    #[test]
    fn test_patch_default() {
        let mut files = collection("Harmony API Tests");
        files.patch(CollectionVariant::Default, &settings(Path::new(".")), "0xf86c");

        for key in ["hmy_endpoint_src", "hmy_endpoint_dst", "hmy_exp_endpoint"] {
            assert_ne!(variable(&files.global, key), Some(&json!("")), "{key}");
        }
        assert_eq!(variable(&files.env, "source_shard"), Some(&json!(0)));
    }

    #[test]
    fn test_set_variable_missing_key() {
        let mut document = variables(&["a"]);
        assert!(!set_variable(&mut document, "b", json!(1)));
        assert!(!set_variable(&mut json!({}), "a", json!(1)));
    }

    struct CountingRunner {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl CollectionRunner for CountingRunner {
        async fn run(&self, _dir: &Path) -> anyhow::Result<i32> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if call >= self.succeed_on { 0 } else { 1 })
        }
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let runner = CountingRunner { calls: AtomicU32::new(0), succeed_on: 2 };
        assert_eq!(run_with_retries(&runner, Path::new("."), 5).await.unwrap(), 0);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 2);

        let runner = CountingRunner { calls: AtomicU32::new(0), succeed_on: 10 };
        assert_eq!(run_with_retries(&runner, Path::new("."), 3).await.unwrap(), 1);
        assert_eq!(runner.calls.load(Ordering::SeqCst), 3);
    }

    /// Two funded accounts; records the dry-run transfer it was asked for.
    #[derive(Default)]
    struct DryRunWallet {
        transfers: Mutex<Vec<Vec<String>>>,
    }

    fn dry_run_output() -> String {
        let mut lines: Vec<String> = (0..15).map(|i| format!("  field{}: value", i)).collect();
        lines.push("RawTxn: 0xf86c808504a817c800".to_string());
        lines.push(String::new());
        lines.join("\n")
    }

    #[async_trait]
    impl CommandRunner for DryRunWallet {
        async fn run(&self, args: &[String], _timeout: Duration) -> stakeprobe_wallet::Result<CommandOutput> {
            let stdout = if args.iter().any(|a| a == "list") {
                "NAME ADDRESS\n\n_Test_key_funding_0 one1poor\n_Test_key_funding_1 one1rich\n".to_string()
            } else if args.iter().any(|a| a == "balances") {
                let amount = if args.iter().any(|a| a == "one1rich") { 10.0 } else { 1.0 };
                json!([{"shard": 0, "amount": amount}]).to_string()
            } else {
                self.transfers.lock().unwrap().push(args.to_vec());
                dry_run_output()
            };
            Ok(CommandOutput::stdout(stdout))
        }

        async fn spawn(&self, _args: &[String]) -> stakeprobe_wallet::Result<Session> {
            unreachable!("dry-run transfers do not prompt")
        }
    }

    #[tokio::test]
    async fn test_raw_transaction_from_funded_account() {
        let wallet = Wallet::new(DryRunWallet::default(), WalletSettings::default());
        let accounts = vec!["_Test_key_funding_0".to_string(), "_Test_key_funding_1".to_string()];
        let mut rng = StdRng::seed_from_u64(1);

        let raw = raw_cross_shard_transaction(&wallet, &accounts, &settings(Path::new(".")), &mut rng)
            .await
            .unwrap();
        assert_eq!(raw, "0xf86c808504a817c800");

        let transfers = wallet.runner().transfers.lock().unwrap();
        let argv = &transfers[0];
        assert!(argv.contains(&"--from=one1rich".to_string()));
        assert!(argv.contains(&"--to=one1poor".to_string()));
        assert!(argv.contains(&"--to-shard=1".to_string()));
        assert!(argv.contains(&"--dry-run".to_string()));
    }

    #[tokio::test]
    async fn test_raw_transaction_without_funds() {
        let wallet = Wallet::new(DryRunWallet::default(), WalletSettings::default());
        let accounts = vec!["_Test_key_funding_0".to_string()];
        let mut rng = StdRng::seed_from_u64(1);
        assert!(raw_cross_shard_transaction(&wallet, &accounts, &settings(Path::new(".")), &mut rng)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_collection_files_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let files = collection("Harmony API Tests - no-explorer");
        std::fs::write(dir.path().join("test.json"), files.test.to_string()).unwrap();
        std::fs::write(dir.path().join("global.json"), files.global.to_string()).unwrap();
        std::fs::write(dir.path().join("env.json"), files.env.to_string()).unwrap();

        let mut loaded = CollectionFiles::load(dir.path()).await.unwrap();
        assert_eq!(CollectionVariant::detect(&loaded.test), CollectionVariant::NoExplorer);
        loaded.patch(CollectionVariant::NoExplorer, &settings(dir.path()), "0xabc");
        loaded.save().await.unwrap();

        let env: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join("env.json")).unwrap()).unwrap();
        assert_eq!(variable(&env, "rawTransaction"), Some(&json!("0xabc")));
    }
}
