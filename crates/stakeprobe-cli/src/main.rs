//! stakeprobe - staking lifecycle and API regression tests for Harmony
//! networks, driven through the `hmy` wallet CLI.

pub mod args;
pub mod config;
pub mod output;
pub mod regression;
pub mod telemetry;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use stakeprobe_core::{
    run_scenario, RunReport, ScenarioResult, StakingWorkflow, TestContext,
};
use stakeprobe_rpc::{EpochGate, EpochSource, RpcClient, DEFAULT_DELAY_TOLERANCE};
use stakeprobe_wallet::{CommandRunner, ProcessRunner, Wallet};
use std::future::Future;
use tracing::{error, info, warn};

use crate::args::Args;
use crate::config::ProbeConfig;
use crate::regression::{Newman, RegressionSettings};

/// Exit status after an interrupt.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = ProbeConfig::load(&args)?;

    telemetry::init_telemetry(&config.log_level, config.log_json)?;

    print_banner();

    match run(&config).await {
        Ok(exit_code) => {
            info!(exit_code, "stakeprobe finished");
            std::process::exit(exit_code);
        }
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

/// Preflight checks, the tests, then keystore cleanup. Returns the exit code.
async fn run(config: &ProbeConfig) -> anyhow::Result<i32> {
    let binary = config.cli_binary()?;
    let mut wallet = Wallet::new(ProcessRunner::new(binary), config.wallet_settings());

    let version = wallet
        .checked_version()
        .await
        .context("CLI binary is the wrong version")?;
    info!(version, "wallet CLI");

    if !config.keystore.is_dir() {
        anyhow::bail!("Could not find keystore directory {}", config.keystore.display());
    }

    let source = RpcClient::new(config.endpoint_src.as_str())
        .context("Failed to build the RPC client")?;
    if !source.is_active(DEFAULT_DELAY_TOLERANCE).await {
        anyhow::bail!("The source shard endpoint is NOT active: {}", config.endpoint_src);
    }

    let chains = wallet.known_chains().await?;
    if !chains.iter().any(|c| *c == config.chain_id) {
        warn!(chain_id = %config.chain_id, "unknown chain id, using testnet");
        wallet.set_chain_id("testnet");
    }

    let source_shard = config.source_shard()?;
    let regression_settings = RegressionSettings {
        test_dir: config.test_dir.clone(),
        iterations: config.iterations,
        endpoint_src: config.endpoint_src.clone(),
        endpoint_dst: config.endpoint_dst.clone(),
        exp_endpoint: config.exp_endpoint.clone(),
        txn_delay: config.delay,
        source_shard,
        destination_shard: config.destination_shard()?,
    };

    let mut workflow = StakingWorkflow::new(
        wallet,
        EpochGate::new(source),
        config.workflow_settings(source_shard),
    )?;
    let mut ctx = TestContext::new();

    let outcome = tokio::select! {
        result = run_tests(&mut workflow, &mut ctx, config, &regression_settings) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received");
            None
        }
    };

    output::print_info("Removing imported keys from the wallet keystore...");
    let removed = ctx.cleanup(workflow.wallet()).await;
    info!(removed, "keystore cleaned up");

    match outcome {
        Some(result) => result,
        None => Ok(INTERRUPTED_EXIT_CODE),
    }
}

async fn run_tests<R: CommandRunner, S: EpochSource>(
    workflow: &mut StakingWorkflow<R, S>,
    ctx: &mut TestContext,
    config: &ProbeConfig,
    regression_settings: &RegressionSettings,
) -> anyhow::Result<i32> {
    workflow.load_keys(ctx, &config.keystore).await?;
    workflow.wait_for_start_epoch().await;

    if config.ignore_staking_test {
        output::print_warning("Staking tests disabled");
    } else {
        let report = run_staking(workflow, ctx, config).await?;
        output::print_report(&report);
    }

    if config.ignore_regression_test {
        output::print_warning("Regression tests disabled");
        return Ok(0);
    }

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let exit_code = regression::run_regression(
        workflow.wallet(),
        ctx.accounts(),
        regression_settings,
        &Newman::default(),
        &mut rng,
    )
    .await?;
    if exit_code == 0 {
        output::print_success("Regression tests passed");
    } else {
        output::print_error(&format!("Regression tests failed with exit code {}", exit_code));
    }
    Ok(exit_code)
}

/// The staking lifecycle, one scenario per stage.
///
/// Failed scenarios are recorded and the run continues; fatal errors stop it.
async fn run_staking<R: CommandRunner, S: EpochSource>(
    workflow: &mut StakingWorkflow<R, S>,
    ctx: &mut TestContext,
    config: &ProbeConfig,
) -> anyhow::Result<RunReport> {
    let mut report = RunReport::new();

    record(&mut report, "create_validators", async {
        workflow.create_validators(ctx).await.map(|created| !created.is_empty())
    })
    .await?;
    workflow.wait_for_finality().await;
    record(&mut report, "check_validators", workflow.verify_validators()).await?;

    record(&mut report, "create_delegators", async {
        workflow.create_delegators(ctx).await.map(|created| !created.is_empty())
    })
    .await?;
    workflow.wait_for_finality().await;
    record(&mut report, "check_delegators", workflow.verify_delegators()).await?;

    record(&mut report, "edit_validators", async {
        workflow.edit_validators().await.map(|()| true)
    })
    .await?;
    workflow.wait_for_finality().await;
    record(&mut report, "check_edited_validators", workflow.verify_validators()).await?;

    record(&mut report, "undelegate", async {
        workflow.undelegate().await.map(|()| true)
    })
    .await?;
    workflow.wait_for_finality().await;
    record(&mut report, "check_undelegations", workflow.reconcile_undelegations()).await?;

    if config.collect_rewards {
        record(&mut report, "collect_rewards", workflow.collect_rewards()).await?;
    }
    workflow.finish()?;
    Ok(report)
}

async fn record<F, E>(report: &mut RunReport, name: &str, scenario: F) -> anyhow::Result<()>
where
    F: Future<Output = Result<bool, E>>,
    E: Into<stakeprobe_core::ScenarioError>,
{
    output::print_scenario_start(name);
    let result: ScenarioResult = match run_scenario(name, scenario).await {
        Ok(result) => result,
        Err(e) => {
            error!(scenario = name, error = %e, "fatal error, stopping");
            return Err(e.into());
        }
    };
    output::print_scenario_result(&result);
    report.push(result);
    Ok(())
}

/// Print startup banner.
fn print_banner() {
    println!();
    println!("{}", "stakeprobe".bright_cyan().bold());
    println!("    staking lifecycle and API regression tests");
    println!("    Version: {}", env!("CARGO_PKG_VERSION"));
    println!();
}
