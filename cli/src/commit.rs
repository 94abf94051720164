use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{value_parser, Parser};
use ledger_gateway::{submit_transaction, Error, EventStrategy, GatewayOptions, TransactionId};
use rand::Rng;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::simulation::{PeerBehavior, SimulatedNetwork};

#[derive(Debug, Parser)]
pub(crate) struct Params {
    /// Number of organizations in the channel.
    #[arg(long, default_value_t = 2)]
    pub(crate) orgs: usize,

    /// Number of peers of every organization.
    #[arg(long, default_value_t = 3)]
    pub(crate) peers: usize,

    /// Number of transactions submitted concurrently.
    #[arg(short, long, default_value_t = 5)]
    pub(crate) transactions: usize,

    /// Event strategy, overrides the one from the options file.
    #[arg(short, long)]
    #[clap(value_parser = value_parser!(EventStrategy))]
    pub(crate) strategy: Option<EventStrategy>,

    /// Commit timeout in seconds, 0 waits indefinitely. Overrides the options file.
    #[arg(long)]
    pub(crate) commit_timeout: Option<f64>,

    /// JSON file with gateway options.
    #[arg(long)]
    pub(crate) options: Option<PathBuf>,

    /// Maximum commit latency of a peer, in milliseconds.
    #[arg(long, default_value_t = 500)]
    pub(crate) max_latency_ms: u64,

    /// Probability of a peer failing to report a commit.
    #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
    pub(crate) error_rate: f64,

    /// Probability of a peer rejecting a transaction.
    #[arg(long, default_value_t = 0.02, value_parser = parse_probability)]
    pub(crate) invalid_rate: f64,

    /// Probability of a peer reporting a commit twice.
    #[arg(long, default_value_t = 0.1, value_parser = parse_probability)]
    pub(crate) duplicate_rate: f64,

    /// Probability of the orderer refusing a transaction.
    #[arg(long, default_value_t = 0.05, value_parser = parse_probability)]
    pub(crate) submit_failure_rate: f64,
}

pub(crate) async fn run(args: Params) -> Result<()> {
    let options = load_options(&args).await?;
    let strategy = options.strategy;

    info!(
        "Submitting {} transactions with {strategy}, commit timeout {:?}",
        args.transactions, options.commit_timeout
    );

    let network = Arc::new(SimulatedNetwork::new(
        args.orgs,
        args.peers,
        options,
        PeerBehavior {
            max_latency: Duration::from_millis(args.max_latency_ms),
            error_rate: args.error_rate,
            invalid_rate: args.invalid_rate,
            duplicate_rate: args.duplicate_rate,
        },
    ));

    let mut transactions = JoinSet::new();

    for i in 0..args.transactions {
        let network = network.clone();
        let transaction_id = TransactionId::new(format!("tx{i:04}"));
        let submit = simulated_submit(args.submit_failure_rate);

        transactions.spawn(async move {
            let result =
                submit_transaction(&strategy, transaction_id.clone(), network, submit).await;
            (transaction_id, result)
        });
    }

    let mut committed = 0;
    let mut failed = 0;

    while let Some(joined) = transactions.join_next().await {
        let (transaction_id, result) = joined.context("Transaction task panicked")?;

        match result {
            Ok(()) => {
                committed += 1;
                info!("{transaction_id} committed");
            }
            Err(Error::Submit { message, .. }) => {
                failed += 1;
                warn!("{transaction_id} not submitted: {message}");
            }
            Err(e) => {
                failed += 1;
                warn!("{transaction_id} failed: {e}");
            }
        }
    }

    info!("{committed} transactions committed, {failed} failed");

    Ok(())
}

async fn load_options(args: &Params) -> Result<GatewayOptions> {
    let mut options = match &args.options {
        Some(path) => {
            let json = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_slice(&json)
                .with_context(|| format!("Invalid gateway options in {}", path.display()))?
        }
        None => GatewayOptions::default(),
    };

    if let Some(strategy) = args.strategy {
        options = options.with_strategy(strategy);
    }

    if let Some(secs) = args.commit_timeout {
        let timeout = if secs > 0.0 {
            let timeout = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("Invalid commit timeout {secs}"))?;
            Some(timeout)
        } else {
            None
        };
        options = options.with_commit_timeout(timeout);
    }

    Ok(options)
}

async fn simulated_submit(failure_rate: f64) -> Result<(), String> {
    let (delay, fail) = {
        let mut rng = rand::thread_rng();
        (rng.gen_range(10..50), rng.gen_bool(failure_rate))
    };

    sleep(Duration::from_millis(delay)).await;

    if fail {
        Err("orderer unavailable".to_owned())
    } else {
        Ok(())
    }
}

fn parse_probability(s: &str) -> Result<f64> {
    let p: f64 = s.parse()?;

    if !(0.0..=1.0).contains(&p) {
        bail!("probability must be between 0 and 1");
    }

    Ok(p)
}
