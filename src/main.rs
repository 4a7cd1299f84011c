// In src/main.rs

use alpha_miner::config::CONFIG;
use alpha_miner::data::{FeatureData, Series};
use alpha_miner::evaluator::FormulaEvaluator;
use alpha_miner::policy::SoftmaxPolicy;
use alpha_miner::token::TokenRegistry;
use alpha_miner::trainer::Trainer;

use anyhow::Context;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, LogNormal, Normal};

/// Trading days of synthetic history.
const NUM_DAYS: usize = 750;
/// Days held out for out-of-sample IC.
const HELD_OUT_DAYS: usize = 250;
/// Forward-return horizon of the target.
const HORIZON: usize = 5;
const DATA_SEED: u64 = 7;
const FEATURES: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// Main entry point for the `alpha-miner` demo.
///
/// Mines formulas on a synthetic daily price history. An optional argument
/// names a checkpoint to resume from.
fn main() -> anyhow::Result<()> {
    // Initialize the logger. Default filter is "info" if RUST_LOG is not set.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting alpha-miner...");
    let config = CONFIG.clone();

    let (features, target) = synthetic_market(NUM_DAYS, DATA_SEED).context("Failed to build synthetic market data")?;
    let split = NUM_DAYS - HELD_OUT_DAYS;
    let train = features.slice(0, split);
    let held_out = features.slice(split, NUM_DAYS);
    let (train_target, held_out_target) = match (train.index().last(), held_out.index().first()) {
        (Some(&last), Some(&first)) => (target.window(i64::MIN, last), target.window(first, i64::MAX)),
        _ => anyhow::bail!("Synthetic data too short to split"),
    };
    info!(
        "Generated {} days of data ({} train, {} held out)",
        NUM_DAYS,
        train.index().len(),
        held_out.index().len()
    );

    let registry = TokenRegistry::with_constants(FEATURES, &config.grammar.constants);
    let policy = SoftmaxPolicy::new(registry.len(), config.grammar.max_len);
    let mut trainer = Trainer::new(config, registry, policy);

    if let Some(path) = std::env::args().nth(1) {
        trainer
            .load_checkpoint(&path)
            .with_context(|| format!("Failed to resume from {path}"))?;
    }

    let summary = trainer
        .run(&train, &train_target)
        .context("Training run failed")?;
    if summary.cancelled {
        warn!("Run was cancelled after {} cycles", summary.cycles_run());
    }

    let registry = trainer.registry();
    let evaluator = FormulaEvaluator::new(registry);
    let held_out_ic = trainer
        .pool()
        .out_of_sample_ic(&evaluator, &held_out, &held_out_target);

    info!("Top alphas:");
    for (entry, (_, test_ic)) in trainer.pool().entries().iter().zip(&held_out_ic).take(10) {
        info!(
            "  {:<40} train IC {:+.4}  adjusted {:+.4}  held-out IC {:+.4}",
            entry.formula.to_infix(registry),
            entry.score,
            entry.adjusted_ic,
            test_ic
        );
    }
    info!("alpha-miner exited successfully.");

    Ok(())
}

/// Random-walk OHLCV history and its `HORIZON`-day forward return.
///
/// Daily returns are mildly mean-reverting, so short-window reversal
/// formulas carry a weak signal.
fn synthetic_market(days: usize, seed: u64) -> anyhow::Result<(FeatureData, Series)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::<f64>::new(0.0, 0.015)?;
    let intraday = Normal::<f64>::new(0.0, 0.005)?;
    let volume_dist = LogNormal::<f64>::new(13.0, 0.4)?;

    let mut open = Vec::with_capacity(days);
    let mut high = Vec::with_capacity(days);
    let mut low = Vec::with_capacity(days);
    let mut close = Vec::with_capacity(days);
    let mut volume = Vec::with_capacity(days);

    let mut price = 100.0_f64;
    let mut last_return = 0.0_f64;
    for _ in 0..days {
        let ret = -0.2 * last_return + noise.sample(&mut rng);
        let prev = price;
        price *= ret.exp();
        let day_open = prev * intraday.sample(&mut rng).exp();
        let spread = intraday.sample(&mut rng).abs();
        open.push(day_open);
        high.push(day_open.max(price) * (1.0 + spread));
        low.push(day_open.min(price) * (1.0 - spread));
        close.push(price);
        volume.push(volume_dist.sample(&mut rng) * (1.0 + 20.0 * ret.abs()));
        last_return = ret;
    }

    let forward: Vec<f64> = (0..days)
        .map(|t| match close.get(t + HORIZON) {
            Some(future) => future / close[t] - 1.0,
            None => f64::NAN,
        })
        .collect();

    let index: Vec<i64> = (0..days as i64).collect();
    let mut features = FeatureData::new(index.clone())?;
    for (name, column) in FEATURES.into_iter().zip([open, high, low, close, volume]) {
        features.insert_column(name, column)?;
    }
    let target = Series::new(index, forward)?;
    Ok((features, target))
}
