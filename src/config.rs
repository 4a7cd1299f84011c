// src/config.rs

//! Configuration for the alpha miner.
//!
//! Every struct deserializes from JSON with per-field defaults, so a config
//! file only needs the settings it changes. Defaults follow the reference
//! setup: 200 MCTS iterations per step, a pool of 100 alphas with a 0.1
//! redundancy penalty, and an 85% reward quantile for the risk-seeking
//! optimizer.

use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{info, warn};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::token::DEFAULT_CONSTANTS;

/// Environment variable naming a JSON config file for [`CONFIG`].
pub const CONFIG_ENV_VAR: &str = "ALPHA_MINER_CONFIG";

/// Process-wide configuration, loaded on first use.
///
/// Reads the file named by [`CONFIG_ENV_VAR`] if set, otherwise defaults.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

// --- Top-Level Configuration Structure ---

/// The complete configuration for a mining run.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)] // Apply default values for the entire struct if a field is missing.
pub struct Config {
    /// Formula grammar settings.
    pub grammar: GrammarConfig,
    /// Tree search settings.
    pub mcts: MctsConfig,
    /// Alpha pool settings.
    pub pool: PoolConfig,
    /// Risk-seeking optimizer settings.
    pub optimizer: OptimizerConfig,
    /// Outer training loop settings.
    pub trainer: TrainerConfig,
}

impl Config {
    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    fn from_env() -> Self {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(&path).unwrap_or_else(|err| {
                warn!("{:#}; falling back to default configuration", err);
                Self::default()
            }),
            None => Self::default(),
        }
    }
}

// --- Grammar Configuration ---

/// Shape of the formula search space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GrammarConfig {
    /// Maximum formula length in tokens (the End token is not counted).
    pub max_len: usize,
    /// Constant operands, used as rolling windows and arithmetic operands.
    pub constants: Vec<f64>,
}

impl Default for GrammarConfig {
    fn default() -> Self {
        GrammarConfig {
            max_len: 20,
            constants: DEFAULT_CONSTANTS.to_vec(),
        }
    }
}

// --- Search Configuration ---

/// MCTS configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MctsConfig {
    /// Simulations run before committing each token.
    pub num_iterations: usize,

    /// Exploration constant for PUCT (c_puct).
    /// Higher values encourage more exploration.
    pub c_puct: f64,

    /// Dirichlet noise alpha for root exploration.
    /// Set to 0.0 to disable noise.
    pub dirichlet_alpha: f64,

    /// Weight of Dirichlet noise vs prior.
    pub dirichlet_weight: f64,

    /// Seed for root noise.
    pub seed: u64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        MctsConfig {
            num_iterations: 200,
            c_puct: 2.0,
            dirichlet_alpha: 0.3,
            dirichlet_weight: 0.25,
            seed: 42,
        }
    }
}

impl MctsConfig {
    /// Whether root priors get Dirichlet noise.
    #[must_use]
    pub fn uses_root_noise(&self) -> bool {
        self.dirichlet_alpha > 0.0 && self.dirichlet_weight > 0.0
    }
}

// --- Pool Configuration ---

/// Denominator of the mean mutual IC in the redundancy penalty.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MutualIcDenominator {
    /// Number of other pool members (`n - 1`).
    #[default]
    Others,
    /// Pool size including the entry itself (`n`).
    PoolSize,
}

/// Alpha pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of retained alphas (K).
    pub capacity: usize,
    /// Redundancy penalty weight (λ).
    pub lambda: f64,
    /// How the mutual-IC mean is normalised.
    pub denominator: MutualIcDenominator,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 100,
            lambda: 0.1,
            denominator: MutualIcDenominator::Others,
        }
    }
}

// --- Optimizer Configuration ---

/// Risk-seeking optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Reward quantile tracked by the threshold (α).
    pub quantile: f64,
    /// Quantile-regression learning rate (β).
    pub beta: f64,
    /// Policy learning rate (γ).
    pub gamma: f64,
    /// Starting threshold (τ₀).
    pub initial_threshold: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            quantile: 0.85,
            beta: 0.01,
            gamma: 0.001,
            initial_threshold: 0.0,
        }
    }
}

// --- Trainer Configuration ---

/// Outer training loop settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainerConfig {
    /// Number of search cycles.
    pub num_cycles: usize,
    /// Where to write checkpoints. `None` disables checkpointing.
    pub checkpoint_path: Option<PathBuf>,
    /// Cycles between checkpoints (0 = only at the end).
    pub checkpoint_every: usize,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        TrainerConfig {
            num_cycles: 100,
            checkpoint_path: None,
            checkpoint_every: 0,
        }
    }
}
