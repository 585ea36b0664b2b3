//! SemiMatch CLI
//!
//! Entry point for FixMatch/FlexMatch training on CIFAR-10/100. Loads an
//! experiment config from JSON, applies command-line overrides, and runs
//! the training loop end to end.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use semimatch::config::{ConfigOverrides, ExperimentConfig};
use semimatch::dataset::{DataTransforms, SemiDataModule};
use semimatch::methods::MethodClassifier;
use semimatch::training::checkpoint::CheckpointManager;
use semimatch::training::logger::MetricsLogger;
use semimatch::training::trainer::{Trainer, TrainerArgs};
use semimatch::utils::logging::{init_logging, LogConfig};
use semimatch::INPUT_DIM;

/// SemiMatch: semi-supervised CIFAR classification
///
/// Trains a classifier with FixMatch or FlexMatch from a JSON experiment
/// config. A few config fields can be overridden per run without editing
/// the file.
#[derive(Parser, Debug)]
#[command(name = "semimatch")]
#[command(version)]
#[command(about = "Semi-supervised CIFAR training with FixMatch and FlexMatch", long_about = None)]
struct Cli {
    /// Path to the experiment config (JSON)
    config: PathBuf,

    /// Override dataset.num_labeled from the config
    #[arg(long = "dataset.num_labeled", value_name = "N")]
    dataset_num_labeled: Option<usize>,

    /// Override dataset.random_seed from the config
    #[arg(long = "dataset.random_seed", value_name = "SEED")]
    dataset_random_seed: Option<u64>,

    /// Override the global random_seed from the config
    #[arg(long = "random_seed", value_name = "SEED")]
    random_seed: Option<u64>,

    #[command(flatten)]
    trainer: TrainerArgs,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            num_labeled: self.dataset_num_labeled,
            dataset_random_seed: self.dataset_random_seed,
            random_seed: self.random_seed,
        }
    }

    fn log_config(&self) -> LogConfig {
        if self.verbose {
            LogConfig::verbose()
        } else if self.quiet {
            LogConfig::quiet()
        } else {
            LogConfig::default()
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let _ = init_logging(&cli.log_config());

    print_banner();

    let mut config = ExperimentConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;
    config.apply_overrides(&cli.overrides());
    config.validate()?;

    info!("Experiment: {} with {}", config.dataset.name, config.method);
    info!("  Labeled samples: {}", config.dataset.num_labeled);
    info!(
        "  Split seed: {}, global seed: {}",
        config.dataset.random_seed, config.random_seed
    );

    train(&cli.trainer, config)
}

fn train(args: &TrainerArgs, config: ExperimentConfig) -> Result<()> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);

    let name = config.dataset.name;
    let logger = MetricsLogger::new("logs", name.as_str())?;
    logger.save_config(&config)?;
    info!("Run directory: {}", logger.run_dir().display());

    let checkpoints = CheckpointManager::new(logger.checkpoint_dir());
    let mut trainer = Trainer::from_args(
        args.clone(),
        logger,
        checkpoints,
        config.optimizer.scheduler.clone(),
        config.random_seed,
    );

    let devices = args.device_count();
    let per_device = config.dataset.batch_sizes.partition(devices);

    let transforms = DataTransforms::new(
        config.transform.weak.clone(),
        config.transform.strong.clone(),
        config.transform.val.clone(),
    );

    let root = Path::new("data").join(name.as_str());
    let mut data = SemiDataModule::new(
        &root,
        name,
        config.dataset.num_labeled,
        transforms,
        per_device,
        config.dataset.random_seed,
    )?;

    let mut classifier =
        MethodClassifier::from_config(&config, INPUT_DIM, data.num_unlabeled(), &mut rng);

    let summary = trainer.fit(&mut classifier, &mut data)?;

    println!();
    println!("{}", "Training complete".green().bold());
    println!("  Epochs run: {}", summary.epochs_run);
    match summary.best_epoch {
        Some(epoch) => println!(
            "  Best val/acc/ema: {:.4} (epoch {})",
            summary.best_val_acc_ema, epoch
        ),
        None => println!("  No validation improvement recorded"),
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 =================================================
   SemiMatch - FixMatch / FlexMatch on CIFAR
 ================================================="#
            .green()
    );
}
