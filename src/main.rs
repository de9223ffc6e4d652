//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::path::{Path, PathBuf};

use wnae::data::{DataLoader, GaussianNoise, mnist};
use wnae::model::{DenoisingAutoencoder, ModelConfig};
use wnae::nn::{Layer, ModelContext};
use wnae::rng::Rng;
use wnae::tensor::TensorOpError;
use wnae::train::{TrainConfig, TrainHistory, evaluate, train_epoch};
use wnae::{ErrPack, checkpoint, plot};

//--------------------------------------------------------------------------------------------------

const SEED: u64 = 42;

/// Trains one variant of the autoencoder from scratch and returns its
/// per-epoch test losses.
fn run_variant(
	use_weight_norm: bool,
	data_dir: &Path,
	cfg: &TrainConfig,
) -> Result<Vec<f64>, ErrPack<TensorOpError>> {
	let variant = if use_weight_norm { "weight norm" } else { "baseline" };
	log::info!("training {variant} model");

	// Both variants start from the same seed, so the initial composed
	// weights are identical and the runs differ only in parameterization.
	let mut rng = Rng::new_seeded(SEED);
	let mut ctx = ModelContext::new();
	ctx.opt_coef.learning_rate = cfg.learning_rate;

	let mut model = DenoisingAutoencoder::new(&ModelConfig::default(), &mut ctx);
	model.randomize(&mut rng)?;
	if use_weight_norm {
		model.enable_weight_norm(&mut ctx)?;
	}

	let train_images = mnist::read_images(&data_dir.join("train-images-idx3-ubyte"))?;
	let test_images = mnist::read_images(&data_dir.join("t10k-images-idx3-ubyte"))?;
	log::info!(
		"loaded {} train and {} test images",
		train_images.shape()[0],
		test_images.shape()[0]
	);

	let mut train_loader = DataLoader::new(train_images, cfg.batch_size_train, true)?;
	let mut test_loader = DataLoader::new(test_images, cfg.batch_size_test, false)?;
	let noise = GaussianNoise::new(cfg.noise_mean, cfg.noise_std);

	let mut history = TrainHistory::default();
	for epoch in 0..cfg.epochs {
		train_epoch(
			&model,
			&mut ctx,
			&mut train_loader,
			&noise,
			cfg,
			epoch,
			&mut history,
			&mut rng,
		)?;
		let test_loss = evaluate(&model, &mut test_loader, &noise, &mut rng)?;
		log::info!("epoch {}: test loss {test_loss:.4}", epoch + 1);
		history.test.push(test_loss);
	}

	let file = if use_weight_norm { "weight_norm.safetensors" } else { "baseline.safetensors" };
	checkpoint::save(&model, "ae", Path::new(file))?;
	log::info!("saved {variant} parameters to {file}");

	Ok(history.test)
}

fn run() -> Result<(), ErrPack<TensorOpError>> {
	let data_dir =
		std::env::args().nth(1).map_or_else(|| PathBuf::from("data"), PathBuf::from);

	let cfg = TrainConfig::default();
	let weight_norm_losses = run_variant(true, &data_dir, &cfg)?;
	let baseline_losses = run_variant(false, &data_dir, &cfg)?;

	plot::plot_test_losses(&baseline_losses, &weight_norm_losses, Path::new("test_loss.png"))?;
	log::info!("wrote comparison chart to test_loss.png");
	Ok(())
}

fn main() {
	// only fails on double init
	stderrlog::new().verbosity(log::Level::Info).init().ok();

	if let Err(err) = run() {
		log::error!("{err}");
		std::process::exit(1);
	}
}
