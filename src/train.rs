//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::autograd::AutogradNode;
use crate::data::{DataLoader, GaussianNoise};
use crate::nn::{Layer, ModelContext, MseLoss};
use crate::rng::Rng;
use crate::tensor::TensorOpError;

//--------------------------------------------------------------------------------------------------

pub struct TrainConfig {
	pub epochs: usize,
	pub batch_size_train: usize,
	pub batch_size_test: usize,
	pub learning_rate: f64,
	pub noise_mean: f64,
	pub noise_std: f64,

	/// Append to the loss history every this many batches.
	pub record_interval: usize,

	/// Emit a progress line every this many batches.
	pub log_interval: usize,
}

impl Default for TrainConfig {
	fn default() -> Self {
		Self {
			epochs: 3,
			batch_size_train: 64,
			batch_size_test: 1000,
			learning_rate: 1e-4,
			noise_mean: 0.0,
			noise_std: 0.3,
			record_interval: 10,
			log_interval: 100,
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Loss curves collected over a full run. Train losses are sampled mid-epoch,
/// test losses once per epoch.
#[derive(Default)]
pub struct TrainHistory {
	/// `(samples seen so far, mean loss per sample over the recorded batch)`
	pub train: Vec<(usize, f64)>,

	/// One entry per epoch: summed squared error over the whole test set
	/// divided by the number of test images.
	pub test: Vec<f64>,
}

//--------------------------------------------------------------------------------------------------

/// Runs one pass over the training set. The loader is shuffled first, so
/// every epoch sees the images in a fresh order.
#[allow(clippy::too_many_arguments)]
pub fn train_epoch(
	model: &dyn Layer,
	ctx: &mut ModelContext,
	loader: &mut DataLoader,
	noise: &GaussianNoise,
	cfg: &TrainConfig,
	epoch: usize,
	history: &mut TrainHistory,
	rng: &mut Rng,
) -> Result<(), ErrPack<TensorOpError>> {
	let mse = MseLoss;
	loader.shuffle_epoch(rng);

	let mut seen = 0;
	for batch_idx in 0..loader.num_batches() {
		let (noisy, clean) = loader.batch(batch_idx, noise, rng)?;
		let batch_len = noisy.shape()[0];

		ctx.zero_grad();
		let out = model.forward(AutogradNode::new(noisy, None))?;
		let loss = mse.backward(out, &clean)?;
		ctx.step()?;

		seen += batch_len;
		#[allow(clippy::cast_precision_loss)]
		let mean_loss = loss / batch_len as f64;
		if batch_idx % cfg.record_interval == 0 {
			history.train.push((epoch * loader.len() + seen, mean_loss));
		}
		if batch_idx % cfg.log_interval == 0 {
			log::info!(
				"epoch {}, batch {}/{}: train loss {:.4}",
				epoch + 1,
				batch_idx,
				loader.num_batches(),
				mean_loss
			);
		}
	}
	Ok(())
}

/// Mean summed-squared-error per image over the whole test set. No gradients
/// are accumulated; the backward chain built during the forward pass is
/// simply dropped.
pub fn evaluate(
	model: &dyn Layer,
	loader: &mut DataLoader,
	noise: &GaussianNoise,
	rng: &mut Rng,
) -> Result<f64, ErrPack<TensorOpError>> {
	let mse = MseLoss;
	let mut total = 0.0;
	for batch_idx in 0..loader.num_batches() {
		let (noisy, clean) = loader.batch(batch_idx, noise, rng)?;
		let out = model.forward(AutogradNode::new(noisy, None))?;
		total += mse.loss(&out.value, &clean)?;
	}
	#[allow(clippy::cast_precision_loss)]
	Ok(total / loader.len() as f64)
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{DenoisingAutoencoder, ModelConfig};
	use crate::tensor::Tensor;

	fn tiny_setup(seed: u64) -> (DenoisingAutoencoder, ModelContext, Rng) {
		let mut rng = Rng::new_seeded(seed);
		let mut ctx = ModelContext::new();
		let cfg = ModelConfig {
			encoder_hidden: 4,
			n_latent: 8,
			decoder_hidden: 4,
			..ModelConfig::default()
		};
		let mut model = DenoisingAutoencoder::new(&cfg, &mut ctx);
		model.randomize(&mut rng).unwrap();
		(model, ctx, rng)
	}

	#[test]
	fn test_train_epoch_records_history() {
		let (model, mut ctx, mut rng) = tiny_setup(61);
		ctx.opt_coef.learning_rate = 1e-3;

		let images = Tensor::rand_uniform(&[12, 1, 8, 8], 0.0, 1.0, &mut rng);
		let mut loader = DataLoader::new(images, 4, true).unwrap();
		let noise = GaussianNoise::new(0.0, 0.3);
		let cfg = TrainConfig {
			record_interval: 1,
			log_interval: 100,
			..TrainConfig::default()
		};

		let mut history = TrainHistory::default();
		train_epoch(&model, &mut ctx, &mut loader, &noise, &cfg, 0, &mut history, &mut rng)
			.unwrap();

		// 3 batches, recorded every batch
		assert_eq!(history.train.len(), 3);
		assert_eq!(history.train[0].0, 4);
		assert_eq!(history.train[2].0, 12);
		for &(_, loss) in &history.train {
			assert!(loss.is_finite() && loss > 0.0);
		}
	}

	#[test]
	fn test_evaluate_is_per_image_mean() {
		let (model, _ctx, mut rng) = tiny_setup(62);

		let images = Tensor::rand_uniform(&[10, 1, 8, 8], 0.0, 1.0, &mut rng);
		let mut loader = DataLoader::new(images.clone(), 10, false).unwrap();
		let noise = GaussianNoise::new(0.0, 0.0);

		let test_loss = evaluate(&model, &mut loader, &noise, &mut rng).unwrap();

		// with zero noise the same number must come out of a manual pass
		let mse = MseLoss;
		let out = model.forward(AutogradNode::new(images.clone(), None)).unwrap();
		let expected = mse.loss(&out.value, &images).unwrap() / 10.0;
		assert!((test_loss - expected).abs() < 1e-6);
	}

	#[test]
	fn test_evaluate_leaves_grads_empty() {
		let (model, mut ctx, mut rng) = tiny_setup(63);

		let images = Tensor::rand_uniform(&[4, 1, 8, 8], 0.0, 1.0, &mut rng);
		let mut loader = DataLoader::new(images, 4, false).unwrap();
		let noise = GaussianNoise::new(0.0, 0.3);

		ctx.zero_grad();
		evaluate(&model, &mut loader, &noise, &mut rng).unwrap();
		for param in model.params() {
			assert!(param.borrow().grad().is_none());
		}
	}
}
