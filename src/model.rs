//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::ErrPack;
use crate::autograd::AutogradNode;
use crate::nn::{Conv2d, ConvTranspose2d, Layer, ModelContext, Param, ReLU, Sigmoid};
use crate::rng::Rng;
use crate::tensor::TensorOpError;

//--------------------------------------------------------------------------------------------------

pub struct ModelConfig {
	pub n_channels: usize,
	pub encoder_hidden: usize,
	pub n_latent: usize,
	pub decoder_hidden: usize,
	pub kernel_size: usize,
	pub stride: usize,
}

impl Default for ModelConfig {
	fn default() -> Self {
		Self {
			n_channels: 1,
			encoder_hidden: 32,
			n_latent: 64,
			decoder_hidden: 16,
			kernel_size: 2,
			stride: 2,
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Convolutional denoising autoencoder.
///
///     encoder: conv1 -> relu -> conv2 -> relu
///     decoder: tconv2 -> relu -> tconv1 -> sigmoid
///
/// With the default config, 28x28 inputs go 28 -> 14 -> 7 in the encoder and
/// back 7 -> 14 -> 28 in the decoder. `enable_weight_norm` reparameterizes
/// the first conv and the first transposed conv, which is the exact variant
/// pair the experiment compares.
pub struct DenoisingAutoencoder {
	conv1: Conv2d,
	conv2: Conv2d,
	tconv2: ConvTranspose2d,
	tconv1: ConvTranspose2d,
	relu: ReLU,
	sigmoid: Sigmoid,
}

impl DenoisingAutoencoder {
	pub fn new(cfg: &ModelConfig, ctx: &mut ModelContext) -> Self {
		let k = cfg.kernel_size;
		let s = cfg.stride;
		Self {
			conv1: Conv2d::new(cfg.n_channels, cfg.encoder_hidden, k, s, ctx),
			conv2: Conv2d::new(cfg.encoder_hidden, cfg.n_latent, k, s, ctx),
			tconv2: ConvTranspose2d::new(cfg.n_latent, cfg.decoder_hidden, k, s, ctx),
			tconv1: ConvTranspose2d::new(cfg.decoder_hidden, cfg.n_channels, k, s, ctx),
			relu: ReLU,
			sigmoid: Sigmoid,
		}
	}

	/// Switch to the weight-normalized parameterization. Call after
	/// `randomize`, so the decomposition captures the initialized weights.
	pub fn enable_weight_norm(
		&mut self,
		ctx: &mut ModelContext,
	) -> Result<(), ErrPack<TensorOpError>> {
		self.conv1.apply_weight_norm(ctx)?;
		self.tconv2.apply_weight_norm(ctx)?;
		Ok(())
	}
}

impl Layer for DenoisingAutoencoder {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<RefCell<Param>>)) {
		self.conv1.collect_params(f);
		self.conv2.collect_params(f);
		self.tconv2.collect_params(f);
		self.tconv1.collect_params(f);
	}

	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<RefCell<Param>>)) {
		self.conv1.collect_named_params(&format!("{prefix}.conv1"), f);
		self.conv2.collect_named_params(&format!("{prefix}.conv2"), f);
		self.tconv2.collect_named_params(&format!("{prefix}.tconv2"), f);
		self.tconv1.collect_named_params(&format!("{prefix}.tconv1"), f);
	}

	fn forward(&self, inp_node: AutogradNode) -> Result<AutogradNode, ErrPack<TensorOpError>> {
		// encoding layers
		let x = self.conv1.forward(inp_node)?;
		let x = self.relu.forward(x)?;
		let x = self.conv2.forward(x)?;
		let x = self.relu.forward(x)?;

		// decoding layers
		let x = self.tconv2.forward(x)?;
		let x = self.relu.forward(x)?;
		let x = self.tconv1.forward(x)?;
		self.sigmoid.forward(x)
	}

	fn randomize(&mut self, rng: &mut Rng) -> Result<(), ErrPack<TensorOpError>> {
		self.conv1.randomize(rng)?;
		self.conv2.randomize(rng)?;
		self.tconv2.randomize(rng)?;
		self.tconv1.randomize(rng)?;
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::nn::MseLoss;
	use crate::tensor::Tensor;

	#[test]
	fn test_forward_shape_roundtrip() {
		let mut rng = Rng::new_seeded(51);
		let mut ctx = ModelContext::new();
		let mut model = DenoisingAutoencoder::new(&ModelConfig::default(), &mut ctx);
		model.randomize(&mut rng).unwrap();

		let inp = Tensor::randn(&[2, 1, 28, 28], &mut rng);
		let out = model.forward(AutogradNode::new(inp, None)).unwrap();
		assert_eq!(out.value.shape(), &[2, 1, 28, 28]);
		// sigmoid output is a valid pixel intensity
		for &v in out.value.array().iter() {
			assert!((0.0..=1.0).contains(&v));
		}
	}

	#[test]
	fn test_named_params_follow_parameterization() {
		let mut ctx = ModelContext::new();
		let mut model = DenoisingAutoencoder::new(&ModelConfig::default(), &mut ctx);

		let names: Vec<String> =
			model.named_params("ae").into_iter().map(|(n, _)| n).collect();
		assert!(names.contains(&"ae.conv1.weight".to_string()));
		assert!(names.contains(&"ae.tconv2.weight".to_string()));

		model.enable_weight_norm(&mut ctx).unwrap();
		let names: Vec<String> =
			model.named_params("ae").into_iter().map(|(n, _)| n).collect();
		assert!(names.contains(&"ae.conv1.weight_g".to_string()));
		assert!(names.contains(&"ae.conv1.weight_v".to_string()));
		assert!(names.contains(&"ae.tconv2.weight_g".to_string()));
		assert!(names.contains(&"ae.conv2.weight".to_string()));
		assert!(!names.contains(&"ae.conv1.weight".to_string()));
	}

	#[test]
	fn test_training_reduces_loss() {
		// small images keep the test fast; the layer stack is the same
		let mut rng = Rng::new_seeded(52);
		let mut ctx = ModelContext::new();
		ctx.opt_coef.learning_rate = 1e-3;
		let cfg = ModelConfig {
			encoder_hidden: 4,
			n_latent: 8,
			decoder_hidden: 4,
			..ModelConfig::default()
		};
		let mut model = DenoisingAutoencoder::new(&cfg, &mut ctx);
		model.randomize(&mut rng).unwrap();

		let clean = Tensor::rand_uniform(&[4, 1, 8, 8], 0.0, 1.0, &mut rng);
		let mse = MseLoss;

		let mut first = None;
		let mut last = 0.0;
		for _ in 0..30 {
			ctx.zero_grad();
			let out = model.forward(AutogradNode::new(clean.clone(), None)).unwrap();
			last = mse.backward(out, &clean).unwrap();
			ctx.step().unwrap();
			first.get_or_insert(last);
		}
		let first = first.unwrap();
		assert!(last < first, "loss did not decrease: {first} -> {last}");
	}

	#[test]
	fn test_weight_normed_training_reduces_loss() {
		let mut rng = Rng::new_seeded(53);
		let mut ctx = ModelContext::new();
		ctx.opt_coef.learning_rate = 1e-3;
		let cfg = ModelConfig {
			encoder_hidden: 4,
			n_latent: 8,
			decoder_hidden: 4,
			..ModelConfig::default()
		};
		let mut model = DenoisingAutoencoder::new(&cfg, &mut ctx);
		model.randomize(&mut rng).unwrap();
		model.enable_weight_norm(&mut ctx).unwrap();

		let clean = Tensor::rand_uniform(&[4, 1, 8, 8], 0.0, 1.0, &mut rng);
		let mse = MseLoss;

		let mut first = None;
		let mut last = 0.0;
		for _ in 0..30 {
			ctx.zero_grad();
			let out = model.forward(AutogradNode::new(clean.clone(), None)).unwrap();
			last = mse.backward(out, &clean).unwrap();
			ctx.step().unwrap();
			first.get_or_insert(last);
		}
		let first = first.unwrap();
		assert!(last < first, "loss did not decrease: {first} -> {last}");
	}
}
