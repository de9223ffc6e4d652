//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::path::Path;

use safetensors::tensor::{Dtype, TensorView};
use safetensors::{SafeTensorError, SafeTensors};

use crate::ErrPack;
use crate::nn::Layer;
use crate::tensor::{Tensor, TensorOpError};

//--------------------------------------------------------------------------------------------------

fn format_err(err: SafeTensorError) -> ErrPack<TensorOpError> {
	ErrPack::with_message(TensorOpError::FormatError, err.to_string())
}

/// Writes all model parameters to a safetensors file. Parameter names come
/// from `Layer::collect_named_params`, so a weight-normalized layer saves
/// `weight_g` / `weight_v` rather than the composed `weight`.
pub fn save(
	model: &dyn Layer,
	prefix: &str,
	path: &Path,
) -> Result<(), ErrPack<TensorOpError>> {
	let params = model.named_params(prefix);

	let mut buffers = Vec::with_capacity(params.len());
	for (name, param) in &params {
		let param = param.borrow();
		let value = param.value();
		let mut bytes = Vec::with_capacity(value.elems() * 4);
		for &v in value.array().iter() {
			bytes.extend_from_slice(&v.to_le_bytes());
		}
		buffers.push((name.clone(), value.shape().to_vec(), bytes));
	}

	let mut views = Vec::with_capacity(buffers.len());
	for (name, shape, bytes) in &buffers {
		let view =
			TensorView::new(Dtype::F32, shape.clone(), bytes).map_err(format_err)?;
		views.push((name.as_str(), view));
	}

	safetensors::serialize_to_file(views, &None, path).map_err(format_err)
}

/// Loads parameters saved by [`save`] back into the model. The model must
/// already have the matching parameterization; loading `weight_g` into a
/// layer without weight norm is an error.
pub fn load(
	model: &dyn Layer,
	prefix: &str,
	path: &Path,
) -> Result<(), ErrPack<TensorOpError>> {
	let bytes = std::fs::read(path)?;
	let file = SafeTensors::deserialize(&bytes).map_err(format_err)?;

	for (name, param) in model.named_params(prefix) {
		let view = file.tensor(&name).map_err(|_| {
			ErrPack::with_message(
				TensorOpError::FormatError,
				format!("checkpoint is missing tensor `{name}`"),
			)
		})?;
		if view.dtype() != Dtype::F32 {
			return Err(ErrPack::with_message(
				TensorOpError::FormatError,
				format!("tensor `{name}` is not f32"),
			));
		}

		let values: Vec<f32> = view
			.data()
			.chunks_exact(4)
			.map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
			.collect();

		let value = Tensor::from_vec(view.shape(), values)?;
		param.borrow_mut().set_value(value)?;
	}
	Ok(())
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::{DenoisingAutoencoder, ModelConfig};
	use crate::nn::ModelContext;
	use crate::rng::Rng;

	fn tiny_model(seed: u64, ctx: &mut ModelContext) -> DenoisingAutoencoder {
		let mut rng = Rng::new_seeded(seed);
		let cfg = ModelConfig {
			encoder_hidden: 4,
			n_latent: 8,
			decoder_hidden: 4,
			..ModelConfig::default()
		};
		let mut model = DenoisingAutoencoder::new(&cfg, ctx);
		model.randomize(&mut rng).unwrap();
		model
	}

	#[test]
	fn test_save_load_roundtrip() {
		let path = std::env::temp_dir().join("wnae_test_checkpoint.safetensors");

		let mut ctx_a = ModelContext::new();
		let model_a = tiny_model(71, &mut ctx_a);
		save(&model_a, "ae", &path).unwrap();

		let mut ctx_b = ModelContext::new();
		let model_b = tiny_model(72, &mut ctx_b);
		load(&model_b, "ae", &path).unwrap();

		let params_a = model_a.named_params("ae");
		let params_b = model_b.named_params("ae");
		assert_eq!(params_a.len(), params_b.len());
		for ((name_a, a), (name_b, b)) in params_a.iter().zip(&params_b) {
			assert_eq!(name_a, name_b);
			let a = a.borrow();
			let b = b.borrow();
			assert_eq!(a.value().array(), b.value().array());
		}

		std::fs::remove_file(&path).ok();
	}

	#[test]
	fn test_load_rejects_mismatched_parameterization() {
		let path = std::env::temp_dir().join("wnae_test_checkpoint_wn.safetensors");

		let mut ctx_a = ModelContext::new();
		let model_a = tiny_model(73, &mut ctx_a);
		save(&model_a, "ae", &path).unwrap();

		let mut ctx_b = ModelContext::new();
		let mut model_b = tiny_model(74, &mut ctx_b);
		model_b.enable_weight_norm(&mut ctx_b).unwrap();

		// the weight-normalized model asks for `weight_g`, which the plain
		// checkpoint does not have
		assert!(load(&model_b, "ae", &path).is_err());

		std::fs::remove_file(&path).ok();
	}
}
