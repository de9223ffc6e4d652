//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use ndarray::Axis;

use crate::ErrPack;
use crate::rng::Rng;
use crate::tensor::{Tensor, TensorOpError};

use super::noise::GaussianNoise;

/// Batches the denoising pairs: each batch is `(noisy, clean)` views of the
/// same images, in the same order. Noise is sampled on access, so every epoch
/// sees a fresh corruption of the clean images.
pub struct DataLoader {
	images: Tensor, // [n, c, h, w]
	batch_size: usize,
	shuffle: bool,
	order: Vec<usize>,
}

impl DataLoader {
	pub fn new(
		images: Tensor,
		batch_size: usize,
		shuffle: bool,
	) -> Result<Self, ErrPack<TensorOpError>> {
		if images.ndim() != 4 || batch_size == 0 {
			return Err(ErrPack::with_message(
				TensorOpError::InvalidShape,
				"DataLoader expects [n, c, h, w] images and a non-zero batch size",
			));
		}
		let order = (0..images.shape()[0]).collect();
		Ok(Self { images, batch_size, shuffle, order })
	}

	pub fn len(&self) -> usize {
		self.images.shape()[0]
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn num_batches(&self) -> usize {
		self.len().div_ceil(self.batch_size)
	}

	/// Reshuffles the iteration order. Call once per epoch.
	pub fn shuffle_epoch(&mut self, rng: &mut Rng) {
		if self.shuffle {
			rng.shuffle(&mut self.order);
		}
	}

	/// The `idx`-th batch as a `(noisy, clean)` pair. The last batch may be
	/// smaller than `batch_size`.
	pub fn batch(
		&self,
		idx: usize,
		noise: &GaussianNoise,
		rng: &mut Rng,
	) -> Result<(Tensor, Tensor), ErrPack<TensorOpError>> {
		let start = idx * self.batch_size;
		if start >= self.len() {
			return Err(ErrPack::with_message(
				TensorOpError::InvalidValue,
				"batch index out of range",
			));
		}
		let end = (start + self.batch_size).min(self.len());

		let shape = self.images.shape();
		let mut clean =
			ndarray::ArrayD::<f32>::zeros(ndarray::IxDyn(&[
				end - start,
				shape[1],
				shape[2],
				shape[3],
			]));
		for (bi, &src) in self.order[start..end].iter().enumerate() {
			clean
				.index_axis_mut(Axis(0), bi)
				.assign(&self.images.array().index_axis(Axis(0), src));
		}
		let clean = Tensor::from(clean);
		let noisy = noise.apply(&clean, rng);

		Ok((noisy, clean))
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	fn images(n: usize) -> Tensor {
		// image i is constant-valued i / n
		let mut buf = Vec::new();
		for i in 0..n {
			buf.extend(std::iter::repeat_n(i as f32 / n as f32, 4));
		}
		Tensor::from_vec(&[n, 1, 2, 2], buf).unwrap()
	}

	#[test]
	fn test_batching_and_last_partial_batch() {
		let loader = DataLoader::new(images(10), 4, false).unwrap();
		assert_eq!(loader.num_batches(), 3);

		let noise = GaussianNoise::new(0.0, 0.0);
		let mut rng = Rng::new_seeded(41);

		let (noisy, clean) = loader.batch(0, &noise, &mut rng).unwrap();
		assert_eq!(noisy.shape(), &[4, 1, 2, 2]);
		assert_eq!(clean.shape(), &[4, 1, 2, 2]);

		let (_, clean) = loader.batch(2, &noise, &mut rng).unwrap();
		assert_eq!(clean.shape(), &[2, 1, 2, 2]);

		assert!(loader.batch(3, &noise, &mut rng).is_err());
	}

	#[test]
	fn test_pairs_stay_aligned_after_shuffle() {
		let mut loader = DataLoader::new(images(10), 3, true).unwrap();
		let mut rng = Rng::new_seeded(42);
		loader.shuffle_epoch(&mut rng);

		// with std = 0 the noisy tensor must equal the clean one, whatever
		// the shuffle did
		let noise = GaussianNoise::new(0.0, 0.0);
		for b in 0..loader.num_batches() {
			let (noisy, clean) = loader.batch(b, &noise, &mut rng).unwrap();
			assert_eq!(
				noisy.array().as_slice().unwrap(),
				clean.array().as_slice().unwrap()
			);
		}
	}

	#[test]
	fn test_shuffle_covers_every_image() {
		let mut loader = DataLoader::new(images(8), 3, true).unwrap();
		let mut rng = Rng::new_seeded(43);
		loader.shuffle_epoch(&mut rng);

		let noise = GaussianNoise::new(0.0, 0.0);
		let mut seen: Vec<f32> = Vec::new();
		for b in 0..loader.num_batches() {
			let (_, clean) = loader.batch(b, &noise, &mut rng).unwrap();
			for i in 0..clean.shape()[0] {
				seen.push(clean.array()[[i, 0, 0, 0]]);
			}
		}
		seen.sort_by(f32::total_cmp);
		let expected: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
		assert_eq!(seen, expected);
	}
}
