//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::rng::Rng;
use crate::tensor::Tensor;

/// Additive Gaussian noise for the denoising task. The noisy result is
/// clamped back into the valid pixel range `[0, 1]`.
pub struct GaussianNoise {
	pub mean: f64,
	pub std: f64,
}

impl GaussianNoise {
	pub fn new(mean: f64, std: f64) -> Self {
		Self { mean, std }
	}

	pub fn apply(&self, img: &Tensor, rng: &mut Rng) -> Tensor {
		let mut out = img.clone();
		for v in out.array_mut() {
			let noise = self.mean + self.std * rng.get_normal_clamped();
			*v += noise as f32;
		}
		out.clamp_(0.0, 1.0);
		out
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_output_stays_in_pixel_range() {
		let mut rng = Rng::new_seeded(31);
		let img = Tensor::full(&[1, 1, 8, 8], 0.5);
		let noise = GaussianNoise::new(0.0, 0.3);

		let noisy = noise.apply(&img, &mut rng);
		assert_eq!(noisy.shape(), img.shape());
		for &v in noisy.array().iter() {
			assert!((0.0..=1.0).contains(&v));
		}
	}

	#[test]
	fn test_noise_actually_perturbs() {
		let mut rng = Rng::new_seeded(32);
		let img = Tensor::full(&[1, 1, 4, 4], 0.5);
		let noise = GaussianNoise::new(0.0, 0.3);

		let noisy = noise.apply(&img, &mut rng);
		let moved = noisy
			.array()
			.iter()
			.zip(img.array().iter())
			.filter(|(a, b)| a != b)
			.count();
		assert!(moved > 0);
	}

	#[test]
	fn test_deterministic_per_seed() {
		let img = Tensor::full(&[1, 1, 4, 4], 0.5);
		let noise = GaussianNoise::new(0.0, 0.3);

		let mut rng_a = Rng::new_seeded(33);
		let mut rng_b = Rng::new_seeded(33);
		let a = noise.apply(&img, &mut rng_a);
		let b = noise.apply(&img, &mut rng_b);
		assert_eq!(
			a.array().as_slice().unwrap(),
			b.array().as_slice().unwrap()
		);
	}

	#[test]
	fn test_zero_std_is_identity() {
		let mut rng = Rng::new_seeded(34);
		let img = Tensor::full(&[1, 1, 4, 4], 0.25);
		let noise = GaussianNoise::new(0.0, 0.0);

		let noisy = noise.apply(&img, &mut rng);
		assert_eq!(
			noisy.array().as_slice().unwrap(),
			img.array().as_slice().unwrap()
		);
	}
}
