//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

// State initialization constant ("expand 32-byte k")
const CONST: [u32; 4] = [0x_6170_7865, 0x_3320_646e, 0x_7962_2d32, 0x_6b20_6574];

const STATE_WORDS: usize = 16;

/// Deterministic random number generator based on the ChaCha block function.
///
/// The whole experiment draws from a single seeded instance, so a fixed seed
/// reproduces the run exactly: weight init, batch shuffling and noise
/// injection included.
pub struct Rng {
	state: [u32; STATE_WORDS],
	normal_buf: [f64; STATE_WORDS],
	normal_pos: usize,
}

impl Default for Rng {
	fn default() -> Self {
		Self::new(&[
			0x0a, 0x69, 0xee, 0x79, 0xfb, 0x23, 0x8e, 0x49,
			0x9b, 0xf9, 0xa0, 0x72, 0x00, 0xda, 0xbd, 0x56,
			0x04, 0x20, 0xfb, 0x57, 0x7d, 0x06, 0x2d, 0xe2,
			0x2b, 0x40, 0x41, 0x31, 0x4e, 0xd7, 0xe5, 0x69,
			0x1a, 0xda, 0xb1, 0x4a, 0x4c, 0x3d, 0x51, 0xfd,
			0x5c, 0x3f, 0x2a, 0x7e, 0x1f, 0x2b, 0x6b, 0x8c,
		])
	}
}

impl Rng {
	pub fn new(seed: &[u8; 48]) -> Self {
		let mut words = [0_u32; 12];
		for (i, w) in words.iter_mut().enumerate() {
			*w = u32::from_le_bytes([
				seed[4 * i],
				seed[4 * i + 1],
				seed[4 * i + 2],
				seed[4 * i + 3],
			]);
		}
		Self {
			state: [
				CONST[0], CONST[1], CONST[2], CONST[3],
				words[0], words[1], words[2], words[3],
				words[4], words[5], words[6], words[7],
				words[8], words[9], words[10], words[11],
			],
			normal_buf: [0.0; STATE_WORDS],
			normal_pos: STATE_WORDS,
		}
	}

	/// Convenience seeding for tests and the experiment config. The word is
	/// spread over the whole 48-byte seed.
	pub fn new_seeded(seed: u64) -> Self {
		let mut bytes = [0_u8; 48];
		for (i, chunk) in bytes.chunks_exact_mut(8).enumerate() {
			chunk.copy_from_slice(&(seed.wrapping_add(i as u64)).to_le_bytes());
		}
		Self::new(&bytes)
	}

	// generates a block of random numbers
	#[inline(never)]
	fn get_block(&mut self) -> [u32; STATE_WORDS] {
		let mut result = self.state;

		// do 7 double rounds, i.e. 14 rounds
		for _ in 0..7 {
			Self::quarter_round(0, 4, 8, 12, &mut result);
			Self::quarter_round(1, 5, 9, 13, &mut result);
			Self::quarter_round(2, 6, 10, 14, &mut result);
			Self::quarter_round(3, 7, 11, 15, &mut result);

			Self::quarter_round(0, 5, 10, 15, &mut result);
			Self::quarter_round(1, 6, 11, 12, &mut result);
			Self::quarter_round(2, 7, 8, 13, &mut result);
			Self::quarter_round(3, 4, 9, 14, &mut result);
		}

		// add original state
		for i in 0..STATE_WORDS {
			result[i] = result[i].wrapping_add(self.state[i]);
		}

		// increment counter
		let (t, c) = self.state[12].overflowing_add(1);
		self.state[12] = t;
		self.state[13] = self.state[13].wrapping_add(u32::from(c));

		result
	}

	// internal function used by get_block()
	#[inline(always)]
	fn quarter_round(a: usize, b: usize, c: usize, d: usize, state: &mut [u32; STATE_WORDS]) {
		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(16);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(12);

		state[a] = state[a].wrapping_add(state[b]);
		state[d] ^= state[a];
		state[d] = state[d].rotate_left(8);

		state[c] = state[c].wrapping_add(state[d]);
		state[b] ^= state[c];
		state[b] = state[b].rotate_left(7);
	}

	/// Uniform sample from `[0.0, 1.0)`.
	pub fn get_uniform(&mut self) -> f64 {
		let block = self.get_block();
		f64::from(block[0]) * (1.0 / 4_294_967_296.0)
	}

	#[inline(never)]
	fn refill_normal_buf(&mut self) {
		let block = self.get_block();
		let uniform: [f64; STATE_WORDS] = block.map(|v| {
			let v: f64 = v.into();
			v * (1.0 / 4_294_967_296.0)
		});

		for i in 0..STATE_WORDS / 2 {
			let x = 1.0 - uniform[2 * i]; // (0.0, 1.0]
			let y = uniform[2 * i + 1]; // [0.0, 1.0)

			// box mueller transform
			let r = (-2.0 * x.ln()).sqrt();
			let theta = std::f64::consts::TAU * y;
			self.normal_buf[2 * i] = r * theta.cos();
			self.normal_buf[2 * i + 1] = r * theta.sin();
		}
		self.normal_pos = 0;
	}

	/// Generates a float with normal distribution with mean 0 and variance 1.
	/// The generated values are guaranteed to be in the range (-10.0, 10.0)
	pub fn get_normal_clamped(&mut self) -> f64 {
		if self.normal_pos >= STATE_WORDS {
			self.refill_normal_buf();
		}
		let result = self.normal_buf[self.normal_pos];
		self.normal_pos += 1;

		if result.abs() > 10.0 {
			log::warn!("Rng::get_normal_clamped(): clamping {result} to (-10.0, 10.0)");
			return 0.0;
		}

		result
	}

	/// Fisher-Yates shuffle. Used by the train loader at the start of each epoch.
	pub fn shuffle(&mut self, indices: &mut [usize]) {
		for i in (1..indices.len()).rev() {
			let j = (self.get_uniform() * (i + 1) as f64) as usize;
			let j = j.min(i);
			indices.swap(i, j);
		}
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_deterministic_for_seed() {
		let mut a = Rng::new_seeded(7);
		let mut b = Rng::new_seeded(7);
		for _ in 0..100 {
			assert_eq!(a.get_normal_clamped(), b.get_normal_clamped());
			assert_eq!(a.get_uniform(), b.get_uniform());
		}
	}

	#[test]
	fn test_normal_moments() {
		let mut rng = Rng::default();
		let n = 20_000;
		let samples: Vec<f64> = (0..n).map(|_| rng.get_normal_clamped()).collect();
		let mean = samples.iter().sum::<f64>() / n as f64;
		let var = samples.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n as f64;
		assert!(mean.abs() < 0.05, "mean = {mean}");
		assert!((var - 1.0).abs() < 0.05, "var = {var}");
	}

	#[test]
	fn test_uniform_range() {
		let mut rng = Rng::default();
		for _ in 0..1000 {
			let v = rng.get_uniform();
			assert!((0.0..1.0).contains(&v));
		}
	}

	#[test]
	fn test_shuffle_is_permutation() {
		let mut rng = Rng::new_seeded(3);
		let mut indices: Vec<usize> = (0..100).collect();
		rng.shuffle(&mut indices);
		let mut sorted = indices.clone();
		sorted.sort_unstable();
		assert_eq!(sorted, (0..100).collect::<Vec<_>>());
		assert_ne!(indices, (0..100).collect::<Vec<_>>());
	}
}
