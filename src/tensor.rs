//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use ndarray::{ArrayD, ArrayView4, ArrayViewMut4, Ix4, IxDyn};

use crate::ErrPack;
use crate::rng::Rng;

pub mod error;

pub use error::TensorOpError;

//--------------------------------------------------------------------------------------------------

/// Dense f32 tensor with a dynamic number of dimensions.
///
/// This is a thin wrapper around `ndarray::ArrayD<f32>`. All tensors created
/// by this crate are in standard (row-major) layout.
#[derive(Debug, Clone)]
pub struct Tensor {
	data: ArrayD<f32>,
}

impl Tensor {
	pub fn zeros(shape: &[usize]) -> Self {
		Self { data: ArrayD::zeros(IxDyn(shape)) }
	}

	pub fn full(shape: &[usize], value: f32) -> Self {
		Self { data: ArrayD::from_elem(IxDyn(shape), value) }
	}

	pub fn from_vec(shape: &[usize], buf: Vec<f32>) -> Result<Self, ErrPack<TensorOpError>> {
		let expected: usize = shape.iter().product();
		if buf.len() != expected {
			return Err(TensorOpError::len_mismatch(expected, buf.len()));
		}
		let data = ArrayD::from_shape_vec(IxDyn(shape), buf)?;
		Ok(Self { data })
	}

	/// New tensor filled with samples from the standard normal distribution.
	pub fn randn(shape: &[usize], rng: &mut Rng) -> Self {
		let mut data = ArrayD::zeros(IxDyn(shape));
		for v in &mut data {
			*v = rng.get_normal_clamped() as f32;
		}
		Self { data }
	}

	/// New tensor filled with uniform samples from `[lo, hi)`.
	pub fn rand_uniform(shape: &[usize], lo: f32, hi: f32, rng: &mut Rng) -> Self {
		let mut data = ArrayD::zeros(IxDyn(shape));
		for v in &mut data {
			*v = lo + (hi - lo) * rng.get_uniform() as f32;
		}
		Self { data }
	}

	pub fn shape(&self) -> &[usize] {
		self.data.shape()
	}

	pub fn ndim(&self) -> usize {
		self.data.ndim()
	}

	pub fn elems(&self) -> usize {
		self.data.len()
	}

	pub fn array(&self) -> &ArrayD<f32> {
		&self.data
	}

	pub fn array_mut(&mut self) -> &mut ArrayD<f32> {
		&mut self.data
	}

	pub fn into_array(self) -> ArrayD<f32> {
		self.data
	}

	/// Fixed-rank view for the convolution kernels.
	pub fn view4(&self) -> Result<ArrayView4<f32>, ErrPack<TensorOpError>> {
		Ok(self.data.view().into_dimensionality::<Ix4>()?)
	}

	pub fn view4_mut(&mut self) -> Result<ArrayViewMut4<f32>, ErrPack<TensorOpError>> {
		Ok(self.data.view_mut().into_dimensionality::<Ix4>()?)
	}

	pub fn reshape(&self, shape: &[usize]) -> Result<Self, ErrPack<TensorOpError>> {
		let data = self.data.clone().into_shape_with_order(IxDyn(shape))?;
		Ok(Self { data })
	}

	fn check_same_shape(&self, other: &Self) -> Result<(), ErrPack<TensorOpError>> {
		if self.shape() != other.shape() {
			return Err(TensorOpError::shape_mismatch(self.shape(), other.shape()));
		}
		Ok(())
	}

	pub fn add(&self, other: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		self.check_same_shape(other)?;
		Ok(Self { data: &self.data + &other.data })
	}

	pub fn sub(&self, other: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		self.check_same_shape(other)?;
		Ok(Self { data: &self.data - &other.data })
	}

	pub fn mul(&self, other: &Self) -> Result<Self, ErrPack<TensorOpError>> {
		self.check_same_shape(other)?;
		Ok(Self { data: &self.data * &other.data })
	}

	/// In-place accumulate: `self += other`.
	pub fn acc(&mut self, other: &Self) -> Result<(), ErrPack<TensorOpError>> {
		self.check_same_shape(other)?;
		self.data += &other.data;
		Ok(())
	}

	pub fn scale(&self, factor: f32) -> Self {
		Self { data: &self.data * factor }
	}

	pub fn clamp_(&mut self, lo: f32, hi: f32) {
		self.data.mapv_inplace(|v| v.clamp(lo, hi));
	}

	pub fn sum(&self) -> f64 {
		self.data.iter().map(|&v| f64::from(v)).sum()
	}

	/// Sum of squared differences. This is the MSE loss with `reduction='sum'`.
	pub fn sqr_err_sum(&self, target: &Self) -> Result<f64, ErrPack<TensorOpError>> {
		self.check_same_shape(target)?;
		let mut sum = 0.0;
		for (&a, &b) in self.data.iter().zip(target.data.iter()) {
			let diff = f64::from(a) - f64::from(b);
			sum += diff * diff;
		}
		Ok(sum)
	}
}

impl From<ArrayD<f32>> for Tensor {
	fn from(data: ArrayD<f32>) -> Self {
		Self { data }
	}
}

//--------------------------------------------------------------------------------------------------
