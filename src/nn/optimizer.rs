//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

// Adam with bias correction: https://arxiv.org/abs/1412.6980

use ndarray::Zip;

use crate::ErrPack;
use crate::tensor::{Tensor, TensorOpError};

//--------------------------------------------------------------------------------------------------

pub struct OptCoef {
	pub m_decay: f64,       // beta1
	pub v_decay: f64,       // beta2
	pub eps: f64,           // epsilon
	pub learning_rate: f64, // alpha
}

impl Default for OptCoef {
	fn default() -> Self {
		Self {
			m_decay: 0.9,
			v_decay: 0.999,
			eps: 1e-8,
			learning_rate: 0.001,
		}
	}
}

//--------------------------------------------------------------------------------------------------

/// Per-param Adam state: first and second moment estimates plus the step
/// counter driving bias correction.
pub struct OptParam {
	m: Tensor,
	v: Tensor,
	step_count: u32,
}

impl OptParam {
	pub fn new(shape: &[usize]) -> Self {
		Self {
			m: Tensor::zeros(shape),
			v: Tensor::zeros(shape),
			step_count: 0,
		}
	}

	pub fn step(
		&mut self,
		value: &mut Tensor,
		grad: &Tensor,
		coef: &OptCoef,
	) -> Result<(), ErrPack<TensorOpError>> {
		if grad.shape() != value.shape() {
			return Err(TensorOpError::shape_mismatch(grad.shape(), value.shape()));
		}

		self.step_count += 1;
		let m_correction = 1.0 - coef.m_decay.powi(self.step_count as i32);
		let v_correction = 1.0 - coef.v_decay.powi(self.step_count as i32);

		Zip::from(value.array_mut())
			.and(self.m.array_mut())
			.and(self.v.array_mut())
			.and(grad.array())
			.for_each(|value, m, v, &grad| {
				let g = f64::from(grad);
				let new_m = coef.m_decay * f64::from(*m) + (1.0 - coef.m_decay) * g;
				let new_v = coef.v_decay * f64::from(*v) + (1.0 - coef.v_decay) * g * g;
				let m_hat = new_m / m_correction;
				let v_hat = new_v / v_correction;
				let update = coef.learning_rate * m_hat / (v_hat.sqrt() + coef.eps);
				*m = new_m as f32;
				*v = new_v as f32;
				*value = (f64::from(*value) - update) as f32;
			});

		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------
