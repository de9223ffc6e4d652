//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::ErrPack;
use crate::tensor::{Tensor, TensorOpError};

use super::optimizer::{OptCoef, OptParam};

/// A trainable tensor together with its accumulated gradient and lazily
/// initialized optimizer state.
///
/// Params retired by the weight-norm reparameterization stay registered in the
/// `ModelContext` but are flagged non-trainable, so the optimizer skips them.
pub struct Param {
	value: Tensor,
	grad: Option<Tensor>,
	trainable: bool,
	opt_param: Option<OptParam>,
}

impl Param {
	pub fn new(shape: &[usize]) -> Rc<RefCell<Self>> {
		Self::with_value(Tensor::zeros(shape))
	}

	pub fn with_value(value: Tensor) -> Rc<RefCell<Self>> {
		Rc::new(RefCell::new(Self {
			value,
			grad: None,
			trainable: true,
			opt_param: None,
		}))
	}

	pub fn value(&self) -> &Tensor {
		&self.value
	}

	pub fn value_mut(&mut self) -> &mut Tensor {
		&mut self.value
	}

	pub fn set_value(&mut self, value: Tensor) -> Result<(), ErrPack<TensorOpError>> {
		if value.shape() != self.value.shape() {
			return Err(TensorOpError::shape_mismatch(value.shape(), self.value.shape()));
		}
		self.value = value;
		Ok(())
	}

	pub fn trainable(&self) -> bool {
		self.trainable
	}

	pub fn set_trainable(&mut self, trainable: bool) {
		self.trainable = trainable;
	}

	pub fn grad(&self) -> Option<&Tensor> {
		self.grad.as_ref()
	}

	pub fn zero_grad(&mut self) {
		self.grad = None;
	}

	pub fn accumulate_grad(&mut self, grad: Tensor) -> Result<(), ErrPack<TensorOpError>> {
		if grad.shape() != self.value.shape() {
			return Err(TensorOpError::shape_mismatch(grad.shape(), self.value.shape()));
		}
		match &mut self.grad {
			Some(current) => current.acc(&grad)?,
			None => self.grad = Some(grad),
		}
		Ok(())
	}

	/// One optimizer update. A no-op for non-trainable params and for params
	/// that did not receive a gradient in this step.
	pub fn step(&mut self, coef: &OptCoef) -> Result<(), ErrPack<TensorOpError>> {
		if !self.trainable {
			return Ok(());
		}
		let Some(grad) = self.grad.take() else {
			return Ok(());
		};
		let Self { value, opt_param, .. } = self;
		let opt_param = opt_param.get_or_insert_with(|| OptParam::new(value.shape()));
		opt_param.step(value, &grad, coef)
	}
}
