//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::Result;

use super::optimizer::OptCoef;
use super::param::Param;

/// Owns every param of a model on behalf of the optimizer.
pub struct ModelContext {
	pub opt_coef: OptCoef,
	pub params: Vec<Rc<RefCell<Param>>>,
}

impl Default for ModelContext {
	fn default() -> Self {
		Self::new()
	}
}

impl ModelContext {
	pub fn new() -> Self {
		Self {
			opt_coef: OptCoef::default(),
			params: Vec::new(),
		}
	}

	pub fn new_param(&mut self, shape: &[usize]) -> Rc<RefCell<Param>> {
		let param = Param::new(shape);
		self.params.push(param.clone());
		param
	}

	pub fn register_param(&mut self, param: Rc<RefCell<Param>>) -> Rc<RefCell<Param>> {
		self.params.push(param.clone());
		param
	}

	/// Retire a param from optimization. Used when weight norm replaces a
	/// plain weight with its `g`/`v` decomposition (and vice versa).
	pub fn drop_param(&mut self, param: &Rc<RefCell<Param>>) {
		self.params.retain(|p| !Rc::ptr_eq(p, param));
	}

	pub fn zero_grad(&mut self) {
		for param in &self.params {
			param.borrow_mut().zero_grad();
		}
	}

	pub fn step(&mut self) -> Result<()> {
		for param in &self.params {
			param.borrow_mut().step(&self.opt_coef)?;
		}
		Ok(())
	}
}
