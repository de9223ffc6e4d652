//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

pub mod conv2d;
pub mod conv_transpose2d;
pub mod model_context;
pub mod mse;
pub mod optimizer;
pub mod param;
pub mod relu;
pub mod sigmoid;
pub mod weight_norm;

use crate::ErrPack;
use crate::autograd::AutogradNode;
use crate::rng::Rng;
use crate::tensor::TensorOpError;

pub use conv2d::Conv2d;
pub use conv_transpose2d::ConvTranspose2d;
pub use model_context::ModelContext;
pub use mse::MseLoss;
pub use optimizer::OptCoef;
pub use param::Param;
pub use relu::ReLU;
pub use sigmoid::Sigmoid;
pub use weight_norm::{WeightNorm, norm_except_dim};

pub trait Layer {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<RefCell<Param>>));
	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<RefCell<Param>>));

	fn params(&self) -> Vec<Rc<RefCell<Param>>> {
		let mut params = Vec::new();
		self.collect_params(&mut |p| params.push(p));
		params
	}

	fn named_params(&self, prefix: &str) -> Vec<(String, Rc<RefCell<Param>>)> {
		let mut params = Vec::new();
		self.collect_named_params(prefix, &mut |name, p| params.push((name, p)));
		params
	}

	fn forward(&self, inp_node: AutogradNode) -> Result<AutogradNode, ErrPack<TensorOpError>>;

	fn randomize(&mut self, rng: &mut Rng) -> Result<(), ErrPack<TensorOpError>>;
}
