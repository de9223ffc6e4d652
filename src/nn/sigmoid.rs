//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use crate::ErrPack;
use crate::autograd::{self, AutogradNode, BackwardFn};
use crate::rng::Rng;
use crate::tensor::{Tensor, TensorOpError};

use super::param::Param;
use super::Layer;

pub struct Sigmoid;

impl Layer for Sigmoid {
	fn collect_params(&self, _f: &mut dyn FnMut(Rc<RefCell<Param>>)) {
		// no parameters to collect
	}

	fn collect_named_params(&self, _prefix: &str, _f: &mut dyn FnMut(String, Rc<RefCell<Param>>)) {
		// no parameters to collect
	}

	fn forward(&self, inp_node: AutogradNode) -> Result<AutogradNode, ErrPack<TensorOpError>> {
		let (inp, inp_backward) = inp_node.take();

		let mut out = inp;
		out.array_mut().mapv_inplace(|v| 1.0 / (1.0 + (-v).exp()));

		let backward_fn = inp_backward.map(|inp_backward| {
			Box::new(SigmoidBackwardFn { out: out.clone(), inp_backward })
				as Box<dyn BackwardFn>
		});

		Ok(AutogradNode::new(out, backward_fn))
	}

	fn randomize(&mut self, _rng: &mut Rng) -> Result<(), ErrPack<TensorOpError>> {
		Ok(())
	}
}

pub struct SigmoidBackwardFn {
	out: Tensor,
	inp_backward: Box<dyn BackwardFn>,
}

impl BackwardFn for SigmoidBackwardFn {
	fn run(
		self: Box<Self>,
		d_out: Tensor,
		queue: &mut autograd::Queue,
	) -> Result<(), ErrPack<TensorOpError>> {
		let Self { out, inp_backward } = *self;

		if d_out.shape() != out.shape() {
			return Err(TensorOpError::shape_mismatch(d_out.shape(), out.shape()));
		}
		// d_inp = d_out * out * (1 - out)
		let mut d_inp = d_out;
		ndarray::Zip::from(d_inp.array_mut()).and(out.array()).for_each(|d, &o| {
			*d *= o * (1.0 - o);
		});

		queue.add(inp_backward, d_inp);
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------
