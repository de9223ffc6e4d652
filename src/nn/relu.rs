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

pub struct ReLU;

impl Layer for ReLU {
	fn collect_params(&self, _f: &mut dyn FnMut(Rc<RefCell<Param>>)) {
		// no parameters to collect
	}

	fn collect_named_params(&self, _prefix: &str, _f: &mut dyn FnMut(String, Rc<RefCell<Param>>)) {
		// no parameters to collect
	}

	fn forward(&self, inp_node: AutogradNode) -> Result<AutogradNode, ErrPack<TensorOpError>> {
		let (inp, inp_backward) = inp_node.take();

		let mut out = inp;
		out.array_mut().mapv_inplace(|v| v.max(0.0));

		let backward_fn = inp_backward.map(|inp_backward| {
			Box::new(ReLUBackwardFn { out: out.clone(), inp_backward }) as Box<dyn BackwardFn>
		});

		Ok(AutogradNode::new(out, backward_fn))
	}

	fn randomize(&mut self, _rng: &mut Rng) -> Result<(), ErrPack<TensorOpError>> {
		Ok(())
	}
}

pub struct ReLUBackwardFn {
	/// `out > 0` exactly where `inp > 0`, so the output doubles as the mask
	out: Tensor,
	inp_backward: Box<dyn BackwardFn>,
}

impl BackwardFn for ReLUBackwardFn {
	fn run(
		self: Box<Self>,
		d_out: Tensor,
		queue: &mut autograd::Queue,
	) -> Result<(), ErrPack<TensorOpError>> {
		let Self { out, inp_backward } = *self;

		if d_out.shape() != out.shape() {
			return Err(TensorOpError::shape_mismatch(d_out.shape(), out.shape()));
		}
		let mut d_inp = d_out;
		ndarray::Zip::from(d_inp.array_mut()).and(out.array()).for_each(|d, &o| {
			if o <= 0.0 {
				*d = 0.0;
			}
		});

		queue.add(inp_backward, d_inp);
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::autograd::{GradientCapture, Queue};

	#[test]
	fn test_forward_and_backward() {
		let inp = Tensor::from_vec(&[4], vec![-1.0, 0.0, 2.0, -0.5]).unwrap();
		let capture = GradientCapture::new();
		let storage = capture.storage();

		let relu = ReLU;
		let out = relu.forward(AutogradNode::new(inp, Some(capture))).unwrap();
		assert_eq!(out.value.array().as_slice().unwrap(), &[0.0, 0.0, 2.0, 0.0]);

		let (_, backward_fn) = out.take();
		let d_out = Tensor::from_vec(&[4], vec![1.0, 1.0, 1.0, 1.0]).unwrap();
		Queue::run(backward_fn, d_out).unwrap();

		let grad = storage.borrow_mut().take().unwrap();
		assert_eq!(grad.array().as_slice().unwrap(), &[0.0, 0.0, 1.0, 0.0]);
	}
}
