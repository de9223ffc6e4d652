//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use crate::ErrPack;
use crate::autograd::{AutogradNode, Queue};
use crate::tensor::{Tensor, TensorOpError};

/// Mean squared error with `sum` reduction:
///
///     loss = sum((out - target)^2)
///
/// The training loop divides the recorded values by the batch size, and the
/// evaluation loop by the dataset size, exactly as the experiment defines
/// them.
pub struct MseLoss;

impl MseLoss {
	/// Loss value only, no gradients. Used by evaluation.
	pub fn loss(&self, out: &Tensor, target: &Tensor) -> Result<f64, ErrPack<TensorOpError>> {
		out.sqr_err_sum(target)
	}

	/// Computes the loss and seeds the backward pass with
	/// `d_out = 2 * (out - target)`.
	pub fn backward(
		&self,
		out_node: AutogradNode,
		target: &Tensor,
	) -> Result<f64, ErrPack<TensorOpError>> {
		let (out, backward_fn) = out_node.take();
		let loss = out.sqr_err_sum(target)?;
		let d_out = out.sub(target)?.scale(2.0);
		Queue::run(backward_fn, d_out)?;
		Ok(loss)
	}
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use crate::autograd::GradientCapture;
	use assert_approx_eq::assert_approx_eq;

	#[test]
	fn test_loss_and_gradient() {
		let out = Tensor::from_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
		let target = Tensor::from_vec(&[2, 2], vec![0.0, 2.0, 2.0, 6.0]).unwrap();

		let mse = MseLoss;
		assert_approx_eq!(mse.loss(&out, &target).unwrap(), 6.0, 1e-12);

		let capture = GradientCapture::new();
		let storage = capture.storage();
		let node = AutogradNode::new(out, Some(capture));
		let loss = mse.backward(node, &target).unwrap();
		assert_approx_eq!(loss, 6.0, 1e-12);

		let grad = storage.borrow_mut().take().unwrap();
		assert_eq!(grad.array().as_slice().unwrap(), &[2.0, 0.0, 2.0, -4.0]);
	}
}
