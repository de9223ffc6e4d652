//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::Array4;

use crate::ErrPack;
use crate::autograd::{self, AutogradNode, BackwardFn};
use crate::rng::Rng;
use crate::tensor::{Tensor, TensorOpError};

use super::model_context::ModelContext;
use super::param::Param;
use super::weight_norm::{ConvWeight, WeightNorm};
use super::Layer;

//--------------------------------------------------------------------------------------------------

/// 2D convolution, NCHW, no padding.
///
///     input:  [n, in_channels, h, w]
///     output: [n, out_channels, (h - k)/stride + 1, (w - k)/stride + 1]
///
/// Weight layout is `[out_channels, in_channels, k, k]`.
pub struct Conv2d {
	in_channels: usize,
	out_channels: usize,
	kernel_size: usize,
	stride: usize,

	weight: ConvWeight,
	bias: Rc<RefCell<Param>>,
}

impl Conv2d {
	pub fn new(
		in_channels: usize,
		out_channels: usize,
		kernel_size: usize,
		stride: usize,
		ctx: &mut ModelContext,
	) -> Self {
		let weight =
			ctx.new_param(&[out_channels, in_channels, kernel_size, kernel_size]);
		let bias = ctx.new_param(&[out_channels]);
		Self {
			in_channels,
			out_channels,
			kernel_size,
			stride,
			weight: ConvWeight::Plain(weight),
			bias,
		}
	}

	/// Reparameterize the weight as `g`/`v`. Registering the hook twice on
	/// the same weight is an error.
	pub fn apply_weight_norm(
		&mut self,
		ctx: &mut ModelContext,
	) -> Result<(), ErrPack<TensorOpError>> {
		match &self.weight {
			ConvWeight::Normed(_) => Err(ErrPack::with_message(
				TensorOpError::InvalidState,
				"Cannot register two weight_norm hooks on the same parameter",
			)),
			ConvWeight::Plain(weight) => {
				self.weight = ConvWeight::Normed(WeightNorm::apply(weight, 0, ctx)?);
				Ok(())
			},
		}
	}

	pub fn remove_weight_norm(
		&mut self,
		ctx: &mut ModelContext,
	) -> Result<(), ErrPack<TensorOpError>> {
		match &self.weight {
			ConvWeight::Normed(wn) => {
				let weight = wn.remove(ctx)?;
				self.weight = ConvWeight::Plain(weight);
				Ok(())
			},
			ConvWeight::Plain(_) => Err(ErrPack::with_message(
				TensorOpError::InvalidState,
				"weight_norm not found on this layer",
			)),
		}
	}

	pub fn weight(&self) -> &ConvWeight {
		&self.weight
	}

	pub fn bias(&self) -> Rc<RefCell<Param>> {
		self.bias.clone()
	}
}

impl Layer for Conv2d {
	fn collect_params(&self, f: &mut dyn FnMut(Rc<RefCell<Param>>)) {
		self.weight.collect_params(f);
		f(self.bias.clone());
	}

	fn collect_named_params(&self, prefix: &str, f: &mut dyn FnMut(String, Rc<RefCell<Param>>)) {
		self.weight.collect_named_params(prefix, f);
		f(format!("{prefix}.bias"), self.bias.clone());
	}

	fn forward(&self, inp_node: AutogradNode) -> Result<AutogradNode, ErrPack<TensorOpError>> {
		let (inp, inp_backward) = inp_node.take();

		let weight = self.weight.compute()?;
		let out = {
			let bias = self.bias.borrow();
			conv2d(&inp, &weight, bias.value(), self.stride)?
		};

		let needs_param_grads =
			self.weight.requires_grad() || self.bias.borrow().trainable();
		let backward_fn = if inp_backward.is_some() || needs_param_grads {
			Some(Box::new(Conv2dBackwardFn {
				weight: self.weight.clone(),
				bias: self.bias.clone(),
				weight_value: weight,
				inp,
				inp_backward,
				stride: self.stride,
			}) as Box<dyn BackwardFn>)
		} else {
			None
		};

		Ok(AutogradNode::new(out, backward_fn))
	}

	fn randomize(&mut self, rng: &mut Rng) -> Result<(), ErrPack<TensorOpError>> {
		// PyTorch default conv init: uniform(-1/sqrt(fan_in), 1/sqrt(fan_in))
		let fan_in = self.in_channels * self.kernel_size * self.kernel_size;
		let scale = 1.0 / (fan_in as f32).sqrt();
		let shape =
			[self.out_channels, self.in_channels, self.kernel_size, self.kernel_size];
		let w = Tensor::rand_uniform(&shape, -scale, scale, rng);
		let b = Tensor::rand_uniform(&[self.out_channels], -scale, scale, rng);

		match &self.weight {
			ConvWeight::Plain(weight) => weight.borrow_mut().set_value(w)?,
			ConvWeight::Normed(wn) => {
				// keep the decomposition consistent: v gets the new weight,
				// g its per-slice norm
				let g = super::weight_norm::norm_except_dim(&w, wn.dim())?;
				wn.v().borrow_mut().set_value(w)?;
				wn.g().borrow_mut().set_value(g)?;
			},
		}
		self.bias.borrow_mut().set_value(b)?;
		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

pub struct Conv2dBackwardFn {
	weight: ConvWeight,
	bias: Rc<RefCell<Param>>,

	/// effective weight used by the forward pass
	weight_value: Tensor,
	inp: Tensor,
	inp_backward: Option<Box<dyn BackwardFn>>,
	stride: usize,
}

impl BackwardFn for Conv2dBackwardFn {
	fn run(
		self: Box<Self>,
		d_out: Tensor,
		queue: &mut autograd::Queue,
	) -> Result<(), ErrPack<TensorOpError>> {
		let Self {
			weight,
			bias,
			weight_value,
			inp,
			inp_backward,
			stride,
		} = *self;

		let need_d_inp = inp_backward.is_some();
		let (d_inp, d_w, d_b) =
			conv2d_backward(&inp, &weight_value, &d_out, stride, need_d_inp)?;

		if bias.borrow().trainable() {
			bias.borrow_mut().accumulate_grad(d_b)?;
		}
		if weight.requires_grad() {
			weight.accumulate_grad(d_w)?;
		}
		if let Some(inp_backward) = inp_backward {
			if let Some(d_inp) = d_inp {
				queue.add(inp_backward, d_inp);
			}
		}

		Ok(())
	}
}

//--------------------------------------------------------------------------------------------------

pub fn conv2d(
	inp: &Tensor,
	weight: &Tensor,
	bias: &Tensor,
	stride: usize,
) -> Result<Tensor, ErrPack<TensorOpError>> {
	let x = inp.view4()?;
	let w = weight.view4()?;
	let (n, in_c, h, wd) = x.dim();
	let (out_c, w_in_c, k, _) = w.dim();
	if in_c != w_in_c {
		return Err(TensorOpError::shape_mismatch(inp.shape(), weight.shape()));
	}
	if h < k || wd < k || stride == 0 {
		return Err(ErrPack::with_message(
			TensorOpError::InvalidShape,
			"input is smaller than the convolution kernel",
		));
	}
	let b = bias.array();

	let oh = (h - k) / stride + 1;
	let ow = (wd - k) / stride + 1;
	let mut out = Array4::<f32>::zeros((n, out_c, oh, ow));

	for ni in 0..n {
		for oc in 0..out_c {
			for yo in 0..oh {
				for xo in 0..ow {
					let mut acc = f64::from(b[[oc]]);
					for ic in 0..in_c {
						for ky in 0..k {
							for kx in 0..k {
								let yi = yo * stride + ky;
								let xi = xo * stride + kx;
								acc += f64::from(x[[ni, ic, yi, xi]])
									* f64::from(w[[oc, ic, ky, kx]]);
							}
						}
					}
					out[[ni, oc, yo, xo]] = acc as f32;
				}
			}
		}
	}

	Ok(Tensor::from(out.into_dyn()))
}

/// Returns `(d_inp, d_weight, d_bias)`. `d_inp` is `None` when not requested.
pub fn conv2d_backward(
	inp: &Tensor,
	weight: &Tensor,
	d_out: &Tensor,
	stride: usize,
	need_d_inp: bool,
) -> Result<(Option<Tensor>, Tensor, Tensor), ErrPack<TensorOpError>> {
	let x = inp.view4()?;
	let w = weight.view4()?;
	let d_o = d_out.view4()?;
	let (n, in_c, h, wd) = x.dim();
	let (out_c, _, k, _) = w.dim();
	let (_, _, oh, ow) = d_o.dim();

	let mut d_b = ndarray::Array1::<f32>::zeros(out_c);
	let mut d_w = Array4::<f32>::zeros((out_c, in_c, k, k));
	let mut d_x = if need_d_inp {
		Some(Array4::<f32>::zeros((n, in_c, h, wd)))
	} else {
		None
	};

	for ni in 0..n {
		for oc in 0..out_c {
			for yo in 0..oh {
				for xo in 0..ow {
					let g = d_o[[ni, oc, yo, xo]];
					d_b[oc] += g;
					for ic in 0..in_c {
						for ky in 0..k {
							for kx in 0..k {
								let yi = yo * stride + ky;
								let xi = xo * stride + kx;
								d_w[[oc, ic, ky, kx]] += g * x[[ni, ic, yi, xi]];
								if let Some(d_x) = &mut d_x {
									d_x[[ni, ic, yi, xi]] += g * w[[oc, ic, ky, kx]];
								}
							}
						}
					}
				}
			}
		}
	}

	Ok((
		d_x.map(|a| Tensor::from(a.into_dyn())),
		Tensor::from(d_w.into_dyn()),
		Tensor::from(d_b.into_dyn()),
	))
}

//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
	use super::*;
	use assert_approx_eq::assert_approx_eq;

	#[test]
	fn test_forward_fixture() {
		// 1x1x3x3 input, one 2x2 kernel, stride 1, bias 0.5.
		// Expected values calculated by PyTorch.
		let inp = Tensor::from_vec(
			&[1, 1, 3, 3],
			vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
		)
		.unwrap();
		let w = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 0.0, 0.0, -1.0]).unwrap();
		let b = Tensor::from_vec(&[1], vec![0.5]).unwrap();

		let out = conv2d(&inp, &w, &b, 1).unwrap();
		assert_eq!(out.shape(), &[1, 1, 2, 2]);
		// each output is x[y][x] - x[y+1][x+1] + 0.5 = -4 + 0.5
		for &v in out.array().iter() {
			assert_approx_eq!(v, -3.5, 1e-6);
		}
	}

	#[test]
	fn test_forward_stride_2_shape() {
		let inp = Tensor::zeros(&[2, 1, 28, 28]);
		let w = Tensor::zeros(&[32, 1, 2, 2]);
		let b = Tensor::zeros(&[32]);
		let out = conv2d(&inp, &w, &b, 2).unwrap();
		assert_eq!(out.shape(), &[2, 32, 14, 14]);
	}

	#[test]
	fn test_backward_matches_finite_differences() {
		use crate::rng::Rng;
		let mut rng = Rng::new_seeded(21);

		let inp = Tensor::randn(&[2, 2, 4, 4], &mut rng);
		let w = Tensor::randn(&[3, 2, 2, 2], &mut rng);
		let b = Tensor::randn(&[3], &mut rng);
		// f = sum(c * conv(inp, w, b))
		let c = Tensor::randn(&[2, 3, 2, 2], &mut rng);

		let f = |inp: &Tensor, w: &Tensor, b: &Tensor| -> f64 {
			let out = conv2d(inp, w, b, 2).unwrap();
			out.array()
				.iter()
				.zip(c.array().iter())
				.map(|(&a, &b)| f64::from(a) * f64::from(b))
				.sum()
		};

		let (d_inp, d_w, d_b) = conv2d_backward(&inp, &w, &c, 2, true).unwrap();
		let d_inp = d_inp.unwrap();

		let eps = 1e-3_f32;
		let check = |analytic: &Tensor, tensor: &Tensor, rebuild: &dyn Fn(&Tensor) -> f64| {
			let flat: Vec<f32> = tensor.array().iter().copied().collect();
			for i in 0..flat.len() {
				let mut up = flat.clone();
				up[i] += eps;
				let mut down = flat.clone();
				down[i] -= eps;
				let up = Tensor::from_vec(tensor.shape(), up).unwrap();
				let down = Tensor::from_vec(tensor.shape(), down).unwrap();
				let numeric = (rebuild(&up) - rebuild(&down)) / (2.0 * f64::from(eps));
				let analytic: f64 =
					analytic.array().iter().map(|&v| f64::from(v)).nth(i).unwrap();
				assert_approx_eq!(analytic, numeric, 1e-2);
			}
		};

		check(&d_inp, &inp, &|t| f(t, &w, &b));
		check(&d_w, &w, &|t| f(&inp, t, &b));
		check(&d_b, &b, &|t| f(&inp, &w, t));
	}

	#[test]
	fn test_duplicate_weight_norm_rejected() {
		let mut ctx = ModelContext::new();
		let mut conv = Conv2d::new(1, 4, 2, 2, &mut ctx);
		conv.apply_weight_norm(&mut ctx).unwrap();
		let err = conv.apply_weight_norm(&mut ctx).unwrap_err();
		assert_eq!(err.code, TensorOpError::InvalidState);
	}

	#[test]
	fn test_remove_weight_norm_without_apply_rejected() {
		let mut ctx = ModelContext::new();
		let mut conv = Conv2d::new(1, 4, 2, 2, &mut ctx);
		let err = conv.remove_weight_norm(&mut ctx).unwrap_err();
		assert_eq!(err.code, TensorOpError::InvalidState);
	}
}
