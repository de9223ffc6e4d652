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

/// Transposed 2D convolution, NCHW, no padding.
///
///     input:  [n, in_channels, h, w]
///     output: [n, out_channels, (h - 1)*stride + k, (w - 1)*stride + k]
///
/// Weight layout follows the convention of the forward convolution it
/// transposes: `[in_channels, out_channels, k, k]`. With `dim = 0`, weight
/// norm therefore keeps one magnitude per *input* channel.
pub struct ConvTranspose2d {
	in_channels: usize,
	out_channels: usize,
	kernel_size: usize,
	stride: usize,

	weight: ConvWeight,
	bias: Rc<RefCell<Param>>,
}

impl ConvTranspose2d {
	pub fn new(
		in_channels: usize,
		out_channels: usize,
		kernel_size: usize,
		stride: usize,
		ctx: &mut ModelContext,
	) -> Self {
		let weight =
			ctx.new_param(&[in_channels, out_channels, kernel_size, kernel_size]);
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
}

impl Layer for ConvTranspose2d {
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
			conv_transpose2d(&inp, &weight, bias.value(), self.stride)?
		};

		let needs_param_grads =
			self.weight.requires_grad() || self.bias.borrow().trainable();
		let backward_fn = if inp_backward.is_some() || needs_param_grads {
			Some(Box::new(ConvTranspose2dBackwardFn {
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
		// fan_in of the transposed conv is out_channels * k * k
		let fan_in = self.out_channels * self.kernel_size * self.kernel_size;
		let scale = 1.0 / (fan_in as f32).sqrt();
		let shape =
			[self.in_channels, self.out_channels, self.kernel_size, self.kernel_size];
		let w = Tensor::rand_uniform(&shape, -scale, scale, rng);
		let b = Tensor::rand_uniform(&[self.out_channels], -scale, scale, rng);

		match &self.weight {
			ConvWeight::Plain(weight) => weight.borrow_mut().set_value(w)?,
			ConvWeight::Normed(wn) => {
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

pub struct ConvTranspose2dBackwardFn {
	weight: ConvWeight,
	bias: Rc<RefCell<Param>>,

	weight_value: Tensor,
	inp: Tensor,
	inp_backward: Option<Box<dyn BackwardFn>>,
	stride: usize,
}

impl BackwardFn for ConvTranspose2dBackwardFn {
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
			conv_transpose2d_backward(&inp, &weight_value, &d_out, stride, need_d_inp)?;

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

pub fn conv_transpose2d(
	inp: &Tensor,
	weight: &Tensor,
	bias: &Tensor,
	stride: usize,
) -> Result<Tensor, ErrPack<TensorOpError>> {
	let x = inp.view4()?;
	let w = weight.view4()?;
	let (n, in_c, h, wd) = x.dim();
	let (w_in_c, out_c, k, _) = w.dim();
	if in_c != w_in_c {
		return Err(TensorOpError::shape_mismatch(inp.shape(), weight.shape()));
	}
	if stride == 0 || h == 0 || wd == 0 {
		return Err(ErrPack::with_message(
			TensorOpError::InvalidShape,
			"empty input to transposed convolution",
		));
	}
	let b = bias.array();

	let oh = (h - 1) * stride + k;
	let ow = (wd - 1) * stride + k;
	let mut out = Array4::<f32>::zeros((n, out_c, oh, ow));

	for ni in 0..n {
		for oc in 0..out_c {
			for yo in 0..oh {
				for xo in 0..ow {
					out[[ni, oc, yo, xo]] = b[[oc]];
				}
			}
		}
	}
	for ni in 0..n {
		for ic in 0..in_c {
			for yi in 0..h {
				for xi in 0..wd {
					let v = x[[ni, ic, yi, xi]];
					for oc in 0..out_c {
						for ky in 0..k {
							for kx in 0..k {
								out[[ni, oc, yi * stride + ky, xi * stride + kx]] +=
									v * w[[ic, oc, ky, kx]];
							}
						}
					}
				}
			}
		}
	}

	Ok(Tensor::from(out.into_dyn()))
}

/// Returns `(d_inp, d_weight, d_bias)`. `d_inp` is `None` when not requested.
pub fn conv_transpose2d_backward(
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
	let (_, out_c, k, _) = w.dim();

	let mut d_b = ndarray::Array1::<f32>::zeros(out_c);
	for ni in 0..n {
		for oc in 0..out_c {
			for v in d_o.index_axis(ndarray::Axis(0), ni).index_axis(ndarray::Axis(0), oc) {
				d_b[oc] += v;
			}
		}
	}

	let mut d_w = Array4::<f32>::zeros((in_c, out_c, k, k));
	let mut d_x = if need_d_inp {
		Some(Array4::<f32>::zeros((n, in_c, h, wd)))
	} else {
		None
	};

	for ni in 0..n {
		for ic in 0..in_c {
			for yi in 0..h {
				for xi in 0..wd {
					let v = x[[ni, ic, yi, xi]];
					let mut acc = 0.0_f32;
					for oc in 0..out_c {
						for ky in 0..k {
							for kx in 0..k {
								let g = d_o[[ni, oc, yi * stride + ky, xi * stride + kx]];
								d_w[[ic, oc, ky, kx]] += v * g;
								acc += g * w[[ic, oc, ky, kx]];
							}
						}
					}
					if let Some(d_x) = &mut d_x {
						d_x[[ni, ic, yi, xi]] = acc;
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
	fn test_forward_inverts_conv_shape() {
		// 7x7 back up to 14x14 with k=2, s=2
		let inp = Tensor::zeros(&[2, 64, 7, 7]);
		let w = Tensor::zeros(&[64, 16, 2, 2]);
		let b = Tensor::zeros(&[16]);
		let out = conv_transpose2d(&inp, &w, &b, 2).unwrap();
		assert_eq!(out.shape(), &[2, 16, 14, 14]);
	}

	#[test]
	fn test_forward_fixture() {
		// A single input pixel spreads the kernel into the output.
		let inp = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 0.0, 0.0, 2.0]).unwrap();
		let w = Tensor::from_vec(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
		let b = Tensor::from_vec(&[1], vec![0.0]).unwrap();

		let out = conv_transpose2d(&inp, &w, &b, 2).unwrap();
		assert_eq!(out.shape(), &[1, 1, 4, 4]);
		let got = out.array();
		// top-left block: 1 * kernel
		assert_approx_eq!(got[[0, 0, 0, 0]], 1.0, 1e-6);
		assert_approx_eq!(got[[0, 0, 0, 1]], 2.0, 1e-6);
		assert_approx_eq!(got[[0, 0, 1, 0]], 3.0, 1e-6);
		assert_approx_eq!(got[[0, 0, 1, 1]], 4.0, 1e-6);
		// bottom-right block: 2 * kernel
		assert_approx_eq!(got[[0, 0, 2, 2]], 2.0, 1e-6);
		assert_approx_eq!(got[[0, 0, 3, 3]], 8.0, 1e-6);
		// untouched corners stay at the bias
		assert_approx_eq!(got[[0, 0, 0, 2]], 0.0, 1e-6);
	}

	#[test]
	fn test_backward_matches_finite_differences() {
		use crate::rng::Rng;
		let mut rng = Rng::new_seeded(22);

		let inp = Tensor::randn(&[2, 3, 2, 2], &mut rng);
		let w = Tensor::randn(&[3, 2, 2, 2], &mut rng);
		let b = Tensor::randn(&[2], &mut rng);
		let c = Tensor::randn(&[2, 2, 4, 4], &mut rng);

		let f = |inp: &Tensor, w: &Tensor, b: &Tensor| -> f64 {
			let out = conv_transpose2d(inp, w, b, 2).unwrap();
			out.array()
				.iter()
				.zip(c.array().iter())
				.map(|(&a, &b)| f64::from(a) * f64::from(b))
				.sum()
		};

		let (d_inp, d_w, d_b) = conv_transpose2d_backward(&inp, &w, &c, 2, true).unwrap();
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
}
