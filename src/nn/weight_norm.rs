//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

// Weight normalization reparameterization (Salimans & Kingma, 2016):
//
//     w = v * g / ||v||
//
// `g` holds the magnitude per slice of `dim`, `v` holds the direction. The
// effective weight is recomputed from `g` and `v` before every forward pass,
// and the incoming weight gradient is projected onto `g` and `v` on the way
// back.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::{ArrayD, Axis, IxDyn};

use crate::ErrPack;
use crate::tensor::{Tensor, TensorOpError};

use super::model_context::ModelContext;
use super::param::Param;

//--------------------------------------------------------------------------------------------------

/// L2 norm over all axes except `dim`. The result keeps the rank of `v`:
/// size 1 everywhere except at `dim`.
///
///     norm_except_dim([oc, ic, kh, kw], 0) -> [oc, 1, 1, 1]
pub fn norm_except_dim(v: &Tensor, dim: usize) -> Result<Tensor, ErrPack<TensorOpError>> {
	let arr = v.array();
	if dim >= arr.ndim() {
		return Err(TensorOpError::dim_out_of_bounds(dim, arr.ndim()));
	}

	let mut shape = vec![1_usize; arr.ndim()];
	shape[dim] = arr.shape()[dim];

	let mut out = ArrayD::zeros(IxDyn(&shape));
	let out_flat = out.as_slice_mut();
	debug_assert!(out_flat.is_some());
	if let Some(out_flat) = out_flat {
		for (i, slice) in arr.axis_iter(Axis(dim)).enumerate() {
			let sqr_sum: f64 = slice.iter().map(|&x| f64::from(x) * f64::from(x)).sum();
			out_flat[i] = sqr_sum.sqrt() as f32;
		}
	}
	Ok(Tensor::from(out))
}

//--------------------------------------------------------------------------------------------------

/// The two halves of a reparameterized weight. Both are ordinary trainable
/// params; the plain weight they replaced is retired from the optimizer.
#[derive(Clone)]
pub struct WeightNorm {
	dim: usize,
	g: Rc<RefCell<Param>>,
	v: Rc<RefCell<Param>>,
}

impl WeightNorm {
	/// Decompose `weight` into `g = norm_except_dim(w)` and `v = w`, register
	/// the new params and retire the old one. The initial effective weight is
	/// bit-for-bit the weight that went in (up to rounding): `v * g / ||v||`
	/// with `g == ||v||`.
	pub fn apply(
		weight: &Rc<RefCell<Param>>,
		dim: usize,
		ctx: &mut ModelContext,
	) -> Result<Self, ErrPack<TensorOpError>> {
		let w = weight.borrow().value().clone();
		let g = norm_except_dim(&w, dim)?;

		weight.borrow_mut().set_trainable(false);
		ctx.drop_param(weight);

		let g = ctx.register_param(Param::with_value(g));
		let v = ctx.register_param(Param::with_value(w));

		Ok(Self { dim, g, v })
	}

	pub fn g(&self) -> Rc<RefCell<Param>> {
		self.g.clone()
	}

	pub fn v(&self) -> Rc<RefCell<Param>> {
		self.v.clone()
	}

	pub fn dim(&self) -> usize {
		self.dim
	}

	/// Effective weight `v * g / norm_except_dim(v)`. Called before every
	/// forward pass; this is the forward-pre-hook of the recipe.
	pub fn compute_weight(&self) -> Result<Tensor, ErrPack<TensorOpError>> {
		let g = self.g.borrow();
		let v = self.v.borrow();
		let norm = norm_except_dim(v.value(), self.dim)?;
		// [d, 1, ..., 1] coefficient, broadcast over v
		let coef = g.value().array() / norm.array();
		Ok(Tensor::from(v.value().array() * &coef))
	}

	/// Project the weight gradient onto the `g`/`v` params. Per slice `i`
	/// along `dim`, with `n = ||v_i||`:
	///
	///     d_g_i = (d_w_i . v_i) / n
	///     d_v_i = (g_i / n) * d_w_i - (g_i * (d_w_i . v_i) / n^3) * v_i
	pub fn accumulate_grad(&self, d_w: &Tensor) -> Result<(), ErrPack<TensorOpError>> {
		let mut g_param = self.g.borrow_mut();
		let mut v_param = self.v.borrow_mut();

		let v_arr = v_param.value().array().clone();
		let dw_arr = d_w.array();
		if dw_arr.shape() != v_arr.shape() {
			return Err(TensorOpError::shape_mismatch(dw_arr.shape(), v_arr.shape()));
		}

		let mut d_g = ArrayD::zeros(IxDyn(g_param.value().shape()));
		let mut d_v = ArrayD::zeros(v_arr.raw_dim());

		let g_flat: Vec<f64> =
			g_param.value().array().iter().map(|&x| f64::from(x)).collect();

		for i in 0..v_arr.shape()[self.dim] {
			let v_i = v_arr.index_axis(Axis(self.dim), i);
			let dw_i = dw_arr.index_axis(Axis(self.dim), i);

			let n: f64 =
				v_i.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt();
			let dot: f64 = dw_i
				.iter()
				.zip(v_i.iter())
				.map(|(&a, &b)| f64::from(a) * f64::from(b))
				.sum();
			let g_i = g_flat[i];

			if let Some(d_g_flat) = d_g.as_slice_mut() {
				d_g_flat[i] = (dot / n) as f32;
			}

			let dir_coef = g_i / n;
			let proj_coef = g_i * dot / (n * n * n);
			let mut d_v_i = d_v.index_axis_mut(Axis(self.dim), i);
			for ((d, &dw), &v) in d_v_i.iter_mut().zip(dw_i.iter()).zip(v_i.iter()) {
				*d = (dir_coef * f64::from(dw) - proj_coef * f64::from(v)) as f32;
			}
		}

		g_param.accumulate_grad(Tensor::from(d_g))?;
		v_param.accumulate_grad(Tensor::from(d_v))?;
		Ok(())
	}

	/// Undo the reparameterization: recompute the effective weight, register
	/// it as a plain trainable param and retire `g` and `v`.
	pub fn remove(
		&self,
		ctx: &mut ModelContext,
	) -> Result<Rc<RefCell<Param>>, ErrPack<TensorOpError>> {
		let w = self.compute_weight()?;

		self.g.borrow_mut().set_trainable(false);
		self.v.borrow_mut().set_trainable(false);
		ctx.drop_param(&self.g);
		ctx.drop_param(&self.v);

		Ok(ctx.register_param(Param::with_value(w)))
	}
}

//--------------------------------------------------------------------------------------------------

/// A conv weight is either a plain param or its weight-norm decomposition.
#[derive(Clone)]
pub enum ConvWeight {
	Plain(Rc<RefCell<Param>>),
	Normed(WeightNorm),
}

impl ConvWeight {
	/// The effective weight tensor for the next forward pass.
	pub fn compute(&self) -> Result<Tensor, ErrPack<TensorOpError>> {
		match self {
			Self::Plain(param) => Ok(param.borrow().value().clone()),
			Self::Normed(wn) => wn.compute_weight(),
		}
	}

	pub fn requires_grad(&self) -> bool {
		match self {
			Self::Plain(param) => param.borrow().trainable(),
			Self::Normed(wn) => {
				wn.g.borrow().trainable() || wn.v.borrow().trainable()
			},
		}
	}

	pub fn accumulate_grad(&self, d_w: Tensor) -> Result<(), ErrPack<TensorOpError>> {
		match self {
			Self::Plain(param) => param.borrow_mut().accumulate_grad(d_w),
			Self::Normed(wn) => wn.accumulate_grad(&d_w),
		}
	}

	pub fn collect_params(&self, f: &mut dyn FnMut(Rc<RefCell<Param>>)) {
		match self {
			Self::Plain(param) => f(param.clone()),
			Self::Normed(wn) => {
				f(wn.g.clone());
				f(wn.v.clone());
			},
		}
	}

	pub fn collect_named_params(
		&self,
		prefix: &str,
		f: &mut dyn FnMut(String, Rc<RefCell<Param>>),
	) {
		match self {
			Self::Plain(param) => f(format!("{prefix}.weight"), param.clone()),
			Self::Normed(wn) => {
				f(format!("{prefix}.weight_g"), wn.g.clone());
				f(format!("{prefix}.weight_v"), wn.v.clone());
			},
		}
	}
}

//--------------------------------------------------------------------------------------------------
