//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::borrow::Cow;

use crate::{ErrExtra, ErrPack};

//--------------------------------------------------------------------------------------------------

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TensorOpError {
	ShapeMismatch,
	InvalidShape,
	LenMismatch,
	DimIndexOutOfBounds,
	InvalidValue,
	InvalidState,
	IOError,
	FormatError,
}

impl TensorOpError {
	#[cold]
	#[inline(never)]
	pub fn shape_mismatch(a: &[usize], b: &[usize]) -> ErrPack<Self> {
		let message = format!("Tensor shapes don't match: {a:?} vs {b:?}");
		ErrPack {
			code: Self::ShapeMismatch,
			extra: Some(Box::new(ErrExtra { message: message.into(), nested: None })),
		}
	}

	#[cold]
	#[inline(never)]
	pub fn len_mismatch(expected: usize, got: usize) -> ErrPack<Self> {
		let message =
			format!("Buffer length doesn't match the tensor shape: expected {expected}, got {got}");
		ErrPack {
			code: Self::LenMismatch,
			extra: Some(Box::new(ErrExtra { message: message.into(), nested: None })),
		}
	}

	#[cold]
	#[inline(never)]
	pub fn dim_out_of_bounds(dim: usize, ndim: usize) -> ErrPack<Self> {
		let message = format!("Dimension index {dim} is out of bounds for a {ndim}-dim tensor");
		ErrPack {
			code: Self::DimIndexOutOfBounds,
			extra: Some(Box::new(ErrExtra { message: message.into(), nested: None })),
		}
	}
}

impl From<std::io::Error> for ErrPack<TensorOpError> {
	#[cold]
	#[inline(never)]
	fn from(err: std::io::Error) -> Self {
		Self {
			code: TensorOpError::IOError,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("IO error occurred"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

impl From<ndarray::ShapeError> for ErrPack<TensorOpError> {
	#[cold]
	#[inline(never)]
	fn from(err: ndarray::ShapeError) -> Self {
		Self {
			code: TensorOpError::InvalidShape,
			extra: Some(Box::new(ErrExtra {
				message: Cow::from("ndarray rejected the requested shape"),
				nested: Some(Box::new(err)),
			})),
		}
	}
}

//--------------------------------------------------------------------------------------------------
