//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

// Readers for the MNIST IDX files. The dataset has to be on disk already;
// downloading is out of scope.

use std::path::Path;

use crate::ErrPack;
use crate::tensor::{Tensor, TensorOpError};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;

// IDX headers are big-endian
fn read_be_u32(data: &[u8], offset: &mut usize) -> Result<u32, ErrPack<TensorOpError>> {
	let Some(bytes) = data.get(*offset..*offset + 4) else {
		return Err(ErrPack::with_message(
			TensorOpError::FormatError,
			"IDX file is truncated",
		));
	};
	*offset += 4;
	Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Reads an IDX image file into a `[n, 1, rows, cols]` tensor with pixels
/// normalized to `[0, 1]`.
pub fn read_images(path: &Path) -> Result<Tensor, ErrPack<TensorOpError>> {
	let data = std::fs::read(path)?;
	let mut offset = 0;

	let magic = read_be_u32(&data, &mut offset)?;
	if magic != IMAGE_MAGIC {
		return Err(ErrPack::with_message(
			TensorOpError::FormatError,
			format!("Bad magic in IDX image file: {magic}"),
		));
	}
	let count = read_be_u32(&data, &mut offset)? as usize;
	let rows = read_be_u32(&data, &mut offset)? as usize;
	let cols = read_be_u32(&data, &mut offset)? as usize;

	let total = count * rows * cols;
	let Some(pixels) = data.get(offset..offset + total) else {
		return Err(ErrPack::with_message(
			TensorOpError::FormatError,
			"IDX image file is truncated",
		));
	};

	let buf: Vec<f32> = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
	Tensor::from_vec(&[count, 1, rows, cols], buf)
}

/// Reads an IDX label file. The experiment trains a denoiser, so the labels
/// are only used by sanity checks.
pub fn read_labels(path: &Path) -> Result<Vec<u8>, ErrPack<TensorOpError>> {
	let data = std::fs::read(path)?;
	let mut offset = 0;

	let magic = read_be_u32(&data, &mut offset)?;
	if magic != LABEL_MAGIC {
		return Err(ErrPack::with_message(
			TensorOpError::FormatError,
			format!("Bad magic in IDX label file: {magic}"),
		));
	}
	let count = read_be_u32(&data, &mut offset)? as usize;

	let Some(labels) = data.get(offset..offset + count) else {
		return Err(ErrPack::with_message(
			TensorOpError::FormatError,
			"IDX label file is truncated",
		));
	};

	Ok(labels.to_vec())
}

//--------------------------------------------------------------------------------------------------
