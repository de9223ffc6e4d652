//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

use std::path::Path;

use plotters::prelude::*;

use crate::ErrPack;
use crate::tensor::TensorOpError;

//--------------------------------------------------------------------------------------------------

fn draw_err(err: impl std::fmt::Display) -> ErrPack<TensorOpError> {
	ErrPack::with_message(TensorOpError::IOError, format!("plotting failed: {err}"))
}

/// Renders the per-epoch test losses of both parameterizations into a single
/// PNG chart, baseline in blue and weight norm in red.
pub fn plot_test_losses(
	baseline: &[f64],
	weight_norm: &[f64],
	path: &Path,
) -> Result<(), ErrPack<TensorOpError>> {
	if baseline.is_empty() || weight_norm.is_empty() {
		return Err(ErrPack::with_message(
			TensorOpError::InvalidValue,
			"cannot plot empty loss curves",
		));
	}

	let epochs = baseline.len().max(weight_norm.len());
	let y_max = baseline
		.iter()
		.chain(weight_norm)
		.copied()
		.fold(f64::MIN, f64::max);

	let root = BitMapBackend::new(path, (800, 600)).into_drawing_area();
	root.fill(&WHITE).map_err(draw_err)?;

	let mut chart = ChartBuilder::on(&root)
		.caption("Denoising autoencoder test loss", ("sans-serif", 24))
		.margin(10)
		.x_label_area_size(40)
		.y_label_area_size(50)
		.build_cartesian_2d(1.0..epochs as f64, 0.0..y_max * 1.1)
		.map_err(draw_err)?;

	chart
		.configure_mesh()
		.x_desc("Epoch")
		.y_desc("Test loss")
		.x_labels(epochs)
		.draw()
		.map_err(draw_err)?;

	let series = |losses: &[f64]| -> Vec<(f64, f64)> {
		losses
			.iter()
			.enumerate()
			.map(|(i, &loss)| ((i + 1) as f64, loss))
			.collect()
	};

	chart
		.draw_series(LineSeries::new(series(baseline), &BLUE))
		.map_err(draw_err)?
		.label("baseline")
		.legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));

	chart
		.draw_series(LineSeries::new(series(weight_norm), &RED))
		.map_err(draw_err)?
		.label("weight norm")
		.legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));

	chart
		.configure_series_labels()
		.border_style(&BLACK)
		.background_style(&WHITE.mix(0.8))
		.draw()
		.map_err(draw_err)?;

	root.present().map_err(draw_err)?;
	Ok(())
}

//--------------------------------------------------------------------------------------------------
