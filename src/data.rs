//------------------------------------------------------------------------------
//
// Copyright 2025 Jiri Bobek. All rights reserved.
// License: GPL 3.0 or later. See LICENSE.txt for details.
//
//------------------------------------------------------------------------------

pub mod loader;
pub mod mnist;
pub mod noise;

pub use loader::DataLoader;
pub use noise::GaussianNoise;
