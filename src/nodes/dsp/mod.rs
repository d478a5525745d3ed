//! Signal processing stages and filter design

pub mod filtergen;
pub mod fir;
pub mod rotator;

pub use fir::{FirFilter, FirSample};
pub use rotator::Rotator;
