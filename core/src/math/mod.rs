pub mod gaussian;
pub mod matrix;
pub mod stats;

pub use gaussian::GaussianKernel;
pub use matrix::MatrixHelper;
pub use stats::StatsHelper;
