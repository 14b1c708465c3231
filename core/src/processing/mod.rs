pub mod buffer_pool;
pub mod extract;
pub mod kernel;
pub mod raster;
pub mod transform;

pub use buffer_pool::BufferPool;
pub use extract::{CoordinateExtractor, TileKey};
pub use kernel::KernelSmoother;
pub use raster::{BlockRasterizer, RasterReport};
pub use transform::CoordinateTransformer;
