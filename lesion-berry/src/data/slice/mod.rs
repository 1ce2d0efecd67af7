//! 2D 切片: 显示空间投影、压缩镜像与叠加渲染.

mod mirror;
mod project;
mod render;

pub use mirror::CompactPlane;
pub use project::{DisplayTransform, Mirror, SliceProjector};
pub use render::{outline, OverlayRenderer};
