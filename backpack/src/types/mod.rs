pub mod depth;
pub mod enums;

pub use depth::{parse_f64, parse_levels, DepthSnapshot, PriceLevel};
pub use enums::{DepthGranularity, PositionSide, Side};
