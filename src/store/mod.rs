pub mod watermark;

pub use watermark::{WatermarkState, WatermarkStore};
