pub mod geometry;
pub mod image_conversion;
pub mod ransac;

pub use geometry::perspective_transform;
pub use image_conversion::{load_image, to_grayscale, warp_perspective_inverse};
