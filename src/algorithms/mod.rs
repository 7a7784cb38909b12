// Default pure-Rust backends
pub mod brute_force;
pub mod fast_orb;
pub mod homography;
pub mod planar_pnp;

// OpenCV-based implementations
#[cfg(feature = "opencv")]
pub mod opencv_backend;

pub use brute_force::BruteForceMatcher;
pub use fast_orb::OrbExtractor;
pub use homography::RansacHomography;
pub use planar_pnp::PlanarPoseEstimator;

#[cfg(feature = "opencv")]
pub use opencv_backend::*;
