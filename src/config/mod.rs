use crate::logging::LoggingConfig;
use crate::pipeline::CameraIntrinsics;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: Backend,
    pub tracker: TrackerConfig,
    pub orb: OrbConfig,
    pub ransac: RansacConfig,
    pub pose: PoseConfig,
    pub camera: CameraIntrinsics,
    pub session: SessionConfig,
    pub logging: LoggingConfig,
}

/// Implementation family behind the four tracker capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Pure-Rust ORB, brute-force matching, RANSAC and planar PnP
    #[default]
    Native,
    /// OpenCV ORB, BFMatcher, findHomography and solvePnP (feature `opencv`)
    Opencv,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// A match survives when its distance is below this fraction of the
    /// distance of the match that follows it
    pub match_ratio: f32,
    /// Raw and filtered match counts must exceed this
    pub min_matches: usize,
    /// Require fewer reference keypoints than scene keypoints before extracting
    pub require_scene_keypoint_surplus: bool,
    /// Upper bound applied to requested refinement depths
    pub max_refine_depth: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrbConfig {
    pub fast_threshold: u8,
    pub max_keypoints: usize,
    pub patch_size: u32,
    pub blur_sigma: f32,
    pub nms_radius: f32,
    pub pattern_seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Reprojection threshold in pixels
    pub inlier_threshold: f64,
    pub confidence: f64,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Frames are resized by this factor before analysis
    pub frame_scale: f32,
    pub refine_depth: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            match_ratio: 0.6,
            min_matches: 3,
            require_scene_keypoint_surplus: true,
            max_refine_depth: 4,
        }
    }
}

impl Default for OrbConfig {
    fn default() -> Self {
        Self {
            fast_threshold: 20,
            max_keypoints: 500,
            patch_size: 31,
            blur_sigma: 1.2,
            nms_radius: 3.0,
            pattern_seed: 0x0b5e_55ed,
        }
    }
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            inlier_threshold: 3.0,
            confidence: 0.995,
            seed: 42,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            tolerance: 1e-10,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            frame_scale: 1.0,
            refine_depth: 0,
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.backend == Backend::Opencv && !cfg!(feature = "opencv") {
            errors.push("backend \"opencv\" requires the `opencv` cargo feature".to_string());
        }

        if !(self.tracker.match_ratio > 0.0 && self.tracker.match_ratio <= 1.0) {
            errors.push("tracker.match_ratio must be in (0, 1]".to_string());
        }

        if self.orb.max_keypoints == 0 {
            errors.push("orb.max_keypoints must be positive".to_string());
        }

        if self.orb.patch_size < 7 {
            errors.push("orb.patch_size must be at least 7".to_string());
        }

        if self.orb.blur_sigma < 0.0 {
            errors.push("orb.blur_sigma must be non-negative".to_string());
        }

        if self.ransac.inlier_threshold <= 0.0 {
            errors.push("ransac.inlier_threshold must be positive".to_string());
        }

        if !(self.ransac.confidence > 0.0 && self.ransac.confidence < 1.0) {
            errors.push("ransac.confidence must be in (0, 1)".to_string());
        }

        if self.ransac.max_iterations == 0 {
            errors.push("ransac.max_iterations must be positive".to_string());
        }

        if !self.camera.is_valid() {
            errors.push("camera focal lengths must be positive".to_string());
        }

        if !(self.session.frame_scale > 0.0 && self.session.frame_scale <= 1.0) {
            errors.push("session.frame_scale must be in (0, 1]".to_string());
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigFormat {
    Json,
    Toml,
}

pub fn load_config_or_default(config_path: Option<&Path>) -> Config {
    match config_path {
        Some(path) => match Config::load_from_file(path) {
            Ok(config) => {
                if let Err(errors) = config.validate() {
                    eprintln!("Configuration validation errors:");
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                    eprintln!("Using default configuration instead.");
                    Config::default()
                } else {
                    config
                }
            }
            Err(e) => {
                eprintln!("Failed to load config from '{}': {:#}", path.display(), e);
                eprintln!("Using default configuration.");
                Config::default()
            }
        },
        None => Config::default(),
    }
}
