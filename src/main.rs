use clap::{Parser, Subcommand};
use planar_tracker::config::load_config_or_default;
use planar_tracker::logging::{init_logging, TrackingMetrics};
use planar_tracker::pipeline::{FeatureExtractor, TrackingReport};
use planar_tracker::synthetic::{add_gaussian_noise, corner_error, tilted_view, warp_into_scene};
use planar_tracker::utils::load_image;
use planar_tracker::{OrbExtractor, StepOutcome, Tracker, TrackingSession};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "planar-track")]
#[command(about = "Track a planar reference image and recover its pose")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (TOML, or JSON when it starts with `{`)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on a reference image and track it through a sequence of frames
    Track {
        /// Path to the reference image
        #[arg(short, long)]
        reference: PathBuf,

        /// Frames to process, in order
        #[arg(short, long, num_args = 1.., required = true)]
        frames: Vec<PathBuf>,

        /// Refinement passes per frame (overrides the config)
        #[arg(long)]
        refine: Option<u32>,

        /// Output file for per-frame reports
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Track a reference pasted into a synthetic tilted scene
    Simulate {
        /// Path to the reference image
        #[arg(short, long)]
        reference: PathBuf,

        /// Tilt about the vertical axis in degrees
        #[arg(short, long, default_value = "20")]
        angle: f64,

        /// Standard deviation of added pixel noise
        #[arg(short, long, default_value = "0")]
        noise: f64,

        #[arg(long, default_value = "0")]
        refine: u32,

        #[arg(long, default_value = "640")]
        width: u32,

        #[arg(long, default_value = "480")]
        height: u32,
    },

    /// Report keypoint statistics for an image
    Inspect {
        #[arg(short, long)]
        image: PathBuf,
    },
}

#[derive(Serialize)]
struct FrameEntry {
    frame: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    #[serde(flatten)]
    report: TrackingReport,
}

#[derive(Serialize)]
struct TrackSummary {
    reference: String,
    frames: Vec<FrameEntry>,
    metrics: TrackingMetrics,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = load_config_or_default(cli.config.as_deref());

    if cli.verbose > 0 {
        config.logging = config.logging.with_verbosity(cli.verbose);
    }
    let _logging = init_logging(&config.logging)?;

    match cli.command {
        Commands::Track {
            reference,
            frames,
            refine,
            output,
        } => {
            if let Some(depth) = refine {
                config.session.refine_depth = depth;
            }
            handle_track(&config, reference, frames, output)?;
        }
        Commands::Simulate {
            reference,
            angle,
            noise,
            refine,
            width,
            height,
        } => {
            handle_simulate(&config, reference, angle, noise, refine, width, height)?;
        }
        Commands::Inspect { image } => {
            handle_inspect(&config, image)?;
        }
    }

    Ok(())
}

fn handle_track(
    config: &planar_tracker::Config,
    reference_path: PathBuf,
    frames: Vec<PathBuf>,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let reference = load_image(&reference_path)?;
    println!(
        "Reference: {}x{} ({})",
        reference.width(),
        reference.height(),
        reference_path.display()
    );

    let mut tracker = Tracker::from_config(config);
    tracker.train_gray(&reference);
    println!(
        "Trained with {} keypoints",
        tracker.reference().map_or(0, |r| r.keypoints().len())
    );

    let mut session = TrackingSession::new(tracker, config.session.clone());
    let mut entries = Vec::with_capacity(frames.len());

    for frame_path in &frames {
        let frame = load_image(frame_path)?;
        let start = instant::Instant::now();
        let outcome = session.process_frame(frame);
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        let report = match &outcome {
            StepOutcome::Tracked(extraction) => {
                let p = extraction.pose.position;
                let a = extraction.pose.angles_deg;
                println!(
                    "{}: tracked, position ({:.3}, {:.3}, {:.3}), angles ({:.1}, {:.1}, {:.1}) deg",
                    frame_path.display(),
                    p.x,
                    p.y,
                    p.z,
                    a.x,
                    a.y,
                    a.z
                );
                TrackingReport::from_extraction(extraction, elapsed_ms)
            }
            StepOutcome::Lost(failure) => {
                let reason = failure.as_ref().map(|f| f.to_string());
                println!(
                    "{}: lost ({})",
                    frame_path.display(),
                    reason.as_deref().unwrap_or("unknown")
                );
                TrackingReport::lost(reason, elapsed_ms)
            }
            StepOutcome::NoFrame => TrackingReport::lost(None, elapsed_ms),
        };

        entries.push(FrameEntry {
            frame: frame_path.display().to_string(),
            timestamp: chrono::Utc::now(),
            report,
        });
    }

    let metrics = session.metrics().clone();
    println!(
        "Tracked {}/{} frames, mean {:.1} ms",
        metrics.tracked,
        metrics.frames,
        metrics.mean_time_ms()
    );

    let summary = TrackSummary {
        reference: reference_path.display().to_string(),
        frames: entries,
        metrics,
    };
    let json = serde_json::to_string_pretty(&summary)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("Results saved to {}", path.display());
        }
        None => println!("{json}"),
    }

    Ok(())
}

fn handle_simulate(
    config: &planar_tracker::Config,
    reference_path: PathBuf,
    angle: f64,
    noise: f64,
    refine: u32,
    width: u32,
    height: u32,
) -> anyhow::Result<()> {
    let reference = load_image(&reference_path)?;
    let view = tilted_view(reference.width(), reference.height(), width, height, angle)
        .ok_or_else(|| anyhow::anyhow!("tilt of {angle} degrees puts the plane behind the camera"))?;

    let scene = warp_into_scene(&reference, &view.homography, width, height, 0)?;
    let scene = add_gaussian_noise(&scene, noise, config.ransac.seed)?;

    // the virtual camera's intrinsics replace the configured ones
    let mut sim_config = config.clone();
    sim_config.camera = view.intrinsics;
    let mut tracker = Tracker::from_config(&sim_config);
    tracker.train_gray(&reference);
    tracker.analyze_gray(scene);

    let result = match tracker.extract(refine) {
        Some(extraction) => serde_json::json!({
            "tracked": true,
            "angle_deg": angle,
            "noise_sigma": noise,
            "matches": extraction.match_count,
            "refinement_levels": extraction.refinement_levels,
            "corner_error_px": corner_error(&extraction.corners, &view.corners),
            "translation_error": (extraction.translation - view.pose.translation).norm(),
            "rotation_error_deg": (extraction.rotation - view.pose.rotation).norm().to_degrees(),
            "timestamp": chrono::Utc::now(),
        }),
        None => serde_json::json!({
            "tracked": false,
            "angle_deg": angle,
            "noise_sigma": noise,
            "failure": tracker.last_failure().map(|f| f.to_string()),
            "timestamp": chrono::Utc::now(),
        }),
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn handle_inspect(config: &planar_tracker::Config, image_path: PathBuf) -> anyhow::Result<()> {
    let image = load_image(&image_path)?;
    let extractor = OrbExtractor::from_config(&config.orb);

    let start = instant::Instant::now();
    let features = extractor.extract(&image)?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    let responses: Vec<f32> = features.keypoints.iter().map(|k| k.response).collect();
    let mean_response = if responses.is_empty() {
        0.0
    } else {
        responses.iter().sum::<f32>() / responses.len() as f32
    };

    println!("Image: {}x{}", image.width(), image.height());
    println!("Extractor: {}", extractor.name());
    println!("Keypoints: {}", features.len());
    println!("Descriptor width: {} bytes", features.descriptors.width());
    println!("Mean response: {:.2}", mean_response);
    println!("Time: {:.2} ms", elapsed_ms);
    Ok(())
}
