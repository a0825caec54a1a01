use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::GrayImage;
use serde_json::json;
use std::path::{Path, PathBuf};
use visionmate_core::{
    Detector, DetectorError, FaceBox, LbphClassifier, ScrfdDetector, ScrfdOptions,
};
use visionmate_service::{Config, RecognitionService, ServiceHandle};

#[derive(Parser)]
#[command(name = "visionmate", about = "Vision Mate face enrollment and recognition CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered identities
    List,
    /// Show service state and configuration
    Status,
    /// Show stored sample counts per identity
    Dataset,
    /// Retrain the model from every stored sample
    Train {
        /// Samples read per identity (default: from config)
        #[arg(long)]
        max_per_identity: Option<usize>,
    },
    /// Enroll the first face in IMAGE as a new identity
    Enroll {
        /// Display name for the new identity
        #[arg(short, long)]
        name: String,
        image: PathBuf,
    },
    /// Identify every face in IMAGE
    Recognize { image: PathBuf },
}

/// SCRFD when loaded; commands that never detect run without the model file.
struct FrameDetector(Option<ScrfdDetector>);

impl FrameDetector {
    fn load(path: &Path) -> Result<Self> {
        let detector = ScrfdDetector::load(path, ScrfdOptions::default())
            .with_context(|| format!("loading face detector from {}", path.display()))?;
        tracing::info!(path = %path.display(), "SCRFD detector loaded");
        Ok(Self(Some(detector)))
    }
}

impl Detector for FrameDetector {
    fn detect(&self, frame: &GrayImage) -> Result<Vec<FaceBox>, DetectorError> {
        match &self.0 {
            Some(detector) => detector.detect(frame),
            None => Err(DetectorError::InferenceFailed("detector not loaded".into())),
        }
    }
}

fn read_image(path: &Path) -> Result<image::DynamicImage> {
    image::open(path).with_context(|| format!("reading image {}", path.display()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load().context("loading configuration")?;
    tracing::debug!(data_dir = %config.data_dir.display(), "configuration loaded");

    let detector = match cli.command {
        Commands::Enroll { .. } | Commands::Recognize { .. } => {
            FrameDetector::load(&config.detector_model_path)?
        }
        _ => FrameDetector(None),
    };
    let service = RecognitionService::from_config(detector, LbphClassifier::default(), &config);

    match cli.command {
        Commands::List => {
            print_json(&service.list_identities())?;
        }
        Commands::Status => {
            print_json(&json!({
                "status": service.status(),
                "data_dir": config.data_dir,
                "model_path": config.model_path,
                "detector_model_path": config.detector_model_path,
            }))?;
        }
        Commands::Dataset => {
            let names = service.list_identities();
            let summary: Vec<_> = service
                .samples()
                .summary()?
                .into_iter()
                .map(|(id, samples)| {
                    json!({ "identity_id": id, "name": names.get(&id), "samples": samples })
                })
                .collect();
            print_json(&summary)?;
        }
        Commands::Train { max_per_identity } => {
            let max = max_per_identity.unwrap_or(config.max_samples_per_identity);
            let handle = ServiceHandle::spawn(service)?;
            let stats = handle.train(max).await?;
            print_json(&stats)?;
        }
        Commands::Enroll { name, image } => {
            let image = read_image(&image)?;
            let handle = ServiceHandle::spawn(service)?;
            let enrollment = handle.enroll(image, name).await?;
            let training = match &enrollment.training {
                Ok(stats) => json!({ "ok": true, "stats": stats }),
                Err(e) => json!({ "ok": false, "error": e.kind().as_str(), "message": e.to_string() }),
            };
            print_json(&json!({
                "identity_id": enrollment.identity.id,
                "name": enrollment.identity.name,
                "sample": enrollment.sample,
                "training": training,
            }))?;
        }
        Commands::Recognize { image } => {
            let image = read_image(&image)?;
            if config.train_on_startup {
                service.ensure_trained()?;
            }
            let handle = ServiceHandle::spawn(service)?;
            let results = handle.recognize(image).await?;
            print_json(&results)?;
        }
    }

    Ok(())
}
