use anyhow::{Context, Result};
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.kenal.Kenal1",
    default_service = "org.kenal.Kenal1",
    default_path = "/org/kenal/Kenal1"
)]
trait Kenal {
    async fn enroll(&self, identity: &str, payload: &str, metadata: &str) -> zbus::Result<String>;
    async fn recognize(&self, payload: &str, threshold_pct: f64) -> zbus::Result<String>;
    async fn validate_quality(&self, payload: &str) -> zbus::Result<String>;
    async fn list_enrolled(&self) -> zbus::Result<Vec<String>>;
    async fn delete(&self, identity: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "kenal", about = "Kenal face identity CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face capture under an identity
    Enroll {
        identity: String,
        /// Image file to enroll
        image: PathBuf,
        /// Opaque JSON metadata stored with the enrollment
        #[arg(short, long)]
        metadata: Option<String>,
    },
    /// Recognize the face in an image against enrolled identities
    Recognize {
        image: PathBuf,
        /// Match threshold as a 0-100 percentage (daemon default if omitted)
        #[arg(short, long)]
        threshold: Option<f64>,
    },
    /// Check whether an image is good enough to enroll
    Validate { image: PathBuf },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Delete { identity: String },
    /// Show daemon status
    Status,
    /// Run the detection pipeline locally, bypassing the daemon
    Test {
        image: PathBuf,
        /// Path to the SeetaFace frontal model
        #[arg(long, default_value = "models/seeta_fd_frontal_v1.0.bin")]
        model: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Test { image, model } => run_local_test(&image, &model),
        command => run_daemon_command(command).await,
    }
}

async fn run_daemon_command(command: Commands) -> Result<()> {
    let connection = zbus::Connection::session()
        .await
        .context("failed to connect to the session bus")?;
    let proxy = KenalProxy::new(&connection)
        .await
        .context("kenald is not reachable on the bus")?;

    match command {
        Commands::Enroll { identity, image, metadata } => {
            let payload = read_payload(&image)?;
            let raw = proxy
                .enroll(&identity, &payload, metadata.as_deref().unwrap_or(""))
                .await?;
            print_json(&raw);
        }
        Commands::Recognize { image, threshold } => {
            let payload = read_payload(&image)?;
            let raw = proxy.recognize(&payload, threshold.unwrap_or(0.0)).await?;
            print_json(&raw);
        }
        Commands::Validate { image } => {
            let payload = read_payload(&image)?;
            let raw = proxy.validate_quality(&payload).await?;
            print_json(&raw);
        }
        Commands::List => {
            for identity in proxy.list_enrolled().await? {
                println!("{identity}");
            }
        }
        Commands::Delete { identity } => {
            let raw = proxy.delete(&identity).await?;
            print_json(&raw);
        }
        Commands::Status => {
            let raw = proxy.status().await?;
            print_json(&raw);
        }
        Commands::Test { .. } => unreachable!("test runs locally"),
    }

    Ok(())
}

/// Run ingestion, detection and quality gating on a local file without a
/// daemon — diagnostics for model and capture problems.
fn run_local_test(image_path: &Path, model: &str) -> Result<()> {
    use kenal_core::detector::{FaceLocator, SeetaLocator};

    let payload = read_payload(image_path)?;
    let frame = kenal_core::ingest::decode_payload(&payload)?;
    println!("decoded {}x{} capture", frame.width(), frame.height());

    let mut locator = SeetaLocator::load(model)?;
    let faces = locator.locate(&frame);
    println!("located {} face(s)", faces.len());
    for face in &faces {
        println!(
            "  {}x{} at ({}, {}), score {:.1}",
            face.width, face.height, face.x, face.y, face.score
        );
    }

    let report = kenal_core::quality::assess(&frame, &faces);
    println!("quality: {}", report.message);
    for suggestion in &report.suggestions {
        println!("  - {suggestion}");
    }

    Ok(())
}

fn read_payload(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn print_json(raw: &str) {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => match serde_json::to_string_pretty(&value) {
            Ok(pretty) => println!("{pretty}"),
            Err(_) => println!("{raw}"),
        },
        Err(_) => println!("{raw}"),
    }
}
