use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use deeplook_core::actions::FetchAsset;
use deeplook_core::alignment;
use deeplook_core::cluster::{self, ClusterOptions, ClusterType};
use deeplook_core::matching;
use deeplook_core::pipeline::{lift, run_pipeline, stage_fn, then, ChunkStack, PipelineError};
use deeplook_core::types::{Face, FaceObservation, Point, ProcessAsset, ProcessInput};
use deeplook_core::vision::FileImageFetcher;
use deeplook_core::ProcessConfiguration;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "webp", "bmp", "gif"];

#[derive(Parser)]
#[command(name = "deeplook", about = "Face grouping and verification toolkit")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Group face encodings by identity
    Cluster {
        /// JSON array of {local_identifier, encoding}
        faces: PathBuf,
        #[arg(long)]
        threshold: Option<f64>,
        /// ChineseWhispers keeps groups larger than this
        #[arg(long)]
        min_size: Option<usize>,
        #[arg(long)]
        iterations: Option<usize>,
        /// dbscan or chinese_whispers
        #[arg(long)]
        algorithm: Option<ClusterType>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Match "lhs" faces against all other faces
    Verify {
        /// JSON array of {local_identifier, encoding}
        faces: PathBuf,
        #[arg(long, default_value_t = 0.7)]
        threshold: f64,
    },
    /// Compute the face chip for a landmark constellation
    Align {
        /// JSON array of [x, y] points or {x, y} objects
        landmarks: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Check that every image in a directory can be fetched and decoded
    Scan {
        dir: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the effective process configuration
    Config {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

/// One face as exchanged on the command line.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FaceRecord {
    local_identifier: String,
    encoding: Vec<f64>,
}

impl From<FaceRecord> for Face {
    fn from(record: FaceRecord) -> Self {
        Face::new(record.local_identifier, FaceObservation::default()).with_encoding(record.encoding)
    }
}

impl From<&Face> for FaceRecord {
    fn from(face: &Face) -> Self {
        Self {
            local_identifier: face.local_identifier.clone(),
            encoding: face.encoding.clone(),
        }
    }
}

#[derive(Serialize)]
struct MatchRecord {
    source: FaceRecord,
    target: FaceRecord,
    distance: f64,
    threshold: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PointRecord {
    Pair([f64; 2]),
    Object { x: f64, y: f64 },
}

impl From<PointRecord> for Point {
    fn from(p: PointRecord) -> Self {
        match p {
            PointRecord::Pair([x, y]) => Point::new(x, y),
            PointRecord::Object { x, y } => Point::new(x, y),
        }
    }
}

#[derive(Serialize)]
struct ChipRecord {
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
    roll: f64,
    scale: f64,
    rows: f64,
    cols: f64,
}

#[derive(Serialize)]
struct ScanRecord {
    identifier: String,
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct ScanFailure {
    identifier: String,
    error: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Cluster {
            faces,
            threshold,
            min_size,
            iterations,
            algorithm,
            seed,
        } => {
            let defaults = ClusterOptions::default();
            let options = ClusterOptions {
                minimum_cluster_size: min_size.unwrap_or(defaults.minimum_cluster_size),
                number_iterations: iterations.unwrap_or(defaults.number_iterations),
                threshold: threshold.unwrap_or(defaults.threshold),
                cluster_type: algorithm.unwrap_or(defaults.cluster_type),
                seed: seed.unwrap_or(defaults.seed),
            };
            let faces = read_faces(&faces)?;
            let groups = cluster::cluster(&faces, &options).context("clustering failed")?;
            let groups: Vec<Vec<FaceRecord>> = groups
                .iter()
                .map(|g| g.iter().map(FaceRecord::from).collect())
                .collect();
            tracing::info!(faces = faces.len(), groups = groups.len(), "clustered");
            print_json(&groups)?;
        }
        Commands::Verify { faces, threshold } => {
            let (source, target) = matching::partition_by_role(read_faces(&faces)?);
            let matches = matching::verify(&source, &target, threshold).context("verify failed")?;
            let records: Vec<MatchRecord> = matches
                .iter()
                .map(|m| MatchRecord {
                    source: FaceRecord::from(&m.source_face),
                    target: FaceRecord::from(&m.target_face),
                    distance: m.distance,
                    threshold: m.threshold,
                })
                .collect();
            print_json(&records)?;
        }
        Commands::Align { landmarks, config } => {
            let config = load_config(config.as_deref())?;
            let src = fs::read_to_string(&landmarks)
                .with_context(|| format!("failed to read {}", landmarks.display()))?;
            let points: Vec<PointRecord> = serde_json::from_str(&src)
                .with_context(|| format!("invalid landmarks in {}", landmarks.display()))?;
            let observation = FaceObservation {
                landmarks: Some(points.into_iter().map(Point::from).collect()),
                ..Default::default()
            };
            let chip = alignment::face_chip_details(&observation, &config)
                .context("cannot align these landmarks")?;
            print_json(&ChipRecord {
                left: chip.rect.left,
                top: chip.rect.top,
                right: chip.rect.right,
                bottom: chip.rect.bottom,
                roll: chip.roll,
                scale: chip.scale,
                rows: chip.rows,
                cols: chip.cols,
            })?;
        }
        Commands::Scan { dir, config } => {
            let config = Arc::new(load_config(config.as_deref())?);
            scan(&dir, config).await?;
        }
        Commands::Config { config } => {
            let config = load_config(config.as_deref())?;
            print_json(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<ProcessConfiguration> {
    let config = match path {
        Some(path) => ProcessConfiguration::load(path)?,
        None => ProcessConfiguration::default(),
    };
    Ok(config.with_env_overrides())
}

fn read_faces(path: &Path) -> Result<Vec<Face>> {
    let src =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records: Vec<FaceRecord> = serde_json::from_str(&src)
        .with_context(|| format!("invalid face records in {}", path.display()))?;
    Ok(records.into_iter().map(Face::from).collect())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn scan(dir: &Path, config: Arc<ProcessConfiguration>) -> Result<()> {
    let mut identifiers: Vec<String> = fs::read_dir(dir)
        .with_context(|| format!("failed to list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .filter_map(|entry| entry.file_name().to_str().map(str::to_string))
        .collect();
    if identifiers.is_empty() {
        bail!("no images found in {}", dir.display());
    }
    identifiers.sort();

    let chunk_size = config.chunk_size;
    let inputs: Vec<ProcessInput> = identifiers
        .iter()
        .map(|id| ProcessInput::new(ProcessAsset::pending(id.as_str()), Arc::clone(&config)))
        .collect();
    let stack = ChunkStack::from_items(inputs, chunk_size);

    let fetcher = Arc::new(FileImageFetcher::new(dir));
    let describe = stage_fn(|input: ProcessInput| {
        let image = input
            .asset
            .image
            .as_ref()
            .ok_or_else(|| PipelineError::MissingImage(input.asset.identifier.clone()))?;
        Ok(ScanRecord {
            identifier: input.asset.identifier.clone(),
            width: image.width(),
            height: image.height(),
        })
    });
    let stage = Arc::new(lift(then(FetchAsset::new(fetcher), describe)));
    let report = run_pipeline(stack, stage).await;

    let failures: Vec<ScanFailure> = report
        .failures
        .iter()
        .map(|f| ScanFailure {
            identifier: identifiers[f.index].clone(),
            error: f.error.to_string(),
        })
        .collect();
    tracing::info!(
        images = identifiers.len(),
        chunks = report.chunks,
        failed = failures.len(),
        "scan finished"
    );
    print_json(&serde_json::json!({
        "images": report.outputs,
        "failures": failures,
    }))
}
