//! tryon CLI: align, composite and prepare eyewear try-on photos from the
//! command line.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use image::RgbaImage;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tryon_core::asset::decode_asset;
use tryon_core::{
    AssetError, AssetLoader, AssetSource, BlendParameters, ContainerSize, EngineConfig,
    ExportFormat, FrameCatalog, FusionHints, LandmarkPair, OverlayAsset, OverlaySession, PhotoId,
    PlacementTransform, parse_detector_response, prepare_detection_input, try_resolve_placement,
};

#[derive(Parser)]
#[command(name = "tryon")]
#[command(about = "Align and composite eyewear frames onto face photos")]
#[command(version)]
struct Cli {
    /// Engine configuration (JSON). Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve the overlay placement from detector landmarks.
    Align(AlignArgs),

    /// Composite a frame onto a photo and write the flattened image.
    Export(ExportArgs),

    /// Downsize and JPEG-encode a photo for the landmark detector.
    PrepareDetection {
        /// Input photo.
        #[arg(long)]
        photo: PathBuf,

        /// Output JPEG.
        #[arg(long)]
        out: PathBuf,
    },

    /// Print placement hints for the generative fusion service.
    Hints {
        /// Detector response (JSON, 0..1000 coordinates).
        #[arg(long)]
        landmarks: PathBuf,

        /// Photo the landmarks were measured on.
        #[arg(long)]
        photo: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct AlignArgs {
    /// Detector response (JSON, 0..1000 coordinates).
    #[arg(long)]
    landmarks: PathBuf,

    /// Display container size, e.g. 640x480.
    #[arg(long, value_parser = parse_size)]
    container: ContainerSize,

    /// Frame catalog (JSON).
    #[arg(long, requires = "frame")]
    catalog: Option<PathBuf>,

    /// Frame id within the catalog.
    #[arg(long, requires = "catalog")]
    frame: Option<String>,
}

#[derive(Debug, Clone, Args)]
struct ExportArgs {
    /// Base photo.
    #[arg(long)]
    photo: PathBuf,

    /// Frame catalog (JSON). Image paths are relative to this file.
    #[arg(long)]
    catalog: PathBuf,

    /// Frame id within the catalog. Defaults to the first frame.
    #[arg(long)]
    frame: Option<String>,

    /// Detector response (JSON). Without it the frame is centered.
    #[arg(long)]
    landmarks: Option<PathBuf>,

    /// Display size the placement is expressed in. Defaults to the photo size.
    #[arg(long, value_parser = parse_size)]
    display: Option<ContainerSize>,

    /// Override the scale after alignment.
    #[arg(long)]
    scale: Option<f32>,

    /// Override the rotation (degrees) after alignment.
    #[arg(long, allow_hyphen_values = true)]
    rotation: Option<f32>,

    /// Move the frame by DX,DY display pixels after alignment.
    #[arg(long, value_parser = parse_offset, allow_hyphen_values = true)]
    offset: Option<(f32, f32)>,

    /// Brightness in percent.
    #[arg(long)]
    brightness: Option<f32>,

    /// Contrast in percent.
    #[arg(long)]
    contrast: Option<f32>,

    /// Output image; format follows the extension (png, jpg).
    #[arg(long)]
    out: PathBuf,
}

fn parse_size(s: &str) -> Result<ContainerSize, String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WxH, got '{s}'"))?;
    let width: f32 = w.trim().parse().map_err(|e| format!("width: {e}"))?;
    let height: f32 = h.trim().parse().map_err(|e| format!("height: {e}"))?;
    let size = ContainerSize::new(width, height);
    if !size.is_valid() {
        return Err(format!("size must be positive, got '{s}'"));
    }
    Ok(size)
}

fn parse_offset(s: &str) -> Result<(f32, f32), String> {
    let (dx, dy) = s
        .split_once(',')
        .ok_or_else(|| format!("expected DX,DY, got '{s}'"))?;
    let dx: f32 = dx.trim().parse().map_err(|e| format!("dx: {e}"))?;
    let dy: f32 = dy.trim().parse().map_err(|e| format!("dy: {e}"))?;
    Ok((dx, dy))
}

/// Loads frame images from disk, relative to the catalog file.
struct FileAssetLoader {
    base_dir: PathBuf,
}

impl AssetLoader for FileAssetLoader {
    fn load(&self, asset: &OverlayAsset) -> Result<RgbaImage, AssetError> {
        let path = match &asset.image {
            AssetSource::Path(p) => self.base_dir.join(p),
            AssetSource::Url(url) => {
                return Err(AssetError::Unavailable {
                    id: asset.id.clone(),
                    reason: format!("remote image {url} is not fetched by the CLI"),
                });
            }
        };
        tracing::debug!("[cli] loading frame image {}", path.display());

        let bytes = fs::read(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => AssetError::NotFound(path.display().to_string()),
            _ => AssetError::Unavailable {
                id: asset.id.clone(),
                reason: err.to_string(),
            },
        })?;
        decode_asset(&bytes)
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    EngineConfig::from_json(&json).with_context(|| format!("Invalid config {}", path.display()))
}

fn load_catalog(path: &Path) -> Result<(FrameCatalog, PathBuf)> {
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog {}", path.display()))?;
    let catalog = FrameCatalog::from_json(&json)
        .with_context(|| format!("Invalid catalog {}", path.display()))?;
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok((catalog, base_dir))
}

fn select_frame(catalog: &FrameCatalog, id: Option<&str>) -> Result<OverlayAsset> {
    let frame = match id {
        Some(id) => catalog
            .find(id)
            .ok_or_else(|| anyhow!("Frame '{id}' not in catalog"))?,
        None => catalog.first().ok_or_else(|| anyhow!("Catalog is empty"))?,
    };
    Ok(frame.clone())
}

fn load_landmarks(path: &Path) -> Result<Option<LandmarkPair>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("Failed to read landmarks {}", path.display()))?;
    parse_detector_response(&body)
        .with_context(|| format!("Invalid detector response {}", path.display()))
}

#[allow(clippy::cast_precision_loss)]
fn photo_size(path: &Path) -> Result<ContainerSize> {
    let (w, h) = image::image_dimensions(path)
        .with_context(|| format!("Failed to read photo {}", path.display()))?;
    Ok(ContainerSize::new(w as f32, h as f32))
}

fn run_align(config: &EngineConfig, args: &AlignArgs) -> Result<()> {
    let landmarks = load_landmarks(&args.landmarks)?
        .ok_or_else(|| anyhow!("No face in {}", args.landmarks.display()))?;

    let width_mm = match (&args.catalog, &args.frame) {
        (Some(catalog), Some(frame)) => {
            let (catalog, _) = load_catalog(catalog)?;
            select_frame(&catalog, Some(frame))?.physical_width_mm(config.default_frame_width_mm)
        }
        _ => config.default_frame_width_mm,
    };

    let transform: PlacementTransform = try_resolve_placement(
        &landmarks,
        args.container,
        width_mm,
        config.reference_width_px,
        config.average_ipd_mm,
    )
    .ok_or_else(|| anyhow!("Landmarks are degenerate, cannot align"))?;

    println!("{}", serde_json::to_string_pretty(&transform)?);
    Ok(())
}

/// Applies the manual overrides on top of the aligned transform.
fn apply_adjustments(session: &mut OverlaySession, args: &ExportArgs) -> Result<()> {
    if let Some(scale) = args.scale {
        let scale = session.config().clamp_scale(scale);
        if !session.set_scale(scale) {
            bail!("Invalid --scale {scale}");
        }
    }
    if let Some(rotation) = args.rotation {
        let rotation = session.config().clamp_rotation(rotation);
        if !session.set_rotation(rotation) {
            bail!("Invalid --rotation {rotation}");
        }
    }
    if let Some((dx, dy)) = args.offset {
        if !(dx.is_finite() && dy.is_finite()) {
            bail!("Invalid --offset {dx},{dy}");
        }
        session.begin_drag(0.0, 0.0);
        session.update_drag(dx, dy);
        session.end_drag();
    }
    if args.brightness.is_some() || args.contrast.is_some() {
        let current = session.blend();
        let blend = BlendParameters::new(
            args.brightness
                .map_or(current.brightness, |b| session.config().clamp_blend(b)),
            args.contrast
                .map_or(current.contrast, |c| session.config().clamp_blend(c)),
        );
        if !session.set_blend(blend) {
            bail!(
                "Invalid --brightness/--contrast {}/{}",
                blend.brightness,
                blend.contrast
            );
        }
    }
    Ok(())
}

fn run_export(config: EngineConfig, args: &ExportArgs) -> Result<()> {
    let format = args
        .out
        .extension()
        .and_then(|ext| ext.to_str())
        .and_then(ExportFormat::from_extension)
        .ok_or_else(|| anyhow!("Unsupported output format: {}", args.out.display()))?;

    let photo = image::open(&args.photo)
        .with_context(|| format!("Failed to open photo {}", args.photo.display()))?
        .to_rgba8();
    let (catalog, base_dir) = load_catalog(&args.catalog)?;
    let frame = select_frame(&catalog, args.frame.as_deref())?;

    #[allow(clippy::cast_precision_loss)]
    let display = args
        .display
        .unwrap_or_else(|| ContainerSize::new(photo.width() as f32, photo.height() as f32));

    let mut session = OverlaySession::new(config, display);
    session.select_asset(frame);
    let ticket = session.load_photo(PhotoId::new());
    if let (Some(ticket), Some(path)) = (ticket, &args.landmarks) {
        let outcome = session.complete_detection(ticket, load_landmarks(path)?);
        tracing::info!("[cli] detection: {outcome:?}");
    }

    apply_adjustments(&mut session, args)?;

    let loader = FileAssetLoader { base_dir };
    let flat = session.export(&photo, &loader, format)?;
    fs::write(&args.out, &flat.bytes)
        .with_context(|| format!("Failed to write {}", args.out.display()))?;

    tracing::info!(
        "[cli] wrote {} ({}, {}x{}, transform {:?})",
        args.out.display(),
        flat.format.mime_type(),
        flat.width,
        flat.height,
        session.transform()
    );
    Ok(())
}

fn run_prepare_detection(config: &EngineConfig, photo: &Path, out: &Path) -> Result<()> {
    let img = image::open(photo)
        .with_context(|| format!("Failed to open photo {}", photo.display()))?;
    let bytes = prepare_detection_input(
        &img,
        config.detection_max_dimension,
        config.detection_jpeg_quality,
    )?;
    fs::write(out, &bytes).with_context(|| format!("Failed to write {}", out.display()))?;
    tracing::info!("[cli] wrote detector input {} ({} bytes)", out.display(), bytes.len());
    Ok(())
}

#[derive(Serialize)]
struct HintsOutput {
    #[serde(flatten)]
    hints: FusionHints,
    prompt: String,
}

fn run_hints(landmarks: &Path, photo: &Path) -> Result<()> {
    let size = photo_size(photo)?;
    let hints = match load_landmarks(landmarks)? {
        Some(pair) => FusionHints::from_landmarks(&pair, size),
        None => {
            tracing::warn!("[cli] no face in {}, using centered hints", landmarks.display());
            FusionHints::default()
        }
    };
    let output = HintsOutput {
        prompt: hints.describe(),
        hints,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Align(args) => run_align(&config, &args),
        Commands::Export(args) => run_export(config, &args),
        Commands::PrepareDetection { photo, out } => run_prepare_detection(&config, &photo, &out),
        Commands::Hints { landmarks, photo } => run_hints(&landmarks, &photo),
    }
}
