//! cropscout CLI - ground truth preparation and scene selection

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{ArgGroup, Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use cropscout::collect::planet::download::AssetDownload;
use cropscout::config::Settings;
use cropscout::geo_core::BoundingBox;
use cropscout::geometric::aoi::AreaOfInterest;
use cropscout::geometric::ground_truth::GroundTruth;
use cropscout::geometric::map_preview::MapPreview;
use cropscout::geometric::scene::{read_scene_ids, SceneSearch};

#[derive(Parser)]
#[command(name = "cropscout")]
#[command(author, version, about = "Crop ground truth and satellite scene selection", long_about = None)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// TOML settings file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (overrides the settings file)
    #[arg(short, long, global = true)]
    output: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load, filter and reproject the ground-truth shapefile
    GroundTruth {
        /// Shapefile (overrides the settings file)
        #[arg(short, long)]
        shapefile: Option<PathBuf>,
        /// Output file name without extension
        #[arg(long, default_value = "ground_truth")]
        name: String,
    },
    /// Save AOIs and a styled map preview
    Aoi {
        #[command(flatten)]
        aois: AoiArgs,
        /// Add the ground truth of this shapefile to the preview
        #[arg(short, long)]
        shapefile: Option<PathBuf>,
    },
    /// Search scenes fully covering each AOI
    Search {
        #[command(flatten)]
        aois: AoiArgs,
        #[command(flatten)]
        window: SearchArgs,
    },
    /// Download assets of selected scenes
    #[command(group(ArgGroup::new("source").required(true).args(["scenes", "ids"])))]
    Download {
        /// Scene table CSV written by `search`
        #[arg(long)]
        scenes: Option<PathBuf>,
        /// Scene ids
        #[arg(long, num_args = 1.., value_delimiter = ',')]
        ids: Vec<String>,
        /// Destination directory
        #[arg(long)]
        dest: Option<PathBuf>,
        /// Print the command instead of running it
        #[arg(long)]
        dry_run: bool,
    },
    /// All steps: ground truth, AOIs, search, optional download
    Run {
        #[command(flatten)]
        aois: AoiArgs,
        #[command(flatten)]
        window: SearchArgs,
        /// Download the covering scenes
        #[arg(long)]
        download: bool,
    },
}

#[derive(Args)]
struct AoiArgs {
    /// AOI as name=min_x,min_y,max_x,max_y (repeatable)
    #[arg(long = "aoi", value_parser = parse_named_bbox)]
    bboxes: Vec<(String, BoundingBox)>,
    /// AOI GeoJSON file (repeatable)
    #[arg(long = "aoi-file")]
    files: Vec<PathBuf>,
}

#[derive(Args)]
struct SearchArgs {
    /// First acquisition day (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last acquisition day (YYYY-MM-DD)
    #[arg(long)]
    end: Option<NaiveDate>,
    /// Cloud cover ceiling as a fraction in [0, 1]
    #[arg(long)]
    max_cloud: Option<f64>,
}

// ─── Helpers ────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn parse_named_bbox(s: &str) -> Result<(String, BoundingBox), String> {
    let (name, bbox) = s
        .split_once('=')
        .ok_or_else(|| format!("expected name=min_x,min_y,max_x,max_y, got '{}'", s))?;
    let bbox: BoundingBox = bbox.parse().map_err(|e| format!("{:#}", e))?;
    Ok((name.trim().to_string(), bbox))
}

/// AOIs from the command line, falling back to the settings file
fn resolve_aois(args: &AoiArgs, settings: &Settings) -> Result<Vec<AreaOfInterest>> {
    let mut aois = Vec::new();
    for (name, bbox) in &args.bboxes {
        aois.push(AreaOfInterest::from_bbox(name, *bbox)?);
    }
    for file in &args.files {
        aois.push(AreaOfInterest::from_geojson(file)?);
    }
    if aois.is_empty() {
        for aoi in &settings.aois {
            aois.push(AreaOfInterest::from_bbox(&aoi.name, aoi.bbox)?);
        }
    }
    if aois.is_empty() {
        anyhow::bail!("No AOI given: use --aoi, --aoi-file or [[aoi]] in the settings file");
    }
    Ok(aois)
}

fn apply_search_args(settings: &mut Settings, window: &SearchArgs) -> Result<()> {
    if let Some(start) = window.start {
        settings.search.start_date = start;
    }
    if let Some(end) = window.end {
        settings.search.end_date = end;
    }
    if let Some(max_cloud) = window.max_cloud {
        settings.search.max_cloud_cover = max_cloud;
    }
    settings.search.validate()
}

fn load_ground_truth(settings: &Settings, shapefile: Option<PathBuf>) -> Result<GroundTruth> {
    let mut gt_settings = settings.ground_truth.clone();
    if shapefile.is_some() {
        gt_settings.shapefile = shapefile;
    }
    GroundTruth::from_settings(&gt_settings, Some(settings.output_path.clone()))?.run()
}

fn print_ground_truth_summary(ground_truth: &GroundTruth) {
    println!("Ground truth: {} features", ground_truth.len());
    for (code, count) in ground_truth.class_counts() {
        println!("  - class {:>3}: {}", code, count);
    }
}

// ─── Commands ───────────────────────────────────────────────────────────

fn cmd_ground_truth(settings: &Settings, shapefile: Option<PathBuf>, name: &str) -> Result<()> {
    let ground_truth = load_ground_truth(settings, shapefile)?;
    print_ground_truth_summary(&ground_truth);
    let path = ground_truth.to_geojson(Some(name))?;
    println!("Saved to: {:?}", path);
    Ok(())
}

fn cmd_aoi(settings: &Settings, args: &AoiArgs, shapefile: Option<PathBuf>) -> Result<()> {
    let aois = resolve_aois(args, settings)?;
    let output = Path::new(&settings.output_path);
    let mut preview = MapPreview::new();

    if shapefile.is_some() || settings.ground_truth.shapefile.is_some() {
        let ground_truth = load_ground_truth(settings, shapefile)?;
        preview.add_ground_truth(&ground_truth)?;
        for aoi in &aois {
            ground_truth.to_geojson_within(aoi)?;
        }
    }

    for aoi in &aois {
        let path = aoi.to_geojson(output)?;
        preview.add_aoi(aoi)?;
        println!("AOI '{}' saved to: {:?}", aoi.name(), path);
    }

    let preview_path = output.join("map_preview.geojson");
    preview.save(&preview_path)?;
    println!("Map preview ({} features): {:?}", preview.len(), preview_path);
    Ok(())
}

fn cmd_search(settings: &Settings, aois: &[AreaOfInterest]) -> Result<Vec<(String, Vec<String>)>> {
    let mut search = SceneSearch::from_settings(&settings.search, Some(settings.output_path.clone()))?;
    let mut selected = Vec::new();

    for aoi in aois {
        let table = search.run(aoi)?;
        println!(
            "AOI '{}': {} scenes cover more than {}%",
            aoi.name(),
            table.len(),
            settings.search.coverage_threshold
        );
        for scene in table.scenes() {
            println!(
                "  - {} cloud={} overlap={:.2}%",
                scene.id,
                scene
                    .cloud_cover
                    .map(|c| format!("{:.3}", c))
                    .unwrap_or_else(|| "?".to_string()),
                scene.overlap_pct
            );
        }
        let ids = table.ids();
        let (geojson, csv) = search.to_geojson(None)?;
        println!("  saved {:?} and {:?}", geojson, csv);
        selected.push((aoi.name().to_string(), ids));
    }
    Ok(selected)
}

fn cmd_download(
    settings: &Settings,
    scenes: Option<PathBuf>,
    ids: Vec<String>,
    dest: Option<PathBuf>,
    dry_run: bool,
) -> Result<()> {
    let ids = match scenes {
        Some(path) => read_scene_ids(&path)?,
        None => ids,
    };
    if ids.is_empty() {
        anyhow::bail!("No scene ids to download");
    }
    let dest = dest.unwrap_or_else(|| Path::new(&settings.output_path).join("scenes"));
    let download = AssetDownload::new(&settings.download, &dest);

    if dry_run {
        println!("{}", download.command_line(&ids));
        return Ok(());
    }
    download.run(&ids)
}

fn cmd_run(settings: &Settings, args: &AoiArgs, download: bool) -> Result<()> {
    let aois = resolve_aois(args, settings)?;
    let output = Path::new(&settings.output_path);

    if settings.ground_truth.shapefile.is_some() {
        let ground_truth = load_ground_truth(settings, None)?;
        print_ground_truth_summary(&ground_truth);
        ground_truth.to_geojson(None)?;
        for aoi in &aois {
            ground_truth.to_geojson_within(aoi)?;
        }
    } else {
        info!("no ground-truth shapefile configured, skipping");
    }

    for aoi in &aois {
        aoi.to_geojson(output)?;
    }

    let selected = cmd_search(settings, &aois)?;

    if download {
        for (name, ids) in selected {
            let dest = output.join("scenes").join(&name);
            AssetDownload::new(&settings.download, &dest).run(&ids)?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(output) = cli.output {
        settings.output_path = output;
    }

    match cli.command {
        Commands::GroundTruth { shapefile, name } => cmd_ground_truth(&settings, shapefile, &name),
        Commands::Aoi { aois, shapefile } => cmd_aoi(&settings, &aois, shapefile),
        Commands::Search { aois, window } => {
            apply_search_args(&mut settings, &window)?;
            let aois = resolve_aois(&aois, &settings)?;
            cmd_search(&settings, &aois).map(|_| ())
        }
        Commands::Download {
            scenes,
            ids,
            dest,
            dry_run,
        } => cmd_download(&settings, scenes, ids, dest, dry_run),
        Commands::Run {
            aois,
            window,
            download,
        } => {
            apply_search_args(&mut settings, &window)?;
            cmd_run(&settings, &aois, download)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_named_bbox() {
        let (name, bbox) = parse_named_bbox("north=36.5,-1.2,36.6,-1.1").unwrap();
        assert_eq!(name, "north");
        assert_eq!(bbox, BoundingBox::new(36.5, -1.2, 36.6, -1.1));
        assert!(parse_named_bbox("36.5,-1.2,36.6,-1.1").is_err());
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "cropscout",
            "run",
            "--aoi",
            "a=0,0,1,1",
            "--aoi",
            "b=2,2,3,3",
            "--max-cloud",
            "0.05",
            "--download",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                aois,
                window,
                download,
            } => {
                assert_eq!(aois.bboxes.len(), 2);
                assert_eq!(window.max_cloud, Some(0.05));
                assert!(download);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_settings_aois_are_fallback() {
        let settings = Settings::from_toml(
            r#"
            [[aoi]]
            name = "north"
            bbox = { min_x = 0.0, min_y = 0.0, max_x = 1.0, max_y = 1.0 }
            "#,
        )
        .unwrap();
        let none = AoiArgs {
            bboxes: vec![],
            files: vec![],
        };
        let aois = resolve_aois(&none, &settings).unwrap();
        assert_eq!(aois.len(), 1);
        assert_eq!(aois[0].name(), "north");

        assert!(resolve_aois(&none, &Settings::default()).is_err());
    }

    #[test]
    fn test_download_needs_ids_or_scenes() {
        assert!(Cli::try_parse_from(["cropscout", "download"]).is_err());
        assert!(Cli::try_parse_from(["cropscout", "download", "--dry-run"]).is_err());
        assert!(Cli::try_parse_from([
            "cropscout",
            "download",
            "--scenes",
            "north_scenes.csv",
            "--ids",
            "a"
        ])
        .is_err());

        let cli = Cli::try_parse_from(["cropscout", "download", "--ids", "a,b", "--dry-run"]).unwrap();
        match cli.command {
            Commands::Download { ids, dry_run, .. } => {
                assert_eq!(ids, vec!["a", "b"]);
                assert!(dry_run);
            }
            _ => panic!("expected download"),
        }
    }

    #[test]
    fn test_download_rejects_empty_scene_table() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("empty_scenes.csv");
        std::fs::write(&csv, "id,item_type,acquired,cloud_cover,overlap_pct,thumbnail\n").unwrap();

        let err = cmd_download(&Settings::default(), Some(csv), vec![], None, true).unwrap_err();
        assert!(err.to_string().contains("No scene ids"));
    }
}
