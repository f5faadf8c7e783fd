use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{Args, Parser, Subcommand};

use crate::codec::Compression;
use crate::czi::CziFile;
use crate::hcs::{HcsOptions, convert_czi_to_hcs, default_plate_path};
use crate::ozx::{default_ozx_path, package_ozx};
use crate::validate::{validate_image, validate_plate};
use crate::viewer::{DEFAULT_VIEWER, VIEWER_ENV, launch_viewer};
use crate::writer::{
    DEFAULT_CHUNK_SIZE, Flavor, WriteOptions, default_output_path, parse_scales, write_omezarr,
};
use crate::{Error, Result, logging};

#[derive(Debug, Parser)]
#[command(name = "czi2zarr", author, version)]
#[command(about = "Convert CZI microscopy files to OME-Zarr (NGFF 0.5)")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print a metadata overview of a CZI file
    Info {
        /// CZI file to inspect
        #[arg(value_name = "CZI")]
        czifile: PathBuf,
    },
    /// Convert one scene of a CZI file to an OME-Zarr image
    Convert(ConvertArgs),
    /// Convert a multi-well CZI file to an HCS plate
    Hcs(HcsArgs),
    /// Check an OME-Zarr hierarchy against the NGFF layout
    Validate {
        #[arg(value_name = "ZARR")]
        zarr: PathBuf,
        /// Validate as an HCS plate
        #[arg(long)]
        plate: bool,
    },
    /// Open an OME-Zarr hierarchy in the external viewer
    View {
        #[arg(value_name = "ZARR")]
        zarr: PathBuf,
        #[command(flatten)]
        viewer: ViewerArgs,
    },
}

/// Scale factors given as `[2,4,8]` or `2,4,8`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleFactors(pub Vec<usize>);

impl FromStr for ScaleFactors {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_scales(s).map(Self)
    }
}

#[derive(Debug, Args)]
pub struct ViewerArgs {
    /// Viewer command line; the output path is appended
    #[arg(long, env = VIEWER_ENV, default_value = DEFAULT_VIEWER)]
    pub viewer: String,
}

#[derive(Debug, Args)]
pub struct OutputArgs {
    /// Output path (default derived from the CZI file name)
    #[arg(long)]
    pub zarr: Option<PathBuf>,

    /// Downsampling factors, e.g. [2,4,8]; level 1 is always written
    #[arg(long)]
    pub scales: Option<ScaleFactors>,

    /// Output naming and default pyramid
    #[arg(long, value_enum, conflicts_with_all = ["use_ngffzarr", "use_omezarr"])]
    pub flavor: Option<Flavor>,

    /// Same as --flavor ngff-zarr
    #[arg(long, conflicts_with = "use_omezarr")]
    pub use_ngffzarr: bool,

    /// Same as --flavor ome-zarr
    #[arg(long)]
    pub use_omezarr: bool,

    /// Chunk compression: raw, gzip[:level] or zstd[:level]
    #[arg(long, default_value_t = Compression::default())]
    pub compression: Compression,

    /// Maximum chunk length along y and x
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: u64,

    /// Replace existing output
    #[arg(long)]
    pub overwrite: bool,

    /// Validate the written hierarchy
    #[arg(long)]
    pub validate: bool,

    /// Open the result in the external viewer
    #[arg(long)]
    pub show: bool,

    #[command(flatten)]
    pub viewer: ViewerArgs,

    /// Log file (default next to the CZI file)
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl OutputArgs {
    pub fn flavor(&self) -> Flavor {
        match (self.flavor, self.use_omezarr) {
            (Some(flavor), _) => flavor,
            (None, true) => Flavor::OmeZarr,
            (None, false) => Flavor::NgffZarr,
        }
    }

    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            flavor: self.flavor(),
            scale_factors: self.scales.clone().map(|s| s.0),
            compression: self.compression,
            chunk_size: self.chunk_size,
            overwrite: self.overwrite,
        }
    }
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// CZI file to convert
    #[arg(long)]
    pub czifile: PathBuf,

    /// Scene to convert (default: the first)
    #[arg(long)]
    pub scene: Option<usize>,

    /// Also package the result as a single .ozx file
    #[arg(long)]
    pub ozx: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Args)]
pub struct HcsArgs {
    /// CZI plate acquisition to convert
    #[arg(long)]
    pub czifile: PathBuf,

    /// Plate name (default: the CZI file stem)
    #[arg(long)]
    pub plate_name: Option<String>,

    /// Number of plate rows (default: inferred)
    #[arg(long, requires = "plate_columns")]
    pub plate_rows: Option<usize>,

    /// Number of plate columns (default: inferred)
    #[arg(long, requires = "plate_rows")]
    pub plate_columns: Option<usize>,

    #[command(flatten)]
    pub output: OutputArgs,
}

pub fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Info { czifile } => {
            logging::init(None)?;
            check_input(&czifile)?;
            let czi = CziFile::open(&czifile)?;
            println!("{}", czi.summary());
            Ok(())
        }
        Command::Convert(args) => {
            let log_file = log_file(&args.czifile, &args.output, logging::convert_log_path);
            logging::init(log_file.as_deref())?;
            with_banners("CZI to OME-Zarr conversion", || {
                check_input(&args.czifile)?;
                convert(&args)
            })
        }
        Command::Hcs(args) => {
            let log_file = log_file(&args.czifile, &args.output, logging::hcs_log_path);
            logging::init(log_file.as_deref())?;
            with_banners("CZI to HCS OME-Zarr conversion", || {
                check_input(&args.czifile)?;
                hcs(&args)
            })
        }
        Command::Validate { zarr, plate } => {
            logging::init(None)?;
            if plate {
                let summary = validate_plate(&zarr)?;
                println!(
                    "valid plate {}: {}x{}, {} wells, {} fields",
                    summary.name.as_deref().unwrap_or("(unnamed)"),
                    summary.rows,
                    summary.columns,
                    summary.wells.len(),
                    summary.field_count
                );
            } else {
                let multiscale = validate_image(&zarr)?;
                println!("valid image: {} levels", multiscale.datasets.len());
            }
            Ok(())
        }
        Command::View { zarr, viewer } => {
            logging::init(None)?;
            if !zarr.exists() {
                return Err(Error::NotFound(zarr));
            }
            launch_viewer(&viewer.viewer, &zarr)?;
            Ok(())
        }
    }
}

/// An explicit `--log-file`, else the default next to an existing input.
fn log_file(
    czifile: &Path,
    output: &OutputArgs,
    default: fn(&Path) -> PathBuf,
) -> Option<PathBuf> {
    output
        .log_file
        .clone()
        .or_else(|| czifile.exists().then(|| default(czifile)))
}

/// The input must exist; an unexpected extension only warrants a warning.
fn check_input(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::NotFound(path.to_path_buf()));
    }
    let is_czi = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("czi"));
    if !is_czi {
        log::warn!("{} does not have a .czi extension", path.display());
    }
    Ok(())
}

fn with_banners<T>(title: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let rule = "=".repeat(60);
    log::info!("{rule}");
    log::info!("Starting {title}");
    log::info!("{rule}");
    match f() {
        Ok(value) => {
            log::info!("{rule}");
            log::info!("{title} completed successfully");
            log::info!("{rule}");
            Ok(value)
        }
        Err(e) => {
            log::error!("{rule}");
            log::error!("{title} failed: {e}");
            log::error!("{rule}");
            Err(e)
        }
    }
}

fn convert(args: &ConvertArgs) -> Result<()> {
    let options = args.output.write_options();
    log::info!("CZI file: {}", args.czifile.display());
    log::info!(
        "flavor: {}, scale factors: {:?}, compression: {}, overwrite: {}",
        options.flavor,
        options.levels(),
        options.compression,
        options.overwrite
    );

    let mut czi = CziFile::open(&args.czifile)?;
    let image = czi.read_scene(args.scene)?;
    log::info!("read scene {}: {image}", args.scene.unwrap_or(0));

    let zarr = args
        .output
        .zarr
        .clone()
        .unwrap_or_else(|| default_output_path(&args.czifile, options.flavor));
    let written = write_omezarr(&image, &zarr, &options)?;
    log::info!("written OME-Zarr to {}", written.display());

    if args.output.validate {
        validate_image(&written)?;
    }
    if args.ozx {
        package_ozx(&written, default_ozx_path(&written))?;
    }
    show(&args.output, &written);
    Ok(())
}

fn hcs(args: &HcsArgs) -> Result<()> {
    let write = args.output.write_options();
    let output = args
        .output
        .zarr
        .clone()
        .unwrap_or_else(|| default_plate_path(&args.czifile));
    log::info!("CZI file: {}", args.czifile.display());
    log::info!(
        "plate name: {}, overwrite: {}",
        args.plate_name.as_deref().unwrap_or("(file stem)"),
        write.overwrite
    );
    let options = HcsOptions {
        write,
        output: Some(output),
        plate_name: args.plate_name.clone(),
        rows: args.plate_rows,
        columns: args.plate_columns,
    };
    let written = convert_czi_to_hcs(&args.czifile, &options)?;
    log::info!("written HCS plate to {}", written.display());

    if args.output.validate {
        let summary = validate_plate(&written)?;
        log::info!(
            "plate has {} wells with {} fields",
            summary.wells.len(),
            summary.field_count
        );
    }
    show(&args.output, &written);
    Ok(())
}

/// Failing to start the viewer does not fail the conversion.
fn show(args: &OutputArgs, path: &Path) {
    if args.show {
        if let Err(e) = launch_viewer(&args.viewer.viewer, path) {
            log::warn!("result kept at {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_convert_flags() {
        let cli = Cli::try_parse_from([
            "czi2zarr",
            "convert",
            "--czifile",
            "a.czi",
            "--scales",
            "[2,4]",
            "--use-omezarr",
            "--compression",
            "gzip:3",
        ])
        .unwrap();
        let Command::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        let options = args.output.write_options();
        assert_eq!(options.flavor, Flavor::OmeZarr);
        assert_eq!(options.levels(), vec![1, 2, 4]);
        assert_eq!(options.compression, Compression::Gzip { level: 3 });
    }

    #[test]
    fn flavor_aliases_conflict() {
        let result = Cli::try_parse_from([
            "czi2zarr",
            "convert",
            "--czifile",
            "a.czi",
            "--use-omezarr",
            "--use-ngffzarr",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn rejects_bad_scales() {
        let result = Cli::try_parse_from([
            "czi2zarr", "convert", "--czifile", "a.czi", "--scales", "[2,-1]",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn plate_dimensions_come_together() {
        let result = Cli::try_parse_from([
            "czi2zarr",
            "hcs",
            "--czifile",
            "a.czi",
            "--plate-rows",
            "8",
        ]);
        assert!(result.is_err());
    }
}
