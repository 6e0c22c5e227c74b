/*!
 * Scanlink CLI - Command Line Interface
 */

use clap::{Parser, Subcommand, ValueEnum};
use scanlink::{
    capture_mesh, capture_stl_to_file,
    config::{ErrorMode, ScanConfig},
    error::{Result, EXIT_SUCCESS},
    logging, multi_capture, multi_capture_stl, BatchProgress, BatchReport, MeshSummary,
};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "scanlink")]
#[command(version, about = "Capture meshes from a remote 3D scanner service", long_about = None)]
struct Cli {
    /// Scanner service URI (scan+tcp://host:port?service=name)
    #[arg(short = 'u', long = "uri", global = true)]
    uri: Option<String>,

    /// Load configuration from a TOML file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for a batch to be prepared (0 = no limit)
    #[arg(long = "prepare-timeout", global = true)]
    prepare_timeout: Option<u64>,

    /// Per-item error handling for batches
    #[arg(long = "error-mode", value_enum, global = true)]
    error_mode: Option<ErrorModeArg>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Write logs to a file as JSON
    #[arg(long = "log-file", global = true)]
    log_file: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long = "no-progress", global = true)]
    no_progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture one mesh and print its counts
    Capture {
        /// Request a texture with the mesh
        #[arg(short = 't', long)]
        texture: bool,
    },

    /// Capture one mesh as binary STL
    CaptureStl {
        /// Output file (default: captured_mesh.stl)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },

    /// Capture a batch of meshes through deferred captures
    MultiCapture {
        /// Number of captures (default: batch_size from config)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Request textures with the meshes
        #[arg(short = 't', long)]
        texture: bool,
    },

    /// Capture a batch of meshes as numbered STL files
    MultiCaptureStl {
        /// Number of captures (default: batch_size from config)
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Directory for the STL files
        #[arg(short = 'o', long = "output-dir")]
        output_dir: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ErrorModeArg {
    Continue,
    Abort,
}

impl From<ErrorModeArg> for ErrorMode {
    fn from(arg: ErrorModeArg) -> Self {
        match arg {
            ErrorModeArg::Continue => ErrorMode::Continue,
            ErrorModeArg::Abort => ErrorMode::Abort,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match cli.config {
        Some(ref path) => ScanConfig::from_file(path)?,
        None => ScanConfig::default(),
    };

    // Override config with CLI arguments
    if let Some(uri) = cli.uri {
        config.service_uri = uri;
    }
    if let Some(secs) = cli.prepare_timeout {
        config.prepare_timeout_secs = secs;
    }
    if let Some(mode) = cli.error_mode {
        config.error_mode = mode.into();
    }
    if cli.log_file.is_some() {
        config.log_file = cli.log_file;
    }
    config.verbose |= cli.verbose;
    config.show_progress &= !cli.no_progress;

    if let Err(e) = logging::init_logging(&config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(execute(cli.command, config))
}

async fn execute(command: Commands, mut config: ScanConfig) -> Result<()> {
    match command {
        Commands::Capture { texture } => {
            config.validate()?;
            let scanner = scanlink::connect(&config).await?;
            let mesh = capture_mesh(&scanner, texture || config.with_texture).await?;
            println!("{}", MeshSummary::of(&mesh));
            scanner.close().await;
            Ok(())
        }

        Commands::CaptureStl { output } => {
            config.validate()?;
            let path = output.unwrap_or_else(|| PathBuf::from(&config.single_stl_file));
            let scanner = scanlink::connect(&config).await?;
            let bytes = capture_stl_to_file(&scanner, &path).await?;
            println!("Wrote {} ({} bytes)", path.display(), bytes);
            scanner.close().await;
            Ok(())
        }

        Commands::MultiCapture { count, texture } => {
            if let Some(count) = count {
                config.batch_size = count;
            }
            config.with_texture |= texture;
            config.validate()?;

            let scanner = scanlink::connect(&config).await?;
            let progress = BatchProgress::new(config.batch_size, config.show_progress);
            let mut report = BatchReport::default();
            let outcome =
                multi_capture(&scanner, &config, config.batch_size, &progress, &mut report).await;
            scanner.close().await;

            print_failures(&report);
            for (index, mesh) in &outcome? {
                println!("mesh {}: {}", index, MeshSummary::of(mesh));
            }
            report.into_result().map(|_| ())
        }

        Commands::MultiCaptureStl { count, output_dir } => {
            if let Some(count) = count {
                config.batch_size = count;
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            config.validate()?;
            std::fs::create_dir_all(&config.output_dir)?;

            let scanner = scanlink::connect(&config).await?;
            let progress = BatchProgress::new(config.batch_size, config.show_progress);
            let mut report = BatchReport::default();
            let outcome =
                multi_capture_stl(&scanner, &config, config.batch_size, &progress, &mut report)
                    .await;
            scanner.close().await;

            print_failures(&report);
            let written = outcome?;
            println!(
                "Wrote {} STL files to {}",
                written.len(),
                config.output_dir.display()
            );
            report.into_result().map(|_| ())
        }
    }
}

/// Print the per-item failures a batch run collected, including runs that stopped early
fn print_failures(report: &BatchReport) {
    for failure in &report.failures {
        warn!(
            "Capture {} failed during {:?}: {}",
            failure.index, failure.phase, failure.error
        );
        eprintln!("capture {}: {}", failure.index, failure.error);
    }
}
