use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::ModelSource;
use likeness_demo::{
    Config, DemoSession, ImageSummary, LiveFeedback, ModelLoader, OnnxLoader, Slot, SlotImage,
};
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Argument value that selects the camera instead of a file.
const CAMERA: &str = "camera";

#[derive(Parser)]
#[command(name = "likeness", version, about = "Compare two faces from photos or a webcam")]
struct Cli {
    /// Model directory or base URL (overrides LIKENESS_MODEL_SOURCE)
    #[arg(long, global = true)]
    models: Option<String>,
    /// V4L2 device path (overrides LIKENESS_CAMERA_DEVICE)
    #[arg(long, global = true)]
    device: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare a reference face with a comparison face
    Compare {
        /// Reference image path, or "camera"
        reference: String,
        /// Comparison image path, or "camera"
        comparison: String,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Describe the face in one image
    Analyze {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Capture a photo from the camera (Enter = capture now, q = cancel)
    Capture {
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List video capture devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(models) = &cli.models {
        config.model_source = ModelSource::parse(models);
    }
    if let Some(device) = &cli.device {
        config.camera_device = device.clone();
    }
    tracing::debug!(models = %config.model_source, device = %config.camera_device, "configuration loaded");

    match cli.command {
        Commands::Compare { reference, comparison, json } => {
            let mut session = new_session(&config);
            let mut input = Terminal::default();
            fill_slot(&mut session, &mut input, Slot::Reference, &reference).await?;
            fill_slot(&mut session, &mut input, Slot::Comparison, &comparison).await?;

            let report = session.compare().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(report)?);
            } else {
                print!("{report}");
            }
        }
        Commands::Analyze { image, json } => {
            let loader = new_loader(&config);
            let analyzer = loader.ensure_loaded().await?;
            let bytes = std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?;
            let image_data = SlotImage::from_encoded(bytes)?;

            let Some(analysis) = analyzer.analyze(image_data.shared_bytes()).await? else {
                bail!("no face detected in {}", image.display());
            };
            let summary = ImageSummary::from_analysis(&analysis, &mut rand::thread_rng());
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print!("{summary}");
            }
        }
        Commands::Capture { output } => {
            let mut session = new_session(&config);
            if !run_camera(&mut session, &mut Terminal::default(), Slot::Reference).await? {
                println!("Capture cancelled");
                return Ok(());
            }
            let Some(image) = session.image(Slot::Reference) else {
                bail!("camera session ended without an image");
            };
            std::fs::write(&output, image.bytes()).with_context(|| format!("writing {}", output.display()))?;
            println!("Saved {} ({} bytes)", output.display(), image.len());
        }
        Commands::Devices => {
            let devices = likeness_hw::list_devices();
            if devices.is_empty() {
                println!("No video capture devices found");
            }
            for d in devices {
                println!("{}\t{} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
    }

    Ok(())
}

fn new_loader(config: &Config) -> ModelLoader {
    ModelLoader::new(
        OnnxLoader::new(config.model_source.clone(), config.intra_threads).with_fetch_timeout(config.fetch_timeout()),
    )
}

fn new_session(config: &Config) -> DemoSession {
    DemoSession::new(new_loader(config), Arc::new(config.camera_provider()), config.live_settings())
}

async fn fill_slot(session: &mut DemoSession, input: &mut Terminal, slot: Slot, arg: &str) -> Result<()> {
    if arg == CAMERA {
        if !run_camera(session, input, slot).await? {
            bail!("{slot} capture cancelled");
        }
        return Ok(());
    }
    session.load_file(slot, arg).await?;
    Ok(())
}

/// Drive one camera session from the terminal. Returns whether a photo was taken.
async fn run_camera(session: &mut DemoSession, input: &mut Terminal, slot: Slot) -> Result<bool> {
    session.open_camera(slot).await?;
    let Some(mut feedback) = session.camera_feedback() else {
        bail!("camera session did not start");
    };
    eprintln!("Camera open for the {slot} photo. Enter captures now, q cancels; a steady well-lit face is captured automatically.");

    loop {
        tokio::select! {
            changed = feedback.changed() => {
                if changed.is_err() {
                    // Session ended on its own (auto-capture or camera failure).
                    break;
                }
                print_status(&feedback.borrow_and_update());
            }
            line = input.next_line() => match line {
                Some(l) if l.trim().eq_ignore_ascii_case("q") => session.cancel_camera(),
                Some(_) => session.capture_now()?,
                None => session.cancel_camera(),
            },
        }
    }
    eprintln!();

    Ok(session.await_camera().await?.is_some())
}

/// Stdin lines, read on a plain thread so a pending read never holds up exit.
#[derive(Default)]
struct Terminal {
    lines: Option<mpsc::UnboundedReceiver<String>>,
    closed: bool,
}

impl Terminal {
    /// Next line; `None` once at end of input, then never resolves again.
    async fn next_line(&mut self) -> Option<String> {
        if self.closed {
            return std::future::pending().await;
        }
        let rx = self.lines.get_or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            std::thread::spawn(move || {
                for line in std::io::stdin().lock().lines() {
                    let Ok(line) = line else { break };
                    if tx.send(line).is_err() {
                        break;
                    }
                }
            });
            rx
        });
        let line = rx.recv().await;
        self.closed = line.is_none();
        line
    }
}

fn print_status(feedback: &LiveFeedback) {
    let lighting = match feedback.lighting {
        Some(l) if l.is_good() => "good",
        Some(_) => "poor",
        None => "-",
    };
    let face = if feedback.sample.is_some() { "face" } else { "no face" };
    let armed = if feedback.auto_capturing { "  auto-capturing..." } else { "" };
    eprint!(
        "\r{face:<8} quality {:>3} ({:?})  lighting {lighting:<4}{armed}          ",
        feedback.quality, feedback.band
    );
    let _ = std::io::stderr().flush();
}
