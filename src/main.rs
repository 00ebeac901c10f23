use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::ImageReader;
use log::{error, info, warn};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use traybill::hardware::{
    ChannelLink, FrameSource, FrameSourceFactory, SerialTriggerLink, StillFrameSource, TriggerLink,
};
use traybill::receipt::{format_history, format_receipt, snapshot_file_name};
use traybill::{
    CaptureResult, CaptureSession, DeviceConfig, Kiosk, KioskConfig, Ledger,
    MenuCatalog, Transition, TriggerStateMachine,
};

#[derive(Parser)]
#[command(name = "traybill")]
#[command(about = "Self-checkout kiosk: photograph a tray, bill the dishes")]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    kiosk: KioskConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the kiosk: live camera, button-triggered captures
    Run {
        #[command(flatten)]
        device: DeviceConfig,
    },
    /// Bill a single image file
    Scan {
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Append the result to the ledger
        #[arg(long)]
        record: bool,

        /// Save the frame with detector boxes drawn on it
        #[arg(long, value_name = "FILE")]
        annotated_out: Option<PathBuf>,
    },
    /// Print the ledger
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    let outcome = match cli.command {
        Command::Run { device } => run(&cli.kiosk, device).await,
        Command::Scan {
            image,
            record,
            annotated_out,
        } => scan(&cli.kiosk, &image, record, annotated_out.as_deref()),
        Command::History => history(&cli.kiosk),
    };
    if let Err(err) = &outcome {
        error!("{err:#}");
    }
    outcome
}

async fn run(config: &KioskConfig, device: DeviceConfig) -> Result<()> {
    config.validate()?;
    device.validate()?;

    let catalog = Arc::new(MenuCatalog::load(&config.menu)?);
    info!("Loaded menu with {} items", catalog.len());
    let pipeline = config.load_pipeline()?;
    info!("Pipeline steps: {}", pipeline.step_names().join(" → "));

    // Devices first: a failed port must not cost a fresh-ledger truncation.
    let link = open_link(&device)?;
    let frames = frame_factory(&device)?;
    let ledger = Ledger::open(&config.ledger, config.ledger_mode())?;

    let session = Arc::new(CaptureSession::new());
    let machine = TriggerStateMachine::new(session, pipeline, catalog, ledger);
    let kiosk = Kiosk::new(machine, link, frames)
        .with_zoom(device.zoom)
        .with_timings(device.timings());

    let printer = tokio::spawn(print_receipts(kiosk.subscribe(), device.snapshot_dir.clone()));

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            ctrl_c.cancel();
        }
    });

    let machine = kiosk.run(cancel).await?;
    // Dropping the machine closes the event channel and ends the printer.
    drop(machine);
    printer.await.context("receipt printer panicked")?;
    Ok(())
}

fn open_link(device: &DeviceConfig) -> Result<Box<dyn TriggerLink>> {
    if device.simulate {
        info!("Simulating the button: type 1 and press Enter");
        let (tx, link) = ChannelLink::new();
        std::thread::spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(format!("{line}\n").into_bytes()).is_err() {
                    break;
                }
            }
        });
        return Ok(Box::new(link));
    }
    let port = device.port.as_deref().context("--port is required without --simulate")?;
    Ok(Box::new(SerialTriggerLink::open(port, device.baud)?))
}

fn frame_factory(device: &DeviceConfig) -> Result<FrameSourceFactory> {
    if let Some(path) = &device.still_frame {
        let source = StillFrameSource::from_path(path)?;
        info!("Replaying still frame {}", path.display());
        return Ok(Box::new(move || -> Result<Box<dyn FrameSource>> { Ok(Box::new(source)) }));
    }
    camera_factory(device)
}

#[cfg(feature = "camera")]
fn camera_factory(device: &DeviceConfig) -> Result<FrameSourceFactory> {
    use traybill::hardware::CameraSource;

    let index = device.camera_index;
    let resolution = (device.width, device.height);
    Ok(Box::new(move || -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(CameraSource::open(index, resolution)?))
    }))
}

#[cfg(not(feature = "camera"))]
fn camera_factory(_device: &DeviceConfig) -> Result<FrameSourceFactory> {
    anyhow::bail!("built without camera support; pass --still-frame or rebuild with --features camera")
}

async fn print_receipts(mut events: broadcast::Receiver<Transition>, snapshot_dir: Option<PathBuf>) {
    loop {
        match events.recv().await {
            Ok(Transition::Captured(result)) => {
                println!("\n{}", format_receipt(&result));
                if let Some(dir) = &snapshot_dir {
                    if let Err(err) = save_snapshot(dir, &result) {
                        warn!("Snapshot not saved: {err:#}");
                    }
                }
            }
            Ok(Transition::Reset) => info!("Ready for the next tray"),
            Err(broadcast::error::RecvError::Lagged(n)) => warn!("Receipt printer skipped {} events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn save_snapshot(dir: &Path, result: &CaptureResult) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create snapshot dir {}", dir.display()))?;
    let path = dir.join(snapshot_file_name(&result.transaction));
    result
        .annotated
        .save(&path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

fn scan(config: &KioskConfig, image: &Path, record: bool, annotated_out: Option<&Path>) -> Result<()> {
    config.validate()?;
    let catalog = MenuCatalog::load(&config.menu)?;
    let pipeline = config.load_pipeline()?;

    let frame = ImageReader::open(image)
        .with_context(|| format!("failed to open {}", image.display()))?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))?
        .to_rgb8();
    info!("Image loaded: {}x{}", frame.width(), frame.height());

    let output = pipeline.process(&frame, &catalog)?;
    if let Some(path) = annotated_out {
        output
            .annotated
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if record {
        let mut ledger = Ledger::open(&config.ledger, config.ledger_mode())?;
        let labels: Vec<String> = output.items.iter().map(|i| i.label.clone()).collect();
        let transaction = ledger.append(&labels, output.amount)?;
        let result = CaptureResult {
            transaction,
            annotated: output.annotated,
            items: output.items,
            amount: output.amount,
        };
        print!("{}", format_receipt(&result));
        return Ok(());
    }

    println!("=== Detected dishes ===");
    if output.items.is_empty() {
        println!("Nothing detected.");
    }
    for item in &output.items {
        match item.price {
            Some(price) => println!("  {:<20}{:>12}", item.label, price),
            None => println!("  {:<20}{:>12}", item.label, "no price"),
        }
    }
    println!("  {:<20}{:>12}", "Amount", output.amount);
    Ok(())
}

fn history(config: &KioskConfig) -> Result<()> {
    let Some(ledger) = Ledger::open_existing(&config.ledger) else {
        println!("No history at {}", config.ledger.display());
        return Ok(());
    };
    print!("{}", format_history(&ledger.all()?));
    Ok(())
}
