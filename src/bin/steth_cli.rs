// steth-cli - host-side driver for the stethoscope core
//
// `run` drives a fully simulated detection session: a synthetic
// heart-sound generator feeds the peak sampler across the lock-free
// ring while the engine ticks on a current-thread runtime, printing
// every telemetry frame the device transmits. `export` converts a raw
// 16-bit mono capture into a WAV file for desktop playback.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use rand::Rng;

use stethoscope_core::config::DeviceConfig;
use stethoscope_core::device::host::{ring_sampler, FsStorage};
use stethoscope_core::device::sim::{SimCapture, SimMixer, SimPlayback, SimTransport};
use stethoscope_core::device::{DeviceIo, SystemTimeSource};
use stethoscope_core::engine::DeviceEngine;
use stethoscope_core::protocol::codes;

#[derive(Parser)]
#[command(name = "steth-cli", about = "Stethoscope device simulator and capture tools")]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run a simulated detection session and print telemetry frames
    Run {
        /// Session length in seconds
        #[arg(long, default_value_t = 10)]
        seconds: u64,
        /// Simulated heart rate in beats per minute
        #[arg(long, default_value_t = 60)]
        bpm: u32,
        /// Optional JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory backing the device's storage
        #[arg(long, default_value = ".")]
        data_dir: PathBuf,
    },
    /// Convert a raw 16-bit mono capture to WAV
    Export {
        input: PathBuf,
        output: PathBuf,
        /// Capture sample rate in Hz
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        CliCommand::Run {
            seconds,
            bpm,
            config,
            data_dir,
        } => run(seconds, bpm, config, data_dir).await,
        CliCommand::Export {
            input,
            output,
            sample_rate,
        } => export(&input, &output, sample_rate),
    }
}

async fn run(seconds: u64, bpm: u32, config_path: Option<PathBuf>, data_dir: PathBuf) -> Result<()> {
    let config = match config_path {
        Some(path) => DeviceConfig::load_from_file(path),
        None => DeviceConfig::default(),
    };
    let sample_period_ms = u64::from(config.detection.sample_period_ms);

    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;

    let (mut producer, sampler) = ring_sampler(1024);
    let transport = SimTransport::new();
    let io = DeviceIo {
        sampler: Box::new(sampler),
        capture: Box::new(SimCapture::new()),
        mixer: Box::new(SimMixer::new()),
        playback: Box::new(SimPlayback::new()),
        storage: Box::new(FsStorage::new(data_dir)),
    };
    let mut engine = DeviceEngine::new(
        config,
        io,
        Box::new(transport.clone()),
        Box::new(SystemTimeSource::new()),
    )?;

    // Synthetic S1/S2 generator on its own thread, handing peaks to the
    // tick loop over the SPSC ring the way an audio callback would.
    let running = Arc::new(AtomicBool::new(true));
    let generator = {
        let running = Arc::clone(&running);
        let beat_period_ms = 60_000 / u64::from(bpm.clamp(30, 240));
        std::thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let mut elapsed_ms: u64 = 0;
            while running.load(Ordering::Relaxed) {
                let phase = elapsed_ms % beat_period_ms;
                let amplitude: f32 = if phase < 60 {
                    // First heart sound
                    0.55 + rng.gen_range(-0.05..0.05)
                } else if (200..260).contains(&phase) {
                    // Second heart sound
                    0.45 + rng.gen_range(-0.05..0.05)
                } else {
                    // Chest-wall noise floor
                    rng.gen_range(0.0..0.05)
                };
                if !producer.push(amplitude.clamp(0.0, 1.0)) {
                    warn!("[Generator] peak ring full, reading dropped");
                }
                elapsed_ms += sample_period_ms;
                std::thread::sleep(Duration::from_millis(sample_period_ms));
            }
        })
    };

    info!("[Run] starting detection for {} s at {} bpm", seconds, bpm);
    transport.push_inbound(&[codes::START_DETECTING]);

    let mut printer = FramePrinter::default();
    let started = Instant::now();
    let mut ticker = tokio::time::interval(Duration::from_millis(5));
    while started.elapsed() < Duration::from_secs(seconds) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("[Run] interrupted");
                break;
            }
            _ = ticker.tick() => {
                engine.tick();
                printer.consume(&transport.take_outbound());
            }
        }
    }

    transport.push_inbound(&[codes::STOP_DETECTING]);
    engine.tick();
    printer.consume(&transport.take_outbound());

    running.store(false, Ordering::Relaxed);
    let _ = generator.join();

    match engine.session().heart_rate() {
        Some(rate) => println!(
            "session ended: {} beats confirmed, last estimate {} bpm",
            engine.session().beat_count(),
            rate
        ),
        None => println!(
            "session ended: {} beats confirmed, no current estimate",
            engine.session().beat_count()
        ),
    }
    Ok(())
}

/// Splits the device's outbound byte stream into control bytes and
/// newline-terminated telemetry lines.
#[derive(Default)]
struct FramePrinter {
    line: Vec<u8>,
}

impl FramePrinter {
    fn consume(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match byte {
                codes::ACK if self.line.is_empty() => info!("[Run] device acknowledged"),
                codes::NAK if self.line.is_empty() => warn!("[Run] device refused command"),
                b'\n' => {
                    if let Ok(text) = std::str::from_utf8(&self.line) {
                        println!("{}", text);
                    }
                    self.line.clear();
                }
                _ => self.line.push(byte),
            }
        }
    }
}

fn export(input: &Path, output: &Path, sample_rate: u32) -> Result<()> {
    let raw = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;
    if raw.len() % 2 != 0 {
        warn!("[Export] odd trailing byte in {} ignored", input.display());
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(output, spec)
        .with_context(|| format!("creating {}", output.display()))?;
    for chunk in raw.chunks_exact(2) {
        writer.write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))?;
    }
    writer.finalize()?;

    println!(
        "wrote {} samples at {} Hz to {}",
        raw.len() / 2,
        sample_rate,
        output.display()
    );
    Ok(())
}
