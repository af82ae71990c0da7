//! monotone - single-voice keyboard synthesizer
//!
//! Plays one oscillator through a playback device and changes its pitch from
//! lines typed on stdin (see `keymap`). Without the `cpal` feature audio is
//! written as raw PCM to stdout or a file, e.g.
//! `monotone | aplay -f S16_LE -r 44100 -c 1`.

mod keymap;

use std::io::BufRead;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam::channel::{self, Receiver, RecvTimeoutError};
use monotone_backend::{PcmDriver, RawStreamDriver, SynthContext, Waveform};
use monotone_core::{SampleFormat, SynthConfig};
use tracing::{debug, info, warn};

use keymap::Command;

#[cfg(feature = "cpal")]
const DEFAULT_DEVICE: &str = monotone_backend::audio_device::cpal_output::DEFAULT_DEVICE;
#[cfg(not(feature = "cpal"))]
const DEFAULT_DEVICE: &str = monotone_backend::audio_device::raw_stream::STDOUT_DEVICE;

/// How often the control loop checks on the stream when no input arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser, Debug)]
#[command(name = "monotone")]
#[command(about = "Single-voice software synthesizer played from the keyboard")]
#[command(version)]
struct Cli {
    /// Playback device: `-` for raw PCM on stdout, a file path, or a cpal device name
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Output channels; every channel carries the same signal
    #[arg(short, long, default_value_t = 1)]
    channels: u16,

    /// Output volume in [0, 1]
    #[arg(long, default_value_t = 1.0)]
    volume: f64,

    /// Initial pitch in Hz (clamped to 0..=5000)
    #[arg(short, long, default_value_t = 440, allow_negative_numbers = true)]
    frequency: i32,

    /// Oscillator: sine, square, triangle or sawtooth
    #[arg(short, long, default_value_t = Waveform::Square)]
    waveform: Waveform,

    /// Sample rate in Hz (overrides the config file)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Sample format, e.g. S16_LE, S24_3BE, FLOAT_LE (overrides the config file)
    #[arg(long)]
    format: Option<SampleFormat>,

    /// JSON stream configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long, value_parser = parse_duration)]
    duration: Option<Duration>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn synth_config(&self) -> Result<SynthConfig> {
        let mut config = match &self.config {
            Some(path) => SynthConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => SynthConfig::default(),
        };
        if let Some(rate) = self.rate {
            config = config.with_sample_rate(rate);
        }
        if let Some(format) = self.format {
            config = config.with_format(format);
        }
        config.validate().context("invalid stream configuration")?;
        Ok(config)
    }
}

/// Seconds as a non-negative, finite number.
fn parse_duration(arg: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = arg.parse().map_err(|e| format!("{arg:?} is not a number: {e}"))?;
    Duration::try_from_secs_f64(secs).map_err(|e| format!("{arg:?}: {e}"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout may be carrying audio
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let config = cli.synth_config()?;
    debug!("Stream configuration: {:?}", config);

    #[cfg(feature = "cpal")]
    if cli.device != monotone_backend::audio_device::raw_stream::STDOUT_DEVICE {
        return play(&monotone_backend::CpalDriver::new(), &cli, &config);
    }

    play(&RawStreamDriver::new().paced(true), &cli, &config)
}

fn play<Drv: PcmDriver>(driver: &Drv, cli: &Cli, config: &SynthConfig) -> Result<()> {
    let ctx = SynthContext::create(
        driver,
        &cli.device,
        cli.channels,
        cli.volume,
        cli.frequency,
        cli.waveform,
        config,
    )
    .with_context(|| format!("failed to set up playback on {:?}", cli.device))?;

    let deadline = cli
        .duration
        .map(|d| Instant::now().checked_add(d).context("--duration is too long"))
        .transpose()?;
    let handle = ctx.spawn().context("failed to start the stream")?;
    let input = spawn_input_reader()?;
    let mut input_open = true;

    info!("Keys: {}  ('-' releases, 'q' quits, a number sets Hz)", keymap::KEYS);

    while !handle.is_finished() {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Duration elapsed");
            break;
        }

        if !input_open {
            thread::sleep(POLL_INTERVAL);
            continue;
        }

        match input.recv_timeout(POLL_INTERVAL) {
            Ok(Command::Note { key, hz }) => {
                let hz = handle.set_frequency(hz);
                info!("Key {:?}: {} Hz", key, hz);
            }
            Ok(Command::Frequency(hz)) => {
                let hz = handle.set_frequency(hz);
                info!("Frequency: {} Hz", hz);
            }
            Ok(Command::Release) => {
                handle.set_frequency(0);
                debug!("Released");
            }
            Ok(Command::Quit) => break,
            Ok(Command::Unknown(line)) => warn!("Unknown input {:?}", line),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                if deadline.is_none() {
                    debug!("Input closed");
                    break;
                }
                input_open = false;
            }
        }
    }

    handle.stop();
    let stats = handle.stats();
    let ctx = handle.join().context("stream terminated")?;
    info!("Stopped: {}", stats);
    ctx.destroy();
    Ok(())
}

fn spawn_input_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = channel::unbounded();
    thread::Builder::new()
        .name("monotone-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(Command::parse(&line)).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn input thread")?;
    Ok(rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("2.5"), Ok(Duration::from_millis(2500)));
        assert_eq!(parse_duration("0"), Ok(Duration::ZERO));
        assert!(parse_duration("inf").is_err());
        assert!(parse_duration("NaN").is_err());
        assert!(parse_duration("1e20").is_err());
        assert!(parse_duration("-1").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_cli_rejects_unrepresentable_duration() {
        assert!(Cli::try_parse_from(["monotone", "--duration", "inf"]).is_err());
        let cli = Cli::try_parse_from(["monotone", "--duration", "1.5"]).unwrap();
        assert_eq!(cli.duration, Some(Duration::from_millis(1500)));
    }
}
