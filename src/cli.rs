//! Command line front end
//!
//! Streams a mono WAV file through a worker as if it came from a live audio
//! graph and prints every worker event as one JSON line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::mpsc;

use crate::audio::AudioBlock;
use crate::events::{MessageFormat, WorkerEvent};
use crate::settings::{self, WorkerSettings, DRY_RUN_SOCKET_URL};
use crate::streaming::{ServerInfoClient, WsConnector};
use crate::worker::{GateController, WorkerInput};

#[derive(Parser, Debug, Clone)]
#[command(
    name = "stt-gate-stream",
    about = "Stream a WAV file to a speech recognition server"
)]
pub struct CliArgs {
    /// Mono 16-bit or float WAV file to stream
    pub input: PathBuf,

    /// Worker settings (JSON, camelCase keys)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Recognition server URL (overrides settings and STT_SERVER_URL)
    #[arg(long)]
    pub server: Option<String>,

    /// Skip the server and emit fake results
    #[arg(long)]
    pub dry_run: bool,

    /// Recognition language, e.g. "en-US"
    #[arg(long)]
    pub language: Option<String>,

    /// Emit web-speech compatible recognition events
    #[arg(long)]
    pub web_speech: bool,

    /// Keep the session open after final results
    #[arg(long)]
    pub continuous: bool,

    /// Lookback pre-roll in milliseconds
    #[arg(long)]
    pub lookback_ms: Option<u32>,

    /// Audio before the gate opens, in milliseconds (fills the lookback)
    #[arg(long, default_value_t = 0)]
    pub pre_roll_ms: u64,

    /// Feed blocks at real-time pace
    #[arg(long)]
    pub realtime: bool,

    /// Fetch /settings from the server before streaming
    #[arg(long)]
    pub fetch_info: bool,

    /// Write the recorded WAVE file here when the gate closes
    #[arg(long)]
    pub output_wav: Option<PathBuf>,

    /// Give up waiting for results after this many seconds
    #[arg(long, default_value_t = 15)]
    pub wait_secs: u64,

    /// Enable debug mode with verbose logging
    #[arg(long)]
    pub debug: bool,
}

pub fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .format_target(false)
        .init();
}

/// Build the worker settings from file, environment and flags
fn resolve_settings(args: &CliArgs) -> anyhow::Result<WorkerSettings> {
    let mut settings = match &args.settings {
        Some(path) => settings::load_settings(path)?,
        None => WorkerSettings::default(),
    };
    settings.apply_env_overrides();

    if let Some(server) = &args.server {
        settings.socket_url = server.clone();
    }
    if args.dry_run {
        settings.socket_url = DRY_RUN_SOCKET_URL.to_string();
    }
    if args.language.is_some() {
        settings.language = args.language.clone();
    }
    if args.web_speech {
        settings.message_format = MessageFormat::WebSpeechApi;
    }
    if args.continuous {
        settings.continuous = true;
    }
    if let Some(ms) = args.lookback_ms {
        settings.lookback_buffer_ms = ms;
    }
    if args.output_wav.is_some() {
        settings.return_audio_file = true;
    }
    settings.do_debug = settings.do_debug || args.debug;
    Ok(settings)
}

/// Read a mono WAV file into fixed-size blocks
fn read_blocks(path: &Path, settings: &mut WorkerSettings) -> anyhow::Result<Vec<AudioBlock>> {
    let reader = hound::WavReader::open(path).with_context(|| format!("open {:?}", path))?;
    let spec = reader.spec();
    if spec.channels != 1 {
        bail!("only mono input is supported, {:?} has {} channels", path, spec.channels);
    }

    settings.input_sample_rate = spec.sample_rate;
    let size = settings.input_sample_size.max(1);
    let rate = spec.sample_rate;

    let blocks = match (spec.sample_format, spec.bits_per_sample) {
        (hound::SampleFormat::Int, 16) => {
            settings.is_float32 = false;
            let samples = reader
                .into_samples::<i16>()
                .collect::<Result<Vec<_>, _>>()
                .context("read samples")?;
            samples
                .chunks(size)
                .map(|c| AudioBlock::int16(c.to_vec(), rate))
                .collect()
        }
        (hound::SampleFormat::Float, 32) => {
            settings.is_float32 = true;
            let samples = reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("read samples")?;
            samples
                .chunks(size)
                .map(|c| AudioBlock::float32(c.to_vec(), rate))
                .collect()
        }
        (format, bits) => bail!("unsupported sample format {:?}/{} bit", format, bits),
    };
    Ok(blocks)
}

fn print_event(event: &WorkerEvent, output_wav: Option<&Path>) -> anyhow::Result<()> {
    if let (WorkerEvent::AudioFile { output, .. }, Some(path)) = (event, output_wav) {
        std::fs::write(path, &output.wav).with_context(|| format!("write {:?}", path))?;
        log::info!("Wrote {} bytes to {:?}", output.wav.len(), path);
    }
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}

pub async fn run(args: CliArgs) -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut settings = resolve_settings(&args)?;
    let blocks = read_blocks(&args.input, &mut settings)?;
    let block_ms = blocks.first().map_or(0, AudioBlock::duration_ms);
    log::info!(
        "Streaming {:?}: {} blocks at {} Hz to {}",
        args.input,
        blocks.len(),
        settings.input_sample_rate,
        settings.socket_url
    );

    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (inbound, rx) = mpsc::unbounded_channel();
    let dry_run = settings.is_dry_run();
    let server_url = settings.socket_url.clone();
    let mut controller =
        GateController::new(settings, Box::new(WsConnector), events_tx, inbound.clone());

    if args.fetch_info && !dry_run {
        let client = ServerInfoClient::new(&server_url)?;
        match client.load_settings().await {
            Ok(info) => controller.apply_server_settings(&info),
            Err(e) => log::warn!("{}: {}", e.name(), e),
        }
    }

    let worker = tokio::spawn(controller.run(rx));
    let send = |input| {
        inbound
            .send(input)
            .map_err(|_| anyhow::anyhow!("worker stopped unexpectedly"))
    };

    let pre_roll_blocks = if block_ms == 0 {
        0
    } else {
        (args.pre_roll_ms / block_ms) as usize
    };
    let mut gate_opened = false;
    for (i, block) in blocks.into_iter().enumerate() {
        if !gate_opened && i >= pre_roll_blocks {
            send(WorkerInput::Gate {
                open: true,
                options: None,
            })?;
            gate_opened = true;
        }
        send(WorkerInput::Process(block))?;
        if args.realtime {
            tokio::time::sleep(Duration::from_millis(block_ms)).await;
        }
        while let Ok(event) = events.try_recv() {
            print_event(&event, args.output_wav.as_deref())?;
        }
    }
    send(WorkerInput::Gate {
        open: false,
        options: None,
    })?;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        let event = match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(_) => {
                log::warn!("No final result within {} s", args.wait_secs);
                break;
            }
        };
        print_event(&event, args.output_wav.as_deref())?;
        let done = match &event {
            WorkerEvent::Recognition { event, .. } => event.is_final(),
            WorkerEvent::Connection { event, .. } => {
                event.kind == crate::events::ConnectionEventKind::Closed
            }
            _ => false,
        };
        if done {
            break;
        }
    }

    send(WorkerInput::Release)?;
    while let Some(event) = events.recv().await {
        print_event(&event, args.output_wav.as_deref())?;
    }
    worker.await.context("worker task")?;
    Ok(())
}
