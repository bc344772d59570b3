use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::SampleKind;
use crate::events::MessageFormat;

/// Default ceiling: 5 MiB of 16-bit PCM
const DEFAULT_RECORD_LIMIT_BYTES: u64 = 5_242_880;

/// Socket URL value that switches the worker into dry-run mode
pub const DRY_RUN_SOCKET_URL: &str = "debug";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Write settings {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl SettingsError {
    pub fn name(&self) -> &'static str {
        "SettingsError"
    }
}

/// Construct-time configuration of one worker instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkerSettings {
    /// Sample rate every inbound block must have
    pub input_sample_rate: u32,

    /// Samples per inbound block
    pub input_sample_size: usize,

    /// Inbound blocks carry float32 instead of int16 samples
    pub is_float32: bool,

    /// Pre-roll kept while the gate is closed (0 disables the lookback)
    pub lookback_buffer_ms: u32,

    /// Recording ceiling as a duration; takes precedence over `record_buffer_limit_kb`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_buffer_limit_ms: Option<u64>,

    /// Recording ceiling as a size
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_buffer_limit_kb: Option<u64>,

    /// Keep the session after final results and rotate the buffer instead of stopping
    pub continuous: bool,

    /// Recognition server base URL, or "debug" for dry-run mode
    pub socket_url: String,
    pub client_id: String,
    pub access_token: String,

    pub message_format: MessageFormat,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimize_final_result: Option<bool>,

    /// Engine specific options, sent with `welcome`
    pub engine_options: Map<String, Value>,

    /// Emit the recording as a WAVE file when the gate closes
    pub return_audio_file: bool,

    pub do_debug: bool,

    /// Delay of the fake final result in dry-run mode
    pub dry_run_result_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            input_sample_size: 512,
            is_float32: false,
            lookback_buffer_ms: 0,
            record_buffer_limit_ms: None,
            record_buffer_limit_kb: None,
            continuous: false,
            socket_url: "http://localhost:20741".to_string(),
            client_id: "any".to_string(),
            access_token: "test1234".to_string(),
            message_format: MessageFormat::Default,
            language: None,
            task: None,
            model: None,
            optimize_final_result: None,
            engine_options: Map::new(),
            return_audio_file: false,
            do_debug: false,
            dry_run_result_delay_ms: 2000,
        }
    }
}

impl WorkerSettings {
    pub fn sample_kind(&self) -> SampleKind {
        if self.is_float32 {
            SampleKind::Float32
        } else {
            SampleKind::Int16
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.socket_url == DRY_RUN_SOCKET_URL
    }

    /// Audio export is forced on in dry-run mode
    pub fn returns_audio_file(&self) -> bool {
        self.return_audio_file || self.is_dry_run()
    }

    /// Recording ceiling in chunks (0 = no ceiling)
    pub fn max_chunks(&self) -> usize {
        if self.input_sample_size == 0 {
            return 0;
        }
        let size = self.input_sample_size as f64;
        let chunks = if let Some(ms) = self.record_buffer_limit_ms {
            (f64::from(self.input_sample_rate) * ms as f64 / 1000.0) / size
        } else if let Some(kb) = self.record_buffer_limit_kb {
            (kb as f64 * 1024.0) / (2.0 * size)
        } else {
            DEFAULT_RECORD_LIMIT_BYTES as f64 / (2.0 * size)
        };
        // a WAVE file cannot describe more than u32::MAX bytes of 16-bit PCM
        let limit = (u32::MAX as usize - crate::audio::wave::HEADER_LEN)
            / self.input_sample_size.saturating_mul(2);
        (chunks.ceil().max(0.0) as usize).min(limit)
    }

    /// Recording ceiling as duration, rounded up
    pub fn record_limit_ms(&self) -> u64 {
        if self.input_sample_rate == 0 {
            return 0;
        }
        let ms = self.max_chunks().saturating_mul(self.input_sample_size) as f64 * 1000.0
            / f64::from(self.input_sample_rate);
        ms.ceil() as u64
    }

    /// Lookback capacity in samples
    pub fn lookback_samples(&self) -> usize {
        crate::audio::LookbackBuffer::samples_for(self.lookback_buffer_ms, self.input_sample_rate)
    }

    /// Options sent with `welcome`: engine options plus the common shortcuts
    pub fn engine_options(&self) -> Map<String, Value> {
        let mut options = self.engine_options.clone();
        options.insert("samplerate".into(), Value::from(self.input_sample_rate));
        options.insert("continuous".into(), Value::from(self.continuous));
        for (key, value) in [
            ("language", &self.language),
            ("task", &self.task),
            ("model", &self.model),
        ] {
            if let Some(v) = value.as_deref().filter(|v| !v.is_empty()) {
                options.insert(key.into(), Value::from(v));
            }
        }
        if let Some(optimize) = self.optimize_final_result {
            options.insert("optimizeFinalResult".into(), Value::from(optimize));
        }
        options.insert("doDebug".into(), Value::from(self.do_debug));
        options
    }

    /// Override server credentials from `STT_SERVER_URL`, `STT_CLIENT_ID`
    /// and `STT_ACCESS_TOKEN`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STT_SERVER_URL") {
            self.socket_url = url;
        }
        if let Ok(id) = std::env::var("STT_CLIENT_ID") {
            self.client_id = id;
        }
        if let Ok(token) = std::env::var("STT_ACCESS_TOKEN") {
            self.access_token = token;
        }
    }
}

/// Load settings from a JSON file; a missing file yields the defaults
pub fn load_settings(path: &Path) -> Result<WorkerSettings, SettingsError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            serde_json::from_str::<WorkerSettings>(&contents).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("Settings: {:?} not found, using defaults", path);
            Ok(WorkerSettings::default())
        }
        Err(source) => Err(SettingsError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

pub fn save_settings(path: &Path, settings: &WorkerSettings) -> Result<(), SettingsError> {
    let write_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| SettingsError::Write { path, source }
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(write_err(parent))?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write to a temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(write_err(&tmp_path))?;

    // On Windows, rename fails if the destination exists.
    if cfg!(windows) && path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(write_err(path)(e));
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(write_err(path))?;
    Ok(())
}
