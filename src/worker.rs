//! Gate controller and worker loop
//!
//! A `GateController` owns one lookback buffer, one capture accumulator and
//! one streaming session. Audio blocks, control commands and socket activity
//! all arrive as `WorkerInput`s on a single channel and are handled one at a
//! time, so the buffers need no locking.
//!
//! # Finalization
//!
//! Closing the gate sends the unsent suffix followed by `audioend` when the
//! session is Ready. Otherwise finalization is parked and completed exactly
//! once by the session's Ready event.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audio::{AudioBlock, FormatMismatchError, LookbackBuffer, Samples, WaveSpec};
use crate::events::{AudioFile, ConnectionEventKind, MessageFormat, ModuleInfo, WorkerEvent};
use crate::settings::WorkerSettings;
use crate::state_machine::{reduce, GateCommand, GateEffect, GateState};
use crate::streaming::{
    CaptureAccumulator, Connector, ServerSettings, SessionConfig, SessionEvent, SessionState,
    SocketEnvelope, SocketSink, StreamingSession,
};

const DRY_RUN_PARTIAL: &str = "End of ...";
const DRY_RUN_FINAL: &str = "End of test message";

/// Everything the worker loop consumes
#[derive(Debug, Clone)]
pub enum WorkerInput {
    /// One block from the audio graph
    Process(AudioBlock),
    /// Nothing to do; the worker waits for audio or a gate signal
    Start,
    /// Close the gate if it is open
    Stop,
    /// Close the session and rebuild all buffers
    Reset,
    /// Close the session, drop all buffers and end the loop
    Release,
    Gate {
        open: bool,
        options: Option<Value>,
    },
    /// Activity on a session connection
    Socket(SocketEnvelope),
    /// Delayed fake final result (dry-run mode)
    DryRunFinal,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub struct GateController {
    settings: WorkerSettings,
    module_id: String,
    format: MessageFormat,
    gate: GateState,
    lookback: Option<LookbackBuffer>,
    lookback_latched: bool,
    accumulator: CaptureAccumulator,
    session: Option<StreamingSession>,
    /// Ceiling flag of a close that still waits for the session to become Ready
    finalize_pending: Option<bool>,
    audio_end_sent: bool,
    first_block_checked: bool,
    released: bool,
    events: mpsc::UnboundedSender<WorkerEvent>,
    inbound: mpsc::UnboundedSender<WorkerInput>,
}

impl GateController {
    /// Build a controller and announce it with `moduleState: 1`
    ///
    /// # Arguments
    /// * `connector` - Transport for the session (unused in dry-run mode)
    /// * `events` - Where outbound events go
    /// * `inbound` - Sender of the channel this controller is driven from;
    ///   socket activity and dry-run timers are posted here
    pub fn new(
        settings: WorkerSettings,
        connector: Box<dyn Connector>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        inbound: mpsc::UnboundedSender<WorkerInput>,
    ) -> Self {
        let session = if settings.is_dry_run() {
            log::info!("GateController: dry-run mode, no server connection");
            None
        } else {
            let socket_tx = inbound.clone();
            let sink: SocketSink = Arc::new(move |envelope| {
                if socket_tx.send(WorkerInput::Socket(envelope)).is_err() {
                    log::debug!("GateController: worker gone, socket event dropped");
                }
            });
            let config = SessionConfig {
                server_url: settings.socket_url.clone(),
                client_id: settings.client_id.clone(),
                access_token: settings.access_token.clone(),
                options: settings.engine_options(),
            };
            Some(StreamingSession::new(config, connector, sink))
        };

        let controller = Self {
            module_id: format!("stt-socket-worker-{}", Uuid::new_v4()),
            format: settings.message_format,
            gate: GateState::default(),
            lookback: build_lookback(&settings),
            lookback_latched: false,
            accumulator: build_accumulator(&settings),
            session,
            finalize_pending: None,
            audio_end_sent: false,
            first_block_checked: false,
            released: false,
            events,
            inbound,
            settings,
        };

        log::info!(
            "GateController: ready ({} Hz, {} samples/block, ceiling {} chunks)",
            controller.settings.input_sample_rate,
            controller.settings.input_sample_size,
            controller.accumulator.max_chunks()
        );
        controller.emit(WorkerEvent::ready(controller.module_info()));
        controller
    }

    pub fn module_info(&self) -> ModuleInfo {
        let lookback_samples = self.lookback.as_ref().map_or(0, LookbackBuffer::capacity);
        ModuleInfo {
            module_id: self.module_id.clone(),
            input_sample_rate: self.settings.input_sample_rate,
            input_sample_size: self.settings.input_sample_size,
            input_is_float32: self.settings.is_float32,
            channel_count: 1,
            lookback_buffer_size_kb: (lookback_samples * 2).div_ceil(1024),
            lookback_limit_ms: self.settings.lookback_buffer_ms,
            record_limit_ms: self.settings.record_limit_ms(),
            stt_server_url: self.settings.socket_url.clone(),
            stt_server_options: self
                .session
                .as_ref()
                .map(|s| s.active_options().clone())
                .unwrap_or_default(),
        }
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    pub fn gate(&self) -> &GateState {
        &self.gate
    }

    pub fn accumulator(&self) -> &CaptureAccumulator {
        &self.accumulator
    }

    pub fn session(&self) -> Option<&StreamingSession> {
        self.session.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Pass capabilities from the server's `/settings` to the session
    pub fn apply_server_settings(&mut self, settings: &ServerSettings) {
        if let Some(session) = self.session.as_mut() {
            session.apply_server_settings(settings);
        }
    }

    /// Handle one input; returns false once the worker was released
    pub fn handle(&mut self, input: WorkerInput) -> bool {
        if self.released {
            log::warn!("GateController: input after release ignored");
            return false;
        }

        match input {
            WorkerInput::Process(block) => self.process(block),
            WorkerInput::Start => log::debug!("GateController: start"),
            WorkerInput::Stop => self.close_gate(false, false),
            WorkerInput::Reset => self.reset(),
            WorkerInput::Release => {
                self.release();
                return false;
            }
            WorkerInput::Gate { open, options } => {
                if let Some(options) = options {
                    log::debug!("GateController: gate options {}", options);
                }
                if open {
                    self.dispatch(GateCommand::Open { now: now_ms() });
                } else {
                    self.close_gate(false, false);
                }
            }
            WorkerInput::Socket(envelope) => match self.session.as_mut() {
                Some(session) => session.handle_socket(envelope),
                None => log::debug!("GateController: socket event without session"),
            },
            WorkerInput::DryRunFinal => self.emit_fake_result(DRY_RUN_FINAL, true),
        }

        self.pump_session_events();
        true
    }

    /// Serialized worker loop; ends on `Release` or when the channel closes
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkerInput>) {
        log::info!("GateController: worker loop started ({})", self.module_id);
        while let Some(input) = rx.recv().await {
            if !self.handle(input) {
                break;
            }
        }
        log::info!("GateController: worker loop stopped ({})", self.module_id);
    }

    fn emit(&self, event: WorkerEvent) {
        log::debug!("GateController: emit {}", event.kind());
        if self.events.send(event).is_err() {
            log::warn!("GateController: event receiver dropped");
        }
    }

    fn emit_fake_result(&self, transcript: &str, is_final: bool) {
        let event = self.format.fake_result_event(transcript, is_final, now_ms());
        self.emit(WorkerEvent::recognition(event));
    }

    // ------------------------------------------------------------------------
    // Gate
    // ------------------------------------------------------------------------

    fn close_gate(&mut self, buffer_or_time_limit: bool, on_error: bool) {
        self.dispatch(GateCommand::Close {
            now: now_ms(),
            buffer_or_time_limit,
            on_error,
        });
    }

    fn dispatch(&mut self, command: GateCommand) {
        let (next, effects) = reduce(&self.gate, command);
        if next.is_open() != self.gate.is_open() {
            log::info!("GateController: gate {:?} -> {:?}", self.gate, next);
        }
        self.gate = next;
        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: GateEffect) {
        match effect {
            GateEffect::ResetCapture => {
                self.accumulator.on_gate_open();
                self.finalize_pending = None;
                self.audio_end_sent = false;
            }
            GateEffect::OpenSession => {
                if let Some(session) = self.session.as_mut() {
                    session.open();
                }
            }
            GateEffect::FinalizeStream {
                buffer_or_time_limit,
            } => self.finalize_stream(buffer_or_time_limit),
            GateEffect::ReleaseLookback => self.lookback_latched = false,
            GateEffect::ExportWave => self.export_wave(),
            GateEffect::ReportAlreadyOpen => {
                log::warn!("GateController: gate is already open");
                self.emit(WorkerEvent::error("InvalidStateError", "Gate is already open"));
            }
            GateEffect::EmitGate(snapshot) => self.emit(WorkerEvent::gate(snapshot)),
        }
    }

    fn finalize_stream(&mut self, buffer_or_time_limit: bool) {
        if self.settings.is_dry_run() {
            self.schedule_dry_run_final();
            return;
        }
        let Some(session) = self.session.as_ref() else {
            return;
        };
        match session.state() {
            SessionState::Ready => self.send_final(buffer_or_time_limit),
            SessionState::Connecting | SessionState::Open | SessionState::Negotiating => {
                log::debug!("GateController: session not ready, finalization deferred");
                self.finalize_pending = Some(buffer_or_time_limit);
            }
            state => log::debug!(
                "GateController: nothing to finalize (session {})",
                state.as_str()
            ),
        }
    }

    /// Flush the unsent suffix, then `audioend` (once per cycle)
    fn send_final(&mut self, buffer_or_time_limit: bool) {
        if self.audio_end_sent {
            return;
        }
        self.flush();
        let byte_length = self.accumulator.sent_bytes();
        if let Some(session) = self.session.as_mut() {
            log::info!(
                "GateController: audioend ({} bytes, limit: {})",
                byte_length,
                buffer_or_time_limit
            );
            session.send_audio_end(byte_length, buffer_or_time_limit);
        }
        self.audio_end_sent = true;
    }

    /// Send the unsent suffix as one frame if the session is Ready
    fn flush(&mut self) {
        if self.audio_end_sent {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_ready() {
            return;
        }
        if let Some(bytes) = self.accumulator.take_pending() {
            session.send_bytes(bytes);
        }
    }

    fn schedule_dry_run_final(&mut self) {
        let len = self.accumulator.len();
        if len == 0 || len as f64 <= self.accumulator.max_chunks() as f64 / 3.0 {
            return;
        }
        let delay = Duration::from_millis(self.settings.dry_run_result_delay_ms);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let tx = self.inbound.clone();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(WorkerInput::DryRunFinal);
                });
            }
            Err(_) => {
                log::debug!("GateController: no runtime for dry-run timer, emitting now");
                self.emit_fake_result(DRY_RUN_FINAL, true);
            }
        }
    }

    fn export_wave(&self) {
        if !self.settings.returns_audio_file() {
            return;
        }
        let wav = match self.accumulator.to_wave() {
            Ok(Some(wav)) => wav,
            Ok(None) => return,
            Err(e) => {
                log::error!("GateController: audio export failed: {}", e);
                self.emit(WorkerEvent::error(e.name(), &e.to_string()));
                return;
            }
        };
        let spec = self.accumulator.spec();
        let total_samples = (wav.len() - crate::audio::wave::HEADER_LEN)
            / usize::from(spec.block_align().max(1));
        self.emit(WorkerEvent::audio_file(AudioFile {
            byte_length: wav.len(),
            sample_rate: spec.sample_rate,
            total_samples,
            channels: spec.channels,
            wav,
        }));
    }

    // ------------------------------------------------------------------------
    // Audio
    // ------------------------------------------------------------------------

    fn process(&mut self, block: AudioBlock) {
        if block.samples.is_empty() {
            return;
        }
        if !self.first_block_checked {
            self.first_block_checked = true;
            if let Err(e) = FormatMismatchError::check(
                &block,
                self.settings.input_sample_rate,
                self.settings.sample_kind(),
            ) {
                log::error!("GateController: {}", e);
                self.emit(WorkerEvent::error(e.name(), &e.to_string()));
                self.close_gate(false, true);
                return;
            }
        }

        if self.gate.is_open() {
            self.append_block(&block.samples);
        } else if !self.lookback_latched {
            if let Some(lookback) = self.lookback.as_mut() {
                lookback.push(&block.samples);
            }
        }
    }

    fn append_block(&mut self, samples: &Samples) {
        let lookback = if self.lookback_latched {
            None
        } else {
            self.lookback.as_mut()
        };
        if let Err(e) = self.accumulator.append_block(samples, lookback) {
            log::warn!("GateController: {}: {}, block dropped", e.name(), e);
        }
        self.lookback_latched = true;

        if self.settings.is_dry_run() {
            let quarter = (self.accumulator.max_chunks() as f64 / 4.0).ceil() as usize;
            if self.accumulator.len() == quarter {
                log::debug!("GateController: dry-run reached a quarter of the ceiling");
                self.emit_fake_result(DRY_RUN_PARTIAL, false);
            }
        } else {
            self.flush();
        }

        if self.accumulator.check_ceiling() {
            log::info!("GateController: recording ceiling reached");
            self.close_gate(true, false);
        } else {
            let dropped = self.accumulator.rotate_if_over_ceiling();
            if dropped > 0 {
                log::trace!("GateController: rotated out {} chunks", dropped);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Session events
    // ------------------------------------------------------------------------

    fn pump_session_events(&mut self) {
        loop {
            let events = match self.session.as_mut() {
                Some(session) if session.has_events() => session.drain_events(),
                _ => break,
            };
            for event in events {
                self.on_session_event(event);
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Opened => {
                self.emit(WorkerEvent::connection(ConnectionEventKind::Open, None));
            }
            SessionEvent::Ready(options) => {
                self.emit(WorkerEvent::connection(
                    ConnectionEventKind::Ready,
                    Some(options),
                ));
                self.flush();
                if let Some(buffer_or_time_limit) = self.finalize_pending.take() {
                    self.send_final(buffer_or_time_limit);
                }
            }
            SessionEvent::Result(result) => {
                let event = self.format.result_event(&result, now_ms());
                self.emit(WorkerEvent::recognition(event));
                if result.is_final && !self.gate.is_open() {
                    if let Some(session) = self.session.as_mut() {
                        if session.is_open() {
                            session.close();
                        }
                    }
                }
            }
            SessionEvent::Error(info) => {
                let event = self.format.error_event(&info, now_ms());
                self.emit(WorkerEvent::recognition(event));
                let session_closing = self.session.as_ref().is_some_and(|s| {
                    matches!(s.state(), SessionState::Closing | SessionState::Closed)
                });
                if session_closing && self.finalize_pending.take().is_some() {
                    log::debug!("GateController: session failed, parked finalization dropped");
                }
                if self.gate.is_open() {
                    self.close_gate(false, true);
                }
            }
            SessionEvent::Closed => {
                if self.finalize_pending.take().is_some() {
                    log::warn!("GateController: session closed before audioend could be sent");
                }
                self.emit(WorkerEvent::connection(ConnectionEventKind::Closed, None));
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    fn reset(&mut self) {
        log::info!("GateController: reset");
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.gate = GateState::default();
        self.lookback = build_lookback(&self.settings);
        self.lookback_latched = false;
        self.accumulator = build_accumulator(&self.settings);
        self.finalize_pending = None;
        self.audio_end_sent = false;
        self.first_block_checked = false;
    }

    fn release(&mut self) {
        log::info!("GateController: release");
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
        self.gate = GateState::default();
        self.lookback = None;
        self.accumulator = build_accumulator(&self.settings);
        self.finalize_pending = None;
        self.released = true;
        self.emit(WorkerEvent::terminated());
    }
}

fn build_lookback(settings: &WorkerSettings) -> Option<LookbackBuffer> {
    let capacity = settings.lookback_samples();
    if capacity == 0 {
        return None;
    }
    Some(LookbackBuffer::new(settings.sample_kind(), capacity))
}

fn build_accumulator(settings: &WorkerSettings) -> CaptureAccumulator {
    CaptureAccumulator::new(
        WaveSpec::pcm16(settings.input_sample_rate),
        settings.input_sample_size,
        settings.max_chunks(),
        settings.continuous,
    )
}

/// A running worker
pub struct WorkerHandle {
    pub inbound: mpsc::UnboundedSender<WorkerInput>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub task: JoinHandle<()>,
}

/// Construct a controller and run its loop on the current tokio runtime
///
/// Must be called from within a runtime.
pub fn spawn_worker(settings: WorkerSettings, connector: Box<dyn Connector>) -> WorkerHandle {
    let (events_tx, events) = mpsc::unbounded_channel();
    let (inbound, rx) = mpsc::unbounded_channel();
    let controller = GateController::new(settings, connector, events_tx, inbound.clone());
    let task = tokio::spawn(controller.run(rx));
    WorkerHandle {
        inbound,
        events,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::ChannelConnector;

    fn controller(
        settings: WorkerSettings,
    ) -> (GateController, mpsc::UnboundedReceiver<WorkerEvent>) {
        let (connector, _requests) = ChannelConnector::new();
        let (events_tx, events) = mpsc::unbounded_channel();
        let (inbound, _rx) = mpsc::unbounded_channel();
        (
            GateController::new(settings, Box::new(connector), events_tx, inbound),
            events,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn construction_announces_module() {
        let (ctrl, mut events) = controller(WorkerSettings {
            lookback_buffer_ms: 500,
            ..Default::default()
        });
        let events = drain(&mut events);

        assert_eq!(events.len(), 1);
        match &events[0] {
            WorkerEvent::ModuleState {
                state: 1,
                info: Some(info),
            } => {
                assert_eq!(info.module_id, ctrl.module_id());
                assert_eq!(info.lookback_buffer_size_kb, 16);
                assert_eq!(info.record_limit_ms, 163_840);
                assert_eq!(info.stt_server_options["samplerate"], 16000);
            }
            other => panic!("Expected moduleState, got {:?}", other),
        }
    }

    #[test]
    fn huge_record_limit_yields_maximal_placeholder_header() {
        let (mut ctrl, mut events) = controller(WorkerSettings {
            record_buffer_limit_kb: Some(u64::MAX),
            ..Default::default()
        });
        assert!(matches!(
            drain(&mut events)[0],
            WorkerEvent::ModuleState { info: Some(_), .. }
        ));

        ctrl.handle(WorkerInput::Gate {
            open: true,
            options: None,
        });
        ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 16000)));

        let first = ctrl.accumulator().chunks()[0].bytes();
        let header = crate::audio::wave::read_header(first).unwrap();
        assert_eq!(header.data_size as usize, ctrl.accumulator().max_chunks() * 1024);
        assert!(header.riff_size > header.data_size);
        assert!(ctrl.gate().is_open());
    }

    #[test]
    fn closed_gate_blocks_fill_lookback_only() {
        let (mut ctrl, _events) = controller(WorkerSettings {
            lookback_buffer_ms: 100,
            ..Default::default()
        });
        for _ in 0..3 {
            ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 16000)));
        }
        assert!(ctrl.accumulator().is_empty());
        assert_eq!(ctrl.lookback.as_ref().unwrap().frames_available(), 1600);
    }

    #[test]
    fn format_mismatch_reported_once() {
        let (mut ctrl, mut events) = controller(WorkerSettings::default());
        drain(&mut events);

        ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 44100)));
        ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 44100)));

        let events = drain(&mut events);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            WorkerEvent::Error { error } if error.name == "FormatMismatchError"
        ));
    }

    #[test]
    fn second_open_reports_invalid_state() {
        let (mut ctrl, mut events) = controller(WorkerSettings::default());
        ctrl.handle(WorkerInput::Gate {
            open: true,
            options: None,
        });
        drain(&mut events);

        ctrl.handle(WorkerInput::Gate {
            open: true,
            options: None,
        });
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            WorkerEvent::Error { error } if error.name == "InvalidStateError"
        )));
        assert!(ctrl.gate().is_open());
    }

    #[test]
    fn release_emits_terminated_and_stops() {
        let (mut ctrl, mut events) = controller(WorkerSettings::default());
        drain(&mut events);

        assert!(!ctrl.handle(WorkerInput::Release));
        assert!(ctrl.is_released());
        assert_eq!(drain(&mut events), vec![WorkerEvent::terminated()]);
        assert!(!ctrl.handle(WorkerInput::Start));
    }

    #[test]
    fn reset_rebuilds_buffers_and_rearms_format_check() {
        let (mut ctrl, mut events) = controller(WorkerSettings {
            lookback_buffer_ms: 100,
            ..Default::default()
        });
        ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 16000)));
        ctrl.handle(WorkerInput::Reset);
        drain(&mut events);

        assert_eq!(ctrl.lookback.as_ref().unwrap().frames_available(), 0);
        ctrl.handle(WorkerInput::Process(AudioBlock::int16(vec![1; 512], 8000)));
        assert!(matches!(
            drain(&mut events).first(),
            Some(WorkerEvent::Error { .. })
        ));
    }
}
