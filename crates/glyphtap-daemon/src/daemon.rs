//! The daemon loop
//!
//! Owns the [`Interceptor`] and every piece of mutable state. Device events,
//! fired timers, control requests and signals all arrive over channels and are
//! handled one at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use glyphtap_config::ipc::{IpcRequest, IpcResponse};
use glyphtap_config::{Config, KeyboardLayout};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::clipboard::ArboardClipboard;
use crate::event::{Disposition, EventKind, KeyEvent, TapDisabledReason};
use crate::indicator::CommandIndicator;
use crate::interceptor::{Backends, EnableSwitch, Interceptor};
use crate::ipc::{ControlRequest, IpcServer};
use crate::keymap::{KeyTable, LayoutHandle};
use crate::mapping::{ConfigMappingSource, MappingTable};
use crate::resolver::KeymapResolver;
use crate::scheduler::{Deferred, TimerToken, TokioScheduler};
use crate::tap::{DeviceMessage, EventTranslator, KeyboardTap, TapHandle, TapRequest};
use crate::virtual_device::{
    spawn_output, Output, OutputHandle, UinputPoster, VirtualDevice, VIRTUAL_DEVICE_NAME,
};

/// How often to look for keyboards that appeared or came back.
const RESCAN_INTERVAL: Duration = Duration::from_secs(3);

/// Receivers the loop selects over.
struct Inbox {
    devices: mpsc::Receiver<DeviceMessage>,
    deferred: mpsc::UnboundedReceiver<(TimerToken, Deferred)>,
    tap_requests: mpsc::UnboundedReceiver<TapRequest>,
    control: mpsc::Receiver<ControlRequest>,
}

pub struct Daemon {
    source: ConfigMappingSource,
    interceptor: Interceptor,
    enabled: EnableSwitch,
    layout: LayoutHandle,
    /// Layout as requested by config or `set_layout`, before system defaults
    keyboard: KeyboardLayout,
    translator: EventTranslator,
    tap: KeyboardTap,
    output: OutputHandle,
    output_task: tokio::task::JoinHandle<()>,
}

impl Daemon {
    /// Create the virtual keyboard, grab the physical ones and bind the socket,
    /// then run until SIGINT or SIGTERM.
    pub async fn run(source: ConfigMappingSource, config: Config, socket_path: PathBuf) -> Result<()> {
        let virtual_device = VirtualDevice::new_keyboard(VIRTUAL_DEVICE_NAME)
            .context("Failed to create virtual keyboard")?;
        let layout = LayoutHandle::new(compile_or_empty(&config.keyboard));
        let (output, output_task) =
            spawn_output(virtual_device, layout.clone(), config.timing.keystroke_gap());

        let (device_tx, device_rx) = mpsc::channel(256);
        let mut tap = KeyboardTap::new(device_tx);
        let grabbed = tap.scan().context("Failed to enumerate input devices")?;
        if grabbed == 0 {
            tracing::warn!("No keyboards found yet, waiting for one to appear");
        } else {
            tracing::info!("Intercepting {} keyboard(s)", grabbed);
        }

        let (scheduler, deferred_rx) = TokioScheduler::new();
        let (tap_request_tx, tap_request_rx) = mpsc::unbounded_channel();
        let enabled = EnableSwitch::new(config.global.enabled);

        let interceptor = Interceptor::new(
            &config,
            Arc::new(MappingTable::from(config.mappings.clone())),
            enabled.clone(),
            Backends {
                scheduler: Box::new(scheduler),
                resolver: Box::new(KeymapResolver::new(layout.clone())),
                indicator: Box::new(CommandIndicator::new(config.global.indicator_command.clone())),
                tap: Box::new(TapHandle::new(tap_request_tx)),
                poster: Box::new(UinputPoster::new(output.clone())),
                clipboard: Box::new(ArboardClipboard::new()),
            },
        );

        let server = IpcServer::bind(&socket_path)?;
        let (control_tx, control_rx) = mpsc::channel(16);
        tokio::spawn(server.serve(control_tx));

        tracing::info!(
            "glyphtap running: trigger {}, {} mapping(s), layout {}, {}",
            config.global.trigger,
            interceptor.mapping_count(),
            layout.current().description(),
            if enabled.is_enabled() { "enabled" } else { "disabled" }
        );

        let daemon = Self {
            source,
            interceptor,
            enabled,
            layout,
            keyboard: config.keyboard,
            translator: EventTranslator::new(),
            tap,
            output,
            output_task,
        };

        daemon
            .event_loop(Inbox {
                devices: device_rx,
                deferred: deferred_rx,
                tap_requests: tap_request_rx,
                control: control_rx,
            })
            .await
    }

    async fn event_loop(mut self, mut inbox: Inbox) -> Result<()> {
        let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let mut terminate =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        let mut interrupt =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut rescan = tokio::time::interval(RESCAN_INTERVAL);
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(message) = inbox.devices.recv() => self.on_device_message(message),
                Some((token, work)) = inbox.deferred.recv() => {
                    self.interceptor.run_deferred(token, work);
                }
                Some(request) = inbox.tap_requests.recv() => match request {
                    TapRequest::Resync(device) => self.tap.resync(device),
                    TapRequest::Reopen(device) => self.tap.reopen(device),
                },
                Some(ControlRequest { request, reply }) = inbox.control.recv() => {
                    let response = self.on_control(request);
                    if reply.send(response).is_err() {
                        tracing::debug!("Control client went away before the reply");
                    }
                }
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received, reloading");
                    self.reload();
                }
                _ = rescan.tick() => {
                    match self.tap.scan() {
                        Ok(0) => {}
                        Ok(added) => tracing::info!("Picked up {} new keyboard(s)", added),
                        Err(e) => tracing::debug!("Rescan failed: {:#}", e),
                    }
                }
                _ = terminate.recv() => {
                    tracing::info!("SIGTERM received, shutting down");
                    break;
                }
                _ = interrupt.recv() => {
                    tracing::info!("Interrupted, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    fn on_device_message(&mut self, message: DeviceMessage) {
        match message {
            DeviceMessage::Event { device, raw } => {
                let Some(event) = self.translator.translate(device, &raw) else {
                    return;
                };

                match (event.kind, self.interceptor.handle(&event)) {
                    (EventKind::TapDisabled(_), _) => {}
                    (_, Disposition::PassThrough) => self.output.send(Output::Emit(raw)),
                    // The matching key-down may have passed through while disabled
                    (EventKind::KeyUp, Disposition::Suppress) => {
                        self.output.send(Output::ReleaseIfHeld(event.keycode));
                    }
                    (_, Disposition::Suppress) => {}
                }
            }
            DeviceMessage::KeyState { device, held } => self.translator.reseed(device, held),
            DeviceMessage::Lost { device } => {
                for code in self.translator.device_lost(device) {
                    self.output.send(Output::ReleaseIfHeld(code));
                }
                self.interceptor.handle(&KeyEvent::tap_disabled(
                    TapDisabledReason::DeviceLost,
                    device,
                ));
            }
        }
    }

    fn on_control(&mut self, request: IpcRequest) -> IpcResponse {
        tracing::debug!("Control request: {:?}", request);
        match request {
            IpcRequest::Status => {
                let mut report = self.interceptor.status();
                report.layout = self.layout.current().description().to_string();
                report.devices = self.tap.paths();
                IpcResponse::Status(report)
            }
            IpcRequest::Enable => {
                self.enabled.set(true);
                self.switched(true)
            }
            IpcRequest::Disable => {
                self.enabled.set(false);
                self.switched(false)
            }
            IpcRequest::Toggle => {
                let enabled = self.enabled.toggle();
                self.switched(enabled)
            }
            IpcRequest::Reload => {
                let count = self.reload();
                success(format!("Loaded {} mapping(s)", count))
            }
            IpcRequest::Reset => {
                if self.interceptor.reset() {
                    success("State reset".to_string())
                } else {
                    success("Nothing to reset".to_string())
                }
            }
            IpcRequest::SetLayout { layout, variant } => {
                let keyboard = KeyboardLayout::named(&layout, variant.as_deref());
                match KeyTable::compile(&keyboard) {
                    Ok(table) => {
                        let message = format!("Layout set to {}", table.description());
                        self.layout.replace(table);
                        self.keyboard = keyboard;
                        success(message)
                    }
                    Err(e) => IpcResponse::Error {
                        message: format!("{:#}", e),
                    },
                }
            }
        }
    }

    fn switched(&mut self, enabled: bool) -> IpcResponse {
        if !enabled {
            self.interceptor.reset();
        }
        let state = if enabled { "enabled" } else { "disabled" };
        tracing::info!("Remapping {}", state);
        success(format!("Remapping {}", state))
    }

    /// Re-read the config file and swap in its mapping table and layout.
    fn reload(&mut self) -> usize {
        let config = self.source.load_config();
        if config.keyboard != self.keyboard {
            match KeyTable::compile(&config.keyboard) {
                Ok(table) => {
                    self.layout.replace(table);
                    self.keyboard = config.keyboard;
                }
                Err(e) => tracing::warn!(
                    "Keeping layout {}: {:#}",
                    self.layout.current().description(),
                    e
                ),
            }
        }
        let table = Arc::new(MappingTable::from_entries(config.mappings));
        let count = table.len();
        self.interceptor.replace_mappings(table);
        count
    }

    async fn shutdown(self) {
        let Self {
            interceptor,
            mut tap,
            output,
            output_task,
            ..
        } = self;

        tap.shutdown().await;

        // The output task ends once every handle is gone, releasing held keys
        drop(interceptor);
        drop(output);
        if let Err(e) = output_task.await {
            tracing::warn!("Output task ended abnormally: {}", e);
        }
        tracing::info!("Shutdown complete");
    }
}

/// Compile the configured layout; without one, nothing resolves and hex entry
/// types nothing.
fn compile_or_empty(keyboard: &KeyboardLayout) -> KeyTable {
    match KeyTable::compile(keyboard) {
        Ok(table) if table.is_empty() => {
            tracing::warn!("Keyboard layout {} types no characters", table.description());
            table
        }
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("{:#}; diacritics and hex entry are unavailable", e);
            KeyTable::empty()
        }
    }
}

fn success(message: String) -> IpcResponse {
    IpcResponse::Success {
        message: Some(message),
    }
}
