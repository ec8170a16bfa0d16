//! System-wide key interception
//!
//! Every physical keyboard is grabbed for exclusive access and read by its own
//! task. Readers forward raw events to the daemon loop, which translates them
//! into [`KeyEvent`]s with [`EventTranslator`] and either re-emits them on the
//! virtual keyboard or drops them.
//!
//! Readers never decide anything; they only stop when their device goes away
//! or the tap shuts down.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use anyhow::{Context, Result};
use evdev::{Device, EventStream, InputEvent, InputEventKind, Synchronization};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::device::{self, DeviceInfo};
use crate::event::{
    DeviceId, KeyEvent, ModifierFlags, TapDisabledReason, KEY_PRESS, KEY_RELEASE, KEY_REPEAT,
};
use crate::interceptor::TapControl;

/// Sent from reader tasks to the daemon loop.
#[derive(Debug)]
pub enum DeviceMessage {
    Event { device: DeviceId, raw: InputEvent },
    /// Keys physically held, read after a resync request
    KeyState { device: DeviceId, held: Vec<u16> },
    /// The device returned a read error and its reader stopped
    Lost { device: DeviceId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderCommand {
    Resync,
    Stop,
}

/// Restart requests from the interceptor, executed by the daemon loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapRequest {
    Resync(DeviceId),
    Reopen(DeviceId),
}

/// [`TapControl`] that forwards re-enable requests to the daemon loop.
pub struct TapHandle {
    requests: mpsc::UnboundedSender<TapRequest>,
}

impl TapHandle {
    pub fn new(requests: mpsc::UnboundedSender<TapRequest>) -> Self {
        Self { requests }
    }
}

impl TapControl for TapHandle {
    fn reenable(&mut self, device: DeviceId, reason: TapDisabledReason) {
        let request = match reason {
            TapDisabledReason::Overflow => TapRequest::Resync(device),
            TapDisabledReason::DeviceLost => TapRequest::Reopen(device),
        };
        if self.requests.send(request).is_err() {
            tracing::warn!("Daemon loop gone, cannot re-enable {:?}", device);
        }
    }
}

// ============================================================================
// Translation
// ============================================================================

/// Turns raw evdev events into [`KeyEvent`]s.
///
/// Keeps the modifiers held on each device. The flags attached to an event are
/// the union over all devices, so a trigger held on one keyboard applies to
/// keys typed on another.
#[derive(Debug, Default)]
pub struct EventTranslator {
    held: HashMap<DeviceId, HashSet<u16>>,
}

impl EventTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flags(&self) -> ModifierFlags {
        ModifierFlags::from_held(self.held.values().flatten().copied())
    }

    /// `None` for events the interceptor does not care about (reports, scan
    /// codes, LEDs).
    pub fn translate(&mut self, device: DeviceId, raw: &InputEvent) -> Option<KeyEvent> {
        match raw.kind() {
            InputEventKind::Synchronization(sync) if sync == Synchronization::SYN_DROPPED => Some(
                KeyEvent::tap_disabled(TapDisabledReason::Overflow, device),
            ),
            InputEventKind::Key(key) => self.translate_key(device, key.code(), raw.value()),
            _ => None,
        }
    }

    fn translate_key(&mut self, device: DeviceId, code: u16, value: i32) -> Option<KeyEvent> {
        if ModifierFlags::for_key(code).is_some() {
            let held = self.held.entry(device).or_default();
            if value == KEY_RELEASE {
                held.remove(&code);
            } else {
                held.insert(code);
            }
            return Some(KeyEvent::flags_changed(code, self.flags()).with_device(device));
        }

        let flags = self.flags();
        let event = match value {
            KEY_PRESS => KeyEvent::key_down(code, flags),
            KEY_REPEAT => KeyEvent::key_repeat(code, flags),
            KEY_RELEASE => KeyEvent::key_up(code, flags),
            _ => return None,
        };
        Some(event.with_device(device))
    }

    /// Replace a device's modifiers with what it reports as physically held.
    pub fn reseed(&mut self, device: DeviceId, held: impl IntoIterator<Item = u16>) {
        let modifiers: HashSet<u16> = held
            .into_iter()
            .filter(|code| ModifierFlags::for_key(*code).is_some())
            .collect();
        tracing::debug!("{:?} resynced, {} modifier(s) held", device, modifiers.len());
        self.held.insert(device, modifiers);
    }

    /// Forget a device. Returns the modifiers it was holding.
    pub fn device_lost(&mut self, device: DeviceId) -> Vec<u16> {
        self.held
            .remove(&device)
            .map(|held| held.into_iter().collect())
            .unwrap_or_default()
    }
}

// ============================================================================
// Grabbed keyboards
// ============================================================================

struct TappedDevice {
    info: DeviceInfo,
    commands: mpsc::UnboundedSender<ReaderCommand>,
    task: JoinHandle<()>,
}

/// The set of grabbed keyboards and their reader tasks.
pub struct KeyboardTap {
    devices: BTreeMap<DeviceId, TappedDevice>,
    /// Paths that failed to grab, reported once
    failed: HashSet<PathBuf>,
    next_id: u32,
    events: mpsc::Sender<DeviceMessage>,
}

impl KeyboardTap {
    pub fn new(events: mpsc::Sender<DeviceMessage>) -> Self {
        Self {
            devices: BTreeMap::new(),
            failed: HashSet::new(),
            next_id: 1,
            events,
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.devices.values().map(|d| d.info.path.clone()).collect()
    }

    fn is_tapped(&self, info: &DeviceInfo) -> bool {
        self.devices.values().any(|d| d.info.path == info.path)
    }

    /// Grab every keyboard not grabbed yet. Returns how many were added.
    pub fn scan(&mut self) -> Result<usize> {
        self.devices.retain(|_, device| !device.task.is_finished());

        let mut added = 0;
        for info in device::keyboards()? {
            if self.is_tapped(&info) {
                continue;
            }
            let id = DeviceId(self.next_id);
            self.next_id += 1;
            match self.open(id, info.clone()) {
                Ok(()) => {
                    self.failed.remove(&info.path);
                    added += 1;
                }
                Err(e) => {
                    if self.failed.insert(info.path.clone()) {
                        tracing::warn!("Failed to grab '{}': {:#}", info.name, e);
                    }
                }
            }
        }
        Ok(added)
    }

    fn open(&mut self, id: DeviceId, info: DeviceInfo) -> Result<()> {
        let mut device = Device::open(&info.path)
            .with_context(|| format!("Failed to open device at {}", info.path.display()))?;

        device.grab().with_context(|| {
            format!(
                "Failed to grab device '{}' for exclusive access. \
                 Is another application using this device?",
                info.name
            )
        })?;

        let stream = device.into_event_stream().with_context(|| {
            format!(
                "Failed to create event stream for device '{}' at {}",
                info.name,
                info.path.display()
            )
        })?;

        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(read_events(
            id,
            info.name.clone(),
            stream,
            self.events.clone(),
            command_rx,
        ));

        tracing::info!(
            "Grabbed keyboard '{}' ({}) at {}",
            info.name,
            info.vendor_product(),
            info.path.display()
        );
        self.devices.insert(
            id,
            TappedDevice {
                info,
                commands,
                task,
            },
        );
        Ok(())
    }

    /// Ask a reader to report its device's held keys.
    pub fn resync(&mut self, id: DeviceId) {
        if let Some(device) = self.devices.get(&id) {
            if device.commands.send(ReaderCommand::Resync).is_err() {
                tracing::debug!("Reader for '{}' already stopped", device.info.name);
            }
        }
    }

    /// Drop a device whose reader failed and try to grab it again.
    ///
    /// If that fails the path stays free and a later [`scan`](Self::scan)
    /// picks it up once it is back.
    pub fn reopen(&mut self, id: DeviceId) {
        let Some(lost) = self.devices.remove(&id) else {
            return;
        };
        lost.task.abort();

        match self.open(id, lost.info.clone()) {
            Ok(()) => tracing::info!("Re-grabbed '{}'", lost.info.name),
            Err(e) => tracing::warn!("Keyboard '{}' unavailable: {:#}", lost.info.name, e),
        }
    }

    /// Stop all readers, releasing the grabs.
    pub async fn shutdown(&mut self) {
        for (_, device) in std::mem::take(&mut self.devices) {
            let _ = device.commands.send(ReaderCommand::Stop);
            if let Err(e) = device.task.await {
                tracing::debug!("Reader for '{}' ended abnormally: {}", device.info.name, e);
            }
            tracing::info!("Released '{}'", device.info.name);
        }
    }
}

async fn read_events(
    id: DeviceId,
    name: String,
    mut stream: EventStream,
    events: mpsc::Sender<DeviceMessage>,
    mut commands: mpsc::UnboundedReceiver<ReaderCommand>,
) {
    loop {
        tokio::select! {
            result = stream.next_event() => match result {
                Ok(raw) => {
                    if events.send(DeviceMessage::Event { device: id, raw }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("Read from '{}' failed: {}", name, e);
                    let _ = events.send(DeviceMessage::Lost { device: id }).await;
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(ReaderCommand::Resync) => {
                    let held = match stream.device().get_key_state() {
                        Ok(keys) => keys.iter().map(|key| key.code()).collect(),
                        Err(e) => {
                            tracing::warn!("Failed to read key state of '{}': {}", name, e);
                            Vec::new()
                        }
                    };
                    if events.send(DeviceMessage::KeyState { device: id, held }).await.is_err() {
                        break;
                    }
                }
                Some(ReaderCommand::Stop) | None => break,
            },
        }
    }
    tracing::debug!("Reader for '{}' stopped", name);
}
