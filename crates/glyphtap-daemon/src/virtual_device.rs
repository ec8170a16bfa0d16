//! Virtual keyboard output via uinput
//!
//! Every event that leaves the daemon goes through one [`VirtualDevice`] owned
//! by the output task: re-emitted pass-through events as well as injected
//! scripts. A single consumer keeps the two in the order they were decided.
//!
//! Unicode text is typed with the Ctrl+Shift+U hex entry understood by GTK and
//! IBus. The keys for `u` and the hex digits are looked up in the active
//! [`KeyTable`], so the entry works on any layout that has them. Held modifiers
//! are lifted for the duration of a script and pressed again afterwards so the
//! entry sequence is not altered by them.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Result;
use evdev::{uinput::VirtualDeviceBuilder, AttributeSet, EventType, InputEvent, Key};
use glyphtap_config::keys::{self, codes};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{ModifierFlags, KEY_PRESS, KEY_RELEASE};
use crate::injector::{KeyStep, KeystrokePoster};
use crate::keymap::{KeyStroke, KeyTable, LayoutHandle};

/// Name the virtual keyboard registers under. The tap skips devices with this
/// name so we never grab our own output.
pub const VIRTUAL_DEVICE_NAME: &str = "glyphtap virtual keyboard";

const KEY_ENTER: u16 = 28;

/// The key that types `c` in either case.
fn find_either_case(keys: &KeyTable, c: char) -> Option<KeyStroke> {
    keys.find(c)
        .or_else(|| keys.find(c.to_ascii_uppercase()))
        .or_else(|| keys.find(c.to_ascii_lowercase()))
}

/// Keys for `u` and for each hex digit of `c`, or `None` if the layout lacks one.
fn hex_entry_keys(keys: &KeyTable, c: char) -> Option<(KeyStroke, Vec<KeyStroke>)> {
    let u = find_either_case(keys, 'u')?;
    let digits = format!("{:x}", c as u32)
        .chars()
        .map(|digit| find_either_case(keys, digit))
        .collect::<Option<Vec<_>>>()?;
    Some((u, digits))
}

/// Keys the virtual device currently holds down.
#[derive(Debug, Default, Clone)]
pub struct HeldKeys(BTreeSet<u16>);

impl HeldKeys {
    pub fn contains(&self, code: u16) -> bool {
        self.0.contains(&code)
    }

    pub fn modifiers(&self) -> Vec<u16> {
        self.0
            .iter()
            .copied()
            .filter(|code| keys::is_modifier(*code))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn record(&mut self, code: u16, value: i32) {
        if value == KEY_RELEASE {
            self.0.remove(&code);
        } else {
            self.0.insert(code);
        }
    }
}

/// One low-level output action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
    Key { code: u16, value: i32 },
    Wait(Duration),
}

/// Expands [`KeyStep`] scripts into key presses against a simulated held set.
struct ScriptPlanner<'a> {
    keys: &'a KeyTable,
    held: HeldKeys,
    suspended: Vec<u16>,
    gap: Duration,
    out: Vec<Emission>,
}

impl ScriptPlanner<'_> {
    fn key(&mut self, code: u16, value: i32) {
        self.held.record(code, value);
        self.out.push(Emission::Key { code, value });
    }

    fn tap(&mut self, code: u16) {
        self.key(code, KEY_PRESS);
        self.key(code, KEY_RELEASE);
        if !self.gap.is_zero() {
            self.out.push(Emission::Wait(self.gap));
        }
    }

    /// Tap a key, holding Shift around it when the layout needs it.
    fn stroke(&mut self, stroke: KeyStroke) {
        if stroke.shift {
            self.key(codes::KEY_LEFTSHIFT, KEY_PRESS);
            self.tap(stroke.code);
            self.key(codes::KEY_LEFTSHIFT, KEY_RELEASE);
        } else {
            self.tap(stroke.code);
        }
    }

    /// Lift held modifiers whose flag is not in `keep`.
    fn suspend_modifiers(&mut self, keep: ModifierFlags) {
        for code in self.held.modifiers() {
            let wanted = ModifierFlags::for_key(code).is_some_and(|flag| keep.contains(flag));
            if !wanted {
                self.key(code, KEY_RELEASE);
                if !self.suspended.contains(&code) {
                    self.suspended.push(code);
                }
            }
        }
    }

    fn type_char(&mut self, c: char) {
        let Some((u, digits)) = hex_entry_keys(self.keys, c) else {
            tracing::warn!(
                "Layout {} has no keys for the hex entry of U+{:04X}, skipping it",
                self.keys.description(),
                c as u32
            );
            return;
        };

        self.key(codes::KEY_LEFTCTRL, KEY_PRESS);
        self.key(codes::KEY_LEFTSHIFT, KEY_PRESS);
        self.tap(u.code);
        self.key(codes::KEY_LEFTSHIFT, KEY_RELEASE);
        self.key(codes::KEY_LEFTCTRL, KEY_RELEASE);

        for digit in digits {
            self.stroke(digit);
        }
        self.tap(KEY_ENTER);
    }

    fn step(&mut self, step: &KeyStep) {
        match step {
            KeyStep::Unicode { text, down: true } => {
                self.suspend_modifiers(ModifierFlags::EMPTY);
                for c in text.chars() {
                    self.type_char(c);
                }
            }
            // The hex entry commits on Enter; there is nothing left to release
            KeyStep::Unicode { down: false, .. } => {}
            KeyStep::Key {
                code,
                down: true,
                flags,
            } => {
                self.suspend_modifiers(*flags);
                if !self.held.contains(*code) {
                    self.key(*code, KEY_PRESS);
                }
            }
            KeyStep::Key {
                code, down: false, ..
            } => {
                if self.held.contains(*code) {
                    self.key(*code, KEY_RELEASE);
                }
            }
            KeyStep::Pause(delay) => self.out.push(Emission::Wait(*delay)),
        }
    }

    fn finish(mut self) -> Vec<Emission> {
        for code in std::mem::take(&mut self.suspended) {
            if !self.held.contains(code) {
                self.key(code, KEY_PRESS);
            }
        }
        self.out
    }
}

/// Turn a script into raw key emissions, given what is held before it runs and
/// the layout text is typed on.
pub fn expand_script(
    held: &HeldKeys,
    script: &[KeyStep],
    keys: &KeyTable,
    gap: Duration,
) -> Vec<Emission> {
    let mut planner = ScriptPlanner {
        keys,
        held: held.clone(),
        suspended: Vec::new(),
        gap,
        out: Vec::new(),
    };
    for step in script {
        planner.step(step);
    }
    planner.finish()
}

/// A virtual input device for injecting events
pub struct VirtualDevice {
    device: evdev::uinput::VirtualDevice,
    held: HeldKeys,
}

impl VirtualDevice {
    /// Create a new virtual keyboard device
    pub fn new_keyboard(name: &str) -> Result<Self> {
        let mut keys = AttributeSet::<Key>::new();

        for code in 0..256u16 {
            keys.insert(Key::new(code));
        }

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .build()?;

        Ok(Self {
            device,
            held: HeldKeys::default(),
        })
    }

    pub fn held(&self) -> &HeldKeys {
        &self.held
    }

    /// Emit an input event followed by a report
    pub fn emit(&mut self, event: InputEvent) -> Result<()> {
        let syn = InputEvent::new(EventType::SYNCHRONIZATION, 0, 0);
        self.device.emit(&[event, syn])?;
        if event.event_type() == EventType::KEY {
            self.held.record(event.code(), event.value());
        }
        Ok(())
    }

    pub fn release_key(&mut self, code: u16) -> Result<()> {
        self.emit(InputEvent::new(EventType::KEY, code, KEY_RELEASE))
    }

    /// Release everything still held, modifiers last.
    pub fn release_all(&mut self) -> Result<()> {
        let mut held: Vec<u16> = self.held.0.iter().copied().collect();
        held.sort_by_key(|code| keys::is_modifier(*code));
        for code in held {
            self.release_key(code)?;
        }
        Ok(())
    }

    async fn run_script(&mut self, script: &[KeyStep], keys: &KeyTable, gap: Duration) -> Result<()> {
        for emission in expand_script(&self.held, script, keys, gap) {
            match emission {
                Emission::Key { code, value } => {
                    self.emit(InputEvent::new(EventType::KEY, code, value))?;
                }
                Emission::Wait(delay) => tokio::time::sleep(delay).await,
            }
        }
        Ok(())
    }
}

/// Work for the output task.
#[derive(Debug)]
pub enum Output {
    /// Re-emit an intercepted event unchanged
    Emit(InputEvent),
    /// Release `code` if the virtual device still holds it
    ReleaseIfHeld(u16),
    Script(Vec<KeyStep>),
}

#[derive(Debug, Clone)]
pub struct OutputHandle(mpsc::UnboundedSender<Output>);

impl OutputHandle {
    pub fn send(&self, output: Output) {
        if self.0.send(output).is_err() {
            tracing::warn!("Output task has stopped, event dropped");
        }
    }
}

/// Move the device into its own task. The task ends when every handle is gone,
/// releasing whatever is still held.
pub fn spawn_output(
    device: VirtualDevice,
    layout: LayoutHandle,
    gap: Duration,
) -> (OutputHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::spawn(run_output(device, rx, layout, gap));
    (OutputHandle(tx), task)
}

async fn run_output(
    mut device: VirtualDevice,
    mut rx: mpsc::UnboundedReceiver<Output>,
    layout: LayoutHandle,
    gap: Duration,
) {
    while let Some(output) = rx.recv().await {
        let result = match output {
            Output::Emit(event) => device.emit(event),
            Output::ReleaseIfHeld(code) => {
                if device.held().contains(code) {
                    tracing::debug!("Releasing {} held by the virtual device", keys::display_key(code));
                    device.release_key(code)
                } else {
                    Ok(())
                }
            }
            Output::Script(script) => {
                let keys = layout.current();
                device.run_script(&script, &keys, gap).await
            }
        };

        if let Err(e) = result {
            tracing::error!("Failed to write to virtual keyboard: {:#}", e);
        }
    }

    if let Err(e) = device.release_all() {
        tracing::warn!("Failed to release held keys: {:#}", e);
    }
    tracing::debug!("Output task finished");
}

/// [`KeystrokePoster`] that queues scripts on the output task.
pub struct UinputPoster {
    output: OutputHandle,
}

impl UinputPoster {
    pub fn new(output: OutputHandle) -> Self {
        Self { output }
    }
}

impl KeystrokePoster for UinputPoster {
    fn post(&mut self, script: Vec<KeyStep>) {
        self.output.send(Output::Script(script));
    }
}
