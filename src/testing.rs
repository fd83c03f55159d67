//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{DeskError, Result};
use crate::frontend::{
    Attachment, LocationId, LocationPermissions, MessageId, MessageRef, Messenger, RequesterId,
};
use crate::resource::{ConsoleSession, Hypervisor, ImageFormat, LaunchMode};

#[derive(Debug, Default)]
pub struct FakePermissions {
    fail: bool,
    denied: Mutex<Vec<(RequesterId, LocationId)>>,
    revoked: Mutex<Vec<(RequesterId, LocationId)>>,
}

impl FakePermissions {
    /// Permissions whose every call errors.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn denied(&self) -> Vec<(RequesterId, LocationId)> {
        self.denied.lock().clone()
    }

    pub fn revoked(&self) -> Vec<(RequesterId, LocationId)> {
        self.revoked.lock().clone()
    }
}

#[async_trait]
impl LocationPermissions for FakePermissions {
    async fn deny(&self, requester: RequesterId, location: LocationId) -> Result<()> {
        if self.fail {
            return Err(DeskError::Frontend("deny failed".to_string()));
        }
        self.denied.lock().push((requester, location));
        Ok(())
    }

    async fn revoke(&self, requester: RequesterId, location: LocationId) -> Result<()> {
        if self.fail {
            return Err(DeskError::Frontend("overwrite already removed".to_string()));
        }
        self.revoked.lock().push((requester, location));
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct FakeMessage {
    message: MessageRef,
    content: String,
    attachment: bool,
    deleted: bool,
    reactions: Vec<String>,
}

#[derive(Debug, Default)]
struct MessengerState {
    next_id: u64,
    messages: Vec<FakeMessage>,
    counts: HashMap<(MessageId, String), u32>,
}

/// Records every message; clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeMessenger {
    state: Arc<Mutex<MessengerState>>,
}

impl FakeMessenger {
    pub fn set_reaction_count(&self, message: &MessageRef, emoji: &str, count: u32) {
        self.state
            .lock()
            .counts
            .insert((message.id, emoji.to_string()), count);
    }

    pub fn content(&self, message: &MessageRef) -> Option<String> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.message == *message && !m.deleted)
            .map(|m| m.content.clone())
    }

    pub fn reactions(&self, message: &MessageRef) -> Vec<String> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.message == *message)
            .map(|m| m.reactions.clone())
            .unwrap_or_default()
    }

    /// Text of the live, attachment-free messages in `location`, oldest first.
    pub fn contents(&self, location: LocationId) -> Vec<String> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.message.location == location && !m.deleted && !m.attachment)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Screenshots ever posted.
    pub fn screenshots(&self) -> usize {
        self.state.lock().messages.iter().filter(|m| m.attachment).count()
    }

    /// Screenshots still visible.
    pub fn live_messages(&self) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.attachment && !m.deleted)
            .count()
    }

    pub fn deleted(&self) -> Vec<MessageRef> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.deleted)
            .map(|m| m.message)
            .collect()
    }
}

fn unknown(message: &MessageRef) -> DeskError {
    DeskError::Frontend(format!("unknown message {:?}", message.id))
}

#[async_trait]
impl Messenger for FakeMessenger {
    async fn send(
        &self,
        location: LocationId,
        content: &str,
        attachment: Option<Attachment>,
    ) -> Result<MessageRef> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let message = MessageRef {
            location,
            id: MessageId(state.next_id),
        };
        state.messages.push(FakeMessage {
            message,
            content: content.to_string(),
            attachment: attachment.is_some(),
            deleted: false,
            reactions: Vec::new(),
        });
        Ok(message)
    }

    async fn edit(&self, message: &MessageRef, content: &str) -> Result<()> {
        let mut state = self.state.lock();
        let found = state
            .messages
            .iter_mut()
            .find(|m| m.message == *message && !m.deleted)
            .ok_or_else(|| unknown(message))?;
        found.content = content.to_string();
        Ok(())
    }

    async fn delete(&self, message: &MessageRef) -> Result<()> {
        let mut state = self.state.lock();
        let found = state
            .messages
            .iter_mut()
            .find(|m| m.message == *message && !m.deleted)
            .ok_or_else(|| unknown(message))?;
        found.deleted = true;
        Ok(())
    }

    async fn add_reaction(&self, message: &MessageRef, emoji: &str) -> Result<()> {
        let mut state = self.state.lock();
        let found = state
            .messages
            .iter_mut()
            .find(|m| m.message == *message)
            .ok_or_else(|| unknown(message))?;
        found.reactions.push(emoji.to_string());
        Ok(())
    }

    async fn reaction_count(&self, message: &MessageRef, emoji: &str) -> Result<u32> {
        let state = self.state.lock();
        Ok(state
            .counts
            .get(&(message.id, emoji.to_string()))
            .copied()
            .unwrap_or(0))
    }
}

/// An input event as seen by the fake console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    Mouse {
        dx: i32,
        dy: i32,
        dz: i32,
        dw: i32,
        buttons: u32,
    },
    Key {
        press: Vec<String>,
        hold: Vec<String>,
    },
}

/// Console that records input and fails on overlapping calls.
#[derive(Debug, Default)]
pub struct FakeConsole {
    events: Mutex<Vec<InputEvent>>,
    calls: Mutex<Vec<String>>,
    busy: AtomicBool,
    overlapped: AtomicBool,
    hang_power_down: AtomicBool,
    fail_captures: AtomicBool,
    no_pointer: AtomicBool,
    capture_delay: Mutex<Duration>,
    captures_in_flight: AtomicUsize,
    max_captures_in_flight: AtomicUsize,
}

impl FakeConsole {
    pub fn events(&self) -> Vec<InputEvent> {
        self.events.lock().clone()
    }

    /// Non-input calls, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn hang_power_down(&self, hang: bool) {
        self.hang_power_down.store(hang, Ordering::SeqCst);
    }

    pub fn fail_captures(&self, fail: bool) {
        self.fail_captures.store(fail, Ordering::SeqCst);
    }

    pub fn disable_pointer(&self) {
        self.no_pointer.store(true, Ordering::SeqCst);
    }

    /// Make every capture take `delay`.
    pub fn set_capture_delay(&self, delay: Duration) {
        *self.capture_delay.lock() = delay;
    }

    /// Most captures ever running at once.
    pub fn max_captures_in_flight(&self) -> usize {
        self.max_captures_in_flight.load(Ordering::SeqCst)
    }

    async fn record_input(&self, event: InputEvent) -> Result<()> {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
            return Err(DeskError::ResourceUnavailable("overlapping input".to_string()));
        }
        self.events.lock().push(event);
        tokio::time::sleep(Duration::from_millis(1)).await;
        self.busy.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ConsoleSession for FakeConsole {
    async fn power_down(&self, _timeout: Duration) -> Result<()> {
        self.calls.lock().push("power_down".to_string());
        if self.hang_power_down.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn unlock(&self) -> Result<()> {
        self.calls.lock().push("unlock".to_string());
        Ok(())
    }

    async fn screen_resolution(&self, _display: u32) -> Result<(u32, u32)> {
        Ok((768, 1024))
    }

    async fn capture_screenshot(
        &self,
        _display: u32,
        height: u32,
        width: u32,
        _format: ImageFormat,
    ) -> Result<Vec<u8>> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(DeskError::ResourceUnavailable("display gone".to_string()));
        }
        let running = self.captures_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_captures_in_flight.fetch_max(running, Ordering::SeqCst);
        let delay = *self.capture_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.captures_in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(format!("png {}x{}", width, height).into_bytes())
    }

    async fn send_mouse_event(
        &self,
        dx: i32,
        dy: i32,
        dz: i32,
        dw: i32,
        buttons: u32,
    ) -> Result<()> {
        self.record_input(InputEvent::Mouse {
            dx,
            dy,
            dz,
            dw,
            buttons,
        })
        .await
    }

    async fn send_key_event(&self, press: &[String], hold: &[String]) -> Result<()> {
        self.record_input(InputEvent::Key {
            press: press.to_vec(),
            hold: hold.to_vec(),
        })
        .await
    }

    fn known_key_names(&self) -> BTreeSet<String> {
        ["ALT", "CTRL", "ENTER", "LSHIFT"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn supports_pointer(&self) -> bool {
        !self.no_pointer.load(Ordering::SeqCst)
    }
}

/// Hypervisor that records calls and hands out fresh fake consoles.
#[derive(Debug, Default)]
pub struct FakeHypervisor {
    calls: Mutex<Vec<String>>,
    restore_exit_code: AtomicI32,
    launched: Mutex<Vec<Arc<FakeConsole>>>,
}

impl FakeHypervisor {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn set_restore_exit_code(&self, code: i32) {
        self.restore_exit_code.store(code, Ordering::SeqCst);
    }

    pub fn launched(&self, index: usize) -> Option<Arc<FakeConsole>> {
        self.launched.lock().get(index).cloned()
    }
}

#[async_trait]
impl Hypervisor for FakeHypervisor {
    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<i32> {
        self.calls.lock().push(format!("restore {} {}", vm, snapshot));
        Ok(self.restore_exit_code.load(Ordering::SeqCst))
    }

    async fn launch(&self, mode: LaunchMode) -> Result<Arc<dyn ConsoleSession>> {
        self.calls.lock().push(format!("launch {}", mode.as_str()));
        let console = Arc::new(FakeConsole::default());
        self.launched.lock().push(console.clone());
        Ok(console as Arc<dyn ConsoleSession>)
    }

    async fn attach(&self) -> Result<Arc<dyn ConsoleSession>> {
        self.calls.lock().push("attach".to_string());
        Ok(Arc::new(FakeConsole::default()))
    }
}
