//! Remote desktop control surface.
//!
//! [`Hypervisor`] covers machine-level operations (snapshot restore, launch)
//! and hands out [`ConsoleSession`] handles. A session is the live handle to
//! the running desktop; it is replaced wholesale whenever the machine is
//! relaunched.

pub mod scancodes;
mod vboxmanage;

pub use vboxmanage::{VBoxConsole, VBoxManage};

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// How a machine process is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    Headless,
}

impl LaunchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Headless => "headless",
        }
    }
}

/// Bitmap encoding for captured screens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
}

/// Machine-level controls.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Restore `snapshot` on the (powered off) machine `vm`.
    ///
    /// Returns the process exit code; nonzero means the restore failed.
    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<i32>;

    /// Start the machine process and open a new session on it.
    async fn launch(&self, mode: LaunchMode) -> Result<Arc<dyn ConsoleSession>>;

    /// Open a session on an already running machine.
    async fn attach(&self) -> Result<Arc<dyn ConsoleSession>>;
}

/// A live session on the running desktop.
#[async_trait]
pub trait ConsoleSession: Send + Sync {
    /// Power the machine off, waiting at most `timeout` for completion.
    async fn power_down(&self, timeout: Duration) -> Result<()>;

    /// Release the session so the machine can be restored.
    async fn unlock(&self) -> Result<()>;

    /// Current `(height, width)` of `display`.
    async fn screen_resolution(&self, display: u32) -> Result<(u32, u32)>;

    async fn capture_screenshot(
        &self,
        display: u32,
        height: u32,
        width: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>>;

    /// Relative pointer movement and scroll with the given button mask.
    async fn send_mouse_event(&self, dx: i32, dy: i32, dz: i32, dw: i32, buttons: u32)
        -> Result<()>;

    /// Press each of `press` in turn while `hold` is held down.
    async fn send_key_event(&self, press: &[String], hold: &[String]) -> Result<()>;

    /// Named keys accepted by [`ConsoleSession::send_key_event`].
    fn known_key_names(&self) -> BTreeSet<String>;

    /// Whether [`ConsoleSession::send_mouse_event`] can reach the desktop.
    fn supports_pointer(&self) -> bool {
        true
    }
}
