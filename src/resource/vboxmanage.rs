//! `VBoxManage` command line driver.
//!
//! Every operation runs the VBoxManage binary as a subprocess. The CLI holds
//! no session lock between calls, so "unlock" is a no-op and sessions are
//! cheap to create.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{scancodes, ConsoleSession, Hypervisor, ImageFormat, LaunchMode};
use crate::config::ResourceConfig;
use crate::error::{DeskError, Result};

/// Handle on one VirtualBox machine through the VBoxManage CLI.
#[derive(Debug, Clone)]
pub struct VBoxManage {
    binary: PathBuf,
    vm_name: String,
}

impl VBoxManage {
    pub fn new(binary: impl Into<PathBuf>, vm_name: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            vm_name: vm_name.into(),
        }
    }

    pub fn from_config(config: &ResourceConfig) -> Self {
        Self::new(&config.vboxmanage, &config.vm_name)
    }

    pub fn vm_name(&self) -> &str {
        &self.vm_name
    }

    fn console(&self) -> VBoxConsole {
        VBoxConsole {
            manage: self.clone(),
        }
    }

    /// Run VBoxManage and collect its output, whatever the exit status.
    async fn run<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        trace!(command = ?cmd, "Running VBoxManage");

        cmd.output().await.map_err(|e| {
            DeskError::ResourceUnavailable(format!(
                "failed to run {}: {}",
                self.binary.display(),
                e
            ))
        })
    }

    /// Run VBoxManage and fail on a nonzero exit status.
    async fn run_checked<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.run(args).await?;
        if !output.status.success() {
            return Err(DeskError::ResourceUnavailable(format!(
                "VBoxManage exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }
}

#[async_trait]
impl Hypervisor for VBoxManage {
    async fn restore_snapshot(&self, vm: &str, snapshot: &str) -> Result<i32> {
        debug!(vm = %vm, snapshot = %snapshot, "Restoring snapshot");
        let output = self.run(["snapshot", vm, "restore", snapshot]).await?;
        // Killed by a signal: no exit code, still a failure.
        Ok(output.status.code().unwrap_or(-1))
    }

    async fn launch(&self, mode: LaunchMode) -> Result<Arc<dyn ConsoleSession>> {
        debug!(vm = %self.vm_name, mode = mode.as_str(), "Launching machine");
        self.run_checked(["startvm", self.vm_name.as_str(), "--type", mode.as_str()])
            .await?;
        Ok(Arc::new(self.console()))
    }

    async fn attach(&self) -> Result<Arc<dyn ConsoleSession>> {
        self.run_checked(["showvminfo", self.vm_name.as_str(), "--machinereadable"])
            .await?;
        Ok(Arc::new(self.console()))
    }
}

/// Session on a machine driven through VBoxManage `controlvm`.
#[derive(Debug, Clone)]
pub struct VBoxConsole {
    manage: VBoxManage,
}

impl VBoxConsole {
    fn vm(&self) -> &str {
        &self.manage.vm_name
    }
}

#[async_trait]
impl ConsoleSession for VBoxConsole {
    async fn power_down(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.manage.run_checked(["controlvm", self.vm(), "poweroff"]))
            .await
            .map_err(|_| DeskError::ResourceUnavailable("power-down timed out".to_string()))?
            .map(|_| ())
    }

    async fn unlock(&self) -> Result<()> {
        trace!(vm = %self.vm(), "No session lock to release");
        Ok(())
    }

    /// Only the primary display's mode is reported by `showvminfo`.
    async fn screen_resolution(&self, _display: u32) -> Result<(u32, u32)> {
        let output = self
            .manage
            .run_checked(["showvminfo", self.vm(), "--machinereadable"])
            .await?;
        parse_video_mode(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            DeskError::ResourceUnavailable("machine reports no video mode".to_string())
        })
    }

    async fn capture_screenshot(
        &self,
        display: u32,
        _height: u32,
        _width: u32,
        format: ImageFormat,
    ) -> Result<Vec<u8>> {
        let ImageFormat::Png = format;
        let path = std::env::temp_dir().join(format!("deskgate-{}.png", Uuid::new_v4()));
        let result = capture_to(self, &path, display).await;
        // Best effort; the file may not exist if the capture failed.
        let _ = tokio::fs::remove_file(&path).await;
        result
    }

    async fn send_mouse_event(
        &self,
        _dx: i32,
        _dy: i32,
        _dz: i32,
        _dw: i32,
        _buttons: u32,
    ) -> Result<()> {
        Err(DeskError::ResourceUnavailable(
            "VBoxManage cannot inject mouse events".to_string(),
        ))
    }

    async fn send_key_event(&self, press: &[String], hold: &[String]) -> Result<()> {
        let bytes = scancodes::encode(press, hold)?;
        let mut args = vec![
            "controlvm".to_string(),
            self.vm().to_string(),
            "keyboardputscancode".to_string(),
        ];
        args.extend(bytes.iter().map(|b| format!("{:02x}", b)));
        self.manage.run_checked(&args).await?;
        Ok(())
    }

    fn known_key_names(&self) -> BTreeSet<String> {
        scancodes::key_names()
    }

    /// `controlvm` has no pointer command.
    fn supports_pointer(&self) -> bool {
        false
    }
}

async fn capture_to(console: &VBoxConsole, path: &Path, display: u32) -> Result<Vec<u8>> {
    let display = display.to_string();
    console
        .manage
        .run_checked([
            OsStr::new("controlvm"),
            OsStr::new(console.vm()),
            OsStr::new("screenshotpng"),
            path.as_os_str(),
            OsStr::new(&display),
        ])
        .await?;
    Ok(tokio::fs::read(path).await?)
}

/// Parse `VideoMode="width,height,bpp"@x,y display` into `(height, width)`.
fn parse_video_mode(info: &str) -> Option<(u32, u32)> {
    let line = info.lines().find(|l| l.starts_with("VideoMode="))?;
    let quoted = line.split('"').nth(1)?;
    let mut parts = quoted.split(',');
    let width = parts.next()?.trim().parse().ok()?;
    let height = parts.next()?.trim().parse().ok()?;
    Some((height, width))
}
