//! Session controller: the request protocol around the shared desktop.

use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::input::{validate_movement, KeyChord, MouseButton};
use super::lock::ExclusionLock;
use super::vote::{VoteOutcome, VoteSession, DEFAULT_VOTE_WINDOW};
use crate::config::DeskConfig;
use crate::error::{DeskError, Result};
use crate::frontend::{
    Attachment, AuthLevel, DeskCommand, LiveToggle, LocationId, MessageRef, Messenger, Request,
    Requester,
};
use crate::ratelimit::RateLimiter;
use crate::resource::{ConsoleSession, Hypervisor, ImageFormat, LaunchMode};

const SCREENSHOT_FILENAME: &str = "screenshot.png";
const GENERIC_FAILURE: &str = "Something went wrong talking to the desktop.";

/// Where the reset sequence currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetPhase {
    Running,
    PoweringDown,
    Restoring,
    Relaunching,
}

/// Tunables for the controller.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub vm_name: String,
    pub snapshot: String,
    pub admin_level: AuthLevel,
    pub vote_level: AuthLevel,
    pub vote_window: Duration,
    pub settle: Duration,
    pub live_interval: Duration,
    pub power_down_timeout: Duration,
    /// Display captured for screenshots
    pub display: u32,
}

impl ControllerSettings {
    pub fn new(vm_name: impl Into<String>, snapshot: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            snapshot: snapshot.into(),
            admin_level: AuthLevel::ADMIN,
            vote_level: AuthLevel(1),
            vote_window: DEFAULT_VOTE_WINDOW,
            settle: Duration::from_secs(20),
            live_interval: Duration::from_secs(5),
            power_down_timeout: Duration::from_secs(10),
            display: 0,
        }
    }

    pub fn from_config(config: &DeskConfig) -> Self {
        let arbitration = &config.arbitration;
        Self {
            admin_level: arbitration.admin_level(),
            vote_level: arbitration.vote_level(),
            vote_window: arbitration.vote_window(),
            settle: arbitration.settle(),
            live_interval: arbitration.live_interval(),
            power_down_timeout: arbitration.power_down_timeout(),
            ..Self::new(&config.resource.vm_name, &config.resource.snapshot)
        }
    }
}

/// The live stream loop. It stays in its slot until the loop has exited, so
/// a restart cannot overlap a capture still in flight.
struct LiveStream {
    cancel: CancellationToken,
    /// Cancelled by the loop itself on exit
    finished: CancellationToken,
}

impl LiveStream {
    fn is_running(&self) -> bool {
        !self.finished.is_cancelled()
    }

    fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Puts the phase back to `Running` however the reset ends.
struct PhaseGuard<'a>(&'a Mutex<ResetPhase>);

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = ResetPhase::Running;
    }
}

/// Frees the vote slot however the vote ends.
struct VoteSlot<'a>(&'a AtomicBool);

impl Drop for VoteSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns the single desktop session and arbitrates every request against it.
pub struct SessionController {
    hypervisor: Arc<dyn Hypervisor>,
    /// Replaced wholesale on reset; clone the `Arc` out before awaiting
    session: RwLock<Arc<dyn ConsoleSession>>,
    messenger: Arc<dyn Messenger>,
    limiter: RateLimiter,
    lock: ExclusionLock,
    settings: ControllerSettings,
    phase: Mutex<ResetPhase>,
    live: Mutex<Option<LiveStream>>,
    vote_in_flight: AtomicBool,
}

impl SessionController {
    pub fn new(
        hypervisor: Arc<dyn Hypervisor>,
        session: Arc<dyn ConsoleSession>,
        messenger: Arc<dyn Messenger>,
        limiter: RateLimiter,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            hypervisor,
            session: RwLock::new(session),
            messenger,
            limiter,
            lock: ExclusionLock::new(),
            settings,
            phase: Mutex::new(ResetPhase::Running),
            live: Mutex::new(None),
            vote_in_flight: AtomicBool::new(false),
        }
    }

    /// Attach to the already running machine and build a controller on it.
    pub async fn connect(
        hypervisor: Arc<dyn Hypervisor>,
        messenger: Arc<dyn Messenger>,
        limiter: RateLimiter,
        settings: ControllerSettings,
    ) -> Result<Self> {
        let session = hypervisor.attach().await?;
        info!(vm = %settings.vm_name, "Attached to machine");
        Ok(Self::new(hypervisor, session, messenger, limiter, settings))
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn phase(&self) -> ResetPhase {
        *self.phase.lock()
    }

    pub fn is_live(&self) -> bool {
        self.live
            .lock()
            .as_ref()
            .is_some_and(|stream| stream.is_running() && !stream.is_stopping())
    }

    /// Whether pointer commands can reach the current session.
    pub fn supports_pointer(&self) -> bool {
        self.session().supports_pointer()
    }

    fn session(&self) -> Arc<dyn ConsoleSession> {
        self.session.read().clone()
    }

    fn set_phase(&self, phase: ResetPhase) {
        debug!(phase = ?phase, "Reset phase");
        *self.phase.lock() = phase;
    }

    /// Handle a request and render its failure, if any, to the requester.
    ///
    /// This is the request-handler boundary: validation, cooldown and
    /// conflict errors are reported verbatim, permission denials are ignored,
    /// and resource failures are reported as a generic failure.
    pub async fn dispatch(self: &Arc<Self>, request: Request) -> Result<()> {
        let location = request.location();
        let command = request.command.name();
        let result = self.handle(request).await;

        match &result {
            Ok(()) => {}
            Err(DeskError::PermissionDenied(reason)) => {
                debug!(command, reason = %reason, "Ignoring request");
            }
            Err(e) if e.is_user_facing() => {
                debug!(command, error = %e, "Request rejected");
                self.notify(location, &e.to_string()).await;
            }
            Err(e) => {
                error!(command, error = %e, "Request failed");
                self.notify(location, GENERIC_FAILURE).await;
            }
        }
        result
    }

    /// Run a request through the authorization, location and cooldown gates
    /// and execute it.
    #[instrument(
        skip(self, request),
        fields(
            requester = %request.requester.id,
            location = %request.requester.location,
            command = %request.command
        )
    )]
    pub async fn handle(self: &Arc<Self>, request: Request) -> Result<()> {
        let Request { requester, command } = request;
        let location = requester.location;

        let required = command.required_level(self.settings.admin_level, self.settings.vote_level);
        if requester.level < required {
            return Err(DeskError::PermissionDenied(format!(
                "`{}` requires level {}",
                command, required.0
            )));
        }
        if command.is_input() && !self.limiter.is_restricted_location(location) {
            return Err(DeskError::PermissionDenied(
                "input is not accepted in this location".to_string(),
            ));
        }
        if let Some(remaining) = self.limiter.remaining(&requester.id) {
            return Err(DeskError::CoolingDown { remaining });
        }

        trace!("Request admitted");
        match command {
            DeskCommand::Reset => self.reset_and_report(location).await,
            DeskCommand::VoteReset => self.vote_reset(&requester).await,
            DeskCommand::Screenshot => self.screenshot(location, None).await.map(|_| ()),
            DeskCommand::Live(LiveToggle::On) => self.live_start(location).await,
            DeskCommand::Live(LiveToggle::Off) => self.live_stop(),
            DeskCommand::ListKeys => self.list_keys(location).await,
            DeskCommand::Mouse { dx, dy, dz, dw } => self.mouse(&requester, dx, dy, dz, dw).await,
            DeskCommand::Click { button } => self.click(&requester, &button).await,
            DeskCommand::Press { button } => self.press(&requester, &button).await,
            DeskCommand::Release => self.release(&requester).await,
            DeskCommand::Key { spec } => self.key(&requester, &spec).await,
        }
    }

    async fn notify(&self, location: LocationId, text: &str) {
        if let Err(e) = self.messenger.send(location, text, None).await {
            warn!(location = %location, error = %e, "Failed to deliver reply");
        }
    }

    /// Capture the screen and post it.
    ///
    /// With `replace`, the previous message is deleted first and the new one
    /// is posted in its place.
    pub async fn screenshot(
        &self,
        location: LocationId,
        replace: Option<&MessageRef>,
    ) -> Result<MessageRef> {
        let session = self.session();
        let display = self.settings.display;
        let (height, width) = session.screen_resolution(display).await?;
        let png = session
            .capture_screenshot(display, height, width, ImageFormat::Png)
            .await?;
        trace!(height, width, bytes = png.len(), "Captured screenshot");

        let location = match replace {
            Some(previous) => {
                self.messenger.delete(previous).await?;
                previous.location
            }
            None => location,
        };
        self.messenger
            .send(location, "", Some(Attachment::new(SCREENSHOT_FILENAME, png)))
            .await
    }

    /// Power down, restore the snapshot, relaunch headless and let it settle.
    ///
    /// A failed restore leaves the machine wherever it stopped; nothing is
    /// rolled back.
    pub async fn reset(&self) -> Result<()> {
        {
            let mut phase = self.phase.lock();
            if *phase != ResetPhase::Running {
                return Err(DeskError::Conflict("A reset is already running".to_string()));
            }
            *phase = ResetPhase::PoweringDown;
        }
        let _running = PhaseGuard(&self.phase);
        info!(vm = %self.settings.vm_name, snapshot = %self.settings.snapshot, "Resetting machine");

        let old = self.session();
        let bound = self.settings.power_down_timeout;
        match tokio::time::timeout(bound, old.power_down(bound)).await {
            Ok(Ok(())) => debug!("Machine powered down"),
            Ok(Err(e)) => warn!(error = %e, "Power-down failed, continuing"),
            Err(_) => warn!(timeout_ms = bound.as_millis() as u64, "Power-down still running, continuing"),
        }
        old.unlock().await?;
        drop(old);

        self.set_phase(ResetPhase::Restoring);
        let code = self
            .hypervisor
            .restore_snapshot(&self.settings.vm_name, &self.settings.snapshot)
            .await?;
        if code != 0 {
            return Err(DeskError::ResourceUnavailable(format!(
                "restoring snapshot `{}` exited with {}",
                self.settings.snapshot, code
            )));
        }

        self.set_phase(ResetPhase::Relaunching);
        let fresh = self.hypervisor.launch(LaunchMode::Headless).await?;
        *self.session.write() = fresh;

        tokio::time::sleep(self.settings.settle).await;
        info!(vm = %self.settings.vm_name, "Machine reset");
        Ok(())
    }

    async fn reset_and_report(&self, location: LocationId) -> Result<()> {
        let status = self.messenger.send(location, "Resetting...", None).await?;
        self.reset().await?;
        self.messenger.edit(&status, "Resetting... DONE!").await
    }

    /// Let the room decide on a reset. Only one vote runs at a time.
    async fn vote_reset(&self, requester: &Requester) -> Result<()> {
        if self.vote_in_flight.swap(true, Ordering::SeqCst) {
            return Err(DeskError::Conflict("A reset vote is already running".to_string()));
        }
        let _slot = VoteSlot(&self.vote_in_flight);

        let location = requester.location;
        let vote = VoteSession::start(
            self.messenger.as_ref(),
            &self.limiter,
            requester,
            location,
            self.settings.vote_window,
        )
        .await?;

        match vote.await_outcome(self.messenger.as_ref()).await? {
            VoteOutcome::Approved => {
                self.reset().await?;
                self.screenshot(location, None).await?;
            }
            VoteOutcome::Rejected => {}
        }
        Ok(())
    }

    /// Start streaming screenshots into `location`.
    ///
    /// If a stopped stream is still finishing a capture, waits for it to
    /// exit first.
    pub async fn live_start(self: &Arc<Self>, location: LocationId) -> Result<()> {
        loop {
            let previous = {
                let mut slot = self.live.lock();
                match slot.as_ref() {
                    Some(stream) if stream.is_running() => {
                        if !stream.is_stopping() {
                            return Err(DeskError::Conflict("Already live".to_string()));
                        }
                        stream.finished.clone()
                    }
                    _ => {
                        let cancel = CancellationToken::new();
                        let finished = CancellationToken::new();
                        let controller = Arc::clone(self);
                        let (token, done) = (cancel.clone(), finished.clone());
                        tokio::spawn(async move {
                            let _done = done.drop_guard();
                            controller.run_live(location, token).await
                        });
                        *slot = Some(LiveStream { cancel, finished });
                        info!(location = %location, "Live stream started");
                        return Ok(());
                    }
                }
            };
            debug!("Waiting for the previous live stream to exit");
            previous.cancelled().await;
        }
    }

    /// Stop the live stream at its next wait.
    pub fn live_stop(&self) -> Result<()> {
        match self.live.lock().as_ref() {
            Some(stream) if stream.is_running() && !stream.is_stopping() => {
                stream.cancel.cancel();
                info!("Live stream stopping");
                Ok(())
            }
            _ => Err(DeskError::Conflict("Not live".to_string())),
        }
    }

    async fn run_live(&self, location: LocationId, cancel: CancellationToken) {
        let mut frame = match self.screenshot(location, None).await {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Live stream failed to start");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.live_interval) => {}
            }
            match self.screenshot(location, Some(&frame)).await {
                Ok(next) => frame = next,
                Err(e) => {
                    error!(error = %e, "Live stream capture failed");
                    return;
                }
            }
        }
        debug!(location = %location, "Live stream stopped");
    }

    async fn list_keys(&self, location: LocationId) -> Result<()> {
        let mut names: Vec<String> = self
            .session()
            .known_key_names()
            .iter()
            .map(|name| name.escape_default().to_string())
            .collect();
        names.sort();
        self.messenger
            .send(location, &format!("```{}```", names.join(", ")), None)
            .await
            .map(|_| ())
    }

    /// Cooldown, then the locked resource call, then a confirmation
    /// screenshot. Payloads are validated before this is reached.
    async fn inject<F, Fut>(&self, requester: &Requester, action: F) -> Result<()>
    where
        F: FnOnce(Arc<dyn ConsoleSession>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        self.limiter.apply(requester).await;
        let session = self.session();
        self.lock.with_lock(|| action(session)).await?;
        self.screenshot(requester.location, None).await?;
        Ok(())
    }

    fn require_pointer(&self) -> Result<()> {
        if self.supports_pointer() {
            Ok(())
        } else {
            Err(DeskError::Unsupported(
                "Mouse input is not available on this desktop".to_string(),
            ))
        }
    }

    async fn mouse(&self, requester: &Requester, dx: i32, dy: i32, dz: i32, dw: i32) -> Result<()> {
        validate_movement(dx, dy)?;
        self.require_pointer()?;
        self.inject(requester, |session| async move {
            session.send_mouse_event(dx, dy, dz, dw, 0).await
        })
        .await
    }

    async fn click(&self, requester: &Requester, button: &str) -> Result<()> {
        let mask = MouseButton::parse(button)?.mask();
        self.require_pointer()?;
        self.inject(requester, |session| async move {
            session.send_mouse_event(0, 0, 0, 0, mask).await?;
            session.send_mouse_event(0, 0, 0, 0, 0).await
        })
        .await
    }

    async fn press(&self, requester: &Requester, button: &str) -> Result<()> {
        let mask = MouseButton::parse(button)?.mask();
        self.require_pointer()?;
        self.inject(requester, |session| async move {
            session.send_mouse_event(0, 0, 0, 0, mask).await
        })
        .await
    }

    async fn release(&self, requester: &Requester) -> Result<()> {
        self.require_pointer()?;
        self.inject(requester, |session| async move {
            session.send_mouse_event(0, 0, 0, 0, 0).await
        })
        .await
    }

    async fn key(&self, requester: &Requester, spec: &str) -> Result<()> {
        let chord = KeyChord::parse(spec, &self.session().known_key_names())?;
        self.inject(requester, |session| async move {
            session.send_key_event(&chord.press, &chord.hold).await
        })
        .await
    }
}
