//! Keeps the app's idea of the camera's recording state in line with
//! the camera.
//!
//! The firmware has a single record *toggle*, so sending it blindly can
//! do the opposite of what the user asked.  Every toggle request first
//! re-reads the camera's status and then either sends one command or
//! only syncs local state.  A background poll catches changes the camera
//! makes on its own (card full, button press on the device).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use dashlink_common::config::Config;
use dashlink_common::model::DeviceStatus;

use crate::error::CameraError;
use crate::protocol::CameraProtocol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordCommand {
    Start,
    Stop,
}

/// What a status poll does to the app's recording flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    Keep,
    Sync(bool),
}

/// What a user toggle turns into once the camera's state is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleAction {
    /// Only the local flag changes; nothing is sent.
    Sync(bool),
    Send(RecordCommand),
}

/// Poll arbitration: the camera wins whenever the two disagree.
pub fn on_poll(app_recording: bool, camera_recording: bool) -> PollAction {
    if app_recording == camera_recording {
        PollAction::Keep
    } else {
        PollAction::Sync(camera_recording)
    }
}

/// Toggle arbitration.
///
/// When the app and the camera agree, the user's toggle is a real
/// command.  When they disagree the app was stale, so the toggle only
/// catches up with the camera.
pub fn on_toggle(app_recording: bool, camera_recording: bool) -> ToggleAction {
    match (app_recording, camera_recording) {
        (true, true) => ToggleAction::Send(RecordCommand::Stop),
        (true, false) => ToggleAction::Sync(false),
        (false, true) => ToggleAction::Sync(true),
        (false, false) => ToggleAction::Send(RecordCommand::Start),
    }
}

/// `MM:SS`; minutes keep counting past an hour.
pub fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Reconciler {
    protocol: Arc<dyn CameraProtocol>,
    poll_interval: Duration,
    settle: Duration,
    recording: watch::Sender<bool>,
    has_sd_card: watch::Sender<bool>,
    audio_enabled: watch::Sender<bool>,
    last_command: Mutex<Option<Instant>>,
    recording_since: Mutex<Option<Instant>>,
}

impl Reconciler {
    pub fn new(protocol: Arc<dyn CameraProtocol>, config: &Config) -> Self {
        let defaults = DeviceStatus::default();
        Self {
            protocol,
            poll_interval: config.status_poll_interval(),
            settle: config.command_settle(),
            recording: watch::channel(defaults.is_recording).0,
            has_sd_card: watch::channel(defaults.has_sd_card).0,
            // Cameras ship with the microphone on.
            audio_enabled: watch::channel(true).0,
            last_command: Mutex::new(None),
            recording_since: Mutex::new(None),
        }
    }

    pub fn recording(&self) -> watch::Receiver<bool> {
        self.recording.subscribe()
    }

    pub fn has_sd_card(&self) -> watch::Receiver<bool> {
        self.has_sd_card.subscribe()
    }

    pub fn audio_enabled(&self) -> watch::Receiver<bool> {
        self.audio_enabled.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        *self.recording.borrow()
    }

    /// Time since recording started as `MM:SS`, `00:00` when idle.
    pub fn recording_duration(&self) -> String {
        match *lock(&self.recording_since) {
            Some(since) => format_duration(since.elapsed()),
            None => format_duration(Duration::ZERO),
        }
    }

    /// Forget everything learned from the last connection.
    pub fn reset(&self) {
        *lock(&self.last_command) = None;
        self.set_recording(false);
        self.has_sd_card.send_if_modified(|v| !std::mem::replace(v, true));
    }

    fn set_recording(&self, value: bool) {
        {
            let mut since = lock(&self.recording_since);
            match (value, *since) {
                (true, None) => *since = Some(Instant::now()),
                (false, Some(_)) => *since = None,
                _ => {}
            }
        }
        self.recording
            .send_if_modified(|v| std::mem::replace(v, value) != value);
    }

    fn publish_sd_card(&self, present: bool) {
        self.has_sd_card
            .send_if_modified(|v| std::mem::replace(v, present) != present);
    }

    fn mark_command(&self) {
        *lock(&self.last_command) = Some(Instant::now());
    }

    /// A poll result is stale when the poll began before the last
    /// command, or when it lands inside the settle window.
    fn settling(&self, poll_started: Instant) -> bool {
        match *lock(&self.last_command) {
            Some(at) => poll_started < at || at.elapsed() < self.settle,
            None => false,
        }
    }

    /// One status poll.  SD-card presence is published as is; the
    /// recording flag goes through [`on_poll`].
    pub async fn poll_once(&self) -> Result<DeviceStatus, CameraError> {
        let started = Instant::now();
        let status = self.protocol.device_status().await?;

        self.publish_sd_card(status.has_sd_card);

        match on_poll(self.is_recording(), status.is_recording) {
            PollAction::Keep => {}
            PollAction::Sync(_) if self.settling(started) => {
                debug!("Ignoring recording state from poll inside the command window");
            }
            PollAction::Sync(value) => {
                info!(
                    "Camera {} recording on its own",
                    if value { "started" } else { "stopped" }
                );
                self.set_recording(value);
            }
        }
        Ok(status)
    }

    /// Flip recording based on a fresh status read.  At most one command
    /// is sent.
    pub async fn toggle_recording(&self) -> Result<ToggleAction, CameraError> {
        self.mark_command();
        let status = self.protocol.device_status().await?;
        self.publish_sd_card(status.has_sd_card);

        let action = on_toggle(self.is_recording(), status.is_recording);
        match action {
            ToggleAction::Sync(value) => {
                info!("Recording state was stale; now {value}");
                self.set_recording(value);
            }
            ToggleAction::Send(command) => self.send(command).await?,
        }
        self.mark_command();
        Ok(action)
    }

    /// Send `command` without consulting the camera first.
    pub async fn send(&self, command: RecordCommand) -> Result<(), CameraError> {
        self.mark_command();
        match command {
            RecordCommand::Start => self.protocol.start_recording().await?,
            RecordCommand::Stop => self.protocol.stop_recording().await?,
        }
        self.mark_command();
        self.set_recording(command == RecordCommand::Start);
        info!("Recording {}", if command == RecordCommand::Start { "started" } else { "stopped" });
        Ok(())
    }

    /// Set audio recording; the flag changes only if the camera accepts.
    pub async fn set_audio(&self, enabled: bool) -> Result<(), CameraError> {
        self.protocol.set_audio_recording(enabled).await?;
        self.audio_enabled.send_replace(enabled);
        info!("Audio recording {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    /// Flip audio recording and return the new value.
    pub async fn toggle_audio(&self) -> Result<bool, CameraError> {
        let enabled = !*self.audio_enabled.borrow();
        self.set_audio(enabled).await?;
        Ok(enabled)
    }

    /// Poll until `token` is cancelled.  Failed polls are skipped.
    pub async fn run(&self, token: CancellationToken) {
        debug!("Status polling every {:?}", self.poll_interval);
        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = self.poll_once() => result,
            };
            if let Err(e) = result {
                debug!("Status poll failed: {e}");
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!("Status polling stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::NovatekProtocol;
    use crate::testing::{test_config, FakeCamera};

    #[test]
    fn test_poll_table() {
        assert_eq!(on_poll(true, true), PollAction::Keep);
        assert_eq!(on_poll(true, false), PollAction::Sync(false));
        assert_eq!(on_poll(false, true), PollAction::Sync(true));
        assert_eq!(on_poll(false, false), PollAction::Keep);
    }

    #[test]
    fn test_toggle_table() {
        assert_eq!(on_toggle(true, true), ToggleAction::Send(RecordCommand::Stop));
        assert_eq!(on_toggle(true, false), ToggleAction::Sync(false));
        assert_eq!(on_toggle(false, true), ToggleAction::Sync(true));
        assert_eq!(on_toggle(false, false), ToggleAction::Send(RecordCommand::Start));
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "00:00");
        assert_eq!(format_duration(Duration::from_secs(75)), "01:15");
        assert_eq!(format_duration(Duration::from_millis(59_999)), "00:59");
        assert_eq!(format_duration(Duration::from_secs(3725)), "62:05");
    }

    async fn setup(config: &Config) -> (FakeCamera, Reconciler) {
        let camera = FakeCamera::start().await;
        let protocol = NovatekProtocol::new(config).unwrap();
        protocol.connect(camera.address()).await.unwrap();
        (camera, Reconciler::new(Arc::new(protocol), config))
    }

    #[tokio::test]
    async fn test_toggle_sends_start_then_stop() {
        let (camera, reconciler) = setup(&test_config()).await;

        let action = reconciler.toggle_recording().await.unwrap();
        assert_eq!(action, ToggleAction::Send(RecordCommand::Start));
        assert!(camera.recording());
        assert!(reconciler.is_recording());

        let action = reconciler.toggle_recording().await.unwrap();
        assert_eq!(action, ToggleAction::Send(RecordCommand::Stop));
        assert!(!camera.recording());
        assert!(!reconciler.is_recording());
        assert_eq!(camera.count("property=Video&value=record"), 2);
    }

    #[tokio::test]
    async fn test_toggle_on_stale_state_only_syncs() {
        let (camera, reconciler) = setup(&test_config()).await;
        camera.with(|fw| fw.recording = true);

        let action = reconciler.toggle_recording().await.unwrap();
        assert_eq!(action, ToggleAction::Sync(true));
        assert!(reconciler.is_recording());
        assert!(camera.recording());
        assert_eq!(camera.count("property=Video&value=record"), 0);
    }

    #[tokio::test]
    async fn test_poll_follows_camera() {
        let mut config = test_config();
        config.command_settle_ms = 0;
        let (camera, reconciler) = setup(&config).await;
        let mut recording = reconciler.recording();

        camera.with(|fw| fw.recording = true);
        reconciler.poll_once().await.unwrap();
        assert!(recording.has_changed().unwrap());
        assert!(*recording.borrow_and_update());
        assert_eq!(reconciler.recording_duration(), "00:00");

        camera.with(|fw| fw.recording = false);
        reconciler.poll_once().await.unwrap();
        assert!(!*recording.borrow_and_update());
    }

    #[tokio::test]
    async fn test_poll_inside_settle_window_keeps_intent() {
        let (camera, reconciler) = setup(&test_config()).await;
        reconciler.send(RecordCommand::Start).await.unwrap();

        // The camera has not caught up yet.
        camera.with(|fw| fw.recording = false);
        reconciler.poll_once().await.unwrap();
        assert!(reconciler.is_recording());
    }

    #[tokio::test]
    async fn test_poll_started_before_command_is_ignored() {
        let mut config = test_config();
        config.command_settle_ms = 0;
        let (camera, reconciler) = setup(&config).await;
        camera.with(|fw| fw.delay = Duration::from_millis(300));

        // The poll reads "Standby" before the start lands and finishes
        // well after it.
        let (polled, sent) = tokio::join!(reconciler.poll_once(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            reconciler.send(RecordCommand::Start).await
        });
        sent.unwrap();
        assert!(!polled.unwrap().is_recording);
        assert!(camera.recording());
        assert!(reconciler.is_recording());
    }

    #[tokio::test]
    async fn test_poll_publishes_sd_card() {
        let (camera, reconciler) = setup(&test_config()).await;
        camera.with(|fw| fw.sd_reply = "Camera.Menu.SD0=Insert_SD".into());
        let status = reconciler.poll_once().await.unwrap();
        assert!(!status.has_sd_card);
        assert!(!*reconciler.has_sd_card().borrow());
    }

    #[tokio::test]
    async fn test_failed_poll_changes_nothing() {
        let (camera, reconciler) = setup(&test_config()).await;
        camera.with(|fw| {
            fw.recording = true;
            fw.fail.push("status.record".into());
        });
        assert!(reconciler.poll_once().await.is_err());
        assert!(!reconciler.is_recording());
    }

    #[tokio::test]
    async fn test_failed_toggle_keeps_state() {
        let (camera, reconciler) = setup(&test_config()).await;
        camera.with(|fw| fw.reject.push("property=Video".into()));
        assert!(reconciler.toggle_recording().await.is_err());
        assert!(!reconciler.is_recording());
        assert_eq!(reconciler.recording_duration(), "00:00");
    }

    #[tokio::test]
    async fn test_toggle_audio_commits_on_success_only() {
        let (camera, reconciler) = setup(&test_config()).await;
        assert!(*reconciler.audio_enabled().borrow());

        assert!(!reconciler.toggle_audio().await.unwrap());
        assert_eq!(camera.count("property=SoundRecord&value=Off"), 1);

        camera.with(|fw| fw.reject.push("SoundRecord".into()));
        assert!(reconciler.toggle_audio().await.is_err());
        assert!(!*reconciler.audio_enabled().borrow());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (camera, reconciler) = setup(&test_config()).await;
        let reconciler = Arc::new(reconciler);
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let reconciler = reconciler.clone();
            let token = token.clone();
            async move { reconciler.run(token).await }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(camera.count("status.record"), 1);

        token.cancel();
        task.await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(camera.count("status.record"), 1);
    }
}
