use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tauri::AppHandle;

use crate::audio::CpalCuePlayer;
use crate::db::{SqliteStore, StoreAdapter};
use crate::notification::TauriNotifier;
use crate::reminders::activation::{route_activations, WindowFocus};
use crate::reminders::channels::{AudioChannel, EventSink, InAppChannel, SystemChannel};
use crate::reminders::dispatcher::{Dispatcher, NotificationChannel};
use crate::reminders::{ReminderConfig, ReminderEngine, SystemClock};
use crate::scheduler::PollScheduler;
use crate::types::Config;

/// Application state managed by Tauri
pub struct AppState {
    config_file: PathBuf,
    pub config: Mutex<Config>,
    pub engine: Arc<ReminderEngine>,
    pub scheduler: PollScheduler,
    /// Kept separately so the UI can close a notification without confirming it.
    pub in_app: Arc<InAppChannel>,
    cue_player: Option<Arc<CpalCuePlayer>>,
    notifier: Option<Arc<TauriNotifier>>,
}

/// Snapshot returned by `get_notification_status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStatus {
    pub running: bool,
    pub interval_minutes: Option<u64>,
    pub pending_deliveries: usize,
    pub channels: Vec<&'static str>,
    pub config: ReminderConfig,
}

impl AppState {
    pub fn new(app: &AppHandle) -> Result<Self, String> {
        let config_file = config_path()?;
        let config = load_config_or_default(&config_file);

        let store = match &config.database_path {
            Some(path) => SqliteStore::at(PathBuf::from(path)),
            None => SqliteStore::open_default()
                .map_err(|e| format!("Failed to locate database: {}", e))?,
        };
        log::info!("Appointment store: {}", store.path().display());

        let cue_player = Arc::new(CpalCuePlayer::new(config.reminders.sound_path.as_deref()));
        let notifier = Arc::new(TauriNotifier::new(app.clone()));
        let in_app = Arc::new(InAppChannel::new(Arc::new(app.clone())));
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(AudioChannel::new(cue_player.clone())),
            Arc::new(SystemChannel::new(notifier.clone())),
            in_app.clone(),
        ];

        let mut state = Self::assemble(
            config_file,
            config,
            Arc::new(store),
            channels,
            in_app,
            Some(cue_player),
        )?;
        state.notifier = Some(notifier);
        Ok(state)
    }

    fn assemble(
        config_file: PathBuf,
        config: Config,
        store: Arc<dyn StoreAdapter>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        in_app: Arc<InAppChannel>,
        cue_player: Option<Arc<CpalCuePlayer>>,
    ) -> Result<Self, String> {
        let dispatcher = Dispatcher::new(channels, config.reminders.redelivery_policy());
        let engine = Arc::new(
            ReminderEngine::new(store, dispatcher, Arc::new(SystemClock), config.reminders.clone())
                .map_err(|e| e.to_string())?,
        );
        let scheduler = PollScheduler::new(Arc::clone(&engine));

        Ok(Self {
            config_file,
            config: Mutex::new(config),
            engine,
            scheduler,
            in_app,
            cue_player,
            notifier: None,
        })
    }

    /// Connect system notification activations to the engine. The returned
    /// future must be spawned; `None` when no system notifier is attached.
    pub fn route_notification_activations(
        &self,
        app: &AppHandle,
    ) -> Option<impl Future<Output = ()> + Send + 'static> {
        let notifier = self.notifier.as_ref()?;
        let ui: Arc<dyn EventSink> = Arc::new(app.clone());
        let focus: Arc<dyn WindowFocus> = Arc::new(app.clone());
        Some(route_activations(
            notifier.as_ref(),
            Arc::clone(&self.engine),
            ui,
            focus,
        ))
    }

    /// Forward an activation reported by the webview. Returns whether it was routed.
    pub fn notification_activated(&self, appointment_id: i64) -> bool {
        match &self.notifier {
            Some(notifier) => notifier.activated(appointment_id),
            None => {
                log::warn!(
                    "Notification activation for {} ignored: no system notifier",
                    appointment_id
                );
                false
            }
        }
    }

    pub fn reminder_config(&self) -> Result<ReminderConfig, String> {
        let guard = self.config.lock().map_err(|_| "Lock poisoned")?;
        Ok(guard.reminders.clone())
    }

    /// Validate, persist and apply new reminder settings.
    ///
    /// A running scheduler is restarted when the poll interval changes.
    pub fn update_reminder_config(
        &self,
        reminders: ReminderConfig,
    ) -> Result<ReminderConfig, String> {
        reminders.validate().map_err(|e| e.to_string())?;

        let mut guard = self.config.lock().map_err(|_| "Lock poisoned")?;
        let mut config = guard.clone();
        let previous = std::mem::replace(&mut config.reminders, reminders.clone());

        save_config(&self.config_file, &config)?;
        self.engine
            .apply_config(reminders.clone())
            .map_err(|e| e.to_string())?;
        *guard = config;
        drop(guard);

        if previous.sound_path != reminders.sound_path {
            if let Some(player) = &self.cue_player {
                player.set_sound_path(reminders.sound_path.as_deref());
            }
        }
        if previous.poll_interval_minutes != reminders.poll_interval_minutes
            && self.scheduler.is_running()
        {
            self.scheduler
                .start(reminders.poll_interval_minutes)
                .map_err(|e| e.to_string())?;
        }

        log::info!("Reminder settings updated");
        Ok(reminders)
    }

    pub fn notification_status(&self) -> Result<NotificationStatus, String> {
        Ok(NotificationStatus {
            running: self.scheduler.is_running(),
            interval_minutes: self.scheduler.interval().map(|d| d.as_secs() / 60),
            pending_deliveries: self.engine.dispatcher().pending().len(),
            channels: self.engine.dispatcher().channel_names(),
            config: self.reminder_config()?,
        })
    }

    /// Stop polling and drop in-memory delivery state.
    pub fn shutdown(&self) {
        self.scheduler.stop();
        self.engine.shutdown();
    }
}

/// Get the canonical config file path (~/.rendezvous/config.json)
pub fn config_path() -> Result<PathBuf, String> {
    let home = dirs::home_dir().ok_or("Could not find home directory")?;
    Ok(home.join(".rendezvous").join("config.json"))
}

/// Load configuration from `path`. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config, String> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path).map_err(|e| format!("Failed to read config: {}", e))?;
    let config: Config =
        serde_json::from_str(&content).map_err(|e| format!("Failed to parse config: {}", e))?;
    config.reminders.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn load_config_or_default(path: &Path) -> Config {
    load_config(path).unwrap_or_else(|e| {
        log::warn!("{} ({}); using default settings", e, path.display());
        Config::default()
    })
}

/// Write config.json atomically: temp file, then rename over the original.
pub fn save_config(path: &Path, config: &Config) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| format!("Failed to create config dir: {}", e))?;
        }
    }

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content).map_err(|e| format!("Failed to write config: {}", e))?;
    fs::rename(&tmp, path).map_err(|e| format!("Failed to replace config: {}", e))?;
    Ok(())
}
