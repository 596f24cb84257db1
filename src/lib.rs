pub mod audio;
mod commands;
pub mod db;
pub mod error;
mod notification;
pub mod reminders;
pub mod scheduler;
pub mod state;
pub mod types;

use std::sync::Arc;

use reminders::activation::WindowFocus;
use state::AppState;
use tauri::{
    menu::{Menu, MenuItem},
    tray::{MouseButton, MouseButtonState, TrayIconBuilder, TrayIconEvent},
    Manager, RunEvent,
};

#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let app = tauri::Builder::default()
        .plugin(tauri_plugin_notification::init())
        .setup(|app| {
            // Create shared state
            let state = Arc::new(AppState::new(app.handle())?);
            app.manage(state.clone());

            // Start reminder polling at the configured interval
            let scheduler_state = state.clone();
            tauri::async_runtime::spawn(async move {
                let interval = scheduler_state
                    .reminder_config()
                    .map(|c| c.poll_interval_minutes)
                    .unwrap_or(5);
                if let Err(e) = scheduler_state.scheduler.start(interval) {
                    log::error!("Failed to start reminder scheduler: {}", e);
                }
            });

            // Clicking a system notification confirms it and opens the app
            if let Some(activations) = state.route_notification_activations(app.handle()) {
                tauri::async_runtime::spawn(activations);
            }

            // Create tray menu
            let open_item = MenuItem::with_id(app, "open", "Open Rendezvous", true, None::<&str>)?;
            let check_item =
                MenuItem::with_id(app, "check_now", "Check Reminders Now", true, None::<&str>)?;
            let quit_item = MenuItem::with_id(app, "quit", "Quit", true, None::<&str>)?;
            let menu = Menu::with_items(app, &[&open_item, &check_item, &quit_item])?;

            let mut tray = TrayIconBuilder::new()
                .menu(&menu)
                .show_menu_on_left_click(false)
                .on_menu_event(move |app, event| match event.id.as_ref() {
                    "open" => app.focus_main_window(),
                    "check_now" => {
                        if let Some(state) = app.try_state::<Arc<AppState>>() {
                            let state = Arc::clone(&state);
                            tauri::async_runtime::spawn(async move {
                                if let Err(e) = state.engine.run_cycle().await {
                                    log::warn!("Manual reminder check failed: {}", e);
                                }
                            });
                        }
                    }
                    "quit" => {
                        app.exit(0);
                    }
                    _ => {}
                })
                .on_tray_icon_event(|tray, event| {
                    if let TrayIconEvent::Click {
                        button: MouseButton::Left,
                        button_state: MouseButtonState::Up,
                        ..
                    } = event
                    {
                        tray.app_handle().focus_main_window();
                    }
                });
            if let Some(icon) = app.default_window_icon().cloned() {
                tray = tray.icon(icon);
            }
            tray.build(app)?;

            // Handle window close: hide instead of quit
            if let Some(window) = app.get_webview_window("main") {
                let window_clone = window.clone();
                window.on_window_event(move |event| {
                    if let tauri::WindowEvent::CloseRequested { api, .. } = event {
                        api.prevent_close();
                        let _ = window_clone.hide();
                    }
                });
            }

            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            // Reminders
            commands::start_notification_check,
            commands::stop_notification_check,
            commands::check_upcoming_rendezvous,
            commands::confirm_notification,
            commands::acknowledge_from_notification,
            commands::reset_notification_state,
            commands::dismiss_notification,
            commands::get_notification_status,
            commands::get_reminder_config,
            commands::set_reminder_config,
            // Records
            commands::create_contact,
            commands::get_contacts,
            commands::get_appointments,
            commands::create_appointment,
            commands::update_appointment,
            commands::set_appointment_status,
            commands::delete_appointment,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application");

    app.run(|app, event| {
        if let RunEvent::Exit = event {
            if let Some(state) = app.try_state::<Arc<AppState>>() {
                state.shutdown();
            }
        }
    });
}
