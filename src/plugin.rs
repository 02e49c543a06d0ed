use tauri::{
    plugin::{Builder, PluginApi, TauriPlugin},
    AppHandle, Emitter, Manager, Runtime,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::commands;
use crate::error::{Error, Result};
use crate::models::{Config, ReceiverState};
use crate::session::ReceiverSession;

pub const STATE_EVENT: &str = "sfu-receiver://state";

/// Extensions to [`tauri::App`], [`tauri::AppHandle`] and [`tauri::Window`] to access the receiver.
pub trait SfuReceiverExt<R: Runtime> {
    fn sfu_receiver(&self) -> &SfuReceiver<R>;
}

impl<R: Runtime, T: Manager<R>> SfuReceiverExt<R> for T {
    fn sfu_receiver(&self) -> &SfuReceiver<R> {
        self.state::<SfuReceiver<R>>().inner()
    }
}

/// Initializes the plugin.
pub fn init<R: Runtime>() -> TauriPlugin<R, Option<Config>> {
    Builder::<R, Option<Config>>::new("sfu-receiver")
        .invoke_handler(tauri::generate_handler![
            commands::start_publishing,
            commands::stop_publishing,
            commands::get_receiver_state,
        ])
        .setup(|app, api| {
            let receiver = setup(app, api)?;
            app.manage(receiver);
            Ok(())
        })
        .build()
}

fn setup<R: Runtime>(
    app: &AppHandle<R>,
    api: PluginApi<R, Option<Config>>,
) -> Result<SfuReceiver<R>> {
    let config = api.config().clone().unwrap_or_default();
    // Fail at startup rather than on the first publish.
    config.endpoint()?;
    Ok(SfuReceiver {
        app: app.clone(),
        config,
        session: AsyncMutex::new(None),
    })
}

/// Plugin state: at most one live session at a time.
pub struct SfuReceiver<R: Runtime> {
    app: AppHandle<R>,
    config: Config,
    session: AsyncMutex<Option<ReceiverSession>>,
}

impl<R: Runtime> SfuReceiver<R> {
    pub async fn start_publishing(&self) -> Result<ReceiverState> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if !session.is_finished() {
                return Err(Error::AlreadyPublishing);
            }
        }

        let session = ReceiverSession::start_publishing(&self.config).await?;
        let mut updates = session.subscribe();
        let app = self.app.clone();
        let session_id = session.id().to_string();
        tauri::async_runtime::spawn(async move {
            while updates.changed().await.is_ok() {
                let state = updates.borrow_and_update().clone();
                if let Err(e) = app.emit(STATE_EVENT, state) {
                    log::warn!("[{}] Failed to emit receiver state: {}", session_id, e);
                }
            }
        });

        let state = session.state();
        *slot = Some(session);
        Ok(state)
    }

    pub async fn stop_publishing(&self) -> Result<ReceiverState> {
        let session = self.session.lock().await.take().ok_or(Error::NotPublishing)?;
        Ok(session.stop().await)
    }

    pub async fn state(&self) -> ReceiverState {
        self.session
            .lock()
            .await
            .as_ref()
            .map(ReceiverSession::state)
            .unwrap_or_default()
    }
}
