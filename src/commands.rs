use tauri::{command, AppHandle, Runtime};

use crate::models::ReceiverState;
use crate::Result;
use crate::SfuReceiverExt;

#[command]
pub(crate) async fn start_publishing<R: Runtime>(app: AppHandle<R>) -> Result<ReceiverState> {
    app.sfu_receiver().start_publishing().await
}

#[command]
pub(crate) async fn stop_publishing<R: Runtime>(app: AppHandle<R>) -> Result<ReceiverState> {
    app.sfu_receiver().stop_publishing().await
}

#[command]
pub(crate) async fn get_receiver_state<R: Runtime>(app: AppHandle<R>) -> Result<ReceiverState> {
    Ok(app.sfu_receiver().state().await)
}
