#[cfg(feature = "plugin")]
const COMMANDS: &[&str] = &["start_publishing", "stop_publishing", "get_receiver_state"];

fn main() {
    #[cfg(feature = "plugin")]
    tauri_plugin::Builder::new(COMMANDS).build();
}
