// Terminal stand-ins for the subject display and the audio player

use eeg_sync::{AudioPlayer, MessageDisplay, Song};

/// Shows protocol messages on stderr
pub struct ConsoleDisplay {
    quiet: bool,
}

impl ConsoleDisplay {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl MessageDisplay for ConsoleDisplay {
    fn show_message(&self, text: &str) {
        log::info!("Display: {}", text);
        if !self.quiet {
            eprintln!("\n    {}\n", text);
        }
    }
}

/// Announces songs instead of playing them
///
/// Missing files were already rejected before the session started.
pub struct AnnouncingPlayer;

impl AudioPlayer for AnnouncingPlayer {
    fn play(&self, song: &Song) -> Result<(), String> {
        match &song.path {
            Some(path) => log::info!("Playing song {} from {}", song.number, path.display()),
            None => log::info!("Playing song {} (no song directory configured)", song.number),
        }
        Ok(())
    }

    fn stop(&self) {
        log::debug!("Playback stopped");
    }
}
