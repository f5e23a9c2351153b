// Display and audio collaborators driven by the protocol
//
// Rendering text and playing audio are external services; the protocol only
// needs these two narrow interfaces. Audio completion is never waited on: the
// phase timer decides when a trial ends and playback is stopped to match.

use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};

/// Shows protocol instructions to the subject
pub trait MessageDisplay: Send + Sync {
    /// Fire-and-forget; assumed near-instant
    fn show_message(&self, text: &str);
}

/// Plays the stimulus of a listening trial
pub trait AudioPlayer: Send + Sync {
    /// Start playback; expected to begin within a small bounded latency
    fn play(&self, song: &Song) -> Result<(), String>;

    /// Stop whatever is playing; stopping silence is a no-op
    fn stop(&self);
}

/// One stimulus of the listening protocol
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Song {
    /// 1-based song number
    pub number: usize,

    /// Audio file, when a song directory is configured
    pub path: Option<PathBuf>,
}

/// Maps song numbers onto files named song001.mp3, song002.mp3, ...
#[derive(Debug, Clone, Default)]
pub struct SongLibrary {
    directory: Option<PathBuf>,
}

impl SongLibrary {
    pub fn new(directory: Option<PathBuf>) -> Self {
        Self { directory }
    }

    pub fn file_name(number: usize) -> String {
        format!("song{:03}.mp3", number)
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn song(&self, number: usize) -> Song {
        Song {
            number,
            path: self
                .directory
                .as_ref()
                .map(|dir| dir.join(Self::file_name(number))),
        }
    }

    /// Check that songs 1..=count exist before anything starts
    pub fn verify(&self, count: usize) -> ConfigResult<()> {
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        if !directory.is_dir() {
            return Err(ConfigError::Invalid(format!(
                "song directory not found: {}",
                directory.display()
            )));
        }
        for number in 1..=count {
            let path = directory.join(Self::file_name(number));
            if !path.is_file() {
                return Err(ConfigError::SongMissing(path.display().to_string()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_song_file_naming() {
        assert_eq!(SongLibrary::file_name(1), "song001.mp3");
        assert_eq!(SongLibrary::file_name(42), "song042.mp3");

        let library = SongLibrary::new(Some(PathBuf::from("songs")));
        assert_eq!(
            library.song(2).path,
            Some(PathBuf::from("songs").join("song002.mp3"))
        );
        assert_eq!(SongLibrary::default().song(2).path, None);
    }

    #[test]
    fn test_verify_reports_first_missing_song() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("song001.mp3"), b"").unwrap();
        let library = SongLibrary::new(Some(dir.path().to_path_buf()));

        assert!(library.verify(1).is_ok());
        match library.verify(2) {
            Err(ConfigError::SongMissing(path)) => assert!(path.ends_with("song002.mp3")),
            other => panic!("expected missing song, got {:?}", other),
        }
    }

    #[test]
    fn test_verify_without_directory() {
        assert!(SongLibrary::default().verify(5).is_ok());
    }
}
