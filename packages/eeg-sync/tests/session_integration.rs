use eeg_sync::{
    read_edf, read_tabular, DeviceConfig, EegDevice, ExperimentConfig, ExperimentController,
    ExperimentEvent, MarkerCode, MessageDisplay, AudioPlayer, ProtocolOutcome, ProtocolPhase,
    Song, SyntheticDevice, SyntheticOptions, create_device,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use MarkerCode::*;

#[derive(Default)]
struct Recorder {
    messages: Mutex<Vec<String>>,
    songs: Mutex<Vec<usize>>,
}

impl MessageDisplay for Recorder {
    fn show_message(&self, text: &str) {
        self.messages.lock().push(text.to_string());
    }
}

impl AudioPlayer for Recorder {
    fn play(&self, song: &Song) -> Result<(), String> {
        self.songs.lock().push(song.number);
        Ok(())
    }

    fn stop(&self) {}
}

fn config(dir: &TempDir, options: SyntheticOptions) -> ExperimentConfig {
    ExperimentConfig {
        subject_id: "P07".to_string(),
        output_dir: dir.path().to_path_buf(),
        device: DeviceConfig::Synthetic {
            options: SyntheticOptions {
                seed: Some(11),
                ..options
            },
        },
        ..Default::default()
    }
}

fn controller(config: ExperimentConfig) -> (ExperimentController, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let device = create_device(config.device.clone());
    let controller = ExperimentController::new(config, device, recorder.clone(), recorder.clone());
    (controller, recorder)
}

fn default_markers() -> Vec<MarkerCode> {
    let mut expected = vec![RestStart, RestEnd];
    for _ in 0..4 {
        expected.extend([TrialStart, TrialEnd, RestStart, RestEnd]);
    }
    expected.extend([TrialStart, TrialEnd, ExperimentEnd]);
    expected
}

#[tokio::test(start_paused = true)]
async fn test_full_default_protocol_is_recorded_and_persisted() {
    let dir = TempDir::new().unwrap();
    let (controller, recorder) = controller(config(&dir, SyntheticOptions::default()));

    let report = controller.run().await.unwrap();

    assert!(report.is_clean(), "{:?}", report);
    assert_eq!(report.outcome, ProtocolOutcome::Completed);
    assert_eq!(report.markers, default_markers());
    assert_eq!(report.phases.len(), 11);
    assert_eq!(*recorder.songs.lock(), vec![1, 2, 3, 4, 5]);
    assert_eq!(recorder.messages.lock()[0], "Relax with eyes closed");
    // 255 s of protocol at 250 Hz
    assert!(report.samples_recorded >= 255 * 250);
    assert!(report.max_marker_lag_ms <= report.marker_lag_bound_ms);

    let csv = read_tabular(&dir.path().join("P07_eeg_data.csv")).unwrap();
    let edf = read_edf(&dir.path().join("P07_eeg_data.raw.edf")).unwrap();
    assert_eq!(csv.num_samples(), report.samples_recorded);
    assert_eq!(csv.marker_codes(), default_markers());
    assert_eq!(csv.channel_names, vec!["A2", "A1", "C4", "C3"]);
    assert!(csv.compare(&edf).is_empty(), "{:?}", csv.compare(&edf));

    // Markers are correlated with samples that exist, in protocol order
    for loaded in [&csv, &edf] {
        assert!(loaded
            .markers
            .windows(2)
            .all(|w| w[0].sample_index <= w[1].sample_index && w[0].onset <= w[1].onset));
        assert!(loaded
            .markers
            .iter()
            .all(|m| (m.sample_index as usize) < loaded.num_samples()));
    }
}

#[tokio::test(start_paused = true)]
async fn test_quit_during_second_trial_still_closes_marker_sequence() {
    let dir = TempDir::new().unwrap();
    let (controller, _recorder) = controller(config(&dir, SyntheticOptions::default()));
    let quit = controller.quit_token();

    tokio::spawn(async move {
        // Trial 2 starts 101.5 s in
        tokio::time::sleep(Duration::from_secs(110)).await;
        quit.cancel();
    });
    let report = controller.run().await.unwrap();

    assert_eq!(
        report.outcome,
        ProtocolOutcome::Aborted {
            during: Some(ProtocolPhase::TrialListening(2))
        }
    );
    assert_eq!(
        report.markers,
        vec![RestStart, RestEnd, TrialStart, TrialEnd, RestStart, RestEnd, TrialStart, TrialEnd, ExperimentEnd]
    );
    assert!(report.acquisition_error.is_none());
    assert!(report.persist.is_success());

    let csv = read_tabular(&dir.path().join("P07_eeg_data.csv")).unwrap();
    assert_eq!(csv.marker_codes(), report.markers);
    assert_eq!(csv.num_samples(), 110 * 250);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_persists_partial_session() {
    let dir = TempDir::new().unwrap();
    let (controller, _recorder) = controller(config(
        &dir,
        SyntheticOptions {
            disconnect_after: Some(2_000),
            ..Default::default()
        },
    ));
    let failures = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&failures);
    controller.set_event_callback(move |event| {
        if matches!(event, ExperimentEvent::AcquisitionFailed { .. }) {
            seen.fetch_add(1, Ordering::Relaxed);
        }
    });

    let report = controller.run().await.unwrap();

    assert_eq!(failures.load(Ordering::Relaxed), 1);
    assert!(report.acquisition_error.is_some());
    assert!(!report.is_clean());
    assert_eq!(report.samples_recorded, 2_000);
    assert_eq!(
        report.outcome,
        ProtocolOutcome::Aborted {
            during: Some(ProtocolPhase::RelaxClosedEyes)
        }
    );
    assert_eq!(report.markers, vec![RestStart, RestEnd, ExperimentEnd]);

    // Whatever was captured is on disk in both formats
    assert!(report.persist.is_success(), "{:?}", report.persist);
    let edf = read_edf(&dir.path().join("P07_eeg_data.raw.edf")).unwrap();
    assert_eq!(edf.num_samples(), 2_000);
    assert_eq!(edf.marker_codes(), report.markers);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_native_markers_are_not_fatal() {
    let dir = TempDir::new().unwrap();
    let mut config = config(
        &dir,
        SyntheticOptions {
            reject_markers: true,
            ..Default::default()
        },
    );
    config.protocol.relax_secs = 2.0;
    config.protocol.trial_secs = 2.0;
    config.protocol.rest_secs = 1.0;
    config.protocol.num_trials = 2;
    let (controller, _recorder) = controller(config);

    let report = controller.run().await.unwrap();

    assert!(report.is_clean());
    assert_eq!(
        report.markers,
        vec![RestStart, RestEnd, TrialStart, TrialEnd, RestStart, RestEnd, TrialStart, TrialEnd, ExperimentEnd]
    );
    assert_eq!(report.native_marker_failures, 9);
}

#[tokio::test(start_paused = true)]
async fn test_native_markers_mirror_software_log() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir, SyntheticOptions::default());
    config.protocol.num_trials = 1;
    config.protocol.relax_secs = 1.0;
    config.protocol.trial_secs = 1.0;

    let device = Arc::new(SyntheticDevice::new(SyntheticOptions {
        seed: Some(2),
        ..Default::default()
    }));
    let recorder = Arc::new(Recorder::default());
    let controller = ExperimentController::new(
        config,
        Arc::clone(&device) as Arc<dyn EegDevice>,
        recorder.clone(),
        recorder,
    );

    let report = controller.run().await.unwrap();

    // The terminal marker is tagged while the stream is still up
    let native: Vec<_> = device.native_markers().into_iter().map(|(_, code)| code).collect();
    assert_eq!(native, report.markers);
    assert_eq!(report.native_marker_failures, 0);
}
