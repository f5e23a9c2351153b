use crate::cli::RunArgs;
use crate::commands::{format_markers, load_config};
use crate::exit_codes;
use crate::output;
use crate::stimulus::{AnnouncingPlayer, ConsoleDisplay};
use eeg_sync::{
    create_device, DeviceConfig, ExperimentConfig, ExperimentController, ExperimentError,
    ExperimentEvent, ProtocolOutcome, SessionReport,
};
use std::sync::Arc;

/// Configuration file plus command-line overrides
fn build_config(args: &RunArgs) -> Result<ExperimentConfig, String> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(subject) = &args.subject {
        config.subject_id = subject.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(mac) = &args.mac_address {
        config.stream.mac_address = Some(mac.clone());
    }
    if let Some(ms) = args.poll_ms {
        config.acquisition.poll_interval_ms = ms;
    }
    args.protocol.apply(&mut config.protocol);

    match &mut config.device {
        DeviceConfig::Synthetic { options } => {
            if let Some(rate) = args.sample_rate {
                options.sample_rate = rate;
            }
            if let Some(channels) = args.channels {
                options.channels = channels;
            }
            if args.seed.is_some() {
                options.seed = args.seed;
            }
            if args.disconnect_after.is_some() {
                options.disconnect_after = args.disconnect_after;
            }
            if args.transient_every.is_some() {
                options.transient_every = args.transient_every;
            }
            options.reject_markers |= args.reject_markers;
        }
    }

    Ok(config)
}

fn print_progress(event: ExperimentEvent) {
    match event {
        ExperimentEvent::PhaseEntered { position, phase } => {
            eprintln!("[{:>2}] {}", position, phase);
        }
        ExperimentEvent::AcquisitionFailed { error } => {
            eprintln!("Acquisition failed: {}", error);
        }
        ExperimentEvent::NativeMarkerFailed { code, error } => {
            log::warn!("Device marker {} not tagged: {}", code, error);
        }
        ExperimentEvent::MarkerInserted(marker) => {
            log::debug!("Marker {} at sample {}", marker.code, marker.sample_index);
        }
        ExperimentEvent::Stats(stats) => {
            log::info!(
                "{} samples ({:.1}/s), {} markers, {} acquisition ticks",
                stats.samples_received,
                stats.data_rate_samples_per_sec,
                stats.markers_recorded,
                stats.acquisition_ticks
            );
        }
    }
}

fn print_report(report: &SessionReport) {
    println!("Session {} (subject {})", report.session_id, report.subject_id);
    match &report.outcome {
        ProtocolOutcome::Completed => println!("Protocol:  completed"),
        ProtocolOutcome::Aborted { during: Some(phase) } => {
            println!("Protocol:  ended early during {}", phase)
        }
        ProtocolOutcome::Aborted { during: None } => {
            println!("Protocol:  ended early between phases")
        }
    }
    println!(
        "Recorded:  {} samples ({:.1}s)",
        report.samples_recorded, report.recorded_seconds
    );
    println!("Markers:   {}", format_markers(&report.markers));
    println!(
        "Lag:       max {:.1} ms (bound {:.1} ms)",
        report.max_marker_lag_ms, report.marker_lag_bound_ms
    );
    if report.native_marker_failures > 0 {
        println!(
            "Device markers not tagged: {}",
            report.native_marker_failures
        );
    }
    if let Some(error) = &report.acquisition_error {
        println!("Acquisition error: {}", error);
    }
    for export in &report.persist.exports {
        match &export.error {
            None => println!("Saved {}: {}", export.format, export.path.display()),
            Some(e) => println!("FAILED {}: {}: {}", export.format, export.path.display(), e),
        }
    }
}

pub async fn execute(args: RunArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let device = create_device(config.device.clone());
    let controller = ExperimentController::new(
        config,
        device,
        Arc::new(ConsoleDisplay::new(args.quiet)),
        Arc::new(AnnouncingPlayer),
    );
    if !args.quiet {
        controller.set_event_callback(print_progress);
    }

    let quit = controller.quit_token();
    let quiet = args.quiet;
    let signals = tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => {
                    if !quiet {
                        eprintln!("Quit requested, finishing session...");
                    }
                    log::info!("Quit signal received");
                    quit.cancel();
                }
                Err(e) => log::warn!("Cannot listen for Ctrl-C: {}", e),
            },
            _ = quit.cancelled() => {}
        }
    });

    let result = controller.run().await;
    signals.abort();

    let report = match result {
        Ok(report) => report,
        Err(ExperimentError::Config(e)) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
        Err(ExperimentError::Acquisition(e)) => {
            eprintln!("Error: {}", e);
            return exit_codes::DEVICE_ERROR;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    if args.json {
        if let Err(code) = output::print_json(&report) {
            return code;
        }
    } else {
        print_report(&report);
    }

    if report.acquisition_error.is_some() || !report.persist.is_success() {
        exit_codes::PARTIAL_FAILURE
    } else {
        exit_codes::SUCCESS
    }
}
