use crate::cli::ProtocolArgs;
use crate::commands::{format_markers, load_config};
use crate::exit_codes;
use crate::output;
use eeg_sync::{MarkerCode, PhaseTable};
use serde::Serialize;

#[derive(Serialize)]
struct PhaseRow {
    position: usize,
    phase: String,
    duration_secs: f64,
    message: String,
    song: Option<String>,
    start_marker: MarkerCode,
    end_marker: Option<MarkerCode>,
}

#[derive(Serialize)]
struct ProtocolOutput {
    phases: Vec<PhaseRow>,
    transition_gap_secs: f64,
    nominal_duration_secs: f64,
    expected_markers: Vec<MarkerCode>,
}

pub fn execute(args: ProtocolArgs) -> i32 {
    let mut config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };
    args.protocol.apply(&mut config.protocol);
    if let Err(e) = config.protocol.validate() {
        eprintln!("Error: {}", e);
        return exit_codes::INPUT_ERROR;
    }

    let table = PhaseTable::from_config(&config.protocol);
    let summary = ProtocolOutput {
        phases: table
            .phases()
            .iter()
            .enumerate()
            .map(|(position, spec)| PhaseRow {
                position,
                phase: spec.phase.to_string(),
                duration_secs: spec.duration.as_secs_f64(),
                message: spec.message.clone(),
                song: spec
                    .song
                    .as_ref()
                    .and_then(|song| song.path.as_ref())
                    .map(|path| path.display().to_string()),
                start_marker: spec.phase.start_marker(),
                end_marker: spec.phase.end_marker(),
            })
            .collect(),
        transition_gap_secs: table.transition_gap().as_secs_f64(),
        nominal_duration_secs: table.nominal_duration().as_secs_f64(),
        expected_markers: table.expected_markers(),
    };

    if args.json {
        return match output::print_json(&summary) {
            Ok(()) => exit_codes::SUCCESS,
            Err(code) => code,
        };
    }

    println!(
        "{:>3}  {:<20} {:>9}  {:<7}  {}",
        "#", "Phase", "Duration", "Markers", "Message"
    );
    println!("{}", "-".repeat(64));
    for row in &summary.phases {
        let markers = match row.end_marker {
            Some(end) => format!("{}/{}", row.start_marker, end),
            None => row.start_marker.to_string(),
        };
        println!(
            "{:>3}  {:<20} {:>8.1}s  {:<7}  {}",
            row.position, row.phase, row.duration_secs, markers, row.message
        );
    }
    println!();
    println!("Transition gap: {:.1}s", summary.transition_gap_secs);
    println!("Nominal duration: {:.1}s", summary.nominal_duration_secs);
    println!(
        "Expected markers: {}",
        format_markers(&summary.expected_markers)
    );

    exit_codes::SUCCESS
}
