use crate::cli::InspectArgs;
use crate::commands::format_markers;
use crate::exit_codes;
use crate::output;
use eeg_sync::{read_edf, read_tabular, LoadedSession, MarkerCode};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Serialize)]
struct FileSummary {
    path: String,
    format: String,
    channels: Vec<String>,
    samples: usize,
    sample_rate: Option<f64>,
    markers: Vec<MarkerCode>,
}

impl FileSummary {
    fn new(path: &Path, session: &LoadedSession) -> Self {
        Self {
            path: path.display().to_string(),
            format: session.format.clone(),
            channels: session.channel_names.clone(),
            samples: session.num_samples(),
            sample_rate: session.sample_rate,
            markers: session.marker_codes(),
        }
    }
}

#[derive(Serialize)]
struct InspectOutput {
    tabular: FileSummary,
    edf: FileSummary,
    consistent: bool,
    issues: Vec<String>,
}

fn session_paths(args: &InspectArgs) -> Result<(PathBuf, PathBuf), String> {
    let stem = args.subject.as_ref().map(|s| format!("{}_eeg_data", s));
    let pick = |explicit: &Option<PathBuf>, extension: &str| match (explicit, &stem) {
        (Some(path), _) => Ok(path.clone()),
        (None, Some(stem)) => Ok(args.dir.join(format!("{}.{}", stem, extension))),
        (None, None) => Err("either --subject or both --csv and --edf are required".to_string()),
    };
    Ok((pick(&args.csv, "csv")?, pick(&args.edf, "raw.edf")?))
}

pub fn execute(args: InspectArgs) -> i32 {
    let (csv_path, edf_path) = match session_paths(&args) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let tabular = match read_tabular(&csv_path) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}: {}", csv_path.display(), e);
            return exit_codes::INPUT_ERROR;
        }
    };
    let edf = match read_edf(&edf_path) {
        Ok(session) => session,
        Err(e) => {
            eprintln!("Error: {}: {}", edf_path.display(), e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let issues = tabular.compare(&edf);
    let summary = InspectOutput {
        tabular: FileSummary::new(&csv_path, &tabular),
        edf: FileSummary::new(&edf_path, &edf),
        consistent: issues.is_empty(),
        issues,
    };

    if args.json {
        if let Err(code) = output::print_json(&summary) {
            return code;
        }
    } else {
        for file in [&summary.tabular, &summary.edf] {
            println!("{} ({})", file.path, file.format);
            println!("  Channels: {}", file.channels.join(", "));
            println!("  Samples:  {}", file.samples);
            if let Some(rate) = file.sample_rate {
                println!("  Rate:     {} Hz", rate);
            }
            println!("  Markers:  {}", format_markers(&file.markers));
        }
        println!();
        if summary.consistent {
            println!("Files are consistent");
        } else {
            println!("Files disagree:");
            for issue in &summary.issues {
                println!("  - {}", issue);
            }
        }
    }

    if summary.consistent {
        exit_codes::SUCCESS
    } else {
        exit_codes::PARTIAL_FAILURE
    }
}
