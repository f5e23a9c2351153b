use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "eeg-sync",
    version,
    about = "Timed EEG listening experiments with synchronized event markers",
    long_about = "Record EEG while a timed listening protocol runs (relaxation, song trials,\n\
                  inter-trial rests). Phase boundaries are stamped as markers onto the sample\n\
                  stream and the session is saved as CSV and EDF+. Press Ctrl-C to end a\n\
                  session early; captured data is still saved."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Write log output to this file instead of stderr
    #[arg(long, global = true, env = "EEG_SYNC_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Record a session
    Run(RunArgs),
    /// Re-read a recorded session and check both files agree
    Inspect(InspectArgs),
    /// Show the phase table and expected marker sequence
    Protocol(ProtocolArgs),
}

/// Protocol timing overrides shared by `run` and `protocol`
#[derive(Args, Debug, Clone, Default)]
pub struct ProtocolOverrides {
    /// Eyes-closed relaxation before the first trial, in seconds
    #[arg(long)]
    pub relax_secs: Option<f64>,

    /// Listening time per song, in seconds
    #[arg(long)]
    pub trial_secs: Option<f64>,

    /// Rest between trials, in seconds
    #[arg(long)]
    pub rest_secs: Option<f64>,

    /// Number of song trials
    #[arg(long)]
    pub trials: Option<usize>,

    /// Settle delay between phases, in seconds
    #[arg(long)]
    pub gap_secs: Option<f64>,

    /// Directory holding song001.mp3, song002.mp3, ...
    #[arg(long)]
    pub songs: Option<PathBuf>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Subject identifier, used as the output file prefix
    #[arg(long, env = "EEG_SYNC_SUBJECT")]
    pub subject: Option<String>,

    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Directory for the CSV and EDF+ files
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Bluetooth address of the headset
    #[arg(long, env = "EEG_SYNC_MAC_ADDRESS")]
    pub mac_address: Option<String>,

    #[command(flatten)]
    pub protocol: ProtocolOverrides,

    /// Acquisition polling interval in milliseconds
    #[arg(long)]
    pub poll_ms: Option<u64>,

    /// Synthetic device: sample rate in Hz
    #[arg(long)]
    pub sample_rate: Option<f64>,

    /// Synthetic device: number of channels
    #[arg(long)]
    pub channels: Option<usize>,

    /// Synthetic device: noise seed for reproducible recordings
    #[arg(long)]
    pub seed: Option<u64>,

    /// Synthetic device: disconnect after this many samples
    #[arg(long)]
    pub disconnect_after: Option<u64>,

    /// Synthetic device: fail every n-th read with a transient error
    #[arg(long)]
    pub transient_every: Option<u64>,

    /// Synthetic device: refuse native marker tags
    #[arg(long, default_value_t = false)]
    pub reject_markers: bool,

    /// Print the session report as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Suppress protocol messages and progress on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct InspectArgs {
    /// Subject identifier of the session to inspect
    #[arg(long)]
    pub subject: Option<String>,

    /// Directory holding the session files
    #[arg(short, long, default_value = ".")]
    pub dir: PathBuf,

    /// Tabular export path (overrides --subject/--dir)
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// EDF+ export path (overrides --subject/--dir)
    #[arg(long)]
    pub edf: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct ProtocolArgs {
    /// JSON configuration file; flags override its values
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub protocol: ProtocolOverrides,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
