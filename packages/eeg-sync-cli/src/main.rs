use clap::Parser;

mod cli;
mod commands;
mod exit_codes;
mod output;
mod stimulus;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    let mut logger = env_logger::Builder::new();
    logger.filter_level(log_level);
    match &cli.log_file {
        Some(path) => match std::fs::File::create(path) {
            Ok(file) => {
                // Log files keep timestamps and default to info level
                logger.target(env_logger::Target::Pipe(Box::new(file)));
                if cli.verbose == 0 {
                    logger.filter_level(log::LevelFilter::Info);
                }
            }
            Err(e) => {
                eprintln!("Error: cannot create log file '{}': {}", path.display(), e);
                std::process::exit(exit_codes::INPUT_ERROR);
            }
        },
        None => {
            logger.format_timestamp(None);
        }
    }
    logger.init();

    let exit_code = match cli.command {
        cli::Command::Run(args) => commands::run::execute(args).await,
        cli::Command::Inspect(args) => commands::inspect::execute(args),
        cli::Command::Protocol(args) => commands::protocol::execute(args),
    };

    std::process::exit(exit_code);
}
