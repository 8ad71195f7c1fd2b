use ambutil::*;
use std::process::ExitCode;

#[derive(clap::Parser)]
struct Args {
    /// Show extra debugging info
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Loads every AMB file of an install and reports failures
    Scan(load::Args),
    /// Describes one AMB file, found by a substring of its path
    Inspect(inspect::Args),
    /// Cross-references MIDI track names, PRGM and KMAP chunks
    Analyze(analyze::Args),
}

fn main() -> ExitCode {
    let args: Args = clap::Parser::parse();

    let level = match args.verbose {
        true => log::LevelFilter::Debug,
        false => log::LevelFilter::Info,
    };
    pretty_env_logger::formatted_builder()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .target(pretty_env_logger::env_logger::Target::Stdout)
        .init();

    let res = match args.command {
        Commands::Scan(args) => load::scan(args),
        Commands::Inspect(args) => inspect::inspect(args),
        Commands::Analyze(args) => analyze::analyze(args),
    };
    match res {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
