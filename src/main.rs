//! mapparse - Symbol Map Loader
//!
//! Entry point that handles CLI argument parsing and mode switching
//! between one-shot headless application and the interactive console.

use clap::Parser;

use mapparse::app::AppState;
use mapparse::ui::cli::run_cli;

/// mapparse: apply exported symbol maps onto a disassembly database
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Target binary path to load into the database
    #[arg(short, long)]
    target: Option<String>,

    /// Symbol map file (.sym, .idasym or linker .map) to apply
    #[arg(short, long)]
    sym: Option<String>,

    /// Convert the linker .map given via --sym into this .sym/.idasym file, then exit
    #[arg(long)]
    export: Option<String>,

    /// Run in headless mode (apply the map and exit, no console)
    #[arg(long, default_value_t = false)]
    headless: bool,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    // 1. Parse command line arguments
    let args = Args::parse();

    // 2. Initialize logger with verbosity level
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(
        match args.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        },
    ))
    .init();

    log::info!("mapparse initialized");
    log::debug!("Target: {:?}", args.target);
    log::debug!("Symbol map: {:?}", args.sym);

    // Conversion needs no database at all
    if let Some(ref output) = args.export {
        let input = args
            .sym
            .ok_or_else(|| anyhow::anyhow!("--export requires --sym <mapfile>"))?;
        let count = mapparse::mapfile::convert(&input, output)?;
        println!("[*] Exported {} records to {}", count, output);
        return Ok(());
    }

    let mut state = AppState::new();

    if let Some(ref target) = args.target {
        state.load_binary(target)?;
    }

    // 3. Branch based on execution mode
    if args.headless {
        // One-shot mode: load, apply, report, exit
        let sym = args
            .sym
            .ok_or_else(|| anyhow::anyhow!("headless mode requires --sym <mapfile>"))?;
        if !state.has_binary() {
            anyhow::bail!("headless mode requires --target <binary>");
        }

        let summary = state.apply_symbols(&sym)?;
        println!("{}", summary.report());
    } else {
        println!("[*] mapparse v{} - Interactive Mode", env!("CARGO_PKG_VERSION"));

        // A map given on the command line is applied before the console starts
        if let Some(ref sym) = args.sym {
            if !state.has_binary() {
                anyhow::bail!("--sym requires --target <binary>");
            }
            let summary = state.apply_symbols(sym)?;
            println!("{}", summary.report());
        }

        run_cli(state)?;
    }

    Ok(())
}
