use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use dcdp::backward_induction::solve;
use dcdp::config::SolverConfig;
use dcdp::constants::CHOICE_NAMES;
use dcdp::simulation::simulate;

/// Solve a dynamic discrete-choice model by backward induction.
#[derive(Parser, Debug)]
#[command(name = "dcdp-solve", version, about)]
struct Cli {
    /// JSON model configuration
    config: PathBuf,

    /// Where to write the solution (state space, rewards, EMAX table, diagnostics)
    #[arg(short, long, default_value = "solution.json")]
    output: PathBuf,

    /// Also simulate agents and write the panel to this file
    #[arg(long)]
    simulate: Option<PathBuf>,

    /// Worker threads (overrides the configuration)
    #[arg(long, env = "DCDP_NUM_PROCS")]
    num_procs: Option<usize>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "dcdp=debug" } else { "dcdp=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = SolverConfig::from_path(&cli.config)?;
    if let Some(n) = cli.num_procs {
        config.num_procs = n;
    }

    let start = Instant::now();
    let solution = solve(&config)?;
    solution.write_json(&cli.output)?;
    tracing::info!(
        path = %cli.output.display(),
        initial_value = solution.initial_value(),
        elapsed_secs = start.elapsed().as_secs_f64(),
        "solution written"
    );

    if let Some(path) = cli.simulate {
        let result = simulate(&solution, &config);
        for (period, shares) in result.choice_shares.iter().enumerate() {
            let line: Vec<String> = CHOICE_NAMES
                .iter()
                .zip(shares.iter())
                .map(|(name, share)| format!("{} {:.3}", name, share))
                .collect();
            tracing::info!("period {:3}: {}", period, line.join(" | "));
        }
        let file = std::fs::File::create(&path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), &result)?;
        tracing::info!(
            path = %path.display(),
            agents = config.simulation.num_agents,
            "simulation written"
        );
    }

    Ok(())
}
