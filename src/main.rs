use std::path::PathBuf;

use clap::Parser;
use magnetron::sim::top::{SimTop, SimTopConfig};

#[derive(Parser)]
#[command(version, about)]
struct MagnetronArgs {
    /// Optional toml configuration with [sim], [dram] and [traffic] sections
    config: Option<PathBuf>,

    #[arg(long)]
    ticks: Option<u64>,
    #[arg(long)]
    warmup_ticks: Option<u64>,
    #[arg(long)]
    chans: Option<usize>,
    #[arg(long)]
    seed: Option<u64>,
}

pub fn main() {
    let argv = MagnetronArgs::parse();

    let mut config = match &argv.config {
        Some(path) => {
            let text = std::fs::read_to_string(path).expect("cannot read config file");
            SimTopConfig::from_toml_str(&text).expect("cannot parse config file")
        }
        None => SimTopConfig::default(),
    };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.sim.log_level.as_str()),
    )
    .init();

    config.sim.ticks = argv.ticks.unwrap_or(config.sim.ticks);
    config.sim.warmup_ticks = argv.warmup_ticks.unwrap_or(config.sim.warmup_ticks);
    config.dram.chans = argv.chans.unwrap_or(config.dram.chans);
    config.traffic.seed = argv.seed.unwrap_or(config.traffic.seed);

    let mut top = SimTop::new(&config).expect("invalid DRAM configuration");
    top.run();
}
