use clap::{value_parser, Arg, Command};
use motorway_p2p::{simulated, PeerId};
use simulator::{Config, Error, Simulation};
use std::{
    fs::File,
    io::{BufWriter, Write},
};
use tracing::{info, Level};

const DEFAULT_PEERS: u32 = 4;
const DEFAULT_TICKS: u64 = 400;
const DEFAULT_TIMEOUT_DELAY: u64 = 100;

/// Returns the version of the crate.
fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Parse `<peer>:<factor>`.
fn parse_slowdown(value: &str) -> Result<(u32, f64), String> {
    let (peer, factor) = value
        .split_once(':')
        .ok_or_else(|| format!("expected <peer>:<factor>, got {value}"))?;
    let peer = peer.parse::<u32>().map_err(|err| err.to_string())?;
    let factor = factor.parse::<f64>().map_err(|err| err.to_string())?;
    Ok((peer, factor))
}

fn main() -> Result<(), Error> {
    // Parse arguments
    let matches = Command::new("motorway-simulator")
        .about("Run a committee of replicas over a simulated network.")
        .version(crate_version())
        .arg(
            Arg::new("peers")
                .long("peers")
                .required(false)
                .value_parser(value_parser!(u32))
                .help("Number of replicas"),
        )
        .arg(
            Arg::new("byzantine")
                .long("byzantine")
                .required(false)
                .value_delimiter(',')
                .value_parser(value_parser!(u32))
                .help("Silent replicas, e.g. 2,3"),
        )
        .arg(
            Arg::new("slowdown")
                .long("slowdown")
                .required(false)
                .value_delimiter(',')
                .value_parser(parse_slowdown)
                .help("Degraded replicas in the form <peer>:<factor>, e.g. 3:5"),
        )
        .arg(
            Arg::new("ticks")
                .long("ticks")
                .required(false)
                .value_parser(value_parser!(u64))
                .help("Number of ticks to simulate"),
        )
        .arg(
            Arg::new("timeout-delay")
                .long("timeout-delay")
                .required(false)
                .value_parser(value_parser!(u64))
                .help("Ticks without a vote before a replica times out"),
        )
        .arg(
            Arg::new("mean-delay")
                .long("mean-delay")
                .required(false)
                .value_parser(value_parser!(f64))
                .help("Mean number of ticks before a message arrives"),
        )
        .arg(
            Arg::new("max-bandwidth")
                .long("max-bandwidth")
                .required(false)
                .value_parser(value_parser!(usize))
                .help("Messages that can make progress per tick"),
        )
        .arg(
            Arg::new("drop-rate")
                .long("drop-rate")
                .required(false)
                .value_parser(value_parser!(f64))
                .help("Probability of dropping a message (validated only)"),
        )
        .arg(
            Arg::new("targeted-timeout")
                .long("targeted-timeout")
                .required(false)
                .num_args(0)
                .help("Send timeouts to the next leader instead of broadcasting them"),
        )
        .arg(
            Arg::new("confirm-to-next-leader")
                .long("confirm-to-next-leader")
                .required(false)
                .num_args(0)
                .help("Send confirmation votes to the leader of the next height"),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .value_parser(value_parser!(u64))
                .help("Seed for payloads and network sampling"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .required(false)
                .value_parser(value_parser!(String))
                .help("Path of a CSV file to write one row per tick to"),
        )
        .arg(
            Arg::new("metrics")
                .long("metrics")
                .required(false)
                .num_args(0)
                .help("Print metrics in the Prometheus text format once done"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .required(false)
                .value_parser(|value: &str| value.parse::<Level>())
                .help("Log level (trace, debug, info, warn or error)"),
        )
        .get_matches();

    // Create logger
    let level = matches
        .get_one::<Level>("log-level")
        .copied()
        .unwrap_or(Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();

    // Configure simulation
    let seed = matches.get_one::<u64>("seed").copied().unwrap_or(0);
    let defaults = simulated::Config::default();
    let network = simulated::Config {
        mean_delay: matches
            .get_one::<f64>("mean-delay")
            .copied()
            .unwrap_or(defaults.mean_delay),
        max_bandwidth: matches
            .get_one::<usize>("max-bandwidth")
            .copied()
            .unwrap_or(defaults.max_bandwidth),
        drop_rate: matches
            .get_one::<f64>("drop-rate")
            .copied()
            .unwrap_or(defaults.drop_rate),
        seed,
    };
    let cfg = Config {
        peers: matches
            .get_one::<u32>("peers")
            .copied()
            .unwrap_or(DEFAULT_PEERS),
        byzantine: matches
            .get_many::<u32>("byzantine")
            .into_iter()
            .flatten()
            .map(|peer| PeerId::new(*peer))
            .collect(),
        timeout_delay: matches
            .get_one::<u64>("timeout-delay")
            .copied()
            .unwrap_or(DEFAULT_TIMEOUT_DELAY),
        broadcast_timeout: !matches.get_flag("targeted-timeout"),
        confirm_to_next_leader: matches.get_flag("confirm-to-next-leader"),
        seed,
        network,
        slowdown: matches
            .get_many::<(u32, f64)>("slowdown")
            .into_iter()
            .flatten()
            .map(|(peer, factor)| (PeerId::new(*peer), *factor))
            .collect(),
    };
    let ticks = matches
        .get_one::<u64>("ticks")
        .copied()
        .unwrap_or(DEFAULT_TICKS);
    info!(?cfg, ticks, "configured simulation");

    // Run
    let mut simulation = Simulation::new(cfg)?;
    match matches.get_one::<String>("output") {
        Some(path) => {
            let mut output = BufWriter::new(File::create(path)?);
            writeln!(output, "Time,Height,Peers,Byzantine,Signals")?;
            simulation.run_with(ticks, |simulation| {
                let byzantine = simulation
                    .replicas()
                    .iter()
                    .filter(|replica| replica.is_byzantine())
                    .count();
                writeln!(
                    output,
                    "{},{},{},{},{}",
                    simulation.time(),
                    simulation.highest_common().unwrap_or(0),
                    simulation.replicas().len(),
                    byzantine,
                    simulation.signals(),
                )?;
                Ok(())
            })?;
            output.flush()?;
            info!(path, "wrote trace");
        }
        None => simulation.run(ticks),
    }

    // Report
    let summary = simulation.summary();
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).map_err(std::io::Error::from)?
    );
    if matches.get_flag("metrics") {
        print!("{}", simulation.encode_metrics()?);
    }
    Ok(())
}
