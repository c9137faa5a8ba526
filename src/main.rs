use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use zdocker::cli::{Cli, Commands, NetworkCommands};
use zdocker::config::Paths;
use zdocker::network::NetworkManager;
use zdocker::{commit, execinto, init, lifecycle, runtime, signal};

/// Runs before `main`, before any thread exists. If this invocation is the
/// re-exec'd half of `exec CONTAINER CMD` (see `src/execinto.rs`), it does
/// its `setns` work and exits here — normal startup (tracing init, clap
/// parsing) never happens in that process image.
#[ctor::ctor]
fn exec_into_container_pre_main() {
    execinto::pre_main_hook();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // `init` never gets this far in normal operation once pivot_root has
    // happened, but tracing has to be initialized before we do anything
    // that might fail and want to log about it.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let paths = Paths::default();

    match cli.command {
        Commands::Run(args) => {
            let opts = runtime::RunOptions {
                image: args.image,
                command: args.command,
                name: args.name,
                detach: args.detach,
                tty: args.tty,
                volume: args.volume,
                memory: args.memory,
                cpu_share: args.cpu_share,
                cpuset: args.cpuset,
                network: args.net,
                port_mapping: args.port_mapping,
                env: args.env,
            };
            runtime::run(paths, opts)
        }
        Commands::Init => init::run_init(),
        Commands::Exec { container, command } => execinto::launch(paths, &container, &command),
        Commands::Ps => {
            let records = lifecycle::ps(paths)?;
            println!("{:<12}{:<16}{:<8}{:<10}{:<24}{}", "ID", "NAME", "PID", "STATUS", "CREATED", "COMMAND");
            for record in records {
                println!(
                    "{:<12}{:<16}{:<8}{:<10}{:<24}{}",
                    record.id, record.name, record.pid, record.status, record.create_time, record.command
                );
            }
            Ok(())
        }
        Commands::Logs { container } => {
            print!("{}", lifecycle::logs(paths, &container)?);
            Ok(())
        }
        Commands::Stop(args) => {
            let signal = signal::parse_signal(&args.signal)?;
            let timeout = args.timeout.map(Duration::from_secs);
            lifecycle::stop(paths, &args.container, signal, timeout)
        }
        Commands::Rm { container } => lifecycle::rm(paths, &container),
        Commands::Commit { container, image } => commit::commit(paths, &container, &image),
        Commands::Network { command } => match command {
            NetworkCommands::Create { subnet, driver, name } => {
                let manager = NetworkManager::new(paths);
                let subnet = subnet.ok_or_else(|| anyhow::anyhow!("--subnet is required"))?;
                manager.create(&driver, &subnet, &name)
            }
            NetworkCommands::List => {
                let manager = NetworkManager::new(paths);
                println!("{:<16}{:<20}{}", "NAME", "IpRange", "Driver");
                for network in manager.list()? {
                    println!("{:<16}{:<20}{}", network.name, network.ip_range, network.driver);
                }
                Ok(())
            }
            NetworkCommands::Remove { name } => {
                let manager = NetworkManager::new(paths);
                manager.remove(&name)
            }
        },
    }
}
