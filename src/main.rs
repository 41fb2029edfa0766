use clap::Parser;
use lan_sync::core::SyncReport;
use lan_sync::utils::setup_logging;
use lan_sync::{Config, Node, Registration, Result, VERSION};
use log::LevelFilter;
use std::net::IpAddr;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "lan-sync")]
#[command(about = "Share a folder with peers on the local network")]
#[command(version)]
struct Cli {
    /// JSON config file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory to share and sync into
    #[arg(short, long)]
    dir: Option<PathBuf>,
    /// This peer's address (detected when omitted)
    #[arg(long)]
    identity: Option<IpAddr>,
    /// Local address to bind listeners to
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Broadcast address for registration
    #[arg(long)]
    broadcast: Option<IpAddr>,
    /// Control channel port shared by all peers
    #[arg(long)]
    control_port: Option<u16>,
    /// Data channel port shared by all peers
    #[arg(long)]
    data_port: Option<u16>,
    /// Log protocol details
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        if let Some(dir) = self.dir {
            config.working_dir = dir;
        }
        config.identity = self.identity.or(config.identity);
        config.bind_ip = self.bind.or(config.bind_ip);
        config.broadcast_ip = self.broadcast.or(config.broadcast_ip);
        if let Some(port) = self.control_port {
            config.control_port = port;
        }
        if let Some(port) = self.data_port {
            config.data_port = port;
        }
        config.validate()?;
        Ok(config)
    }
}

fn print_help() {
    println!("{}", "*".repeat(80));
    println!("Welcome to lan-sync {} - a simple p2p network", VERSION);
    println!("followings are list of commands:");
    println!("\trg: broadcast my ip address to register");
    println!("\trt: obtain list of registered ip and files");
    println!("\tip: check my local ip address");
    println!("\tsync [ip address]: sync my directory with another user's directory");
    println!("\texit: make my directory invisible to others and finish program");
    println!("{}", "*".repeat(80));
}

fn print_sync(report: &SyncReport) {
    println!(
        "\tsynced {} of {} files ({} bytes) from {}",
        report.pulled.files, report.listed, report.pulled.bytes, report.peer
    );
}

async fn print_snapshot(node: &mut Node) {
    match node.retrieve().await {
        Ok(snapshot) => {
            for line in snapshot.lines() {
                println!("\t{}", line);
            }
        }
        Err(e) => println!("\t{}: Retrieve", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    let config = cli.into_config()?;
    let mut node = Node::new(config).await?;
    print_help();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        println!("Enter your command: ");
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let mut tokens = line.split_whitespace();
        let command = tokens.next().unwrap_or("");
        let parameter = tokens.next();

        match command {
            "rg" => match node.register().await {
                Ok(Registration::Member { index }) => {
                    println!("\tregistered with index {}", index);
                    print_snapshot(&mut node).await;
                }
                Ok(Registration::Index) => {
                    println!("\tno index found, this peer is now the index");
                    print_snapshot(&mut node).await;
                }
                Err(e) => println!("\t{}: Register", e),
            },
            "rt" => print_snapshot(&mut node).await,
            "ip" => println!("This system's local ip address: {}", node.identity()),
            "sync" => match parameter {
                Some(peer) => match node.sync(peer).await {
                    Ok(report) => print_sync(&report),
                    Err(e) => println!("\t{}: Synchronization", e),
                },
                None => {
                    println!("sync operation requires ip address as parameter.");
                    println!("Please follow format of [sync ipAddress]");
                }
            },
            "exit" => break,
            "help" => print_help(),
            "" => {}
            _ => println!("Invalid input. Check your command."),
        }
    }

    if let Err(e) = node.exit().await {
        println!("\t{}: Exit", e);
    }
    node.metrics().print_stats().await;
    println!("Program Terminates.");
    Ok(())
}
