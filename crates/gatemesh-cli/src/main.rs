//! Gatemesh Command-Line Interface
//!
//! This CLI provides tools for:
//! - Running an in-process mesh simulation (N nodes, geometric radio range)
//! - Sending a demo request into the mesh and printing the responses
//! - Generating topology files for the simulation

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gatemesh_core::{
    ExternalKind, ExternalPacket, LinkLayer, MeshSim, NodeConfig, NodeId, SimConfig,
};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Parser)]
#[command(name = "gatemesh")]
#[command(author, version, about = "Gatemesh mesh routing runtime CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-process mesh simulation until Ctrl-C
    Sim {
        /// Number of nodes (ignored with --config)
        #[arg(short, long, default_value = "8")]
        nodes: u16,

        /// Distance between neighboring nodes on the line
        #[arg(long, default_value = "100.0")]
        spacing: f64,

        /// Radio range
        #[arg(long, default_value = "150.0")]
        range: f64,

        /// Topology file generated by `gatemesh topology` (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Node `id` listens for clients on `port_base + id`
        #[arg(long, default_value = "8086")]
        port_base: u16,

        /// Port clients listen on for responses
        #[arg(long, default_value = "8085")]
        client_port: u16,

        /// Seconds between HELLO sweeps
        #[arg(long, default_value = "3")]
        hello_interval: u64,
    },

    /// Send one HTTP request into the mesh and print the responses
    Client {
        /// Mesh node id to connect to
        #[arg(short, long, default_value = "1")]
        node: u16,

        /// Host the mesh runs on
        #[arg(long, default_value = "127.0.0.1")]
        mesh_host: String,

        /// Destination IPv4 of the external host
        #[arg(short, long)]
        dest: String,

        /// Destination port of the external host
        #[arg(short, long, default_value = "80")]
        port: u16,

        /// Request payload; defaults to an HTTP GET for `/`
        #[arg(short, long)]
        message: Option<String>,

        /// Source address written into the packet
        #[arg(long, default_value = "127.0.0.1")]
        source: String,

        /// Node `id` listens for clients on `port_base + id`
        #[arg(long, default_value = "8086")]
        port_base: u16,

        /// Port to listen on for responses
        #[arg(long, default_value = "8085")]
        client_port: u16,

        /// Give up after this many seconds without a response
        #[arg(long, default_value = "10")]
        timeout: u64,
    },

    /// Print a topology as JSON, editable and usable with `sim --config`
    Topology {
        /// Number of nodes
        #[arg(short, long, default_value = "8")]
        nodes: u16,

        /// Distance between neighboring nodes (line layout)
        #[arg(long, default_value = "100.0")]
        spacing: f64,

        /// Radio range
        #[arg(long, default_value = "150.0")]
        range: f64,

        /// Scatter nodes over a rectangle instead of a line
        #[arg(long)]
        scatter: bool,

        /// Rectangle width/height for --scatter
        #[arg(long, default_value = "500.0")]
        area: f64,

        /// Seed for --scatter placement
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn cmd_sim(
    nodes: u16,
    spacing: f64,
    range: f64,
    config: Option<PathBuf>,
    port_base: u16,
    client_port: u16,
    hello_interval: u64,
) -> Result<()> {
    let sim_config = match config {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading topology file {}", path.display()))?;
            serde_json::from_str::<SimConfig>(&text)
                .with_context(|| format!("parsing topology file {}", path.display()))?
        }
        None => SimConfig::line(nodes, spacing, range),
    };

    let node_config = NodeConfig::default()
        .with_hello_interval(hello_interval)
        .with_ports(port_base, client_port);

    println!("=== Gatemesh Simulation ===");
    println!("Nodes:       {}", sim_config.node_count);
    println!("Range:       {}", sim_config.range);
    println!(
        "Uplink:      ({:.0}, {:.0})",
        sim_config.uplink.x, sim_config.uplink.y
    );
    println!(
        "Client ports: {}..={}",
        port_base + 1,
        port_base + sim_config.node_count
    );
    println!();

    let node_count = sim_config.node_count;
    let mesh = MeshSim::start(sim_config, node_config).context("starting mesh simulation")?;

    for raw in 1..=node_count {
        let id = NodeId::new(raw);
        let gateway = mesh.transport().can_connect(id);
        println!(
            "  node {:2} on port {}  {}",
            id.get(),
            port_base + raw,
            if gateway { "(gateway)" } else { "" }
        );
    }
    println!("\nPress Ctrl-C to stop.");

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down simulation");
    mesh.shutdown();
    println!("Simulation stopped.");
    Ok(())
}

fn cmd_client(
    node: u16,
    mesh_host: String,
    dest: String,
    port: u16,
    message: Option<String>,
    source: String,
    port_base: u16,
    client_port: u16,
    timeout: u64,
) -> Result<()> {
    let payload = message.unwrap_or_else(|| {
        format!("GET / HTTP/1.1\r\nHost: {dest}\r\nConnection: close\r\n\r\n")
    });
    let packet = ExternalPacket::http(&source, &dest, port, payload.as_bytes());

    // listen for responses before the request goes out
    let listener = TcpListener::bind(("0.0.0.0", client_port))
        .with_context(|| format!("binding response listener on port {client_port}"))?;
    listener.set_nonblocking(true)?;

    let mesh_addr = format!("{}:{}", mesh_host, port_base + node);
    let mut stream =
        TcpStream::connect(&mesh_addr).with_context(|| format!("connecting to {mesh_addr}"))?;
    packet.write_to(&mut stream).context("sending request")?;
    drop(stream);
    println!("Request sent to node {node} at {mesh_addr}, waiting for responses...");

    let deadline = Duration::from_secs(timeout);
    let mut last_activity = Instant::now();
    let mut chunks = 0usize;
    loop {
        match listener.accept() {
            Ok((mut connection, _)) => {
                connection.set_nonblocking(false)?;
                match ExternalPacket::read_from(&mut connection) {
                    Ok(response) => {
                        last_activity = Instant::now();
                        match response.kind {
                            ExternalKind::Response => {
                                chunks += 1;
                                println!("--- response seq {} ---", response.seq_nr);
                                println!("{}", String::from_utf8_lossy(&response.payload));
                            }
                            ExternalKind::Failure => {
                                println!("The mesh could not deliver the request.");
                                return Ok(());
                            }
                            ExternalKind::Http => {}
                        }
                    }
                    Err(e) => info!(error = %e, "discarding unreadable response connection"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if last_activity.elapsed() > deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            Err(e) => return Err(e).context("accepting response connection"),
        }
    }

    println!("Done: {chunks} response chunk(s).");
    Ok(())
}

fn cmd_topology(nodes: u16, spacing: f64, range: f64, scatter: bool, area: f64, seed: u64) -> Result<()> {
    let config = if scatter {
        SimConfig::scattered(nodes, area, area, range, seed)
    } else {
        SimConfig::line(nodes, spacing, range)
    };
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Sim {
            nodes,
            spacing,
            range,
            config,
            port_base,
            client_port,
            hello_interval,
        } => cmd_sim(
            nodes,
            spacing,
            range,
            config,
            port_base,
            client_port,
            hello_interval,
        ),

        Commands::Client {
            node,
            mesh_host,
            dest,
            port,
            message,
            source,
            port_base,
            client_port,
            timeout,
        } => cmd_client(
            node,
            mesh_host,
            dest,
            port,
            message,
            source,
            port_base,
            client_port,
            timeout,
        ),

        Commands::Topology {
            nodes,
            spacing,
            range,
            scatter,
            area,
            seed,
        } => cmd_topology(nodes, spacing, range, scatter, area, seed),
    }
}
