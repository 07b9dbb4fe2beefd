//! arbord - container host daemon.
//!
//! Wires the control plane together and serves it over a stream
//! transport (unix socket by default). Requests and responses are
//! newline-delimited JSON; the richer RPC protocol lives in front of
//! this daemon.
//!
//! ## Usage
//!
//! ```sh
//! arbord --depot /var/lib/arbor/depot \
//!        --rootfs /var/lib/arbor/rootfs \
//!        --listen-addr /run/arbor.sock \
//!        --network-pool 10.254.0.0/22 \
//!        --external-ip 203.0.113.7
//! ```

use arbor::containerizer::{DepotContainerizer, StdoutCheck};
use arbor::depot::DirDepot;
use arbor::net::subnets::SubnetPool;
use arbor::net::{PoolNetworker, PortPool};
use arbor::orchestrator::UuidHandleGenerator;
use arbor::properties::PropertyManager;
use arbor::rules::ChainBundler;
use arbor::runner::CommandRunner;
use arbor::spec::NetOutRule;
use arbor::sysinfo::ProcSysInfo;
use arbor::{ContainerSpec, Orchestrator};
use ipnetwork::Ipv4Network;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{error, info, warn};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug)]
struct Config {
    listen_network: String,
    listen_addr: String,
    depot: PathBuf,
    rootfs: PathBuf,
    network_pool: Ipv4Network,
    port_pool_start: u16,
    port_pool_size: u16,
    external_ip: Ipv4Addr,
    mtu: u32,
    net_hook: PathBuf,
    runtime: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_network: "unix".to_string(),
            listen_addr: "/run/arbor.sock".to_string(),
            depot: PathBuf::new(),
            rootfs: PathBuf::from("/var/lib/arbor/rootfs"),
            network_pool: arbor::constants::DEFAULT_SUBNET_POOL
                .parse()
                .expect("default subnet pool is a valid CIDR"),
            port_pool_start: arbor::constants::DEFAULT_PORT_POOL_START,
            port_pool_size: arbor::constants::DEFAULT_PORT_POOL_SIZE,
            external_ip: Ipv4Addr::LOCALHOST,
            mtu: arbor::constants::DEFAULT_MTU,
            net_hook: PathBuf::from("/usr/lib/arbor/net-hook"),
            runtime: PathBuf::from(arbor::constants::DEFAULT_RUNTIME_BIN),
        }
    }
}

fn parse_args() -> Result<Config, String> {
    let mut config = Config::default();
    let args: Vec<String> = std::env::args().collect();

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        if flag == "--help" || flag == "-h" {
            return Err(usage());
        }
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        match flag {
            "--listen-network" => config.listen_network = value.clone(),
            "--listen-addr" => config.listen_addr = value.clone(),
            "--depot" => config.depot = PathBuf::from(value),
            "--rootfs" => config.rootfs = PathBuf::from(value),
            "--network-pool" => {
                config.network_pool = value
                    .parse()
                    .map_err(|e| format!("--network-pool: {e}"))?;
            }
            "--port-pool-start" => {
                config.port_pool_start = value
                    .parse()
                    .map_err(|e| format!("--port-pool-start: {e}"))?;
            }
            "--port-pool-size" => {
                config.port_pool_size = value
                    .parse()
                    .map_err(|e| format!("--port-pool-size: {e}"))?;
            }
            "--external-ip" => {
                config.external_ip = value.parse().map_err(|e| format!("--external-ip: {e}"))?;
            }
            "--mtu" => config.mtu = value.parse().map_err(|e| format!("--mtu: {e}"))?,
            "--net-hook" => config.net_hook = PathBuf::from(value),
            "--runtime" => config.runtime = PathBuf::from(value),
            unknown => return Err(format!("unknown flag: {unknown}\n\n{}", usage())),
        }
        i += 2;
    }

    if config.depot.as_os_str().is_empty() {
        return Err(format!("missing --depot\n\n{}", usage()));
    }

    Ok(config)
}

fn usage() -> String {
    "usage: arbord --depot <dir> [options]\n\
     \n\
     options:\n\
     \x20 --listen-network unix|tcp   transport to listen on (default unix)\n\
     \x20 --listen-addr <addr>        socket path or host:port (default /run/arbor.sock)\n\
     \x20 --depot <dir>               directory containers are stored in (required)\n\
     \x20 --rootfs <dir>              default rootfs for containers without one\n\
     \x20 --network-pool <cidr>       pool of dynamically allocated subnets\n\
     \x20 --port-pool-start <port>    start of the mapped-port range\n\
     \x20 --port-pool-size <n>        size of the mapped-port range\n\
     \x20 --external-ip <ip>          IP mapped container ports are reachable on\n\
     \x20 --mtu <n>                   MTU for container interfaces\n\
     \x20 --net-hook <path>           network hook binary\n\
     \x20 --runtime <path>            OCI runtime binary (default runc)"
        .to_string()
}

// =============================================================================
// Wiring
// =============================================================================

fn wire(config: &Config) -> arbor::Result<Orchestrator> {
    let property_manager = Arc::new(PropertyManager::new());

    let subnets = Arc::new(SubnetPool::new(config.network_pool));
    let ports = Arc::new(PortPool::new(config.port_pool_start, config.port_pool_size));
    let networker = Arc::new(PoolNetworker::new(
        subnets,
        ports,
        Arc::clone(&property_manager),
        config.external_ip,
        &config.net_hook,
        config.mtu,
    ));

    let depot = Arc::new(DirDepot::new(&config.depot)?);
    let containerizer = Arc::new(DepotContainerizer::new(
        depot,
        Arc::new(ChainBundler::with_default_rules()),
        Arc::new(CommandRunner::new(&config.runtime)),
        Arc::new(StdoutCheck::default()),
    ));

    Ok(Orchestrator::new(
        containerizer,
        networker,
        Arc::new(arbor::volume::RawVolumeCreator::new(&config.rootfs)),
        Arc::new(ProcSysInfo::new(&config.depot)),
        Arc::new(UuidHandleGenerator),
        property_manager,
    ))
}

// =============================================================================
// Request Dispatch
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
enum Request {
    Create {
        spec: ContainerSpec,
    },
    Destroy {
        handle: String,
    },
    List {
        #[serde(default)]
        filter: HashMap<String, String>,
    },
    Info {
        handle: String,
    },
    BulkInfo {
        handles: Vec<String>,
    },
    Capacity,
    NetIn {
        handle: String,
        #[serde(default)]
        host_port: u16,
        #[serde(default)]
        container_port: u16,
    },
    NetOut {
        handle: String,
        rule: NetOutRule,
    },
}

fn ok(value: Value) -> Value {
    json!({ "ok": value })
}

fn fail(err: &arbor::Error) -> Value {
    json!({ "error": err.to_string() })
}

async fn dispatch(orchestrator: &Orchestrator, request: Request) -> Value {
    match request {
        Request::Create { spec } => match orchestrator.create(spec).await {
            Ok(container) => ok(json!({ "handle": container.handle() })),
            Err(err) => fail(&err),
        },
        Request::Destroy { handle } => match orchestrator.destroy(&handle).await {
            Ok(()) => ok(Value::Null),
            Err(err) => fail(&err),
        },
        Request::List { filter } => match orchestrator.containers(&filter).await {
            Ok(containers) => {
                let handles: Vec<&str> = containers.iter().map(|c| c.handle()).collect();
                ok(json!({ "handles": handles }))
            }
            Err(err) => fail(&err),
        },
        Request::Info { handle } => match orchestrator.lookup(&handle).info().await {
            Ok(info) => ok(json!(info)),
            Err(err) => fail(&err),
        },
        Request::BulkInfo { handles } => {
            let infos = orchestrator.bulk_info(&handles).await;
            let entries: HashMap<String, Value> = infos
                .into_iter()
                .map(|(handle, result)| {
                    let entry = match result {
                        Ok(info) => json!({ "info": info }),
                        Err(err) => json!({ "error": err.to_string() }),
                    };
                    (handle, entry)
                })
                .collect();
            ok(json!(entries))
        }
        Request::Capacity => match orchestrator.capacity() {
            Ok(capacity) => ok(json!(capacity)),
            Err(err) => fail(&err),
        },
        Request::NetIn {
            handle,
            host_port,
            container_port,
        } => match orchestrator
            .lookup(&handle)
            .net_in(host_port, container_port)
            .await
        {
            Ok((host, container)) => {
                ok(json!({ "host_port": host, "container_port": container }))
            }
            Err(err) => fail(&err),
        },
        Request::NetOut { handle, rule } => {
            match orchestrator.lookup(&handle).net_out(rule).await {
                Ok(()) => ok(Value::Null),
                Err(err) => fail(&err),
            }
        }
    }
}

async fn serve_connection<S>(orchestrator: Arc<Orchestrator>, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => dispatch(&orchestrator, request).await,
            Err(err) => json!({ "error": format!("malformed request: {err}") }),
        };
        let mut payload = response.to_string();
        payload.push('\n');
        if writer.write_all(payload.as_bytes()).await.is_err() {
            break;
        }
    }
}

// =============================================================================
// Main
// =============================================================================

async fn serve(config: Config, orchestrator: Arc<Orchestrator>) -> arbor::Result<()> {
    match config.listen_network.as_str() {
        "unix" => {
            let _ = std::fs::remove_file(&config.listen_addr);
            let listener = tokio::net::UnixListener::bind(&config.listen_addr)?;
            info!(addr = %config.listen_addr, "listening on unix socket");
            loop {
                let (stream, _) = listener.accept().await?;
                tokio::spawn(serve_connection(Arc::clone(&orchestrator), stream));
            }
        }
        "tcp" => {
            let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
            info!(addr = %config.listen_addr, "listening on tcp");
            loop {
                let (stream, peer) = listener.accept().await?;
                info!(%peer, "connection accepted");
                tokio::spawn(serve_connection(Arc::clone(&orchestrator), stream));
            }
        }
        other => Err(arbor::Error::NotSupported(format!(
            "listen network '{other}'"
        ))),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match parse_args() {
        Ok(config) => config,
        Err(message) => {
            eprintln!("{message}");
            return ExitCode::FAILURE;
        }
    };

    let orchestrator = match wire(&config) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(err) => {
            error!(error = %err, "failed to wire the container host");
            return ExitCode::FAILURE;
        }
    };

    info!(
        depot = %config.depot.display(),
        pool = %config.network_pool,
        "arbord started"
    );

    if let Err(err) = serve(config, orchestrator).await {
        warn!(error = %err, "server loop terminated");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
