//! capsa binary: flag parsing, log setup, signal wiring.
//!
//! Exit status is 0 after a clean shutdown and 1 for fatal configuration or
//! startup errors. Everything after startup is handled on the wire; a
//! request can fail, the process does not.

use std::fs;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use capsa::fileserver::Files;
use capsa::middleware::{self, AccessLog};
use capsa::{tls, Mux, Server};

#[derive(Parser, Debug)]
#[command(name = "capsa", version, about = "Gemini protocol file server")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:1965")]
    addr: SocketAddr,

    /// Server root directory to serve from.
    #[arg(long, default_value = "public")]
    root: PathBuf,

    /// Hostname: certificate common name and absolute redirect target.
    #[arg(long)]
    host: String,

    /// TLS certificate chain (PEM).
    #[arg(long, requires = "key")]
    cert: Option<PathBuf>,

    /// TLS private key (PEM).
    #[arg(long, requires = "cert")]
    key: Option<PathBuf>,

    /// Days of validity for the self-signed certificate generated when no
    /// keypair is given.
    #[arg(long, default_value_t = 1)]
    auto_cert_validity: i64,

    /// Maximum number of concurrently open connections.
    #[arg(long, default_value_t = 128)]
    max_conns: usize,

    /// Connection read timeout in seconds; doubles as the shutdown deadline.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Documents held by the in-memory cache; 0 disables caching.
    #[arg(long, default_value_t = 0)]
    cache: usize,

    /// Generate directory listings where no index.gmi exists.
    #[arg(long, default_value_t = false)]
    autoindex: bool,

    /// Directory for access.log and debug.log; stdout/stderr when absent.
    #[arg(long)]
    logs: Option<PathBuf>,

    /// Verbose debug logging.
    #[arg(long, default_value_t = false)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli).context("initialise logging")?;
    let access_log = Arc::new(build_access_log(&cli).context("open access log")?);

    let mut mux = Mux::new();
    mux.use_middleware(middleware::logger(Arc::clone(&access_log)));
    if cli.cache > 0 {
        mux.use_middleware(middleware::cache(cli.cache));
    }
    mux.handle(Arc::new(Files::new(cli.root.clone(), cli.autoindex)));

    if cli.cert.is_some() {
        info!(cert = ?cli.cert, "loading certificate keypair");
    } else {
        info!(
            host = %cli.host,
            days = cli.auto_cert_validity,
            "generating self-signed temporary certificate"
        );
    }
    let loader = {
        let (cert, key) = (cli.cert.clone(), cli.key.clone());
        let (host, days) = (cli.host.clone(), cli.auto_cert_validity);
        move || match (&cert, &key) {
            (Some(cert), Some(key)) => tls::load(cert, key),
            _ => tls::self_signed(&host, days),
        }
    };

    let server = Server::new(cli.addr, cli.host.clone(), loader, Arc::new(mux))
        .read_timeout(Duration::from_secs(cli.timeout))
        .max_conns(cli.max_conns)
        .on_reload(move || access_log.reopen());

    let handle = server.handle();
    let mut run = tokio::spawn(server.run());

    tokio::select! {
        res = &mut run => {
            // The server ended on its own: a startup failure.
            res.context("server task")??;
        }
        () = shutdown_signal() => {
            handle.shutdown(Duration::from_secs(cli.timeout)).await;
            run.await.context("server task")??;
        }
    }

    Ok(())
}

fn init_tracing(cli: &Cli) -> anyhow::Result<()> {
    let default = if cli.debug { "capsa=debug" } else { "capsa=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match &cli.logs {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            let file = append_to(&dir.join("debug.log"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

fn build_access_log(cli: &Cli) -> anyhow::Result<AccessLog> {
    let prefix = Some(cli.host.clone());
    match &cli.logs {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
            let path = dir.join("access.log");
            let log = AccessLog::reopenable(
                Box::new(move || {
                    append_to(&path).map(|file| Box::new(file) as Box<dyn Write + Send>)
                }),
                prefix,
            )?;
            Ok(log)
        }
        None => Ok(AccessLog::stdout(prefix)),
    }
}

fn append_to(path: &std::path::Path) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().create(true).append(true).open(path)
}

/// Resolves on the first termination signal: SIGINT (Ctrl-C) or, on Unix,
/// SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
