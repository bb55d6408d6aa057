//! Fetch a page over HTTPS and print the raw response
//!
//! Usage: tls-get <host> [--port 443] [--path /] [--insecure] [--ca-file F] [--timeout SECS]

use clap::Parser;
use log::{debug, info};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tlstream::net;
use tlstream::tls::{TlsConfig, TlsError};

#[derive(Parser, Debug)]
#[command(name = "tls-get", about = "Send one HTTP GET over TLS and print the response")]
struct Args {
    /// Server hostname, also used for SNI and certificate checks
    host: String,

    /// TCP port
    #[arg(long, default_value_t = 443)]
    port: u16,

    /// Request path
    #[arg(long, default_value = "/")]
    path: String,

    /// Skip certificate and hostname verification
    #[arg(long)]
    insecure: bool,

    /// Extra PEM trust anchors
    #[arg(long)]
    ca_file: Option<PathBuf>,

    /// Connect and I/O timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

#[derive(Debug, thiserror::Error)]
enum Error {
    #[error(transparent)]
    Net(#[from] net::Error),

    #[error(transparent)]
    Tls(#[from] TlsError),
}

fn main() -> ExitCode {
    env_logger::builder()
        .format(|buf, record| {
            let level_style = buf.default_level_style(record.level());
            writeln!(
                buf,
                "[{} {level_style}{}{level_style:#} {}] {}",
                buf.timestamp(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Tls(e)) => {
            match e.describe() {
                Some(text) => eprintln!("tls-get: {}", text),
                None => eprintln!("tls-get: {}", e),
            }
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("tls-get: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Error> {
    let timeout = Duration::from_secs(args.timeout);
    let mut tcp = net::connect(&format!("{}:{}", args.host, args.port), timeout)?;

    let mut builder = TlsConfig::client().verify_peer(!args.insecure);
    if let Some(ref ca_file) = args.ca_file {
        builder = builder.ca_file(ca_file);
    }
    let config = builder.build()?;

    let mut session = config.connect(&mut tcp, &args.host)?;
    let negotiated = session.info();
    info!(
        "connected to {} using {} ({})",
        args.host, negotiated.version, negotiated.cipher
    );
    if let Some(peer) = negotiated.cert(0) {
        debug!("peer certificate: subject={} issuer={}", peer.subject, peer.issuer);
    }

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nUser-Agent: tls-get\r\n\r\n",
        args.path, args.host
    );
    session.write(request.as_bytes())?;

    let mut stdout = std::io::stdout().lock();
    let mut buf = [0u8; 4096];
    loop {
        let n = match session.read(&mut buf) {
            Ok(n) => n,
            // close_notify or the server hanging up ends the response
            Err(TlsError::ConnectionClosed) => break,
            Err(e) => return Err(e.into()),
        };
        stdout.write_all(&buf[..n]).map_err(TlsError::Transport)?;
    }
    stdout.flush().map_err(TlsError::Transport)?;

    session.close()?;
    Ok(())
}
