use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::TcpListener;

use inkrally_crypto::HandshakeKeys;
use inkrally_server::db;
use inkrally_server::mailer::LogMailer;
use inkrally_server::server_state::ServerState;
use inkrally_server::session;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 23456;

/// Command-line arguments for the server daemon.
struct Args {
    host: String,
    port: u16,
    db_path: String,
    avatar_dir: String,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut host = String::new();
    let mut port: u16 = 0;
    let mut db_path = String::new();
    let mut avatar_dir = String::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => host = args.next().unwrap_or_default(),
            "--port" => port = args.next().and_then(|p| p.parse().ok()).unwrap_or(0),
            "--db" => db_path = args.next().unwrap_or_default(),
            "--avatars" => avatar_dir = args.next().unwrap_or_default(),
            _ => {}
        }
    }

    if host.is_empty() {
        host = std::env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    }
    if port == 0 {
        port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
    }
    if db_path.is_empty() {
        db_path = "inkrally.db".to_string();
    }
    if avatar_dir.is_empty() {
        // Avatars live next to the database by default.
        avatar_dir = Path::new(&db_path)
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join("avatars")
            .to_string_lossy()
            .to_string();
    }

    Args {
        host,
        port,
        db_path,
        avatar_dir,
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    tracing::info!("inkrally-server starting");

    let args = parse_args();

    if let Some(parent) = Path::new(&args.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).expect("failed to create db dir");
        }
    }
    std::fs::create_dir_all(&args.avatar_dir).expect("failed to create avatar dir");

    let db = db::open(&args.db_path).expect("failed to open server database");

    // Fresh keypair per process start; clients learn it during the handshake.
    let keys = Arc::new(HandshakeKeys::generate().expect("failed to generate handshake keypair"));

    let state = Arc::new(ServerState::new(
        db,
        Arc::new(LogMailer),
        PathBuf::from(&args.avatar_dir),
    ));

    let listener = TcpListener::bind((args.host.as_str(), args.port))
        .await
        .expect("failed to bind listener");
    tracing::info!(host = %args.host, port = args.port, "inkrally-server ready");

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                let keys = Arc::clone(&keys);
                tokio::spawn(session::run_connection(state, keys, stream, addr));
            }
            Err(e) => {
                tracing::warn!(error = %e, "accept error");
            }
        }
    }
}
