use std::env;
use std::net::SocketAddr;

use contracts::{
    ActionContext, ActionEnvelope, ActionPayload, GridPos, SessionConfig, SessionEvent,
};
use farm_api::{serve, SessionApi};

fn print_usage() {
    println!("farm-cli <command>");
    println!("commands:");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  simulate <session_id> [cycles] [sqlite_path]");
    println!("    drives a local demo session through drain/tick cycles");
    println!("    and persists snapshots when a sqlite path is given");
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn parse_cycles(value: Option<&String>) -> Result<u64, String> {
    match value {
        None => Ok(20),
        Some(raw) => raw
            .parse::<u64>()
            .map_err(|_| format!("invalid cycles: {raw}")),
    }
}

fn demo_envelope(user: &str, payload: ActionPayload, issued_at_ms: u64) -> ActionEnvelope {
    ActionEnvelope::new(
        payload,
        ActionContext {
            client_id: format!("cli:{user}"),
            user_id: user.to_string(),
            issued_at_ms,
        },
    )
}

fn run_serve(args: &[String]) -> Result<(), String> {
    let addr = parse_socket_addr(args.get(2))?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let runtime = tokio::runtime::Runtime::new().map_err(|err| err.to_string())?;
    println!("serving on {addr}");
    runtime
        .block_on(serve(addr))
        .map_err(|err| format!("server failed: {err}"))
}

fn run_simulate(args: &[String]) -> Result<(), String> {
    let session_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing session_id".to_string())?;
    let cycles = parse_cycles(args.get(3))?;
    let sqlite_path = args.get(4).cloned();

    let config = SessionConfig {
        session_id,
        ..SessionConfig::default()
    };
    let drain_interval_ms = config.drain_interval_ms;
    let tick_interval_ms = config.tick_interval_ms;
    let mut api = SessionApi::from_config(config);
    if let Some(path) = sqlite_path.as_deref() {
        api.attach_sqlite_store(path)
            .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    }

    let runtime = tokio::runtime::Runtime::new().map_err(|err| err.to_string())?;
    runtime.block_on(async {
        let mut now_ms = 1_000_u64;
        api.join("demo", now_ms);

        // A short scripted opening so the drain loop has work to process.
        // The demo player starts with an empty wallet, so placements are
        // rejected and reported; plant/harvest failures exercise the
        // rejection path too.
        api.submit_action(demo_envelope(
            "demo",
            ActionPayload::PlaceBuilding {
                def_id: "farmhouse".to_string(),
                origin: GridPos { x: 1, y: 1 },
                rotation: Default::default(),
            },
            now_ms,
        ))
        .map_err(|err| err.message)?;
        api.submit_action(demo_envelope(
            "demo",
            ActionPayload::PlantCrop {
                def_id: "wheat".to_string(),
                plot: GridPos { x: 5, y: 5 },
            },
            now_ms,
        ))
        .map_err(|err| err.message)?;

        let mut broadcasts = 0_usize;
        let mut rejections = 0_usize;
        for cycle in 0..cycles {
            now_ms += drain_interval_ms;
            let (_, events) = api.drain_once(now_ms).await;
            for event in &events {
                match event {
                    SessionEvent::ActionError(_) => rejections += 1,
                    _ => broadcasts += 1,
                }
            }
            if cycle % (tick_interval_ms / drain_interval_ms.max(1)).max(1) == 0 {
                broadcasts += api.run_tick(tick_interval_ms, now_ms).len();
            }
        }

        let status = api.status();
        println!("{status}");
        println!("broadcast_events={broadcasts} rejections={rejections}");
        if sqlite_path.is_some() {
            api.flush_persistence_checked(now_ms)
                .map_err(|err| format!("final flush failed: {err}"))?;
            println!("snapshot persisted at version {}", status.version);
        }
        Ok::<(), String>(())
    })
}

fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let result = match command {
        Some("serve") => run_serve(&args),
        Some("simulate") => run_simulate(&args),
        _ => {
            print_usage();
            Ok(())
        }
    };

    if let Err(message) = result {
        eprintln!("error: {message}");
        std::process::exit(1);
    }
}
