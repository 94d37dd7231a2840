use std::sync::Arc;

use chrono::Local;
use log::{error, info};
use roomcall::media::SilenceCapture;
use roomcall::session::CallEvent;
use roomcall::{CallClient, CallConfig};

const DEFAULT_ROOM: &str = "shahid";

// Demo client: joins a room on the relay with a silent capture feed and
// logs call progress. Accept/reject happen automatically so two instances
// pointed at the same room will negotiate a session.
//
// Usage:
//   cargo run -- --room shahid
//   cargo run -- --room shahid --relay wss://localhost:3000/ws

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let room = parse_arg(&args, "--room", "-m").unwrap_or_else(|| DEFAULT_ROOM.to_string());
    let relay = parse_arg(&args, "--relay", "-r");

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let config = match relay {
            Some(url) => CallConfig::new(url),
            None => CallConfig::default(),
        };

        let client = match CallClient::connect(config, Arc::new(SilenceCapture)).await {
            Ok(client) => client,
            Err(e) => {
                error!("failed to start call client: {e}");
                return;
            }
        };

        let mut events = client.subscribe();

        if let Err(e) = client.start_call(room.as_str()).await {
            error!("failed to start call: {e}");
            return;
        }
        info!("joining room {room}, press ctrl-c to hang up");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("hanging up");
                    let _ = client.hangup().await;
                    client.shutdown().await;
                    break;
                }
                event = events.recv() => match event {
                    Ok(CallEvent::IncomingPeer(peer)) => {
                        info!("peer {peer} arrived, accepting");
                        if let Err(e) = client.accept_incoming().await {
                            error!("accept failed: {e}");
                        }
                    }
                    Ok(CallEvent::StateChanged(state)) => {
                        info!("session state: {state:?}");
                    }
                    Ok(CallEvent::Failed(e)) => {
                        error!("call failed: {e}");
                    }
                    Ok(CallEvent::LinkUp) => info!("relay link up"),
                    Ok(CallEvent::LinkDown) => info!("relay link down, reconnecting"),
                    Err(_) => break,
                },
            }
        }
    });
}

fn parse_arg(args: &[String], long: &str, short: &str) -> Option<String> {
    args.iter()
        .position(|a| a == long || a == short)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
