//! Serves a directory and an echo WebSocket.
//!
//! ```text
//! RUST_LOG=debug cargo run --example static_server -- ./public 127.0.0.1:8080
//! ```

use duplex_web::{
    limits::ServerLimits, Outbound, Request, Response, Routes, Server, StatusCode,
    WebSocketHandler,
};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

struct Echo {
    messages: usize,
}

impl WebSocketHandler for Echo {
    fn connected(&mut self, socket: &mut Outbound<'_>) {
        socket.send_text("connected, send \"bye\" to close");
    }

    fn text(&mut self, socket: &mut Outbound<'_>, text: String) {
        self.messages += 1;
        match text.as_str() {
            "bye" => socket.close(),
            _ => socket.send_text(&format!("#{}: {text}", self.messages)),
        }
    }

    fn binary(&mut self, socket: &mut Outbound<'_>, data: Vec<u8>) {
        self.messages += 1;
        socket.send_binary(&data);
    }

    fn closed(&mut self) {
        tracing::info!(messages = self.messages, "echo session finished");
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| ".".into());
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:8080".into());

    let routes = Routes::new(root)
        .route("/time", |_| {
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default();
            Ok(Response::text(StatusCode::Ok, now))
        })
        .websocket("/echo", |req: &Request| {
            tracing::info!(agent = req.header("user-agent"), "echo client");
            Echo { messages: 0 }
        });

    Server::builder()
        .listener(TcpListener::bind(&addr).await.unwrap())
        .routes(routes)
        .server_limits(ServerLimits {
            max_connections: 16,
            ..ServerLimits::default()
        })
        .build()
        .launch()
        .await;
}
