use std::io;
use std::time::Duration;

use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use gate_http::handler::{make_handler, Payload};
use gate_http::protocol::RequestContext;
use gate_http::server::Server;

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let handler = make_handler(|ctx: RequestContext, payload: Payload| async move {
        info!(client_ip = ctx.client_ip(), fields = payload.len(), "handling payload");
        Ok::<_, io::Error>(serde_json::to_string(&payload)?)
    });

    let handle = Server::builder()
        .address("127.0.0.1:8080")
        .handler(handler)
        .max_connections(100)
        .ttl(Duration::from_secs(30))
        .content_size_limit(64 * 1024)
        .build()
        .expect("address is set")
        .listen()
        .await
        .expect("bind failed");

    info!(addr = %handle.local_addr(), "echo server up, ctrl-c to stop");
    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    handle.shutdown();
}
