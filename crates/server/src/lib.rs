//! HTTP/WebSocket front for the draft gateway.
//!
//! Serves `/health` and upgrades `/draft` sockets into gateway
//! connections. Each socket gets a bridge task pumping outbound frames
//! from the connection outbox and inbound text into [`Gateway::handle`];
//! when either side goes away the connection is reported offline and the
//! reconnection window starts ticking.

mod store;

pub use store::ContentStore;

use actix_cors::Cors;
use actix_web::App;
use actix_web::HttpRequest;
use actix_web::HttpResponse;
use actix_web::HttpServer;
use actix_web::Responder;
use actix_web::middleware::Logger;
use actix_web::web;
use clap::Parser;
use dd_gameroom::Gateway;
use dd_gameroom::Outgoing;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
pub struct Args {
    /// Address to listen on.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8888")]
    pub bind: String,
    /// Directory holding pools/, presets/, and cards.json.
    #[arg(long, env = "CONTENT_DIR", default_value = "content")]
    pub content: PathBuf,
}

async fn health() -> impl Responder {
    HttpResponse::Ok().body("ok")
}

async fn draft(
    req: HttpRequest,
    stream: web::Payload,
    gateway: web::Data<Gateway>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, stream) = actix_ws::handle(&req, stream)?;
    bridge(gateway.into_inner(), session, stream);
    Ok(response)
}

/// Spawns the socket pump for one accepted connection.
fn bridge(
    gateway: Arc<Gateway>,
    mut session: actix_ws::Session,
    mut stream: actix_ws::MessageStream,
) {
    use futures::StreamExt;
    let (connection, mut outbox) = gateway.connect();
    log::debug!("[bridge {}] connected", connection.id());
    actix_web::rt::spawn(async move {
        'sesh: loop {
            tokio::select! {
                biased;
                out = outbox.recv() => match out {
                    Some(Outgoing::Frame(json)) => if session.text(json).await.is_err() { break 'sesh },
                    Some(Outgoing::Close) => break 'sesh,
                    None => break 'sesh,
                },
                msg = stream.next() => match msg {
                    Some(Ok(actix_ws::Message::Text(text))) => gateway.handle(&connection, &text),
                    Some(Ok(actix_ws::Message::Close(_))) => break 'sesh,
                    Some(Err(_)) => break 'sesh,
                    None => break 'sesh,
                    _ => continue 'sesh,
                },
            }
        }
        gateway.disconnect(&connection);
        let _ = session.close(None).await;
        log::debug!("[bridge {}] disconnected", connection.id());
    });
}

#[rustfmt::skip]
pub async fn run() -> anyhow::Result<()> {
    let args = Args::parse();
    let store = ContentStore::load(&args.content).map_err(|e| anyhow::anyhow!("{}", e))?;
    let gateway = web::Data::from(Gateway::new(Arc::new(store)));
    log::info!("starting draft server on {}", args.bind);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%r %s %Ts"))
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header(),
            )
            .app_data(gateway.clone())
            .route("/health", web::get().to(health))
            .route("/draft", web::get().to(draft))
    })
    .workers(6)
    .bind(&args.bind)?
    .run()
    .await?;
    Ok(())
}
