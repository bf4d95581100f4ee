use actix::{Actor, Addr};
use actix_web::middleware::Logger;
use actix_web::{get, post, web, App, Error, HttpRequest, HttpResponse, HttpServer, Responder};
use actix_web_actors::ws;
use config::Config;
use serde::{Deserialize, Serialize};

#[macro_use]
extern crate log;
extern crate env_logger;

mod hub;
mod messages;
mod websocket;
use self::hub::{Broadcast, ChatHub};
use self::messages::{IncomingMessage, UNKNOWN_MESSAGE};
use self::websocket::WebSocketActor;

const USER_ID_HEADER: &str = "X-User-Id";

#[derive(Debug, Deserialize, Serialize)]
struct Settings {
    host: String,
    port: u16,
}

/// Caller identity from the `X-User-Id` header; absent or non-numeric is 0
fn user_id_from_request(req: &HttpRequest) -> i64 {
    req.headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[post("/messages")]
async fn post_message(
    req: HttpRequest,
    body: web::Json<IncomingMessage>,
    hub: web::Data<Addr<ChatHub>>,
) -> impl Responder {
    let incoming = body.into_inner();
    if incoming.msg_type == UNKNOWN_MESSAGE {
        return HttpResponse::BadRequest().body("unknown message type");
    }
    hub.do_send(Broadcast {
        message: incoming.message,
        from_user_id: user_id_from_request(&req),
    });
    HttpResponse::Accepted().finish()
}

#[get("/messages/listen")]
async fn listen(
    req: HttpRequest,
    stream: web::Payload,
    hub: web::Data<Addr<ChatHub>>,
) -> Result<HttpResponse, Error> {
    let user_id = user_id_from_request(&req);
    info!("Websocket connection received for user {}", user_id);
    ws::start(
        WebSocketActor::new(user_id, hub.get_ref().clone()),
        &req,
        stream,
    )
}

fn load_settings() -> Result<Settings, config::ConfigError> {
    Config::builder()
        .set_default("host", "0.0.0.0")?
        .set_default("port", 9999)?
        .add_source(config::File::with_name("configuration.toml").required(false))
        .build()?
        .try_deserialize::<Settings>()
}

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let settings = load_settings()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;

    let hub = web::Data::new(ChatHub::new().start());

    info!("Starting chat server on {}:{}", settings.host, settings.port);
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(hub.clone())
            .service(listen)
            .service(post_message)
    })
    .bind((settings.host.as_str(), settings.port))?
    .run()
    .await
}
