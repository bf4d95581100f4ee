use actix::prelude::*;
use actix_web_actors::ws;

use crate::hub::{Broadcast, ChatHub, Connect, Deliver, Disconnect};
use crate::messages::{IncomingMessage, UNKNOWN_MESSAGE};

/// One listener on `/messages/listen`
pub struct WebSocketActor {
    user_id: i64,
    session_id: Option<usize>,
    hub: Addr<ChatHub>,
}

impl WebSocketActor {
    pub fn new(user_id: i64, hub: Addr<ChatHub>) -> Self {
        Self {
            user_id,
            session_id: None,
            hub,
        }
    }

    fn on_text(&self, text: &str) {
        debug!("Received message from user {}: {}", self.user_id, text);
        let incoming: IncomingMessage = match serde_json::from_str(text) {
            Ok(incoming) => incoming,
            Err(e) => {
                error!("Payload is invalid JSON ({}): {}", e, text);
                return;
            }
        };
        if incoming.msg_type == UNKNOWN_MESSAGE {
            debug!("Ignoring message without a type from user {}", self.user_id);
            return;
        }
        self.hub.do_send(Broadcast {
            message: incoming.message,
            from_user_id: self.user_id,
        });
    }
}

impl Actor for WebSocketActor {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let addr = ctx.address();
        self.hub
            .send(Connect {
                user_id: self.user_id,
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(session_id) => act.session_id = Some(session_id),
                    Err(e) => {
                        error!("Hub unavailable: {}", e);
                        ctx.stop();
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        if let Some(session_id) = self.session_id.take() {
            self.hub.do_send(Disconnect { session_id });
        }
        Running::Stop
    }
}

impl Handler<Deliver> for WebSocketActor {
    type Result = ();

    fn handle(&mut self, msg: Deliver, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WebSocketActor {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => self.on_text(&text),
            Ok(ws::Message::Ping(bytes)) => ctx.pong(&bytes),
            Ok(ws::Message::Close(reason)) => {
                info!("Closing connection for user {}", self.user_id);
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                error!("Websocket protocol error for user {}: {}", self.user_id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}
