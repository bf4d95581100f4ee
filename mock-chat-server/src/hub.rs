use actix::prelude::*;
use std::collections::HashMap;

use crate::messages::OutgoingMessage;

/// Serialized frame delivered to one session
#[derive(Message)]
#[rtype(result = "()")]
pub struct Deliver(pub String);

/// Register a session; answers with its session id
#[derive(Message)]
#[rtype(result = "usize")]
pub struct Connect {
    pub user_id: i64,
    pub addr: Recipient<Deliver>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: usize,
}

/// Fan a chat message out to every session; answers with the message id
#[derive(Message)]
#[rtype(result = "u64")]
pub struct Broadcast {
    pub message: String,
    pub from_user_id: i64,
}

struct Session {
    user_id: i64,
    addr: Recipient<Deliver>,
}

/// Registry of connected sessions
pub struct ChatHub {
    sessions: HashMap<usize, Session>,
    next_session_id: usize,
    next_message_id: u64,
}

impl ChatHub {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 1,
            next_message_id: 1,
        }
    }
}

impl Default for ChatHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for ChatHub {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatHub {
    type Result = usize;

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) -> usize {
        let session_id = self.next_session_id;
        self.next_session_id += 1;
        self.sessions.insert(
            session_id,
            Session {
                user_id: msg.user_id,
                addr: msg.addr,
            },
        );
        debug!("Session {} registered for user {}", session_id, msg.user_id);
        session_id
    }
}

impl Handler<Disconnect> for ChatHub {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        if self.sessions.remove(&msg.session_id).is_some() {
            debug!("Session {} unregistered", msg.session_id);
        }
    }
}

impl Handler<Broadcast> for ChatHub {
    type Result = u64;

    fn handle(&mut self, msg: Broadcast, _: &mut Context<Self>) -> u64 {
        let message_id = self.next_message_id;
        self.next_message_id += 1;

        for (session_id, session) in &self.sessions {
            let out = OutgoingMessage::for_recipient(
                message_id,
                &msg.message,
                msg.from_user_id,
                session.user_id,
            );
            match serde_json::to_string(&out) {
                Ok(text) => {
                    debug!("Writing message {} to session {}", message_id, session_id);
                    session.addr.do_send(Deliver(text));
                }
                Err(e) => error!("Failed to serialize message {}: {}", message_id, e),
            }
        }
        message_id
    }
}
