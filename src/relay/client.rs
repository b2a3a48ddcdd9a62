//! A connected relay client: its id, the sending half of its outbound
//! queue, and whether it has authenticated yet.

use tokio::sync::mpsc::UnboundedSender;
use tungstenite::protocol::Message as WsMessage;
use uuid::Uuid;

use super::channel::ClientId;

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub sender: UnboundedSender<WsMessage>,
    pub authenticated: bool,
}

impl Client {
    /// A client with a fresh `client-<uuid>` id. `authenticated` starts
    /// `true` when the relay runs without a secret.
    pub fn new(sender: UnboundedSender<WsMessage>, authenticated: bool) -> Self {
        Self {
            id: format!("client-{}", Uuid::new_v4()),
            sender,
            authenticated,
        }
    }
}
