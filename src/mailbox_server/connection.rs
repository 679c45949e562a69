//! Translates wire-protocol client requests into calls on the rendezvous
//! core, and core events back into wire-protocol server messages.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use futures_channel::mpsc::UnboundedSender;

use magic_wormhole::error::Error;
use magic_wormhole::message::{
    ClientMessage, Mood, NameplateInfo, Phase, ServerMessage, ServerMessageType,
};
use magic_wormhole::rendezvous::Rendezvous;
use magic_wormhole::store::MessageRow;

fn now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs_f64()
}

fn mood_to_str(mood: &Mood) -> &'static str {
    match mood {
        Mood::Happy => "happy",
        Mood::Lonely => "lonely",
        Mood::Scary => "scary",
        Mood::Errory => "errory",
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One connected client. Doubles as the listener handle registered with
/// whatever mailbox it opens, so a connection never needs to invent a
/// second id.
pub struct Connection {
    pub id: u64,
    pub sender: UnboundedSender<ServerMessage>,
    pub app_id: Option<String>,
    pub side: Option<String>,
    pub nameplate_id: Option<String>,
    pub mailbox_id: Option<String>,
}

impl Connection {
    pub fn new(sender: UnboundedSender<ServerMessage>) -> Self {
        Connection {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            sender,
            app_id: None,
            side: None,
            nameplate_id: None,
            mailbox_id: None,
        }
    }

    fn send(&self, msg: ServerMessage) {
        // The other end only vanishes once the connection is tearing down
        // anyway, in which case dropping the message is fine.
        let _ = self.sender.unbounded_send(msg);
    }

    fn app_id(&self) -> Result<&str, Error> {
        self.app_id
            .as_deref()
            .ok_or_else(|| Error::General("must bind before sending other commands".into()))
    }

    fn side(&self) -> Result<&str, Error> {
        self.side
            .as_deref()
            .ok_or_else(|| Error::General("must bind before sending other commands".into()))
    }
}

pub struct MailboxServer {
    rendezvous: Rendezvous,
}

impl MailboxServer {
    pub fn new(rendezvous: Rendezvous) -> Self {
        MailboxServer { rendezvous }
    }

    pub fn prune(&mut self, old: f64) -> Result<(), Error> {
        self.rendezvous.prune(old)
    }

    /// Greet a freshly accepted connection with the welcome blob.
    pub fn connect(&mut self, connection: &Connection) -> Result<(), Error> {
        connection.send(ServerMessage::new(
            None,
            None,
            ServerMessageType::Welcome {
                welcome: self.rendezvous.welcome().clone(),
            },
        ));
        Ok(())
    }

    /// Acknowledge receipt of any client message.
    pub fn ack(&mut self, connection: &Connection, msg: &ClientMessage) -> Result<(), Error> {
        connection.send(ServerMessage::ack(msg.id.clone()));
        Ok(())
    }

    pub fn bind(&mut self, connection: &mut Connection, app_id: &str, side: &str) -> Result<(), Error> {
        connection.app_id = Some(app_id.to_owned());
        connection.side = Some(side.to_owned());
        Ok(())
    }

    pub fn list(&mut self, connection: &Connection) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let ids = self.rendezvous.list_nameplates(&app_id)?;
        let mut nameplates: Vec<NameplateInfo> = ids
            .into_iter()
            .filter_map(|id| id.parse::<usize>().ok())
            .map(|id| NameplateInfo { id })
            .collect();
        nameplates.sort_by_key(|n| n.id);
        connection.send(ServerMessage::new(
            None,
            None,
            ServerMessageType::Nameplates { nameplates },
        ));
        Ok(())
    }

    pub fn allocate(&mut self, connection: &mut Connection) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        let nameplate_id = self.rendezvous.allocate_nameplate(&app_id, &side, now())?;
        connection.nameplate_id = Some(nameplate_id.clone());
        let id: usize = nameplate_id.parse().unwrap_or(0);
        connection.send(ServerMessage::new(
            None,
            None,
            ServerMessageType::Allocated { nameplate_id: id },
        ));
        Ok(())
    }

    pub fn claim(&mut self, connection: &mut Connection, nameplate_id: usize) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        let id = nameplate_id.to_string();
        let mailbox_id = self.rendezvous.claim_nameplate(&app_id, &id, &side, now())?;
        connection.nameplate_id = Some(id);
        connection.send(ServerMessage::new(
            None,
            None,
            ServerMessageType::Claimed { mailbox_id },
        ));
        Ok(())
    }

    pub fn release(
        &mut self,
        connection: &mut Connection,
        nameplate_id: Option<usize>,
    ) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        let id = nameplate_id
            .map(|n| n.to_string())
            .or_else(|| connection.nameplate_id.clone())
            .ok_or_else(|| Error::General("no nameplate to release".into()))?;
        self.rendezvous.release_nameplate(&app_id, &id, &side, now())?;
        connection.nameplate_id = None;
        connection.send(ServerMessage::new(None, None, ServerMessageType::Released));
        Ok(())
    }

    pub fn open(&mut self, connection: &mut Connection, mailbox_id: &str) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        self.rendezvous.open_mailbox(&app_id, mailbox_id, &side, now())?;
        let snapshot = self.rendezvous.add_listener(
            &app_id,
            mailbox_id,
            connection.id,
            Box::new({
                let sender = connection.sender.clone();
                move |row: &MessageRow| {
                    let _ = sender.unbounded_send(ServerMessage::new(
                        Some(row.msg_id.clone()),
                        Some(row.server_rx),
                        ServerMessageType::Message {
                            side: row.side.clone(),
                            phase: Phase::from_wire_str(&row.phase),
                            body: row.body.clone(),
                        },
                    ));
                }
            }),
            Box::new({
                let sender = connection.sender.clone();
                move || {
                    // Listener teardown; the channel simply stops being
                    // read from once the connection task notices it's
                    // closed. Dropping the sender is enough to signal that.
                    drop(sender.clone());
                }
            }),
        )?;
        connection.mailbox_id = Some(mailbox_id.to_owned());
        for row in snapshot {
            connection.send(ServerMessage::new(
                Some(row.msg_id),
                Some(row.server_rx),
                ServerMessageType::Message {
                    side: row.side,
                    phase: Phase::from_wire_str(&row.phase),
                    body: row.body,
                },
            ));
        }
        Ok(())
    }

    pub fn add(
        &mut self,
        connection: &Connection,
        msg_id: &str,
        phase: &Phase,
        body: &[u8],
    ) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        let mailbox_id = connection
            .mailbox_id
            .clone()
            .ok_or_else(|| Error::General("must open a mailbox before adding messages".into()))?;
        self.rendezvous.add_message(
            &app_id,
            &mailbox_id,
            MessageRow {
                app_id,
                mailbox_id,
                side,
                phase: phase.as_wire_str(),
                body: body.to_vec(),
                server_rx: now(),
                msg_id: msg_id.to_owned(),
            },
        )
    }

    pub fn close(
        &mut self,
        connection: &mut Connection,
        mailbox_id: &str,
        mood: &Mood,
    ) -> Result<(), Error> {
        let app_id = connection.app_id()?.to_owned();
        let side = connection.side()?.to_owned();
        self.rendezvous
            .remove_listener(&app_id, mailbox_id, connection.id);
        self.rendezvous
            .close_mailbox(&app_id, mailbox_id, &side, mood_to_str(mood), now())?;
        connection.mailbox_id = None;
        connection.send(ServerMessage::new(None, None, ServerMessageType::Closed));
        Ok(())
    }

    pub fn ping(&mut self, connection: &Connection, _msg_id: &str, ping: u32) -> Result<(), Error> {
        connection.send(ServerMessage::new(
            None,
            None,
            ServerMessageType::Pong { ping },
        ));
        Ok(())
    }

    /// Best-effort cleanup when the socket drops without a clean
    /// release/close: deregister the listener and release a still-claimed
    /// nameplate, so its row doesn't linger until the prune timer catches
    /// it.
    pub fn disconnect(&mut self, connection: &mut Connection) {
        if let (Some(app_id), Some(mailbox_id)) = (connection.app_id.clone(), connection.mailbox_id.clone()) {
            self.rendezvous.remove_listener(&app_id, &mailbox_id, connection.id);
        }
        if let (Some(app_id), Some(side), Some(nameplate_id)) = (
            connection.app_id.clone(),
            connection.side.clone(),
            connection.nameplate_id.clone(),
        ) {
            let _ = self
                .rendezvous
                .release_nameplate(&app_id, &nameplate_id, &side, now());
        }
    }
}
