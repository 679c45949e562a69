//! The two-sided, ordered, persisted channel one nameplate's sides use to
//! exchange phase messages.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::helpers::{add_side, remove_side, summarize_mailbox};
use crate::store::{MailboxRow, MessageRow, Store};

/// Opaque, equality-comparable token identifying one registered listener.
/// Supplied by the caller (the transport layer); the core never interprets
/// it beyond map lookups.
pub type ListenerHandle = u64;

/// Delivers one message to one listener. Never blocks or awaits from the
/// core's point of view — in the server binary this wraps a
/// `futures_channel::mpsc::UnboundedSender::unbounded_send`.
pub type SendFn = Box<dyn Fn(&MessageRow) + Send>;
/// Asks a listener to terminate. Invoked on mailbox deletion and on process
/// shutdown.
pub type StopFn = Box<dyn Fn() + Send>;

/// Runtime state for a single `(app_id, mailbox_id)`. Construction is cheap;
/// the durable row is created by `AppNamespace::open_mailbox` before the
/// `Mailbox` is built.
pub struct Mailbox {
    app_id: String,
    mailbox_id: String,
    blur_usage: Option<f64>,
    listeners: HashMap<ListenerHandle, (SendFn, StopFn)>,
}

impl Mailbox {
    pub fn new(app_id: impl Into<String>, mailbox_id: impl Into<String>, blur_usage: Option<f64>) -> Self {
        Mailbox {
            app_id: app_id.into(),
            mailbox_id: mailbox_id.into(),
            blur_usage,
            listeners: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.mailbox_id
    }

    /// Apply `add_side`; on `Crowded`, mark the row crowded and propagate
    /// the error.
    pub fn open(&mut self, store: &mut Store, side: &str, when: f64) -> Result<()> {
        let row = store
            .get_mailbox(&self.app_id, &self.mailbox_id)?
            .ok_or_else(|| Error::General("mailbox row missing on open".into()))?;
        match add_side(row.side1.as_deref(), row.side2.as_deref(), side) {
            Err(Error::Crowded) => {
                store.set_mailbox_crowded(&self.app_id, &self.mailbox_id)?;
                Err(Error::Crowded)
            }
            Err(e) => Err(e),
            Ok(sr) => {
                if sr.changed {
                    store.update_mailbox_sides(
                        &self.app_id,
                        &self.mailbox_id,
                        sr.side1.as_deref(),
                        sr.side2.as_deref(),
                        Some(when),
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Register a listener and return the full current message list in
    /// `server_rx` ascending order, atomically with registration.
    pub fn add_listener(
        &mut self,
        store: &Store,
        handle: ListenerHandle,
        send: SendFn,
        stop: StopFn,
    ) -> Result<Vec<MessageRow>> {
        self.listeners.insert(handle, (send, stop));
        store.messages_for_mailbox(&self.app_id, &self.mailbox_id)
    }

    /// Deregister; a no-op if `handle` is already absent.
    pub fn remove_listener(&mut self, handle: ListenerHandle) {
        self.listeners.remove(&handle);
    }

    /// Append to `messages`, commit, then `send` to every listener
    /// registered at the moment broadcast begins.
    pub fn add_message(&mut self, store: &mut Store, msg: MessageRow) -> Result<()> {
        store.insert_message(&msg)?;
        for (send, _stop) in self.listeners.values() {
            send(&msg);
        }
        Ok(())
    }

    /// Apply `remove_side`. Returns `true` if the mailbox became empty and
    /// was deleted (the caller, `AppNamespace`, must then evict it from its
    /// live map via `free_mailbox` — see DESIGN.md for why the callback
    /// runs this way instead of through a back-reference).
    pub fn close(&mut self, store: &mut Store, side: &str, mood: &str, when: f64) -> Result<bool> {
        let row = match store.get_mailbox(&self.app_id, &self.mailbox_id)? {
            Some(r) => r,
            None => return Ok(false),
        };
        let sr = remove_side(row.side1.as_deref(), row.side2.as_deref(), side);
        if sr.empty {
            self.delete_and_summarize(store, &row, Some(mood), when, false)?;
            Ok(true)
        } else if sr.changed {
            store.update_mailbox_sides_and_mood(
                &self.app_id,
                &self.mailbox_id,
                sr.side1.as_deref(),
                sr.side2.as_deref(),
                mood,
            )?;
            Ok(false)
        } else {
            Ok(false)
        }
    }

    /// Force the deletion-and-summarize cascade regardless of current side
    /// occupancy, for the idle-prune path. Returns whether a row existed to
    /// prune.
    pub fn prune(&mut self, store: &mut Store, delete_time: f64) -> Result<bool> {
        let row = match store.get_mailbox(&self.app_id, &self.mailbox_id)? {
            Some(r) => r,
            None => return Ok(false),
        };
        self.delete_and_summarize(store, &row, None, delete_time, true)?;
        Ok(true)
    }

    fn delete_and_summarize(
        &mut self,
        store: &mut Store,
        row: &MailboxRow,
        closing_mood: Option<&str>,
        delete_time: f64,
        pruned: bool,
    ) -> Result<()> {
        let num_sides = store.distinct_message_authors(&self.app_id, &self.mailbox_id)?;
        let moods = [row.first_mood.as_deref(), closing_mood];
        let usage = summarize_mailbox(
            row.started,
            row.second,
            num_sides,
            &moods,
            delete_time,
            pruned,
            row.crowded,
            self.blur_usage,
        );
        store.insert_mailbox_usage(&self.app_id, &usage)?;
        store.delete_mailbox_and_messages(&self.app_id, &self.mailbox_id)?;
        for (_send, stop) in self.listeners.values() {
            stop();
        }
        Ok(())
    }

    /// True iff there are no listeners and either there are no messages or
    /// the most recent `server_rx` is older than `old`.
    pub fn is_idle(&self, store: &Store, old: f64) -> Result<bool> {
        if !self.listeners.is_empty() {
            return Ok(false);
        }
        match store.latest_message_server_rx(&self.app_id, &self.mailbox_id)? {
            None => Ok(true),
            Some(rx) => Ok(rx < old),
        }
    }

    /// Stop every listener without mutating durable state (process
    /// shutdown).
    pub fn shutdown(&self) {
        for (_send, stop) in self.listeners.values() {
            stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn open_mailbox_row(store: &mut Store, app_id: &str, mailbox_id: &str, side: &str, started: f64) {
        store
            .insert_mailbox(&MailboxRow {
                app_id: app_id.into(),
                id: mailbox_id.into(),
                side1: Some(side.into()),
                side2: None,
                crowded: false,
                started,
                second: None,
                first_mood: None,
            })
            .unwrap();
    }

    #[test]
    fn snapshot_then_broadcast_has_no_gap() {
        let mut store = Store::open_in_memory().unwrap();
        open_mailbox_row(&mut store, "app", "mbox", "A", 1000.0);
        let mut mailbox = Mailbox::new("app", "mbox", None);
        mailbox.open(&mut store, "A", 1000.0).unwrap();

        mailbox
            .add_message(
                &mut store,
                MessageRow {
                    app_id: "app".into(),
                    mailbox_id: "mbox".into(),
                    side: "A".into(),
                    phase: "p".into(),
                    body: vec![1],
                    server_rx: 1020.0,
                    msg_id: "m1".into(),
                },
            )
            .unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = received.clone();
        let snapshot = mailbox
            .add_listener(
                &store,
                1,
                Box::new(move |m: &MessageRow| received_clone.lock().unwrap().push(m.msg_id.clone())),
                Box::new(|| {}),
            )
            .unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].msg_id, "m1");

        mailbox
            .add_message(
                &mut store,
                MessageRow {
                    app_id: "app".into(),
                    mailbox_id: "mbox".into(),
                    side: "B".into(),
                    phase: "p".into(),
                    body: vec![2],
                    server_rx: 1030.0,
                    msg_id: "m2".into(),
                },
            )
            .unwrap();
        assert_eq!(*received.lock().unwrap(), vec!["m2".to_string()]);
    }

    #[test]
    fn close_on_last_side_deletes_and_summarizes() {
        let mut store = Store::open_in_memory().unwrap();
        open_mailbox_row(&mut store, "app", "mbox", "A", 0.0);
        let mut mailbox = Mailbox::new("app", "mbox", None);
        mailbox.open(&mut store, "A", 0.0).unwrap();

        let deleted = mailbox.close(&mut store, "A", "happy", 5.0).unwrap();
        assert!(deleted);
        assert!(store.get_mailbox("app", "mbox").unwrap().is_none());
    }

    #[test]
    fn idle_with_no_listeners_and_no_messages() {
        let mut store = Store::open_in_memory().unwrap();
        open_mailbox_row(&mut store, "app", "mbox", "A", 0.0);
        let mailbox = Mailbox::new("app", "mbox", None);
        assert!(mailbox.is_idle(&store, 100.0).unwrap());
    }

    #[test]
    fn not_idle_with_a_listener() {
        let mut store = Store::open_in_memory().unwrap();
        open_mailbox_row(&mut store, "app", "mbox", "A", 0.0);
        let mut mailbox = Mailbox::new("app", "mbox", None);
        mailbox
            .add_listener(&store, 1, Box::new(|_| {}), Box::new(|| {}))
            .unwrap();
        assert!(!mailbox.is_idle(&store, 100.0).unwrap());
    }
}
