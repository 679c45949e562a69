//! Durable persistence for the rendezvous engine.
//!
//! Backed by `rusqlite`, the same way `mikedilger-gossip` backs its local
//! settings store: a single `Connection`, schema applied once at open time,
//! one method per row-level operation instead of ad-hoc SQL scattered
//! through the higher layers.

use std::collections::HashSet;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::helpers::Usage;

/// A `nameplates` row.
#[derive(Debug, Clone, PartialEq)]
pub struct NameplateRow {
    pub app_id: String,
    pub id: String,
    pub mailbox_id: String,
    pub side1: Option<String>,
    pub side2: Option<String>,
    pub crowded: bool,
    pub started: f64,
    pub second: Option<f64>,
    pub updated: f64,
}

/// A `mailboxes` row.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxRow {
    pub app_id: String,
    pub id: String,
    pub side1: Option<String>,
    pub side2: Option<String>,
    pub crowded: bool,
    pub started: f64,
    pub second: Option<f64>,
    pub first_mood: Option<String>,
}

/// A `messages` row.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub app_id: String,
    pub mailbox_id: String,
    pub side: String,
    pub phase: String,
    pub body: Vec<u8>,
    pub server_rx: f64,
    pub msg_id: String,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(include_str!("sql/schema.sql"))?;
        Ok(Store { conn })
    }

    // -- nameplates ---------------------------------------------------

    pub fn get_nameplate(&self, app_id: &str, id: &str) -> Result<Option<NameplateRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT app_id, id, mailbox_id, side1, side2, crowded, started, second, updated \
                 FROM nameplates WHERE app_id = ?1 AND id = ?2",
                params![app_id, id],
                |r| {
                    Ok(NameplateRow {
                        app_id: r.get(0)?,
                        id: r.get(1)?,
                        mailbox_id: r.get(2)?,
                        side1: r.get(3)?,
                        side2: r.get(4)?,
                        crowded: r.get(5)?,
                        started: r.get(6)?,
                        second: r.get(7)?,
                        updated: r.get(8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_nameplate(&mut self, row: &NameplateRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO nameplates (app_id, id, mailbox_id, side1, side2, crowded, started, second, updated) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                row.app_id,
                row.id,
                row.mailbox_id,
                row.side1,
                row.side2,
                row.crowded,
                row.started,
                row.second,
                row.updated,
            ],
        )?;
        Ok(())
    }

    pub fn update_nameplate_sides(
        &mut self,
        app_id: &str,
        id: &str,
        side1: Option<&str>,
        side2: Option<&str>,
        updated: f64,
        second: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE nameplates SET side1 = ?1, side2 = ?2, updated = ?3, second = COALESCE(?4, second) \
             WHERE app_id = ?5 AND id = ?6",
            params![side1, side2, updated, second, app_id, id],
        )?;
        Ok(())
    }

    pub fn set_nameplate_crowded(&mut self, app_id: &str, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE nameplates SET crowded = 1 WHERE app_id = ?1 AND id = ?2",
            params![app_id, id],
        )?;
        Ok(())
    }

    pub fn delete_nameplate(&mut self, app_id: &str, id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM nameplates WHERE app_id = ?1 AND id = ?2",
            params![app_id, id],
        )?;
        Ok(())
    }

    pub fn nameplate_ids(&self, app_id: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT id FROM nameplates WHERE app_id = ?1")?;
        let rows = stmt.query_map(params![app_id], |r| r.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for id in rows {
            out.insert(id?);
        }
        Ok(out)
    }

    pub fn nameplates_older_than(&self, app_id: &str, old: f64) -> Result<Vec<NameplateRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, id, mailbox_id, side1, side2, crowded, started, second, updated \
             FROM nameplates WHERE app_id = ?1 AND updated < ?2",
        )?;
        let rows = stmt.query_map(params![app_id, old], |r| {
            Ok(NameplateRow {
                app_id: r.get(0)?,
                id: r.get(1)?,
                mailbox_id: r.get(2)?,
                side1: r.get(3)?,
                side2: r.get(4)?,
                crowded: r.get(5)?,
                started: r.get(6)?,
                second: r.get(7)?,
                updated: r.get(8)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn count_nameplates_for_app(&self, app_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM nameplates WHERE app_id = ?1",
            params![app_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn insert_nameplate_usage(&mut self, app_id: &str, usage: &Usage) -> Result<()> {
        self.conn.execute(
            "INSERT INTO nameplate_usage (app_id, started, total_time, waiting_time, result) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                app_id,
                usage.started,
                usage.total_time,
                usage.waiting_time,
                usage.result,
            ],
        )?;
        Ok(())
    }

    // -- mailboxes ------------------------------------------------------

    pub fn get_mailbox(&self, app_id: &str, id: &str) -> Result<Option<MailboxRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT app_id, id, side1, side2, crowded, started, second, first_mood \
                 FROM mailboxes WHERE app_id = ?1 AND id = ?2",
                params![app_id, id],
                |r| {
                    Ok(MailboxRow {
                        app_id: r.get(0)?,
                        id: r.get(1)?,
                        side1: r.get(2)?,
                        side2: r.get(3)?,
                        crowded: r.get(4)?,
                        started: r.get(5)?,
                        second: r.get(6)?,
                        first_mood: r.get(7)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_mailbox(&mut self, row: &MailboxRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mailboxes (app_id, id, side1, side2, crowded, started, second, first_mood) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                row.app_id,
                row.id,
                row.side1,
                row.side2,
                row.crowded,
                row.started,
                row.second,
                row.first_mood,
            ],
        )?;
        Ok(())
    }

    pub fn update_mailbox_sides(
        &mut self,
        app_id: &str,
        id: &str,
        side1: Option<&str>,
        side2: Option<&str>,
        second: Option<f64>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE mailboxes SET side1 = ?1, side2 = ?2, second = COALESCE(?3, second) \
             WHERE app_id = ?4 AND id = ?5",
            params![side1, side2, second, app_id, id],
        )?;
        Ok(())
    }

    pub fn update_mailbox_sides_and_mood(
        &mut self,
        app_id: &str,
        id: &str,
        side1: Option<&str>,
        side2: Option<&str>,
        mood: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE mailboxes SET side1 = ?1, side2 = ?2, first_mood = ?3 \
             WHERE app_id = ?4 AND id = ?5",
            params![side1, side2, mood, app_id, id],
        )?;
        Ok(())
    }

    pub fn set_mailbox_crowded(&mut self, app_id: &str, id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE mailboxes SET crowded = 1 WHERE app_id = ?1 AND id = ?2",
            params![app_id, id],
        )?;
        Ok(())
    }

    pub fn delete_mailbox_and_messages(&mut self, app_id: &str, id: &str) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM mailboxes WHERE app_id = ?1 AND id = ?2",
            params![app_id, id],
        )?;
        tx.execute(
            "DELETE FROM messages WHERE app_id = ?1 AND mailbox_id = ?2",
            params![app_id, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn distinct_message_authors(&self, app_id: &str, mailbox_id: &str) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT side) FROM messages WHERE app_id = ?1 AND mailbox_id = ?2",
            params![app_id, mailbox_id],
            |r| r.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn messages_for_mailbox(&self, app_id: &str, mailbox_id: &str) -> Result<Vec<MessageRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT app_id, mailbox_id, side, phase, body, server_rx, msg_id \
             FROM messages WHERE app_id = ?1 AND mailbox_id = ?2 ORDER BY server_rx ASC",
        )?;
        let rows = stmt.query_map(params![app_id, mailbox_id], |r| {
            Ok(MessageRow {
                app_id: r.get(0)?,
                mailbox_id: r.get(1)?,
                side: r.get(2)?,
                phase: r.get(3)?,
                body: r.get(4)?,
                server_rx: r.get(5)?,
                msg_id: r.get(6)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_message(&mut self, row: &MessageRow) -> Result<()> {
        self.conn.execute(
            "INSERT INTO messages (app_id, mailbox_id, side, phase, body, server_rx, msg_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                row.app_id,
                row.mailbox_id,
                row.side,
                row.phase,
                row.body,
                row.server_rx,
                row.msg_id,
            ],
        )?;
        Ok(())
    }

    pub fn latest_message_server_rx(&self, app_id: &str, mailbox_id: &str) -> Result<Option<f64>> {
        let rx: Option<f64> = self
            .conn
            .query_row(
                "SELECT server_rx FROM messages WHERE app_id = ?1 AND mailbox_id = ?2 \
                 ORDER BY server_rx DESC LIMIT 1",
                params![app_id, mailbox_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(rx)
    }

    pub fn app_ids_with_messages(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT app_id FROM messages")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for id in rows {
            out.insert(id?);
        }
        Ok(out)
    }

    /// Mailbox ids with a persisted row in this app, i.e. at least one side
    /// has opened it. The persisted mailbox table is the claimed set.
    pub fn mailbox_ids_with_rows(&self, app_id: &str) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT id FROM mailboxes WHERE app_id = ?1")?;
        let rows = stmt.query_map(params![app_id], |r| r.get::<_, String>(0))?;
        let mut out = HashSet::new();
        for id in rows {
            out.insert(id?);
        }
        Ok(out)
    }

    pub fn insert_mailbox_usage(&mut self, app_id: &str, usage: &Usage) -> Result<()> {
        self.conn.execute(
            "INSERT INTO mailbox_usage (app_id, started, total_time, waiting_time, result) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                app_id,
                usage.started,
                usage.total_time,
                usage.waiting_time,
                usage.result,
            ],
        )?;
        Ok(())
    }
}
