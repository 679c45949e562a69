//! Per-`app_id` registry: nameplate lifecycle, the live `Mailbox` cache, and
//! pruning within one namespace.

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::error::{Error, Result};
use crate::helpers::{add_side, generate_mailbox_id, remove_side, summarize_nameplate};
use crate::mailbox::Mailbox;
use crate::store::{MailboxRow, NameplateRow, Store};

pub struct AppNamespace {
    app_id: String,
    blur_usage: Option<f64>,
    mailboxes: HashMap<String, Mailbox>,
}

impl AppNamespace {
    pub fn new(app_id: impl Into<String>, blur_usage: Option<f64>) -> Self {
        AppNamespace {
            app_id: app_id.into(),
            blur_usage,
            mailboxes: HashMap::new(),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Choose a fresh nameplate id and immediately claim it for `side`
    ///. Uses the process-wide RNG; see
    /// [`Self::allocate_nameplate_with_rng`] for a seedable variant used in
    /// tests that need a deterministic draw.
    pub fn allocate_nameplate(&mut self, store: &mut Store, side: &str, when: f64) -> Result<String> {
        let mut rng = rand::thread_rng();
        self.allocate_nameplate_with_rng(store, side, when, &mut rng)
    }

    pub fn allocate_nameplate_with_rng<R: Rng + ?Sized>(
        &mut self,
        store: &mut Store,
        side: &str,
        when: f64,
        rng: &mut R,
    ) -> Result<String> {
        let id = self.find_available_nameplate_id(store, rng)?;
        self.claim_nameplate(store, &id, side, when)?;
        Ok(id)
    }

    /// Try sizes 1, 2, 3 digits in turn; for each size enumerate the full
    /// decimal range and pick uniformly at random from the ids not already
    /// claimed. Falls back to 1000 random 4-6 digit draws.
    fn find_available_nameplate_id<R: Rng + ?Sized>(
        &self,
        store: &Store,
        rng: &mut R,
    ) -> Result<String> {
        let claimed = store.nameplate_ids(&self.app_id)?;
        for size in 1u32..=3 {
            let lo = 10i64.pow(size - 1);
            let hi = 10i64.pow(size) - 1;
            let available: Vec<String> = (lo..=hi)
                .map(|n| n.to_string())
                .filter(|id| !claimed.contains(id))
                .collect();
            if !available.is_empty() {
                let idx = rng.gen_range(0..available.len());
                return Ok(available[idx].clone());
            }
        }
        for _ in 0..1000 {
            let id = rng.gen_range(1000..1_000_000).to_string();
            if !claimed.contains(&id) {
                return Ok(id);
            }
        }
        Err(Error::NoNameplate)
    }

    /// Idempotent per `(id, side)`. Always returns the nameplate's
    /// `mailbox_id`.
    pub fn claim_nameplate(
        &mut self,
        store: &mut Store,
        id: &str,
        side: &str,
        when: f64,
    ) -> Result<String> {
        match store.get_nameplate(&self.app_id, id)? {
            Some(row) => match add_side(row.side1.as_deref(), row.side2.as_deref(), side) {
                Err(Error::Crowded) => {
                    store.set_nameplate_crowded(&self.app_id, id)?;
                    Err(Error::Crowded)
                }
                Err(e) => Err(e),
                Ok(sr) => {
                    if sr.changed {
                        store.update_nameplate_sides(
                            &self.app_id,
                            id,
                            sr.side1.as_deref(),
                            sr.side2.as_deref(),
                            when,
                            Some(when),
                        )?;
                    }
                    Ok(row.mailbox_id)
                }
            },
            None => {
                let mailbox_id = generate_mailbox_id();
                log::debug!("creating nameplate #{id} for app_id {}", self.app_id);
                store.insert_nameplate(&NameplateRow {
                    app_id: self.app_id.clone(),
                    id: id.to_owned(),
                    mailbox_id: mailbox_id.clone(),
                    side1: Some(side.to_owned()),
                    side2: None,
                    crowded: false,
                    started: when,
                    second: None,
                    updated: when,
                })?;
                Ok(mailbox_id)
            }
        }
    }

    /// Idempotent; a no-op if the row or side is absent.
    pub fn release_nameplate(
        &mut self,
        store: &mut Store,
        id: &str,
        side: &str,
        when: f64,
    ) -> Result<()> {
        let row = match store.get_nameplate(&self.app_id, id)? {
            Some(r) => r,
            None => return Ok(()),
        };
        let sr = remove_side(row.side1.as_deref(), row.side2.as_deref(), side);
        if sr.empty {
            store.delete_nameplate(&self.app_id, id)?;
            let usage = summarize_nameplate(row.started, row.second, when, false, row.crowded, self.blur_usage);
            store.insert_nameplate_usage(&self.app_id, &usage)?;
        } else if sr.changed {
            store.update_nameplate_sides(
                &self.app_id,
                id,
                sr.side1.as_deref(),
                sr.side2.as_deref(),
                when,
                None,
            )?;
        }
        Ok(())
    }

    /// If no live `Mailbox` exists for `mailbox_id`, insert a mailbox row
    /// and construct one. Always invokes `Mailbox::open` afterwards.
    pub fn open_mailbox(
        &mut self,
        store: &mut Store,
        mailbox_id: &str,
        side: &str,
        when: f64,
    ) -> Result<&mut Mailbox> {
        if !self.mailboxes.contains_key(mailbox_id) {
            log::debug!("spawning #{mailbox_id} for app_id {}", self.app_id);
            store.insert_mailbox(&MailboxRow {
                app_id: self.app_id.clone(),
                id: mailbox_id.to_owned(),
                side1: Some(side.to_owned()),
                side2: None,
                crowded: false,
                started: when,
                second: None,
                first_mood: None,
            })?;
            self.mailboxes.insert(
                mailbox_id.to_owned(),
                Mailbox::new(self.app_id.clone(), mailbox_id.to_owned(), self.blur_usage),
            );
        }
        let mailbox = self.mailboxes.get_mut(mailbox_id).expect("just inserted");
        mailbox.open(store, side, when)?;
        Ok(mailbox)
    }

    pub fn mailbox(&mut self, mailbox_id: &str) -> Option<&mut Mailbox> {
        self.mailboxes.get_mut(mailbox_id)
    }

    /// All nameplate ids currently claimed in this app, for the `list`
    /// client command.
    pub fn nameplate_ids(&self, store: &Store) -> Result<HashSet<String>> {
        store.nameplate_ids(&self.app_id)
    }

    /// Drop the in-memory entry. Called once a `Mailbox` has deleted its own
    /// row.
    pub fn free_mailbox(&mut self, mailbox_id: &str) {
        self.mailboxes.remove(mailbox_id);
    }

    /// Close `side`'s claim on `mailbox_id`, freeing the live entry if the
    /// mailbox became empty.
    pub fn close_mailbox(
        &mut self,
        store: &mut Store,
        mailbox_id: &str,
        side: &str,
        mood: &str,
        when: f64,
    ) -> Result<()> {
        let Some(mailbox) = self.mailboxes.get_mut(mailbox_id) else {
            return Ok(());
        };
        let deleted = mailbox.close(store, side, mood, when)?;
        if deleted {
            self.free_mailbox(mailbox_id);
        }
        Ok(())
    }

    /// Delete every nameplate row in this app with `updated < old`, emitting
    /// a `pruned=true` usage record for each. Returns the count of
    /// remaining nameplate rows in this app.
    pub fn prune_nameplates(&mut self, store: &mut Store, old: f64) -> Result<usize> {
        let stale = store.nameplates_older_than(&self.app_id, old)?;
        for row in stale {
            log::info!("pruning nameplate #{} for app_id {}", row.id, self.app_id);
            let usage = summarize_nameplate(row.started, row.second, old, true, row.crowded, self.blur_usage);
            store.delete_nameplate(&row.app_id, &row.id)?;
            store.insert_nameplate_usage(&row.app_id, &usage)?;
        }
        store.count_nameplates_for_app(&self.app_id)
    }

    /// For each mailbox with persisted messages or a live entry, prune it if
    /// idle.
    /// Returns true if any live mailbox remains.
    pub fn prune_mailboxes(&mut self, store: &mut Store, old: f64) -> Result<bool> {
        let mut ids = store.mailbox_ids_with_rows(&self.app_id)?;
        ids.extend(self.mailboxes.keys().cloned());
        for id in ids {
            let mut mailbox = self
                .mailboxes
                .remove(&id)
                .unwrap_or_else(|| Mailbox::new(self.app_id.clone(), id.clone(), self.blur_usage));
            if mailbox.is_idle(store, old)? {
                log::info!("pruning mailbox #{id} for app_id {}", self.app_id);
                mailbox.prune(store, old)?;
            } else {
                self.mailboxes.insert(id, mailbox);
            }
        }
        Ok(!self.mailboxes.is_empty())
    }

    /// Stop every live mailbox's listeners without mutating durable state.
    pub fn shutdown(&self) {
        for mailbox in self.mailboxes.values() {
            mailbox.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn allocate_then_claim_is_idempotent() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        let mut rng = StdRng::seed_from_u64(42);

        let id = app
            .allocate_nameplate_with_rng(&mut store, "A", 1000.0, &mut rng)
            .unwrap();
        let mbox1 = app.claim_nameplate(&mut store, &id, "A", 1005.0).unwrap();
        let mbox2 = app.claim_nameplate(&mut store, &id, "A", 1005.0).unwrap();
        assert_eq!(mbox1, mbox2);
        let row = store.get_nameplate("app", &id).unwrap().unwrap();
        assert_eq!(row.side2, None);
    }

    #[test]
    fn crowded_nameplate_preserves_existing_sides() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);

        let mbox = app.claim_nameplate(&mut store, "1", "A", 1000.0).unwrap();
        let mbox2 = app.claim_nameplate(&mut store, "1", "B", 1010.0).unwrap();
        assert_eq!(mbox, mbox2);

        let err = app.claim_nameplate(&mut store, "1", "C", 1040.0).unwrap_err();
        assert!(matches!(err, Error::Crowded));

        let row = store.get_nameplate("app", "1").unwrap().unwrap();
        assert!(row.crowded);
        assert_eq!(row.side1.as_deref(), Some("A"));
        assert_eq!(row.side2.as_deref(), Some("B"));
    }

    #[test]
    fn lazy_mailbox_row_creation() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        let _id = app.claim_nameplate(&mut store, "1", "A", 1000.0).unwrap();
        assert!(store.get_mailbox("app", "mbox").unwrap().is_none());
    }

    #[test]
    fn release_empty_nameplate_deletes_row() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        app.claim_nameplate(&mut store, "1", "A", 1000.0).unwrap();
        app.release_nameplate(&mut store, "1", "A", 1100.0).unwrap();
        assert!(store.get_nameplate("app", "1").unwrap().is_none());
    }

    #[test]
    fn release_absent_side_is_noop() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        app.claim_nameplate(&mut store, "1", "A", 1000.0).unwrap();
        app.release_nameplate(&mut store, "1", "Z", 1100.0).unwrap();
        let row = store.get_nameplate("app", "1").unwrap().unwrap();
        assert_eq!(row.side1.as_deref(), Some("A"));
    }

    #[test]
    fn open_mailbox_then_close_frees_live_entry() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        let mbox_id = app.claim_nameplate(&mut store, "1", "A", 1000.0).unwrap();
        app.open_mailbox(&mut store, &mbox_id, "A", 1000.0).unwrap();
        assert!(app.mailbox(&mbox_id).is_some());

        app.close_mailbox(&mut store, &mbox_id, "A", "happy", 1050.0)
            .unwrap();
        assert!(app.mailbox(&mbox_id).is_none());
        assert!(store.get_mailbox("app", &mbox_id).unwrap().is_none());
    }

    #[test]
    fn prune_nameplates_is_scoped_to_this_app() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app_a = AppNamespace::new("app-a", None);
        let mut app_b = AppNamespace::new("app-b", None);
        app_a.claim_nameplate(&mut store, "1", "A", 0.0).unwrap();
        app_b.claim_nameplate(&mut store, "1", "B", 0.0).unwrap();

        let remaining = app_a.prune_nameplates(&mut store, 100.0).unwrap();
        assert_eq!(remaining, 0);
        assert!(store.get_nameplate("app-a", "1").unwrap().is_none());
        assert!(store.get_nameplate("app-b", "1").unwrap().is_some());
    }

    #[test]
    fn prune_mailboxes_evicts_idle_channel() {
        let mut store = Store::open_in_memory().unwrap();
        let mut app = AppNamespace::new("app", None);
        let mbox_id = app.claim_nameplate(&mut store, "1", "A", 0.0).unwrap();
        app.open_mailbox(&mut store, &mbox_id, "A", 0.0).unwrap();
        app.free_mailbox(&mbox_id); // simulate the listener having disconnected long ago

        let still_active = app.prune_mailboxes(&mut store, 1_000.0).unwrap();
        assert!(!still_active);
        assert!(store.get_mailbox("app", &mbox_id).unwrap().is_none());
    }
}
