//! Process-wide root: the `AppNamespace` registry, the prune sweep, and
//! orderly shutdown.

use std::collections::{HashMap, HashSet};

use crate::app_namespace::AppNamespace;
use crate::error::Result;
use crate::mailbox::{ListenerHandle, Mailbox, SendFn, StopFn};
use crate::message::WelcomeInfo;
use crate::store::{MessageRow, Store};

/// A mailbox or nameplate idle for longer than this is eligible for pruning.
pub const CHANNEL_EXPIRATION_TIME: f64 = 3.0 * 24.0 * 60.0 * 60.0;
/// How often the prune timer fires.
pub const EXPIRATION_CHECK_PERIOD: f64 = 2.0 * 60.0 * 60.0;

pub struct Rendezvous {
    store: Store,
    welcome: WelcomeInfo,
    blur_usage: Option<f64>,
    log_requests: bool,
    apps: HashMap<String, AppNamespace>,
}

impl Rendezvous {
    /// `log_requests` is implicitly true when `blur_usage` is unset, and
    /// stays that way rather than being silently overwritten later.
    pub fn new(store: Store, welcome: WelcomeInfo, blur_usage: Option<f64>) -> Self {
        let log_requests = blur_usage.is_none();
        Rendezvous {
            store,
            welcome,
            blur_usage,
            log_requests,
            apps: HashMap::new(),
        }
    }

    pub fn welcome(&self) -> &WelcomeInfo {
        &self.welcome
    }

    pub fn log_requests(&self) -> bool {
        self.log_requests
    }

    /// Construct the namespace lazily on first reference, then hand back
    /// disjoint borrows of it and the shared `Store` so callers can drive
    /// both without re-entering `self` (the app map and the store are
    /// independent fields, so this is a plain split borrow, not an
    /// `Rc<RefCell<_>>`).
    fn app_and_store(&mut self, app_id: &str) -> (&mut AppNamespace, &mut Store) {
        if !self.apps.contains_key(app_id) {
            if self.log_requests {
                log::info!("spawning app_id {app_id}");
            }
            self.apps
                .insert(app_id.to_owned(), AppNamespace::new(app_id, self.blur_usage));
        }
        let app = self.apps.get_mut(app_id).expect("just inserted");
        (app, &mut self.store)
    }

    pub fn allocate_nameplate(&mut self, app_id: &str, side: &str, when: f64) -> Result<String> {
        let (app, store) = self.app_and_store(app_id);
        app.allocate_nameplate(store, side, when)
    }

    pub fn claim_nameplate(
        &mut self,
        app_id: &str,
        nameplate_id: &str,
        side: &str,
        when: f64,
    ) -> Result<String> {
        let (app, store) = self.app_and_store(app_id);
        app.claim_nameplate(store, nameplate_id, side, when)
    }

    pub fn release_nameplate(
        &mut self,
        app_id: &str,
        nameplate_id: &str,
        side: &str,
        when: f64,
    ) -> Result<()> {
        let (app, store) = self.app_and_store(app_id);
        app.release_nameplate(store, nameplate_id, side, when)
    }

    pub fn open_mailbox(
        &mut self,
        app_id: &str,
        mailbox_id: &str,
        side: &str,
        when: f64,
    ) -> Result<()> {
        let (app, store) = self.app_and_store(app_id);
        app.open_mailbox(store, mailbox_id, side, when)?;
        Ok(())
    }

    pub fn add_listener(
        &mut self,
        app_id: &str,
        mailbox_id: &str,
        handle: ListenerHandle,
        send: SendFn,
        stop: StopFn,
    ) -> Result<Vec<MessageRow>> {
        let (app, store) = self.app_and_store(app_id);
        let mailbox = app
            .mailbox(mailbox_id)
            .expect("add_listener requires a prior open_mailbox");
        mailbox.add_listener(store, handle, send, stop)
    }

    pub fn remove_listener(&mut self, app_id: &str, mailbox_id: &str, handle: ListenerHandle) {
        let (app, _store) = self.app_and_store(app_id);
        if let Some(mailbox) = app.mailbox(mailbox_id) {
            mailbox.remove_listener(handle);
        }
    }

    pub fn add_message(
        &mut self,
        app_id: &str,
        mailbox_id: &str,
        message: MessageRow,
    ) -> Result<()> {
        let (app, store) = self.app_and_store(app_id);
        let mailbox = app
            .mailbox(mailbox_id)
            .expect("add_message requires a prior open_mailbox");
        mailbox.add_message(store, message)
    }

    pub fn close_mailbox(
        &mut self,
        app_id: &str,
        mailbox_id: &str,
        side: &str,
        mood: &str,
        when: f64,
    ) -> Result<()> {
        let (app, store) = self.app_and_store(app_id);
        app.close_mailbox(store, mailbox_id, side, mood, when)
    }

    pub fn list_nameplates(&mut self, app_id: &str) -> Result<HashSet<String>> {
        let (app, store) = self.app_and_store(app_id);
        app.nameplate_ids(store)
    }

    /// The mailbox for `mailbox_id` in `app_id`, if one is currently live.
    /// Exposed so the transport can check idleness etc. without a separate
    /// lookup surface.
    pub fn mailbox(&mut self, app_id: &str, mailbox_id: &str) -> Option<&mut Mailbox> {
        let (app, _store) = self.app_and_store(app_id);
        app.mailbox(mailbox_id)
    }

    /// Runs one prune sweep: union the apps with persisted messages with the
    /// apps already live, prune each, and evict any app left with zero
    /// nameplates and zero live mailboxes.
    pub fn prune(&mut self, old: f64) -> Result<()> {
        log::info!("beginning app prune");
        let mut app_ids: HashSet<String> = self.store.app_ids_with_messages()?;
        app_ids.extend(self.apps.keys().cloned());

        for app_id in app_ids {
            let (app, store) = self.app_and_store(&app_id);
            let remaining_nameplates = app.prune_nameplates(store, old)?;
            let mailboxes_remain = app.prune_mailboxes(store, old)?;
            if remaining_nameplates == 0 && !mailboxes_remain {
                log::info!("prune evicts app_id {app_id}");
                self.apps.remove(&app_id);
            }
        }
        log::info!("app prune ends, {} apps remaining", self.apps.len());
        Ok(())
    }

    /// Stop every live mailbox's listeners in every app, so in-flight
    /// clients terminate deterministically.
    pub fn shutdown(&self) {
        for app in self.apps.values() {
            app.shutdown();
        }
    }
}
