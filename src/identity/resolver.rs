//! Per display name identity state machine.
//!
//! Every display name moves `Unchecked -> Checking -> Resolved`. Callers
//! register a waiter with [`IdentityResolver::get`]; the first waiter on a
//! name that is not already being checked sends the authority query and
//! arms a timeout. Whichever comes first, the answer or the timeout,
//! resolves the entry and fires every waiter once, in registration order.
//!
//! Entries remember the channels their participant shares with the bot.
//! Leaving the last one, quitting or a new session forgets the entry, so
//! a cached account is never handed to whoever takes the name next.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::common::error::ConfigError;
use crate::common::fold_nick;
use crate::config::AuthorityConfig;
use crate::identity::authority::{AuthorityGrammar, AuthorityReply};
use crate::outbound::OutboundQueue;

/// Result of a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nick: String,
    /// Authenticated account, `None` when not authenticated or unknown.
    pub account: Option<String>,
}

impl Identity {
    pub fn unauthed(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            account: None,
        }
    }

    #[cfg(test)]
    pub fn is_authed(&self) -> bool {
        self.account.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Unchecked,
    Checking,
    Resolved,
}

/// Whether the authority has been answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverHealth {
    Healthy,
    /// Repeated timeouts, or the authority refused to answer the bot.
    Unhealthy,
}

/// Answer to [`IdentityResolver::get`].
#[derive(Debug)]
pub enum Lookup {
    /// Cached resolution.
    Ready(Identity),
    /// Resolution in progress.
    Pending {
        nick: String,
        rx: oneshot::Receiver<Identity>,
    },
}

impl Lookup {
    #[cfg(test)]
    pub fn is_ready(&self) -> bool {
        matches!(self, Lookup::Ready(_))
    }

    /// Wait for the resolution.
    pub async fn wait(self) -> Identity {
        match self {
            Lookup::Ready(identity) => identity,
            // The resolver fires every waiter before dropping it
            Lookup::Pending { nick, rx } => rx.await.unwrap_or_else(|_| Identity::unauthed(&nick)),
        }
    }
}

#[derive(Debug)]
struct Entry {
    /// Current spelling of the display name.
    nick: String,
    state: QueryState,
    account: Option<String>,
    waiters: Vec<oneshot::Sender<Identity>>,
    query_id: u64,
    /// Folded name the current query was sent for.
    queried_as: String,
    /// Folded names of the channels shared with the bot.
    channels: HashSet<String>,
    resolved_at: Option<Instant>,
    /// Set once the entry left the map; lookups holding it must retry.
    removed: bool,
}

impl Entry {
    fn new(nick: &str) -> Self {
        Self {
            nick: nick.to_string(),
            state: QueryState::Unchecked,
            account: None,
            waiters: Vec::new(),
            query_id: 0,
            queried_as: String::new(),
            channels: HashSet::new(),
            resolved_at: None,
            removed: false,
        }
    }

    fn identity(&self) -> Identity {
        Identity {
            nick: self.nick.clone(),
            account: self.account.clone(),
        }
    }

    /// Resolved long ago for someone outside every shared channel.
    fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        self.state == QueryState::Resolved
            && self.waiters.is_empty()
            && self.channels.is_empty()
            && self
                .resolved_at
                .is_some_and(|at| now.duration_since(at) >= max_age)
    }
}

type EntryRef = Arc<Mutex<Entry>>;

struct Authority {
    /// Target for queries (may be `nick@server`).
    target: String,
    /// Nick the authority's notices come from.
    nick: String,
    grammar: AuthorityGrammar,
}

struct Inner {
    entries: DashMap<String, EntryRef>,
    /// Folded queried name -> queries in the order they were sent. The
    /// authority answers in order, so an answer belongs to the oldest one,
    /// even when its participant has since changed nick.
    in_flight: DashMap<String, VecDeque<(u64, EntryRef)>>,
    next_query: AtomicU64,
    consecutive_timeouts: AtomicU32,
    health: watch::Sender<ResolverHealth>,
    outbound: OutboundQueue,
    authority: Option<Authority>,
    config: AuthorityConfig,
}

/// Shared handle to the resolver.
#[derive(Clone)]
pub struct IdentityResolver {
    inner: Arc<Inner>,
}

impl IdentityResolver {
    /// Create a resolver sending its queries through `outbound`.
    ///
    /// Without an authority account every lookup resolves to the display
    /// name itself.
    pub fn new(config: &AuthorityConfig, outbound: OutboundQueue) -> Result<Self, ConfigError> {
        let authority = if config.enabled() {
            let nick = config
                .account
                .split('@')
                .next()
                .unwrap_or(&config.account)
                .to_string();
            Some(Authority {
                target: config.account.clone(),
                nick,
                grammar: AuthorityGrammar::from_config(config)?,
            })
        } else {
            None
        };
        let (health, _) = watch::channel(ResolverHealth::Healthy);

        Ok(Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                in_flight: DashMap::new(),
                next_query: AtomicU64::new(1),
                consecutive_timeouts: AtomicU32::new(0),
                health,
                outbound,
                authority,
                config: config.clone(),
            }),
        })
    }

    /// Resolve `nick`, from cache when possible.
    ///
    /// With `force_recheck` a cached resolution is ignored and the authority
    /// asked again (unless a query is already in flight, which is joined).
    pub fn get(&self, nick: &str, force_recheck: bool) -> Lookup {
        if self.inner.authority.is_none() {
            return Lookup::Ready(Identity {
                nick: nick.to_string(),
                account: Some(nick.to_string()),
            });
        }

        loop {
            let entry = self.entry_for(nick);
            let mut guard = entry.lock();
            if guard.removed {
                continue;
            }

            if guard.state == QueryState::Resolved && !force_recheck {
                return Lookup::Ready(guard.identity());
            }

            let (tx, rx) = oneshot::channel();
            guard.waiters.push(tx);
            if guard.state != QueryState::Checking {
                self.start_query(&entry, &mut guard);
            } else {
                debug!("Joining in-flight identity query for {}", guard.nick);
            }
            return Lookup::Pending {
                nick: nick.to_string(),
                rx,
            };
        }
    }

    /// Resolve `nick` and wait for the result.
    pub async fn resolve(&self, nick: &str, force_recheck: bool) -> Identity {
        self.get(nick, force_recheck).wait().await
    }

    /// Route a notice through the reply grammar.
    ///
    /// Returns `true` when the notice came from the authority and was consumed.
    pub fn handle_notice(&self, source: &str, text: &str) -> bool {
        let Some(authority) = &self.inner.authority else {
            return false;
        };
        if fold_nick(source) != fold_nick(&authority.nick) {
            return false;
        }

        match authority.grammar.parse(text) {
            Some(AuthorityReply::NotAuthed { nick }) => self.answer(&nick, None, false),
            Some(AuthorityReply::Authed { nick, account }) => self.answer(&nick, Some(account), false),
            Some(AuthorityReply::UnknownUser { nick }) => self.answer(&nick, None, true),
            Some(AuthorityReply::BotNotAuthed) => {
                error!("{} refuses queries: the bot is not authenticated", authority.nick);
                self.set_health(ResolverHealth::Unhealthy);
                self.authenticate();
            }
            None => debug!("Ignoring notice from {}: {}", authority.nick, text),
        }
        true
    }

    /// Authenticate the bot with the authority.
    pub fn authenticate(&self) {
        let Some(authority) = &self.inner.authority else {
            return;
        };
        if !self.inner.config.has_credentials() {
            warn!("No credentials configured for {}, not authenticating", authority.nick);
            return;
        }
        info!("Authenticating with {}", authority.nick);
        let line = authority
            .grammar
            .auth_line(&self.inner.config.login, &self.inner.config.password);
        self.inner.outbound.enqueue(&authority.target, &line);
    }

    /// A participant joined `channel`: create the entry, querying eagerly
    /// if configured.
    pub fn on_join(&self, nick: &str, channel: &str) {
        if self.inner.authority.is_none() {
            return;
        }
        loop {
            let entry = self.entry_for(nick);
            let mut guard = entry.lock();
            if guard.removed {
                continue;
            }
            guard.channels.insert(fold_nick(channel));
            if self.inner.config.check_on_join && guard.state != QueryState::Checking {
                self.start_query(&entry, &mut guard);
            }
            return;
        }
    }

    /// Names listed in a names reply for `channel` get unchecked entries.
    pub fn on_names(&self, channel: &str, names: &str) {
        if self.inner.authority.is_none() {
            return;
        }
        let channel = fold_nick(channel);
        for name in names.split_whitespace() {
            let nick = name.trim_start_matches(['@', '+', '%', '&', '~']);
            if nick.is_empty() {
                continue;
            }
            loop {
                let entry = self.entry_for(nick);
                let mut guard = entry.lock();
                if !guard.removed {
                    guard.channels.insert(channel.clone());
                    break;
                }
            }
        }
    }

    /// A participant left `channel`.
    ///
    /// Returns `true` when no shared channel remains and the entry was
    /// forgotten, pending waiters firing with no account.
    pub fn on_part(&self, nick: &str, channel: &str) -> bool {
        let key = fold_nick(nick);
        let Some(entry) = self.inner.entries.get(&key).map(|e| e.value().clone()) else {
            return false;
        };
        {
            let mut guard = entry.lock();
            guard.channels.remove(&fold_nick(channel));
            if !guard.channels.is_empty() {
                return false;
            }
        }

        if self
            .inner
            .entries
            .remove_if(&key, |_, e| Arc::ptr_eq(e, &entry))
            .is_none()
        {
            return false;
        }
        self.retire(&entry);
        debug!("{} shares no channel anymore, identity forgotten", nick);
        true
    }

    /// Move the entry of `old` to `new`, in-flight query and waiters included.
    pub fn on_nick_change(&self, old: &str, new: &str) {
        let Some((_, entry)) = self.inner.entries.remove(&fold_nick(old)) else {
            return;
        };
        entry.lock().nick = new.to_string();

        if let Some(displaced) = self.inner.entries.insert(fold_nick(new), entry.clone()) {
            if !Arc::ptr_eq(&displaced, &entry) {
                self.absorb(&entry, &displaced);
            }
        }
        debug!("Identity entry moved from {} to {}", old, new);
    }

    /// A participant quit: fire pending waiters with no account and forget them.
    pub fn on_quit(&self, nick: &str) {
        if let Some((_, entry)) = self.inner.entries.remove(&fold_nick(nick)) {
            self.retire(&entry);
        }
    }

    /// Forget every participant, as when a new session starts: quits and
    /// renames while disconnected were never seen.
    pub fn reset(&self) {
        let keys: Vec<String> = self.inner.entries.iter().map(|e| e.key().clone()).collect();
        let mut forgotten = 0;
        for key in keys {
            if let Some((_, entry)) = self.inner.entries.remove(&key) {
                self.retire(&entry);
                forgotten += 1;
            }
        }
        self.inner.in_flight.clear();
        self.inner.consecutive_timeouts.store(0, Ordering::Relaxed);
        debug!("Identity cache cleared ({} entries)", forgotten);
    }

    /// Drop resolutions older than `max_age` for participants sharing no
    /// channel with the bot. Returns how many were dropped.
    pub fn prune(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale = |entry: &EntryRef| entry.lock().is_stale(now, max_age);

        let keys: Vec<String> = self
            .inner
            .entries
            .iter()
            .filter(|e| stale(e.value()))
            .map(|e| e.key().clone())
            .collect();

        let mut pruned = 0;
        for key in keys {
            if let Some((_, entry)) = self.inner.entries.remove_if(&key, |_, e| stale(e)) {
                entry.lock().removed = true;
                pruned += 1;
            }
        }
        pruned
    }

    /// Subscribe to health changes.
    pub fn health(&self) -> watch::Receiver<ResolverHealth> {
        self.inner.health.subscribe()
    }

    /// State of a display name, if known.
    #[cfg(test)]
    pub fn state(&self, nick: &str) -> Option<QueryState> {
        self.inner
            .entries
            .get(&fold_nick(nick))
            .map(|e| e.lock().state)
    }

    /// Number of waiters registered on a display name.
    #[cfg(test)]
    pub fn pending_waiters(&self, nick: &str) -> usize {
        self.inner
            .entries
            .get(&fold_nick(nick))
            .map(|e| e.lock().waiters.len())
            .unwrap_or(0)
    }

    fn entry_for(&self, nick: &str) -> EntryRef {
        self.inner
            .entries
            .entry(fold_nick(nick))
            .or_insert_with(|| Arc::new(Mutex::new(Entry::new(nick))))
            .value()
            .clone()
    }

    /// Send the authority query for a locked entry and arm its timeout.
    fn start_query(&self, entry: &EntryRef, guard: &mut Entry) {
        let Some(authority) = &self.inner.authority else {
            return;
        };
        let id = self.inner.next_query.fetch_add(1, Ordering::Relaxed);
        let timeout = self.inner.config.timeout();

        guard.state = QueryState::Checking;
        guard.query_id = id;
        guard.queried_as = fold_nick(&guard.nick);

        self.inner
            .in_flight
            .entry(guard.queried_as.clone())
            .or_default()
            .push_back((id, entry.clone()));
        self.inner
            .outbound
            .enqueue(&authority.target, &authority.grammar.query(&guard.nick));
        debug!("Asked {} about {} (query {})", authority.nick, guard.nick, id);

        let resolver = self.clone();
        let entry = entry.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            resolver.on_timeout(&entry, id);
        });
    }

    /// A genuine answer about `nick`.
    fn answer(&self, nick: &str, account: Option<String>, evict: bool) {
        self.record_answer();
        let key = fold_nick(nick);

        let oldest = self.inner.in_flight.get_mut(&key).and_then(|mut queue| queue.pop_front());
        self.inner.in_flight.remove_if(&key, |_, queue| queue.is_empty());

        let (entry, query_id) = match oldest {
            Some((id, entry)) => (entry, Some(id)),
            None => match self.inner.entries.get(&key).map(|e| e.value().clone()) {
                Some(entry) => (entry, None),
                None => {
                    debug!("Unsolicited identity answer for {}", nick);
                    return;
                }
            },
        };

        if self.complete(&entry, query_id, account) {
            debug!("Resolved identity of {}", nick);
        }
        if evict {
            let current = entry.lock().nick.clone();
            let removed = self
                .inner
                .entries
                .remove_if(&fold_nick(&current), |_, e| Arc::ptr_eq(e, &entry));
            if removed.is_some() {
                entry.lock().removed = true;
                debug!("Evicted identity entry of {}", current);
            }
        }
    }

    fn on_timeout(&self, entry: &EntryRef, id: u64) {
        let (key, nick) = {
            let guard = entry.lock();
            if guard.state != QueryState::Checking || guard.query_id != id {
                return;
            }
            (guard.queried_as.clone(), guard.nick.clone())
        };
        self.forget_query(&key, id);

        if !self.complete(entry, Some(id), None) {
            return;
        }

        let timeouts = self.inner.consecutive_timeouts.fetch_add(1, Ordering::Relaxed) + 1;
        let authority = self
            .inner
            .authority
            .as_ref()
            .map(|a| a.nick.as_str())
            .unwrap_or("authority");
        warn!(
            "{} did not answer about {} within {:?} ({} consecutive timeouts)",
            authority,
            nick,
            self.inner.config.timeout(),
            timeouts
        );

        let threshold = self.inner.config.unhealthy_after.max(1);
        if timeouts % threshold == 0 {
            error!("{} is not responding, re-authenticating", authority);
            self.set_health(ResolverHealth::Unhealthy);
            self.authenticate();
        }
    }

    /// Store a resolution; fire the waiters if it answers the current query.
    ///
    /// A resolution that does not answer the current query (late or
    /// duplicate answer) only updates the cache. Returns whether waiters
    /// were fired.
    fn complete(&self, entry: &EntryRef, query_id: Option<u64>, account: Option<String>) -> bool {
        let (waiters, identity) = {
            let mut guard = entry.lock();
            let current = guard.state == QueryState::Checking && query_id == Some(guard.query_id);
            guard.account = account;
            guard.resolved_at = Some(Instant::now());

            if current {
                guard.state = QueryState::Resolved;
                (std::mem::take(&mut guard.waiters), guard.identity())
            } else {
                if guard.state == QueryState::Unchecked {
                    guard.state = QueryState::Resolved;
                }
                return false;
            }
        };

        fire(waiters, &identity);
        true
    }

    /// Merge the waiters of an entry displaced by a rename into `entry`.
    fn absorb(&self, entry: &EntryRef, displaced: &EntryRef) {
        let (waiters, in_flight) = {
            let mut guard = displaced.lock();
            guard.removed = true;
            let in_flight = (guard.state == QueryState::Checking)
                .then(|| (guard.queried_as.clone(), guard.query_id));
            guard.state = QueryState::Resolved;
            (std::mem::take(&mut guard.waiters), in_flight)
        };
        if let Some((key, id)) = in_flight {
            self.forget_query(&key, id);
        }
        if waiters.is_empty() {
            return;
        }

        let mut guard = entry.lock();
        let state = guard.state;
        match state {
            QueryState::Resolved => {
                let identity = guard.identity();
                drop(guard);
                fire(waiters, &identity);
            }
            QueryState::Checking => guard.waiters.extend(waiters),
            QueryState::Unchecked => {
                guard.waiters.extend(waiters);
                self.start_query(entry, &mut guard);
            }
        }
    }

    /// Mark a forgotten entry removed and fire its waiters with no account.
    fn retire(&self, entry: &EntryRef) {
        let (waiters, identity, in_flight) = {
            let mut guard = entry.lock();
            guard.removed = true;
            let in_flight = (guard.state == QueryState::Checking)
                .then(|| (guard.queried_as.clone(), guard.query_id));
            guard.state = QueryState::Resolved;
            guard.account = None;
            (std::mem::take(&mut guard.waiters), guard.identity(), in_flight)
        };

        if let Some((key, id)) = in_flight {
            self.forget_query(&key, id);
        }
        fire(waiters, &identity);
    }

    /// Drop query `id` from the in-flight queue of `key`.
    fn forget_query(&self, key: &str, id: u64) {
        if let Some(mut queue) = self.inner.in_flight.get_mut(key) {
            queue.retain(|(qid, _)| *qid != id);
        }
        self.inner.in_flight.remove_if(key, |_, queue| queue.is_empty());
    }

    fn record_answer(&self) {
        self.inner.consecutive_timeouts.store(0, Ordering::Relaxed);
        if *self.inner.health.borrow() == ResolverHealth::Unhealthy {
            info!("Authority is answering again");
            self.set_health(ResolverHealth::Healthy);
        }
    }

    fn set_health(&self, health: ResolverHealth) {
        self.inner.health.send_if_modified(|current| {
            if *current == health {
                false
            } else {
                *current = health;
                true
            }
        });
    }
}

/// Fire waiters in registration order.
fn fire(waiters: Vec<oneshot::Sender<Identity>>, identity: &Identity) {
    for waiter in waiters {
        // A dropped receiver only means the caller stopped waiting
        let _ = waiter.send(identity.clone());
    }
}
