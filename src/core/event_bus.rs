//! Request/broadcast bus for decoupled component communication.
//!
//! Architecture:
//! - Broadcast: components `listen()` to a post token, `post()` invokes every
//!   listener synchronously, in registration order
//! - Query: exactly one component `serve()`s a query token, `get()` invokes it
//!   and hands back the reply
//! - Marshal: background threads queue closures through a [`BusSender`];
//!   the owning thread runs them with [`EventBus::pump`]
//!
//! Tokens are Rust types. A broadcast token implements [`Post`], a query
//! token implements [`Query`] and names its reply type. The token's type name
//! doubles as its diagnostic name.
//!
//! The bus is an explicit context object. Clones share one registry, so every
//! component of a document holds its own handle and separate documents (or
//! tests) never see each other's registrations. The registry lives behind
//! `Rc<RefCell<..>>`: the bus is `!Send` and every call happens on the thread
//! that owns it.
//!
//! Callbacks may re-enter the bus (post from a listener, get from a
//! responder, listen while dispatching). The registry is never borrowed while
//! a callback runs; a dispatch works on a snapshot of the callbacks taken
//! when it started.

use std::any::{Any, TypeId, type_name};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, trace, warn};
use thiserror::Error;
use uuid::Uuid;

/// Broadcast token. Implement on a plain struct carrying the event payload.
pub trait Post: Any + fmt::Debug {}

/// Query token. The struct carries the query arguments; `Reply` is the answer.
pub trait Query: Any + fmt::Debug {
    type Reply: 'static;
}

/// Identity of a registering component, used for bulk unsubscription only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OwnerId(Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which table a [`Subscription`] lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionKind {
    Listener,
    Responder,
}

/// Handle returned by `listen()` / `serve()`.
///
/// Pass it to [`EventBus::unsubscribe`] or wrap it in a [`SubscriptionGuard`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription {
    owner: OwnerId,
    token: TypeId,
    kind: SubscriptionKind,
    id: u64,
}

impl Subscription {
    pub fn owner(&self) -> OwnerId {
        self.owner
    }

    pub fn kind(&self) -> SubscriptionKind {
        self.kind
    }
}

/// Errors raised by the query side of the bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// Nobody serves this token. Always a wiring defect.
    #[error("no responder registered for `{token}`")]
    NoResponder { token: &'static str },

    /// The responder ran and failed.
    #[error("responder for `{token}` failed on {args}: {source}")]
    Responder {
        token: &'static str,
        args: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The responder answered with something other than the token's reply type.
    #[error("responder for `{token}` returned a value of the wrong type")]
    ReplyType { token: &'static str },

    /// `stop_serving()` for a token this owner does not serve.
    #[error("`{token}` is not served by {owner:?}")]
    NotServing { token: &'static str, owner: OwnerId },
}

type Listener = Rc<dyn Fn(&dyn Any) -> anyhow::Result<()>>;
type Responder = Rc<dyn Fn(&dyn Any) -> anyhow::Result<Box<dyn Any>>>;

/// Work marshalled from another thread, run by [`EventBus::pump`].
pub type Job = Box<dyn FnOnce(&EventBus) -> anyhow::Result<()> + Send>;

struct ListenerEntry {
    id: u64,
    owner: OwnerId,
    callback: Listener,
}

struct ResponderEntry {
    id: u64,
    owner: OwnerId,
    callback: Responder,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<TypeId, Vec<ListenerEntry>>,
    responders: HashMap<TypeId, ResponderEntry>,
    names: HashMap<TypeId, &'static str>,
}

impl Registry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn name_of(&self, token: &TypeId) -> &'static str {
        self.names.get(token).copied().unwrap_or("<unknown token>")
    }
}

/// Request/broadcast bus. Cheap to clone; clones share registrations.
#[derive(Clone)]
pub struct EventBus {
    registry: Rc<RefCell<Registry>>,
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reg = self.registry.borrow();
        f.debug_struct("EventBus")
            .field("listener_tokens", &reg.listeners.len())
            .field("responder_tokens", &reg.responders.len())
            .field("pending_jobs", &self.jobs_rx.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (jobs_tx, jobs_rx) = unbounded();
        Self {
            registry: Rc::new(RefCell::new(Registry::default())),
            jobs_tx,
            jobs_rx,
        }
    }

    /// True when both handles share one registry.
    pub fn same_bus(&self, other: &EventBus) -> bool {
        Rc::ptr_eq(&self.registry, &other.registry)
    }

    // ========== Broadcast ==========

    /// Register a listener for broadcast token `E`.
    pub fn listen<E, F>(&self, owner: OwnerId, callback: F) -> Subscription
    where
        E: Post,
        F: Fn(&E) -> anyhow::Result<()> + 'static,
    {
        let token = TypeId::of::<E>();
        let wrapped: Listener = Rc::new(move |any: &dyn Any| match any.downcast_ref::<E>() {
            Some(event) => callback(event),
            None => Ok(()),
        });

        let mut reg = self.registry.borrow_mut();
        let id = reg.next_id();
        reg.names.insert(token, type_name::<E>());
        reg.listeners.entry(token).or_default().push(ListenerEntry {
            id,
            owner,
            callback: wrapped,
        });
        trace!("{:?} listens to {}", owner, type_name::<E>());

        Subscription {
            owner,
            token,
            kind: SubscriptionKind::Listener,
            id,
        }
    }

    /// Remove every listener `owner` registered for `E`. No-op if none.
    pub fn stop_listening<E: Post>(&self, owner: OwnerId) {
        let token = TypeId::of::<E>();
        let mut reg = self.registry.borrow_mut();
        if let Some(entries) = reg.listeners.get_mut(&token) {
            entries.retain(|e| e.owner != owner);
            if entries.is_empty() {
                reg.listeners.remove(&token);
            }
        }
    }

    /// Remove every listener `owner` registered, for all tokens.
    pub fn stop_listening_to_all(&self, owner: OwnerId) {
        let mut reg = self.registry.borrow_mut();
        reg.listeners.retain(|_, entries| {
            entries.retain(|e| e.owner != owner);
            !entries.is_empty()
        });
    }

    /// Invoke every listener of `E` with `event`, in registration order.
    ///
    /// The first listener error is returned; later listeners are skipped.
    pub fn post<E: Post>(&self, event: E) -> anyhow::Result<()> {
        let token = TypeId::of::<E>();
        let callbacks: Vec<Listener> = match self.registry.borrow().listeners.get(&token) {
            Some(entries) => entries.iter().map(|e| Rc::clone(&e.callback)).collect(),
            None => return Ok(()),
        };

        trace!("post {} to {} listener(s)", type_name::<E>(), callbacks.len());
        for cb in callbacks {
            cb(&event)?;
        }
        Ok(())
    }

    /// Number of listeners currently registered for `E`.
    pub fn listener_count<E: Post>(&self) -> usize {
        self.registry
            .borrow()
            .listeners
            .get(&TypeId::of::<E>())
            .map(|v| v.len())
            .unwrap_or(0)
    }

    // ========== Query ==========

    /// Register the sole responder for query token `Q`, replacing any previous one.
    pub fn serve<Q, F>(&self, owner: OwnerId, callback: F) -> Subscription
    where
        Q: Query,
        F: Fn(&Q) -> anyhow::Result<Q::Reply> + 'static,
    {
        let token = TypeId::of::<Q>();
        let name = type_name::<Q>();
        let wrapped: Responder = Rc::new(move |any: &dyn Any| match any.downcast_ref::<Q>() {
            Some(query) => callback(query).map(|reply| Box::new(reply) as Box<dyn Any>),
            None => anyhow::bail!("query payload is not a {}", name),
        });

        let mut reg = self.registry.borrow_mut();
        let id = reg.next_id();
        reg.names.insert(token, name);
        let previous = reg.responders.insert(
            token,
            ResponderEntry {
                id,
                owner,
                callback: wrapped,
            },
        );
        if let Some(prev) = previous {
            debug!("{:?} replaces {:?} as responder for {}", owner, prev.owner, name);
        }

        Subscription {
            owner,
            token,
            kind: SubscriptionKind::Responder,
            id,
        }
    }

    /// Remove `owner`'s responder for `Q`. Fails if `owner` does not serve `Q`.
    pub fn stop_serving<Q: Query>(&self, owner: OwnerId) -> Result<(), BusError> {
        let token = TypeId::of::<Q>();
        let mut reg = self.registry.borrow_mut();
        match reg.responders.get(&token) {
            Some(entry) if entry.owner == owner => {
                reg.responders.remove(&token);
                Ok(())
            }
            _ => Err(BusError::NotServing {
                token: type_name::<Q>(),
                owner,
            }),
        }
    }

    /// Remove every responder registered by `owner`.
    pub fn stop_serving_all(&self, owner: OwnerId) {
        self.registry
            .borrow_mut()
            .responders
            .retain(|_, entry| entry.owner != owner);
    }

    /// Ask the responder of `Q` and return its reply.
    pub fn get<Q: Query>(&self, query: Q) -> Result<Q::Reply, BusError> {
        let token = TypeId::of::<Q>();
        let name = type_name::<Q>();
        let callback = match self.registry.borrow().responders.get(&token) {
            Some(entry) => Rc::clone(&entry.callback),
            None => return Err(BusError::NoResponder { token: name }),
        };

        trace!("get {}", name);
        let reply = callback(&query).map_err(|e| {
            warn!("responder for {} failed: {:#}", name, e);
            BusError::Responder {
                token: name,
                args: format!("{:?}", query),
                source: e.into(),
            }
        })?;

        reply
            .downcast::<Q::Reply>()
            .map(|r| *r)
            .map_err(|_| BusError::ReplyType { token: name })
    }

    /// True when somebody serves `Q`.
    pub fn is_served<Q: Query>(&self) -> bool {
        self.registry
            .borrow()
            .responders
            .contains_key(&TypeId::of::<Q>())
    }

    // ========== Handles ==========

    /// Remove the registration behind `sub`. Returns false if it was already gone.
    pub fn unsubscribe(&self, sub: Subscription) -> bool {
        let mut reg = self.registry.borrow_mut();
        match sub.kind {
            SubscriptionKind::Listener => {
                let Some(entries) = reg.listeners.get_mut(&sub.token) else {
                    return false;
                };
                let before = entries.len();
                entries.retain(|e| e.id != sub.id);
                let removed = entries.len() != before;
                if entries.is_empty() {
                    reg.listeners.remove(&sub.token);
                }
                removed
            }
            SubscriptionKind::Responder => {
                let matches = reg
                    .responders
                    .get(&sub.token)
                    .is_some_and(|e| e.id == sub.id);
                if matches {
                    reg.responders.remove(&sub.token);
                } else {
                    trace!(
                        "responder for {} already replaced or removed",
                        reg.name_of(&sub.token)
                    );
                }
                matches
            }
        }
    }

    /// Wrap `sub` so it is removed when the guard drops.
    pub fn guard(&self, sub: Subscription) -> SubscriptionGuard {
        SubscriptionGuard {
            bus: self.clone(),
            sub,
            armed: true,
        }
    }

    // ========== Marshalling ==========

    /// Thread-safe handle for queueing work onto the bus owner's thread.
    pub fn sender(&self) -> BusSender {
        BusSender {
            tx: self.jobs_tx.clone(),
        }
    }

    /// Run every queued job on the calling thread, in arrival order.
    ///
    /// Stops at the first failing job; jobs queued after it stay queued.
    pub fn pump(&self) -> anyhow::Result<usize> {
        let mut ran = 0;
        while let Ok(job) = self.jobs_rx.try_recv() {
            job(self)?;
            ran += 1;
        }
        if ran > 0 {
            trace!("pumped {} marshalled job(s)", ran);
        }
        Ok(ran)
    }

    /// Number of jobs waiting for `pump()`.
    pub fn pending_jobs(&self) -> usize {
        self.jobs_rx.len()
    }
}

/// `Send` handle that queues closures for the thread owning the bus.
#[derive(Clone, Debug)]
pub struct BusSender {
    tx: Sender<Job>,
}

impl BusSender {
    /// Queue `job`. Returns false once the bus has been dropped.
    pub fn send<F>(&self, job: F) -> bool
    where
        F: FnOnce(&EventBus) -> anyhow::Result<()> + Send + 'static,
    {
        self.tx.send(Box::new(job)).is_ok()
    }
}

/// Scoped subscription: unsubscribes on drop.
pub struct SubscriptionGuard {
    bus: EventBus,
    sub: Subscription,
    armed: bool,
}

impl SubscriptionGuard {
    /// Keep the subscription alive past the guard and hand back the raw handle.
    pub fn release(mut self) -> Subscription {
        self.armed = false;
        self.sub
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if self.armed {
            self.bus.unsubscribe(self.sub);
        }
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("sub", &self.sub)
            .field("armed", &self.armed)
            .finish()
    }
}
