//! Lifecycle hooks.
//!
//! Receivers connect to one of four hooks, optionally scoped to a record
//! class, and are awaited one after another in connection order whenever
//! the hook fires. A receiver error aborts the save or removal that fired
//! the hook.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::catalog::RecordClass;
use crate::error::Result;
use crate::record::Record;

/// Lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    /// Before a record is written by `save`.
    PreSave,
    /// After a record was written by `save`.
    PostSave,
    /// Before a record is physically removed.
    PreRemove,
    /// After a record was physically removed.
    PostRemove,
}

impl Hook {
    /// Hook name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Hook::PreSave => "pre_save",
            Hook::PostSave => "post_save",
            Hook::PreRemove => "pre_remove",
            Hook::PostRemove => "post_remove",
        }
    }
}

/// Something that reacts to a hook.
#[async_trait]
pub trait Receiver: Send + Sync {
    /// Handle a hook fired for `record` of class `sender`.
    async fn receive(&self, hook: Hook, sender: &Arc<RecordClass>, record: &Record) -> Result<()>;
}

struct FnReceiver<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Receiver for FnReceiver<F>
where
    F: Fn(Arc<RecordClass>, Record) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn receive(&self, _hook: Hook, sender: &Arc<RecordClass>, record: &Record) -> Result<()> {
        (self.f)(sender.clone(), record.clone()).await
    }
}

/// Handle returned by [`HookBus::connect`], used to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReceiverId(u64);

struct Connection {
    id: ReceiverId,
    hook: Hook,
    sender: Option<String>,
    receiver: Arc<dyn Receiver>,
}

/// Ordered registry of hook receivers.
///
/// Class-scoped and catch-all receivers share one list, so they run in the
/// order they were connected.
pub struct HookBus {
    connections: RwLock<Vec<Connection>>,
    next_id: AtomicU64,
}

impl HookBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Connect a receiver to a hook.
    ///
    /// With `sender` set, the receiver only runs for records of that class key.
    pub fn connect(
        &self,
        hook: Hook,
        sender: Option<&str>,
        receiver: Arc<dyn Receiver>,
    ) -> ReceiverId {
        let id = ReceiverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.connections.write().push(Connection {
            id,
            hook,
            sender: sender.map(str::to_string),
            receiver,
        });
        tracing::debug!(hook = hook.as_str(), sender = ?sender, id = id.0, "hook receiver connected");
        id
    }

    /// Connect an async closure to a hook.
    pub fn connect_fn<F, Fut>(&self, hook: Hook, sender: Option<&str>, f: F) -> ReceiverId
    where
        F: Fn(Arc<RecordClass>, Record) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.connect(hook, sender, Arc::new(FnReceiver { f }))
    }

    /// Disconnect a receiver. Returns `false` if it was not connected.
    pub fn disconnect(&self, id: ReceiverId) -> bool {
        let mut connections = self.connections.write();
        let before = connections.len();
        connections.retain(|c| c.id != id);
        connections.len() != before
    }

    /// Number of receivers that would run for `hook` on records of `sender`.
    pub fn receiver_count(&self, hook: Hook, sender: &str) -> usize {
        self.connections
            .read()
            .iter()
            .filter(|c| c.hook == hook && c.sender.as_deref().map_or(true, |s| s == sender))
            .count()
    }

    /// Fire a hook, awaiting each matching receiver in turn.
    ///
    /// The receiver list is snapshotted first, so receivers may connect or
    /// disconnect others without affecting the current dispatch.
    pub async fn send(&self, hook: Hook, sender: &Arc<RecordClass>, record: &Record) -> Result<()> {
        let receivers: Vec<Arc<dyn Receiver>> = self
            .connections
            .read()
            .iter()
            .filter(|c| {
                c.hook == hook && c.sender.as_deref().map_or(true, |s| s == sender.key())
            })
            .map(|c| c.receiver.clone())
            .collect();

        if receivers.is_empty() {
            return Ok(());
        }
        tracing::trace!(
            hook = hook.as_str(),
            class = %sender.key(),
            receivers = receivers.len(),
            "dispatching hook"
        );
        for receiver in receivers {
            receiver.receive(hook, sender, record).await?;
        }
        Ok(())
    }
}

impl Default for HookBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HookBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookBus")
            .field("receivers", &self.connections.read().len())
            .finish()
    }
}
