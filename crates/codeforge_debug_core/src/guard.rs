//! Ties an ephemeral container to the terminal it runs in.
//!
//! The guard subscribes to terminal closes before the terminal exists and
//! is bound to its id once the editor hands it out; closes seen in between
//! are replayed on bind. When the bound terminal closes the container is
//! force-killed once, every outcome is logged, and the close observer is
//! removed again.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::editor::{CloseHandler, Disposable, HostEditor, TerminalId};
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerHandle, DebugSession, KillOutcome, SessionState};

#[derive(Default)]
struct Subscription {
    disposable: Option<Disposable>,
    released: bool,
}

enum Binding {
    /// Terminal not created yet; ids that closed meanwhile.
    Pending(HashSet<TerminalId>),
    Bound(TerminalId),
}

struct GuardInner {
    container: String,
    binding: Mutex<Binding>,
    runtime: Arc<dyn ContainerRuntime>,
    session: Arc<Mutex<DebugSession>>,
    handle: Handle,
    fired: AtomicBool,
    kills: AtomicUsize,
    subscription: Mutex<Subscription>,
    closed: watch::Sender<bool>,
    settled: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct LifecycleGuard {
    inner: Arc<GuardInner>,
}

impl LifecycleGuard {
    /// Subscribe to terminal closes for `container`. Must be called from
    /// within a tokio runtime, before the terminal is created.
    pub fn arm(
        editor: &dyn HostEditor,
        runtime: Arc<dyn ContainerRuntime>,
        container: &ContainerHandle,
        session: Arc<Mutex<DebugSession>>,
    ) -> Self {
        let inner = Arc::new(GuardInner {
            container: container.name.clone(),
            binding: Mutex::new(Binding::Pending(HashSet::new())),
            runtime,
            session,
            handle: Handle::current(),
            fired: AtomicBool::new(false),
            kills: AtomicUsize::new(0),
            subscription: Mutex::new(Subscription::default()),
            closed: watch::channel(false).0,
            settled: watch::channel(false).0,
        });

        let observer = inner.clone();
        let handler: CloseHandler = Arc::new(move |closed: TerminalId| {
            if observer.observe(closed) {
                observer.clone().fire(closed);
            }
        });

        let disposable = editor.on_terminal_close(handler);
        {
            let mut subscription = inner.lock_subscription();
            if subscription.released {
                disposable.dispose();
            } else {
                subscription.disposable = Some(disposable);
            }
        }

        tracing::debug!("Guarding container {}", inner.container);
        Self { inner }
    }

    /// Attach the guard to the terminal running the container. A close of
    /// that terminal observed before this call fires now.
    pub fn bind(&self, terminal: TerminalId) {
        let closed_early = {
            let mut binding = self.inner.lock_binding();
            let seen = matches!(&*binding, Binding::Pending(seen) if seen.contains(&terminal));
            *binding = Binding::Bound(terminal);
            seen
        };
        tracing::debug!("Container {} bound to {}", self.inner.container, terminal);

        if closed_early && !self.inner.fired.swap(true, Ordering::SeqCst) {
            tracing::info!("{} closed before it was bound", terminal);
            self.inner.clone().fire(terminal);
        }
    }

    /// Drop the subscription without killing anything; the terminal was
    /// never created.
    pub fn abandon(&self) {
        self.inner.fired.store(true, Ordering::SeqCst);
        self.inner.release_subscription();
        self.inner.settled.send_replace(true);
    }

    pub fn container_name(&self) -> &str {
        &self.inner.container
    }

    pub fn terminal(&self) -> Option<TerminalId> {
        match &*self.inner.lock_binding() {
            Binding::Bound(terminal) => Some(*terminal),
            Binding::Pending(_) => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.closed.borrow()
    }

    pub fn kill_count(&self) -> usize {
        self.inner.kills.load(Ordering::SeqCst)
    }

    /// Resolves once the guarded terminal has closed.
    pub async fn closed(&self) {
        let mut rx = self.inner.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Resolves once the kill attempt finished and the observer is gone.
    pub async fn settled(&self) {
        let mut rx = self.inner.settled.subscribe();
        let _ = rx.wait_for(|settled| *settled).await;
    }
}

impl GuardInner {
    fn lock_subscription(&self) -> std::sync::MutexGuard<'_, Subscription> {
        self.subscription
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_binding(&self) -> std::sync::MutexGuard<'_, Binding> {
        self.binding
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// `true` when `closed` is the bound terminal closing for the first time.
    fn observe(&self, closed: TerminalId) -> bool {
        {
            let mut binding = self.lock_binding();
            match &mut *binding {
                Binding::Pending(seen) => {
                    seen.insert(closed);
                    return false;
                }
                Binding::Bound(terminal) if *terminal != closed => return false,
                Binding::Bound(_) => {}
            }
        }
        !self.fired.swap(true, Ordering::SeqCst)
    }

    fn fire(self: Arc<Self>, terminal: TerminalId) {
        let handle = self.handle.clone();
        handle.spawn(async move { self.on_terminal_closed(terminal).await });
    }

    async fn on_terminal_closed(&self, terminal: TerminalId) {
        tracing::info!(
            "{} closed, killing container {}",
            terminal,
            self.container
        );
        self.mark_session_closed();
        self.closed.send_replace(true);

        self.kills.fetch_add(1, Ordering::SeqCst);
        match self.runtime.kill(&self.container, true).await {
            Ok(KillOutcome::Killed) => {
                tracing::info!("Killed container {}", self.container);
            }
            Ok(KillOutcome::AlreadyGone) => {
                tracing::info!("Container {} was already gone", self.container);
            }
            Err(e) => {
                // The terminal is gone; there is nobody left to tell.
                tracing::warn!("{}", e);
            }
        }
        self.runtime.untrack(&self.container).await;

        self.release_subscription();
        self.settled.send_replace(true);
    }

    fn mark_session_closed(&self) {
        let mut session = self
            .session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Err(e) = session.advance(SessionState::Closed) {
            tracing::debug!("Session for {} not marked closed: {}", self.container, e);
        }
    }

    fn release_subscription(&self) {
        let disposable = {
            let mut subscription = self.lock_subscription();
            subscription.released = true;
            subscription.disposable.take()
        };
        if let Some(disposable) = disposable {
            disposable.dispose();
        }
    }
}
