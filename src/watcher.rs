//! Completion watcher: a polling loop that prunes pending actions whose
//! real-world effect has already happened.
//!
//! Two states. `Idle`: no pending actions, no timer armed. `Watching`: a
//! timer at the active cadence. The loop re-arms exactly one timer per
//! iteration, so a cadence change can never leak a second concurrent timer.
//! Host lifecycle events and explicit pokes trigger an immediate
//! out-of-cadence tick, but convergence never depends on them.

use std::collections::HashSet;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{after, never, unbounded, Receiver, Sender};

use crate::engine::Engine;
use crate::host::ExtensionHost;
use crate::record::{Action, PendingAction};
use crate::store::{KeyValueStore, PendingEvent};

/// Poll cadence while pending actions exist. Idle runs no timer at all; the
/// loop parks until a store event or control message arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub active: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence {
            active: Duration::from_millis(1_000),
        }
    }
}

enum Control {
    /// Out-of-cadence tick request.
    Poke,
    Shutdown,
}

/// Handle to the watcher thread.
pub struct CompletionWatcher {
    control: Sender<Control>,
    handle: Option<JoinHandle<()>>,
}

impl CompletionWatcher {
    /// Start the watcher. It subscribes to pending-set changes before its
    /// first load, so a save landing mid-startup is never missed.
    pub fn spawn<S, H>(engine: Engine<S>, host: H, cadence: Cadence) -> Self
    where
        S: KeyValueStore + 'static,
        H: ExtensionHost + 'static,
    {
        let (control_tx, control_rx) = unbounded();
        let events = engine.pending_store().subscribe();
        let host_events = host.subscribe();

        let handle = std::thread::spawn(move || {
            run_loop(engine, host, cadence, control_rx, events, host_events);
        });

        CompletionWatcher {
            control: control_tx,
            handle: Some(handle),
        }
    }

    /// Request an immediate tick (e.g. after a host lifecycle signal or a
    /// user-triggered uninstall).
    pub fn poke(&self) {
        let _ = self.control.send(Control::Poke);
    }
}

impl Drop for CompletionWatcher {
    fn drop(&mut self) {
        let _ = self.control.send(Control::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run_loop<S, H>(
    engine: Engine<S>,
    host: H,
    cadence: Cadence,
    control: Receiver<Control>,
    events: Receiver<PendingEvent>,
    host_events: Option<Receiver<crate::host::HostEvent>>,
) where
    S: KeyValueStore,
    H: ExtensionHost,
{
    // Startup transition: persisted state may already be non-empty.
    let mut watching = match engine.pending() {
        Ok(pending) => !pending.is_empty(),
        Err(err) => {
            tracing::warn!("watcher could not load pending state at startup: {err}");
            false
        }
    };

    let mut host_events = host_events.unwrap_or_else(never);

    loop {
        // One timer per iteration: Watching arms the active cadence, Idle
        // parks until a store event or control message arrives.
        let timer = if watching {
            after(cadence.active)
        } else {
            never()
        };

        let mut host_events_lost = false;
        crossbeam::channel::select! {
            recv(control) -> msg => match msg {
                Ok(Control::Poke) => {
                    if watching {
                        watching = tick(&engine, &host);
                    }
                }
                Ok(Control::Shutdown) | Err(_) => return,
            },
            recv(events) -> event => match event {
                Ok(PendingEvent::Updated(actions)) => watching = !actions.is_empty(),
                Ok(PendingEvent::Cleared) => watching = false,
                Err(_) => return,
            },
            recv(host_events) -> event => match event {
                Ok(_) => {
                    if watching {
                        watching = tick(&engine, &host);
                    }
                }
                Err(_) => host_events_lost = true,
            },
            recv(timer) -> _ => {
                if watching {
                    watching = tick(&engine, &host);
                }
            }
        }
        if host_events_lost {
            // Lost accelerant; polling alone still converges.
            host_events = never();
        }
    }
}

/// One poll: re-enumerate the live snapshot and drop every pending action
/// whose effect already happened. Returns whether work is still pending.
fn tick<S, H>(engine: &Engine<S>, host: &H) -> bool
where
    S: KeyValueStore,
    H: ExtensionHost,
{
    let snapshot = match host.snapshot() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            // Transient-failure tolerant: skip this tick, try next cadence.
            tracing::warn!("host enumeration failed, skipping tick: {err}");
            return true;
        }
    };

    let pending = match engine.pending() {
        Ok(pending) => pending,
        Err(err) => {
            tracing::warn!("could not load pending actions, skipping tick: {err}");
            return true;
        }
    };
    if pending.is_empty() {
        return false;
    }

    let installed: HashSet<&str> = snapshot.ids();
    let remaining: Vec<PendingAction> = pending
        .iter()
        .filter(|action| !satisfied(action, &installed))
        .cloned()
        .collect();

    if remaining.len() == pending.len() {
        return true;
    }

    tracing::info!(
        completed = pending.len() - remaining.len(),
        remaining = remaining.len(),
        "pending actions resolved by live state"
    );

    let result = if remaining.is_empty() {
        engine.pending_store().clear()
    } else {
        engine.pending_store().save(&remaining)
    };
    if let Err(err) = result {
        tracing::warn!("failed to persist pruned pending set: {err}");
        return true;
    }
    !remaining.is_empty()
}

/// A `remove` is satisfied once the id is gone; an `add` once it appears.
fn satisfied(action: &PendingAction, installed: &HashSet<&str>) -> bool {
    match action.action {
        Action::Remove => !installed.contains(action.id()),
        Action::Add => installed.contains(action.id()),
    }
}
