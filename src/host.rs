//! State machine host (section 4.10 / section 6): binds a running `Fsm` to a handle that speaks
//! in state *names* instead of the engine's internal `StateId` indices, and lets a caller on any
//! thread query or drive it without reaching into the session thread that owns the `Fsm` itself.
//!
//! Grounded on `fsm_executor.rs`'s `FsmExecutor`/`ScxmlSession` plumbing: a `Host` is a thin
//! wrapper around a `FsmExecutor` plus the per-document name/ancestry table captured once, before
//! the parsed `Fsm` is moved into its session thread.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use crate::datamodel::Data;
use crate::fsm;
use crate::fsm::{Event, EventType, Fsm, ScxmlSession, StateId, EVENT_CANCEL_SESSION};
use crate::fsm_executor::FsmExecutor;
#[cfg(feature = "xml")]
use crate::parser;
#[cfg(feature = "Trace")]
use crate::tracer::TraceMode;

/// Per-document state names and ancestry, captured once at `start` time. The running `Fsm` is
/// moved into its session thread and is otherwise unreachable from the host, so every host query
/// that needs to translate a `StateId` into a name goes through this table instead.
struct DocumentMeta {
    names: HashMap<StateId, String>,
    parents: HashMap<StateId, StateId>,
    atomic: HashSet<StateId>,
}

impl DocumentMeta {
    fn capture(fsm: &Fsm) -> DocumentMeta {
        let mut names = HashMap::new();
        let mut parents = HashMap::new();
        let mut atomic = HashSet::new();
        for state in &fsm.states {
            names.insert(state.id, state.name.clone());
            parents.insert(state.id, state.parent);
            if state.states.is_empty() {
                atomic.insert(state.id);
            }
        }
        DocumentMeta {
            names,
            parents,
            atomic,
        }
    }

    fn name_of(&self, id: StateId) -> Option<&str> {
        self.names.get(&id).map(|s| s.as_str())
    }

    fn is_atomic(&self, id: StateId) -> bool {
        self.atomic.contains(&id)
    }

    /// Proper ancestors of `id`, nearest first, stopping at the pseudo-root (parent id 0).
    fn ancestors_of(&self, id: StateId) -> Vec<StateId> {
        let mut chain = Vec::new();
        let mut current = id;
        while let Some(parent) = self.parents.get(&current) {
            if *parent == 0 {
                break;
            }
            chain.push(*parent);
            current = *parent;
        }
        chain
    }
}

/// Point-in-time view of an instance's externally visible state.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub active_atomic_states: HashSet<String>,
    pub active_with_ancestors: HashSet<String>,
    pub datamodel: HashMap<String, Data>,
}

/// A running SCXML instance bound to the `Host` that started it.
pub struct Instance {
    session: ScxmlSession,
    meta: DocumentMeta,
}

impl Instance {
    pub fn session_id(&self) -> u32 {
        self.session.session_id
    }

    /// True once the instance's session thread has terminated (reached a top-level final state
    /// or was stopped).
    pub fn is_finished(&self) -> bool {
        self.session
            .session_thread
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }
}

/// Owns the `FsmExecutor` (IO processors, include paths) that every started `Instance` shares.
pub struct Host {
    executor: FsmExecutor,
}

impl Default for Host {
    fn default() -> Self {
        Host::new()
    }
}

impl Host {
    pub fn new() -> Host {
        Host {
            executor: FsmExecutor::new_without_io_processor(),
        }
    }

    pub fn set_include_paths(&mut self, include_paths: &Vec<PathBuf>) {
        self.executor.set_include_paths(include_paths);
    }

    /// Parses and starts the document at `uri`. Corresponds to section 6's `start`.
    #[cfg(feature = "xml")]
    pub fn start(
        &mut self,
        uri: &str,
        #[cfg(feature = "Trace")] trace: TraceMode,
    ) -> Result<Instance, String> {
        let sm = parser::parse_from_uri(uri.to_string(), &self.executor.include_paths)
            .map_err(|e| e.to_string())?;
        self.start_fsm(
            sm,
            #[cfg(feature = "Trace")]
            trace,
        )
    }

    /// As [Host::start], but from an in-memory document instead of a file/URI.
    #[cfg(feature = "xml")]
    pub fn start_from_xml(
        &mut self,
        xml: &str,
        #[cfg(feature = "Trace")] trace: TraceMode,
    ) -> Result<Instance, String> {
        let sm = parser::parse_from_xml_with_includes(xml.to_string(), &self.executor.include_paths)
            .map_err(|e| e.to_string())?;
        self.start_fsm(
            sm,
            #[cfg(feature = "Trace")]
            trace,
        )
    }

    fn start_fsm(
        &mut self,
        mut sm: Box<Fsm>,
        #[cfg(feature = "Trace")] trace: TraceMode,
    ) -> Result<Instance, String> {
        #[cfg(feature = "Trace")]
        sm.tracer.enable_trace(trace);
        let meta = DocumentMeta::capture(&sm);
        let session = fsm::start_fsm_with_data(sm, Box::new(self.executor.clone()), &HashMap::new());
        Ok(Instance { session, meta })
    }

    /// Enqueues an event and returns once it is queued, without waiting for it to be processed.
    /// Corresponds to section 6's `send`.
    pub fn send(&self, instance: &Instance, event: Event) -> Result<(), String> {
        instance
            .session
            .sender
            .send(Box::new(event))
            .map_err(|e| e.to_string())
    }

    /// Sends an event and blocks until the macrostep it triggers completes, then returns the
    /// resulting snapshot. Corresponds to section 6's `send_sync(Snapshot) -> Snapshot`.
    ///
    /// External sends are serialized through the instance's single event queue, so a completed
    /// macrostep after this send was enqueued is necessarily the one it triggered (or a later
    /// one, which is a superset of its effects). The engine has no per-event reply channel, so
    /// completion is detected by polling the macrostep counter published in `GlobalData`, the
    /// same `Arc<Mutex<_>>` side-channel idiom `TestTracer` uses for its live configuration.
    pub fn send_sync(&self, instance: &Instance, event: Event) -> Result<Snapshot, String> {
        let before = instance.session.global_data.lock().macrostep_count;
        self.send(instance, event)?;

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if instance.is_finished() {
                break;
            }
            let after = instance.session.global_data.lock().macrostep_count;
            if after != before {
                break;
            }
            if Instant::now() >= deadline {
                return Err("timed out waiting for macrostep to complete".to_string());
            }
            thread::sleep(Duration::from_millis(5));
        }
        Ok(self.snapshot(instance))
    }

    /// Active atomic states, by name. Corresponds to section 6's `active_atomic_states`.
    pub fn active_atomic_states(&self, instance: &Instance) -> HashSet<String> {
        self.snapshot(instance).active_atomic_states
    }

    /// Active configuration including every ancestor of each active atomic state, by name.
    /// Corresponds to section 6's `active_with_ancestors`.
    pub fn active_with_ancestors(&self, instance: &Instance) -> HashSet<String> {
        self.snapshot(instance).active_with_ancestors
    }

    /// Datamodel values as of the most recently completed macrostep. Corresponds to section 6's
    /// `get_datamodel`.
    pub fn get_datamodel(&self, instance: &Instance) -> HashMap<String, Data> {
        instance.session.global_data.lock().datamodel_snapshot.clone()
    }

    fn snapshot(&self, instance: &Instance) -> Snapshot {
        let global = instance.session.global_data.lock();
        let meta = &instance.meta;

        let mut active_atomic_states = HashSet::new();
        let mut active_with_ancestors = HashSet::new();
        for id in global.configuration.iterator() {
            let Some(name) = meta.name_of(*id) else {
                continue;
            };
            if meta.is_atomic(*id) {
                active_atomic_states.insert(name.to_string());
            }
            active_with_ancestors.insert(name.to_string());
            for ancestor in meta.ancestors_of(*id) {
                if let Some(aname) = meta.name_of(ancestor) {
                    active_with_ancestors.insert(aname.to_string());
                }
            }
        }

        Snapshot {
            active_atomic_states,
            active_with_ancestors,
            datamodel: global.datamodel_snapshot.clone(),
        }
    }

    /// Cancels the instance and releases the host's session-table entry for it. Corresponds to
    /// section 6's `stop`.
    pub fn stop(&mut self, instance: Instance) -> Result<(), String> {
        let session_id = instance.session_id();
        let mut cancel = Event::new_simple(EVENT_CANCEL_SESSION);
        cancel.etype = EventType::platform;
        let result = instance
            .session
            .sender
            .send(Box::new(cancel))
            .map_err(|e| e.to_string());
        self.executor.remove_session(session_id);
        result
    }
}
