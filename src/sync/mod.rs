//! Change synchronization between the block store and the external
//! document owner.
//!
//! Outbound, the protocol coalesces continuous edits behind a ~220 ms
//! debounce while structural operations emit immediately and cancel any
//! pending debounced payload, so an older payload can never overwrite a
//! newer one. Inbound, a short edit lock plus an identity-diff set decide
//! whether an owner-supplied document is fresh state, a stale echo, or an
//! add/remove that must not be lost.
//!
//! Timers are modeled as a pending payload with a due timestamp drained by
//! [`SyncProtocol::poll_emission`]; the host drives the clock, so tests run
//! against a fake one.

use crate::doc::{markup, Block, Document, Markup, Millis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Suppression window for externally supplied state after a local mutation.
pub const LOCK_WINDOW_MS: Millis = 800;

/// Coalescing window for continuous (non-structural) edits.
pub const DEBOUNCE_WINDOW_MS: Millis = 220;

/// Millisecond clock capability. Injected so the debounce and lock windows
/// are testable with a fake clock.
pub trait Clock {
    fn now(&self) -> Millis;
}

/// Wall-clock milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Millis {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Millis
    }
}

/// Change notification sent to the external owner. Blocks are sanitized:
/// internal-only fields never leave the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePayload {
    pub flow_content: Markup,
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub immediate: bool,
}

impl ChangePayload {
    /// Builds a payload from the current document, stripping internal-only
    /// block fields.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            flow_content: doc.flow_content.clone(),
            blocks: doc.blocks.iter().map(Block::sanitized).collect(),
            immediate: false,
        }
    }
}

/// Why an inbound update was not applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The user is focused inside the editable region.
    EditorFocused,
    /// The edit lock is active; `deferred` reports whether the update was
    /// parked for application after the lock expires.
    LockActive { deferred: bool },
    /// Same id set as the last accepted update: a redundant echo.
    Echo,
    /// Legacy flow-markup structure while blocks already exist locally.
    StaleStructure,
}

/// Outcome of [`SyncProtocol::accept_external`].
#[derive(Debug, Clone, PartialEq)]
pub enum Acceptance {
    /// The caller must replace the block store's document with this one.
    Applied(Document),
    Ignored(IgnoreReason),
}

#[derive(Debug, Clone)]
struct PendingEmission {
    payload: ChangePayload,
    due_at: Millis,
}

#[derive(Debug, Clone)]
struct DeferredUpdate {
    doc: Document,
    /// Mutation sequence at park time. A later local mutation makes the
    /// parked snapshot stale.
    parked_at: u64,
}

/// Mediates between the block store and the external document owner.
#[derive(Debug, Default)]
pub struct SyncProtocol {
    lock_expires_at: Millis,
    mutation_seq: u64,
    last_accepted_ids: BTreeSet<crate::doc::BlockId>,
    pending: Option<PendingEmission>,
    deferred: Option<DeferredUpdate>,
}

impl SyncProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the edit lock: external state is suppressed until the window
    /// elapses.
    pub fn note_local_mutation(&mut self, now: Millis) {
        self.lock_expires_at = now + LOCK_WINDOW_MS;
        self.mutation_seq += 1;
    }

    pub fn lock_active(&self, now: Millis) -> bool {
        now < self.lock_expires_at
    }

    /// Schedules a debounced emission carrying the latest state; each call
    /// restarts the window.
    pub fn queue_debounced(&mut self, payload: ChangePayload, now: Millis) {
        self.pending = Some(PendingEmission {
            payload,
            due_at: now + DEBOUNCE_WINDOW_MS,
        });
    }

    /// Marks the payload immediate and cancels any pending debounce so the
    /// stale payload can never be sent after this one.
    pub fn emit_immediate(&mut self, mut payload: ChangePayload) -> ChangePayload {
        if self.pending.take().is_some() {
            debug!("canceled pending debounced emission for immediate one");
        }
        payload.immediate = true;
        debug!(blocks = payload.blocks.len(), "immediate emission");
        payload
    }

    /// Cancels any pending debounced emission (component teardown).
    pub fn cancel_pending(&mut self) {
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drains the debounced emission once its window has elapsed.
    pub fn poll_emission(&mut self, now: Millis) -> Option<ChangePayload> {
        if self.pending.as_ref().is_some_and(|p| now >= p.due_at) {
            let pending = self.pending.take()?;
            debug!(blocks = pending.payload.blocks.len(), "debounced emission");
            return Some(pending.payload);
        }
        None
    }

    /// Surfaces an update that arrived during the lock window, once the
    /// lock has expired and the editor is not focused. The caller must
    /// apply the returned document.
    ///
    /// A deferral superseded by a later local mutation is dropped instead
    /// of replayed; the last-accepted id set is left untouched so the
    /// owner's next push still reads as an add/remove and is applied.
    pub fn take_deferred(&mut self, now: Millis, editor_focused: bool) -> Option<Document> {
        let deferred = self.deferred.as_ref()?;
        if deferred.parked_at != self.mutation_seq {
            debug!("dropping deferred external update superseded by local edits");
            self.deferred = None;
            return None;
        }
        if editor_focused || self.lock_active(now) {
            return None;
        }
        let deferred = self.deferred.take()?;
        self.last_accepted_ids = deferred.doc.id_set();
        debug!(
            blocks = deferred.doc.blocks.len(),
            "applying deferred external update"
        );
        Some(deferred.doc)
    }

    /// Identity set of the most recently accepted external update.
    pub fn last_accepted_ids(&self) -> &BTreeSet<crate::doc::BlockId> {
        &self.last_accepted_ids
    }

    /// Decides whether an owner-supplied document replaces local state.
    ///
    /// Never panics; malformed embedded fragments parse to defaults.
    pub fn accept_external(
        &mut self,
        incoming: Document,
        local: &Document,
        editor_focused: bool,
        now: Millis,
    ) -> Acceptance {
        if editor_focused {
            debug!("ignoring external update: editor focused");
            return Acceptance::Ignored(IgnoreReason::EditorFocused);
        }

        // legacy path: the owner supplied only flow markup with embedded
        // positioned fragments
        if incoming.blocks.is_empty() && markup::contains_fragments(&incoming.flow_content) {
            if !local.blocks.is_empty() {
                debug!("skipping legacy fragment parse: blocks already loaded");
                return Acceptance::Ignored(IgnoreReason::StaleStructure);
            }
            if self.lock_active(now) {
                debug!("ignoring legacy fragment parse: edit lock active");
                return Acceptance::Ignored(IgnoreReason::LockActive { deferred: false });
            }
            let parsed = Document::parse(&incoming.flow_content);
            debug!(blocks = parsed.blocks.len(), "parsed legacy embedded fragments");
            self.last_accepted_ids = parsed.id_set();
            return Acceptance::Applied(parsed);
        }

        let incoming_ids = incoming.id_set();

        if self.lock_active(now) {
            let changed = incoming_ids != self.last_accepted_ids;
            if changed {
                // park the add/remove so it is not silently lost; applied
                // via take_deferred once the lock expires
                self.deferred = Some(DeferredUpdate {
                    doc: incoming,
                    parked_at: self.mutation_seq,
                });
            }
            debug!(
                deferred = changed,
                lock_expires_at = self.lock_expires_at,
                "ignoring external update: edit lock active"
            );
            return Acceptance::Ignored(IgnoreReason::LockActive { deferred: changed });
        }

        if incoming_ids == self.last_accepted_ids {
            debug!("ignoring external update: same id set (echo)");
            return Acceptance::Ignored(IgnoreReason::Echo);
        }

        self.deferred = None;
        self.last_accepted_ids = incoming_ids;
        debug!(blocks = incoming.blocks.len(), "accepted external update");
        Acceptance::Applied(incoming)
    }
}
