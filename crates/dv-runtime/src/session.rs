#![forbid(unsafe_code)]

//! Session orchestration.
//!
//! A [`Session`] is driven entirely by its host: raw frames go in through
//! [`deliver`](Session::deliver) or [`receive`](Session::receive), fetch
//! results through [`complete_fetch`](Session::complete_fetch), and the
//! passage of time through [`tick`](Session::tick). Time is read from the
//! session's [`Clock`]; with a [`DeterministicClock`] the host advances it
//! explicitly. Everything the host must act on accumulates in
//! [`SessionOutputs`] until [`take_outputs`](Session::take_outputs).
//!
//! # Dispatch order
//!
//! Frames are reordered by arrival index, decoded, and resolved against the
//! message cache as soon as they are contiguous. A reference that misses the
//! cache starts its fetch right away, but the message stays at its position:
//! nothing behind it is applied until it resolves or fails. Every message is
//! therefore applied in arrival order, while fetches for later references
//! overlap with the wait.
//!
//! A missing arrival index blocks everything behind it. When the gap outlives
//! the configured timeout the session asks the host to reconnect; frames held
//! behind the gap are dropped when the new transport comes up.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

use dv_cache::{CacheError, CacheStats, FetchError, ForwardMsgCache, Resolution, WaiterToken};
use dv_core::{
    BackMsg, CodecError, Delta, Element, ForwardMsg, ForwardMsgBody, ForwardMsgMetadata,
    JsonCodec, MessageCodec, MessageHash, PageConfig, ScriptFinishedStatus, ScriptRunId,
    SessionEvent, WidgetValue,
};
use dv_tree::AppRoot;
use dv_widgets::{FormsData, WidgetError, WidgetSource, WidgetStateManager};

use crate::clock::{Clock, DeterministicClock, SystemClock};
use crate::config::SessionConfig;
use crate::connection::{ConnectionError, ConnectionState, ConnectionStateMachine};
use crate::message_queue::{Ingest, MessageQueue, QueueError};

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SessionError {
    /// The session was torn down with [`Session::end`].
    Ended,
    /// The connection is in its terminal state.
    Fatal { reason: String },
    /// Frames are only accepted while connected.
    NotConnected { state: &'static str },
    Queue(QueueError),
    Connection(ConnectionError),
    Cache(CacheError),
    Widget(WidgetError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ended => write!(f, "session has ended"),
            Self::Fatal { reason } => write!(f, "session is in a fatal state: {reason}"),
            Self::NotConnected { state } => write!(f, "cannot accept messages while {state}"),
            Self::Queue(err) => write!(f, "{err}"),
            Self::Connection(err) => write!(f, "{err}"),
            Self::Cache(err) => write!(f, "{err}"),
            Self::Widget(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Queue(err) => Some(err),
            Self::Connection(err) => Some(err),
            Self::Cache(err) => Some(err),
            Self::Widget(err) => Some(err),
            _ => None,
        }
    }
}

impl From<QueueError> for SessionError {
    fn from(err: QueueError) -> Self {
        Self::Queue(err)
    }
}

impl From<ConnectionError> for SessionError {
    fn from(err: ConnectionError) -> Self {
        Self::Connection(err)
    }
}

impl From<CacheError> for SessionError {
    fn from(err: CacheError) -> Self {
        Self::Cache(err)
    }
}

impl From<WidgetError> for SessionError {
    fn from(err: WidgetError) -> Self {
        Self::Widget(err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outputs
// ─────────────────────────────────────────────────────────────────────────────

/// Something the session dropped or recovered from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A frame could not be decoded and was skipped.
    DecodeFailed,
    /// A cacheable message arrived without a hash and was skipped.
    MissingHash,
    /// A delta was rejected; the tree is unchanged.
    DeltaRejected { path: Vec<usize> },
    /// A widget descriptor could not be registered.
    WidgetRejected { widget_id: String },
    /// A reference could not be resolved and was skipped.
    ReferenceUnresolved { hash: MessageHash },
    /// A fetched payload was itself a reference.
    UnexpectedReference { hash: MessageHash },
    /// Arrival index `expected` did not come within the gap timeout.
    GapTimedOut { expected: u64, held: usize },
    /// Frames held behind a gap were dropped when a new transport came up.
    FramesDiscarded { count: usize },
    /// The reorder buffer overflowed.
    QueueOverflow,
    /// The transport dropped.
    ConnectionLost { retry_in: Option<Duration> },
    /// Outstanding fetches dropped at teardown.
    FetchesAbandoned { hashes: Vec<MessageHash> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// Arrival index of the offending message, when there is one.
    pub index: Option<u64>,
    pub message: String,
}

/// Work for the host, accumulated between [`Session::take_outputs`] calls.
#[derive(Debug, Default)]
pub struct SessionOutputs {
    /// Hashes the host must fetch and report through
    /// [`Session::complete_fetch`]. Each hash appears once per miss.
    pub fetch_requests: Vec<MessageHash>,
    /// Messages to send upstream, in order.
    pub back_msgs: Vec<BackMsg>,
    pub diagnostics: Vec<Diagnostic>,
    /// Latest tree, set whenever it changed.
    pub root: Option<AppRoot>,
    /// Number of render requests folded into `root`.
    pub render_count: u64,
    /// Latest form status, set whenever it may have changed.
    pub forms_data: Option<FormsData>,
    pub page_config: Option<PageConfig>,
    pub session_events: Vec<SessionEvent>,
    /// A scheduled reconnect is due; the host should open a transport.
    pub connect_requested: bool,
    /// The stream can no longer be trusted; the host should drop the
    /// transport and reconnect.
    pub reconnect_requested: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Slot {
    Ready(ForwardMsg),
    Waiting { hash: MessageHash, token: WaiterToken },
    Failed { hash: MessageHash, reason: String },
}

#[derive(Debug)]
struct Queued {
    index: u64,
    slot: Slot,
}

#[derive(Debug, Default)]
struct RunState {
    script_run_id: ScriptRunId,
    page_script_hash: String,
    script_running: bool,
    page_config: PageConfig,
}

/// One client session.
#[derive(Debug)]
pub struct Session<C: MessageCodec = JsonCodec, K: Clock = SystemClock> {
    config: SessionConfig,
    codec: C,
    clock: K,
    connection: ConnectionStateMachine,
    queue: MessageQueue<Vec<u8>>,
    pipeline: VecDeque<Queued>,
    next_arrival: u64,
    cache: ForwardMsgCache,
    max_cached_message_age: u32,
    root: AppRoot,
    widgets: WidgetStateManager,
    run: RunState,
    outputs: SessionOutputs,
    ended: bool,
}

impl Session<JsonCodec, SystemClock> {
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self::with_parts(config, JsonCodec, SystemClock::new())
    }
}

impl<K: Clock> Session<JsonCodec, K> {
    #[must_use]
    pub fn with_clock(config: SessionConfig, clock: K) -> Self {
        Self::with_parts(config, JsonCodec, clock)
    }
}

impl<C: MessageCodec> Session<C, SystemClock> {
    #[must_use]
    pub fn with_codec(config: SessionConfig, codec: C) -> Self {
        Self::with_parts(config, codec, SystemClock::new())
    }
}

impl<C: MessageCodec> Session<C, DeterministicClock> {
    /// Advance the deterministic clock by `dt`.
    pub fn advance_time(&mut self, dt: Duration) {
        self.clock.advance(dt);
    }

    /// Set the deterministic clock to an absolute time.
    pub fn set_time(&mut self, now: Duration) {
        self.clock.set(now);
    }
}

impl<C: MessageCodec, K: Clock> Session<C, K> {
    #[must_use]
    pub fn with_parts(config: SessionConfig, codec: C, clock: K) -> Self {
        tracing::debug!(codec = codec.name(), "session created");
        Self {
            connection: ConnectionStateMachine::new(&config.backoff),
            queue: MessageQueue::new(&config.queue),
            pipeline: VecDeque::new(),
            next_arrival: 0,
            cache: ForwardMsgCache::new(),
            max_cached_message_age: config.max_cached_message_age,
            root: AppRoot::empty(&config.placeholder),
            widgets: WidgetStateManager::new(),
            run: RunState::default(),
            outputs: SessionOutputs::default(),
            ended: false,
            config,
            codec,
            clock,
        }
    }

    #[must_use]
    pub fn clock(&self) -> &K {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut K {
        &mut self.clock
    }

    // ── Connection ──────────────────────────────────────────────────────

    #[must_use]
    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.connection.session_token()
    }

    /// The host is opening a transport.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        self.connection.begin_connect()?;
        Ok(())
    }

    /// The transport is up.
    ///
    /// The new transport starts a fresh stream: frames held behind a gap from
    /// the previous one are dropped and arrival indices handed out but never
    /// delivered are forgotten.
    pub fn on_connected(&mut self, session_token: Option<String>) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        self.connection.on_connected(session_token)?;
        let discarded = self.queue.resync(self.next_arrival);
        if discarded > 0 {
            self.diagnose(
                None,
                DiagnosticKind::FramesDiscarded { count: discarded },
                format!("dropped {discarded} frames held from the previous transport"),
            );
        }
        Ok(())
    }

    /// The transport dropped or failed to open. Returns the retry delay, or
    /// `None` when no retry is scheduled.
    pub fn on_disconnected(&mut self) -> Result<Option<Duration>, SessionError> {
        self.ensure_not_ended()?;
        let now = self.clock.now_mono();
        let retry_in = self.connection.on_disconnected(now)?;
        self.diagnose(
            None,
            DiagnosticKind::ConnectionLost { retry_in },
            format!("connection lost, now {}", self.connection.state()),
        );
        Ok(retry_in)
    }

    /// Enter the terminal state. Messages already received stay undispatched.
    pub fn on_fatal(&mut self, reason: impl Into<String>) {
        self.connection.on_fatal(reason);
    }

    // ── Inbound ─────────────────────────────────────────────────────────

    /// Allocate the next arrival index.
    pub fn next_arrival_index(&mut self) -> u64 {
        let index = self.next_arrival;
        self.next_arrival += 1;
        index
    }

    /// Accept a frame in arrival order. A rejected frame uses up no index.
    pub fn receive(&mut self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        let index = self.next_arrival_index();
        self.deliver(index, bytes)
    }

    /// Accept a frame with an index from [`next_arrival_index`](Self::next_arrival_index).
    /// Frames may be delivered out of index order; they are dispatched in
    /// index order.
    pub fn deliver(&mut self, index: u64, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.ensure_accepting()?;
        self.next_arrival = self.next_arrival.max(index.saturating_add(1));

        let now = self.clock.now_mono();
        match self.queue.push(index, bytes, now) {
            Ok(Ingest::Ready(frames)) => {
                for (index, bytes) in frames {
                    self.admit(index, &bytes);
                }
                self.dispatch();
                Ok(())
            }
            Ok(Ingest::Buffered | Ingest::Duplicate) => Ok(()),
            Err(err) => {
                tracing::warn!(index, error = %err, "reorder buffer overflow");
                self.diagnose(Some(index), DiagnosticKind::QueueOverflow, err.to_string());
                self.outputs.reconnect_requested = true;
                Err(err.into())
            }
        }
    }

    /// Report the outcome of a fetch from [`SessionOutputs::fetch_requests`].
    ///
    /// A failed fetch skips every message waiting on the hash. After
    /// [`end`](Self::end) the result is ignored.
    pub fn complete_fetch(
        &mut self,
        hash: &MessageHash,
        result: Result<Vec<u8>, FetchError>,
    ) -> Result<(), SessionError> {
        if self.ended {
            tracing::debug!(hash = %hash, "ignoring fetch result after session end");
            return Ok(());
        }

        match self.cache.complete_fetch(hash, result, &self.codec) {
            Ok(completion) => {
                for (token, msg) in completion.resolved {
                    self.fill_slot(token, Slot::Ready(msg));
                }
            }
            Err(CacheError::CacheMissUnrecoverable {
                hash,
                waiters,
                source,
            }) => {
                let reason = source.to_string();
                for token in waiters {
                    self.fill_slot(
                        token,
                        Slot::Failed {
                            hash: hash.clone(),
                            reason: reason.clone(),
                        },
                    );
                }
            }
            Err(err) => return Err(err.into()),
        }

        self.dispatch();
        Ok(())
    }

    /// Check timers against the clock: request a reconnect for an arrival
    /// gap that outlived its timeout, and for a scheduled retry that is due.
    pub fn tick(&mut self) {
        if self.ended {
            return;
        }
        let now = self.clock.now_mono();

        if let Some(timeout) = self.queue.expire(now) {
            self.diagnose(
                None,
                DiagnosticKind::GapTimedOut {
                    expected: timeout.expected,
                    held: timeout.held,
                },
                format!(
                    "message {} did not arrive in time; {} frames held behind it",
                    timeout.expected, timeout.held
                ),
            );
            self.outputs.reconnect_requested = true;
        }

        if self.connection.poll_retry(now) {
            self.outputs.connect_requested = true;
        }
    }

    // ── Widgets ─────────────────────────────────────────────────────────

    #[must_use]
    pub fn widgets(&self) -> &WidgetStateManager {
        &self.widgets
    }

    pub fn set_widget_value(
        &mut self,
        widget_id: &str,
        value: WidgetValue,
        source: WidgetSource,
        form_id: Option<&str>,
    ) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        let result = self.widgets.set_value(widget_id, value, source, form_id);
        self.after_widget_write(result)
    }

    pub fn set_trigger_value(&mut self, widget_id: &str, source: WidgetSource) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        let result = self.widgets.set_trigger_value(widget_id, source);
        self.after_widget_write(result)
    }

    pub fn set_string_trigger_value(
        &mut self,
        widget_id: &str,
        text: impl Into<String>,
        source: WidgetSource,
    ) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        let result = self.widgets.set_string_trigger_value(widget_id, text, source);
        self.after_widget_write(result)
    }

    pub fn submit_form(&mut self, form_id: &str, submit_button: Option<&str>) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        let result = self.widgets.submit_form(form_id, submit_button);
        self.after_widget_write(result)
    }

    /// Run several widget writes as one notification.
    pub fn batch_widgets<R>(
        &mut self,
        f: impl FnOnce(&mut WidgetStateManager) -> R,
    ) -> Result<R, SessionError> {
        self.ensure_not_ended()?;
        let out = self.widgets.batch(f);
        self.flush_widget_updates();
        Ok(out)
    }

    /// Encode an upstream message with the session codec.
    pub fn encode_back(&self, msg: &BackMsg) -> Result<Vec<u8>, CodecError> {
        self.codec.encode_back(msg)
    }

    // ── State ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn root(&self) -> &AppRoot {
        &self.root
    }

    #[must_use]
    pub fn script_run_id(&self) -> &ScriptRunId {
        &self.run.script_run_id
    }

    #[must_use]
    pub fn page_script_hash(&self) -> &str {
        &self.run.page_script_hash
    }

    #[must_use]
    pub fn page_config(&self) -> &PageConfig {
        &self.run.page_config
    }

    #[must_use]
    pub fn is_script_running(&self) -> bool {
        self.run.script_running
    }

    #[must_use]
    pub fn max_cached_message_age(&self) -> u32 {
        self.max_cached_message_age
    }

    #[must_use]
    pub fn cache(&self) -> &ForwardMsgCache {
        &self.cache
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Messages decoded but not yet applied.
    #[must_use]
    pub fn pending_dispatch(&self) -> usize {
        self.pipeline.len()
    }

    /// Frames held behind an arrival gap.
    #[must_use]
    pub fn buffered_frames(&self) -> usize {
        self.queue.buffered_len()
    }

    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn take_outputs(&mut self) -> SessionOutputs {
        std::mem::take(&mut self.outputs)
    }

    /// Tear the session down. Outstanding fetches are abandoned and widget
    /// state is dropped. Later calls are rejected or ignored.
    pub fn end(&mut self) {
        if self.ended {
            return;
        }
        let hashes = self.cache.abandon_fetches();
        if !hashes.is_empty() {
            let message = format!("abandoned {} pending fetches", hashes.len());
            self.diagnose(None, DiagnosticKind::FetchesAbandoned { hashes }, message);
        }
        self.pipeline.clear();
        self.queue.clear();
        self.widgets.clear();
        self.connection.shutdown();
        self.ended = true;
        tracing::info!(run = %self.run.script_run_id, "session ended");
    }

    // ── Internals ───────────────────────────────────────────────────────

    fn ensure_not_ended(&self) -> Result<(), SessionError> {
        if self.ended {
            Err(SessionError::Ended)
        } else {
            Ok(())
        }
    }

    fn ensure_accepting(&self) -> Result<(), SessionError> {
        self.ensure_not_ended()?;
        match self.connection.state() {
            ConnectionState::Connected => Ok(()),
            ConnectionState::FatalError { reason } => Err(SessionError::Fatal {
                reason: reason.clone(),
            }),
            state => Err(SessionError::NotConnected { state: state.name() }),
        }
    }

    /// Decode and resolve one in-order frame, then queue it for dispatch.
    fn admit(&mut self, index: u64, bytes: &[u8]) {
        let msg = match self.codec.decode_forward(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                tracing::warn!(index, error = %err, "dropping undecodable message");
                self.diagnose(Some(index), DiagnosticKind::DecodeFailed, err.to_string());
                return;
            }
        };

        let slot = match self.cache.process(msg, bytes) {
            Ok(Resolution::Ready(msg)) => Slot::Ready(msg),
            Ok(Resolution::Pending {
                hash,
                token,
                fetch_needed,
            }) => {
                if fetch_needed {
                    self.outputs.fetch_requests.push(hash.clone());
                }
                Slot::Waiting { hash, token }
            }
            Err(err) => {
                self.diagnose(Some(index), DiagnosticKind::MissingHash, err.to_string());
                return;
            }
        };
        self.pipeline.push_back(Queued { index, slot });
    }

    fn fill_slot(&mut self, token: WaiterToken, slot: Slot) {
        let waiting = self.pipeline.iter_mut().find(|queued| {
            matches!(&queued.slot, Slot::Waiting { token: t, .. } if *t == token)
        });
        match waiting {
            Some(queued) => queued.slot = slot,
            None => tracing::debug!(token = token.get(), "no queued message for fetch waiter"),
        }
    }

    /// Apply every message at the head of the pipeline that is resolved.
    fn dispatch(&mut self) {
        if self.connection.state().is_fatal() {
            return;
        }
        while let Some(queued) = self.pipeline.pop_front() {
            match queued.slot {
                Slot::Waiting { ref hash, .. } => {
                    tracing::trace!(index = queued.index, hash = %hash, "dispatch blocked on fetch");
                    self.pipeline.push_front(queued);
                    break;
                }
                Slot::Ready(msg) => self.apply(queued.index, msg),
                Slot::Failed { hash, reason } => {
                    tracing::warn!(
                        index = queued.index,
                        hash = %hash,
                        %reason,
                        "skipping unresolved reference"
                    );
                    self.diagnose(
                        Some(queued.index),
                        DiagnosticKind::ReferenceUnresolved { hash },
                        reason,
                    );
                }
            }
        }
    }

    fn apply(&mut self, index: u64, msg: ForwardMsg) {
        tracing::trace!(index, kind = msg.body.name(), "dispatch");
        let ForwardMsg { metadata, body, .. } = msg;
        match body {
            ForwardMsgBody::NewSession {
                script_run_id,
                page_script_hash,
                max_cached_message_age,
            } => self.begin_run(script_run_id, page_script_hash, max_cached_message_age),
            ForwardMsgBody::SessionStatusChanged {
                script_is_running, ..
            } => self.run.script_running = script_is_running,
            ForwardMsgBody::Delta { delta } => self.apply_delta(index, &delta, &metadata),
            ForwardMsgBody::ScriptFinished { status } => self.finish_run(status),
            ForwardMsgBody::PageConfigChanged { config } => {
                self.run.page_config = config.clone();
                self.outputs.page_config = Some(config);
            }
            ForwardMsgBody::SessionEvent { event } => self.outputs.session_events.push(event),
            ForwardMsgBody::RefHash { ref_hash } => {
                self.diagnose(
                    Some(index),
                    DiagnosticKind::UnexpectedReference { hash: ref_hash },
                    "resolved payload is itself a reference".to_owned(),
                );
            }
        }
    }

    fn begin_run(
        &mut self,
        script_run_id: ScriptRunId,
        page_script_hash: String,
        max_cached_message_age: Option<u32>,
    ) {
        tracing::info!(run = %script_run_id, page = %page_script_hash, "script run started");
        let page_changed =
            !self.run.page_script_hash.is_empty() && self.run.page_script_hash != page_script_hash;
        if page_changed {
            self.root = AppRoot::empty(&self.config.placeholder);
            self.request_render();
        }
        if let Some(age) = max_cached_message_age {
            self.max_cached_message_age = age;
        }
        self.run.script_run_id = script_run_id;
        self.run.page_script_hash = page_script_hash;
        self.run.script_running = true;
    }

    fn apply_delta(&mut self, index: u64, delta: &Delta, metadata: &ForwardMsgMetadata) {
        match self
            .root
            .apply_delta(&self.run.script_run_id, delta, metadata)
        {
            Ok(root) => {
                self.root = root;
                self.register_from_delta(index, delta);
                self.request_render();
            }
            Err(err) => {
                tracing::warn!(index, op = delta.name(), error = %err, "delta rejected");
                self.diagnose(
                    Some(index),
                    DiagnosticKind::DeltaRejected {
                        path: err.path().to_vec(),
                    },
                    err.to_string(),
                );
            }
        }
    }

    fn register_from_delta(&mut self, index: u64, delta: &Delta) {
        match delta {
            Delta::NewElement(Element::Widget(widget)) => {
                if let Err(err) = self.widgets.register_widget(widget) {
                    self.diagnose(
                        Some(index),
                        DiagnosticKind::WidgetRejected {
                            widget_id: widget.id.clone(),
                        },
                        err.to_string(),
                    );
                }
            }
            Delta::AddBlock(block) => {
                if let Some((form_id, clear_on_submit)) = block.as_form() {
                    self.widgets.register_form(form_id, clear_on_submit);
                }
            }
            _ => {}
        }
    }

    fn finish_run(&mut self, status: ScriptFinishedStatus) {
        self.run.script_running = false;
        if status != ScriptFinishedStatus::FinishedSuccessfully {
            tracing::debug!(?status, "script run ended without pruning");
            return;
        }

        self.root = self.root.clear_stale_nodes(&self.run.script_run_id);
        let evicted = self.cache.increment_run_count(self.max_cached_message_age);

        let active: BTreeSet<String> = self
            .root
            .widgets()
            .into_iter()
            .map(|widget| widget.id.clone())
            .collect();
        self.widgets.retain_widgets(&active);
        let forms: BTreeSet<String> = self
            .root
            .forms()
            .into_iter()
            .map(|(form_id, _)| form_id.to_owned())
            .collect();
        self.widgets.retain_forms(&forms);
        self.widgets
            .set_submit_button_counts(self.root.submit_button_counts());
        self.outputs.forms_data = Some(self.widgets.forms_data());

        tracing::info!(
            run = %self.run.script_run_id,
            widgets = active.len(),
            forms = forms.len(),
            evicted,
            "script run finished"
        );
        self.request_render();
    }

    fn after_widget_write(&mut self, result: Result<(), WidgetError>) -> Result<(), SessionError> {
        if let Err(err) = &result {
            tracing::warn!(error = %err, "widget write rejected");
        }
        self.flush_widget_updates();
        result.map_err(SessionError::from)
    }

    fn flush_widget_updates(&mut self) {
        for update in self.widgets.take_updates() {
            self.outputs
                .back_msgs
                .push(update.into_back_msg(&self.run.page_script_hash));
        }
        self.outputs.forms_data = Some(self.widgets.forms_data());
    }

    fn request_render(&mut self) {
        self.outputs.root = Some(self.root.clone());
        self.outputs.render_count += 1;
    }

    fn diagnose(&mut self, index: Option<u64>, kind: DiagnosticKind, message: String) {
        self.outputs.diagnostics.push(Diagnostic {
            kind,
            index,
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dv_core::{Block, MessageHash};
    use pretty_assertions::assert_eq;

    type TestSession = Session<JsonCodec, DeterministicClock>;

    fn idle() -> TestSession {
        Session::with_clock(SessionConfig::default(), DeterministicClock::new())
    }

    fn frame(msg: &ForwardMsg) -> Vec<u8> {
        JsonCodec.encode_forward(msg).unwrap()
    }

    fn new_session(run: &str) -> ForwardMsg {
        ForwardMsg::new(
            MessageHash::default(),
            ForwardMsgMetadata::default(),
            ForwardMsgBody::NewSession {
                script_run_id: ScriptRunId::new(run),
                page_script_hash: "main".into(),
                max_cached_message_age: None,
            },
        )
    }

    fn connected() -> TestSession {
        let mut session = idle();
        session.begin_connect().unwrap();
        session.on_connected(Some("token".into())).unwrap();
        session
    }

    #[test]
    fn frames_are_rejected_until_connected() {
        let mut session = idle();
        let err = session.receive(frame(&new_session("r1"))).unwrap_err();
        assert!(matches!(err, SessionError::NotConnected { state: "disconnected" }));
    }

    #[test]
    fn rejected_frame_uses_up_no_index() {
        let mut session = idle();
        assert!(session.receive(frame(&new_session("r0"))).is_err());
        assert_eq!(session.next_arrival, 0);

        session.begin_connect().unwrap();
        session.on_connected(None).unwrap();
        session.receive(frame(&new_session("r1"))).unwrap();
        assert_eq!(session.script_run_id().as_str(), "r1");
        assert_eq!(session.buffered_frames(), 0);
    }

    #[test]
    fn explicit_delivery_moves_the_arrival_counter() {
        let mut session = connected();
        session.deliver(0, frame(&new_session("r1"))).unwrap();
        session.receive(frame(&new_session("r2"))).unwrap();
        assert_eq!(session.script_run_id().as_str(), "r2");
    }

    #[test]
    fn gap_timeout_reads_the_session_clock() {
        let config = SessionConfig::default().with_queue(crate::QueueConfig {
            max_buffered: 8,
            gap_timeout: Duration::from_millis(100),
        });
        let mut session = Session::with_clock(config, DeterministicClock::new());
        session.begin_connect().unwrap();
        session.on_connected(None).unwrap();

        session.deliver(1, frame(&new_session("r1"))).unwrap();
        session.advance_time(Duration::from_millis(100));
        session.tick();
        assert!(!session.take_outputs().reconnect_requested);

        session.advance_time(Duration::from_millis(1));
        session.tick();
        assert!(session.take_outputs().reconnect_requested);
        assert_eq!(session.clock().now_mono(), Duration::from_millis(101));
    }

    #[test]
    fn new_session_sets_run_state() {
        let mut session = connected();
        session.receive(frame(&new_session("r1"))).unwrap();
        assert_eq!(session.script_run_id().as_str(), "r1");
        assert_eq!(session.page_script_hash(), "main");
        assert!(session.is_script_running());
    }

    #[test]
    fn undecodable_frame_is_skipped_with_diagnostic() {
        let mut session = connected();
        session.receive(b"not json".to_vec()).unwrap();
        session.receive(frame(&new_session("r1"))).unwrap();

        let outputs = session.take_outputs();
        assert_eq!(outputs.diagnostics.len(), 1);
        assert_eq!(outputs.diagnostics[0].kind, DiagnosticKind::DecodeFailed);
        assert_eq!(outputs.diagnostics[0].index, Some(0));
        assert_eq!(session.script_run_id().as_str(), "r1");
    }

    #[test]
    fn form_block_registers_form() {
        let mut session = connected();
        session.receive(frame(&new_session("r1"))).unwrap();
        let delta = ForwardMsg::delta("", vec![0, 0], Delta::AddBlock(Block::form("f", true)));
        session.receive(frame(&delta)).unwrap();
        assert!(session.widgets().is_form_registered("f"));
    }

    #[test]
    fn fatal_state_rejects_frames() {
        let mut session = connected();
        session.on_fatal("server gone");
        let err = session.receive(frame(&new_session("r1"))).unwrap_err();
        assert!(matches!(err, SessionError::Fatal { .. }));
    }

    #[test]
    fn end_is_idempotent_and_blocks_writes() {
        let mut session = connected();
        session.end();
        session.end();
        assert!(session.is_ended());
        assert!(matches!(
            session.submit_form("f", None),
            Err(SessionError::Ended)
        ));
        assert!(session
            .complete_fetch(&MessageHash::from("h"), Ok(Vec::new()))
            .is_ok());
    }
}
