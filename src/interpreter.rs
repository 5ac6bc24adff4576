//! The step engine: event selection, transition conflict resolution,
//! exit/entry-set computation and the microstep/macrostep loop, following
//! the W3C algorithm for SCXML interpretation.\
//! A [StateChart] is the runtime value owning the configuration, the
//! datamodel, both event queues and the history tracker; the referenced
//! [Document] stays immutable and shared.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::configuration::{Configuration, HistoryTracker};
use crate::datamodel::{Data, DataStore};
use crate::document::{
    DataElement, Document, ExprSlot, HistoryType, Invoke, StateId, StateKind, Transition,
    TransitionId, TransitionKind,
};
use crate::evaluator::{
    CompiledExpr, ExprError, ExpressionEngineEvaluator, ExpressionEvaluator, ParamPolicy,
};
use crate::executable_content::{execute_action_list, execute_invoke};
use crate::expression_engine::expressions::EvalContext;
use crate::logging::{LogAdapter, LogLevel, SinkLogAdapter};

/// Default cap of microsteps per macrostep.
pub const DEFAULT_MICROSTEP_LIMIT: usize = 100;

/// Origin of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    Internal,
    External,
}

/// An event: a non-empty name, an arbitrary data map and its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub data: HashMap<String, Data>,
    pub origin: EventOrigin,
}

impl Event {
    pub fn new_external(name: &str) -> Event {
        Event {
            name: name.to_string(),
            data: HashMap::new(),
            origin: EventOrigin::External,
        }
    }

    pub fn new_internal(name: &str) -> Event {
        Event {
            name: name.to_string(),
            data: HashMap::new(),
            origin: EventOrigin::Internal,
        }
    }

    pub fn with_data(mut self, data: HashMap<String, Data>) -> Event {
        self.data = data;
        self
    }

    /// *W3C says*: Indicates that an error internal to the execution of the
    /// document has occurred, such as one arising from expression evaluation.
    pub fn error_execution(error_type: &str, reason: &str) -> Event {
        let mut event = Event::new_internal("error.execution");
        event
            .data
            .insert("type".to_string(), Data::String(error_type.to_string()));
        event
            .data
            .insert("reason".to_string(), Data::String(reason.to_string()));
        event
    }

    /// *W3C says*: Indicates that an error has occurred while trying to
    /// communicate with an external entity.
    pub fn error_communication(reason: &str) -> Event {
        let mut event = Event::new_internal("error.communication");
        event
            .data
            .insert("reason".to_string(), Data::String(reason.to_string()));
        event
    }
}

impl From<&str> for Event {
    fn from(name: &str) -> Event {
        Event::new_external(name)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name.as_str())
    }
}

/// Everything a handler needs about one `<invoke>` execution.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub invoke_id: Option<String>,
    pub src: Option<String>,
    pub params: HashMap<String, Data>,
    pub content: Option<Data>,
}

/// Outcome of an invoke handler.
#[derive(Debug, Clone)]
pub enum InvokeResult {
    Ok,
    OkWithData(HashMap<String, Data>),
    CommunicationError(String),
    ExecutionError(String),
}

/// Handler for one `<invoke>` type. Registered per type URI in
/// [InterpreterOptions].
pub trait InvokeHandler: Send {
    fn invoke(&mut self, invocation: &Invocation) -> InvokeResult;
}

/// Scheduler capability for delayed sends, installed by the actor driver.\
/// The synchronous driver leaves it unset and executes delayed sends
/// immediately with a warning.
pub trait DelayedSendScheduler: Send {
    fn schedule(&mut self, send_id: &str, delay_ms: u64, event: Event);

    /// Cancels a scheduled send. Returns true if it was still pending.
    fn cancel(&mut self, send_id: &str) -> bool;
}

/// Outbound routing capability for `<send>` targets other than
/// `#_internal` and the own session. Target URIs are opaque to the engine;
/// the actor driver (or an embedding host) registers a router, without one
/// such sends are logged as unsupported and raise `error.communication`.
pub trait EventRouter: Send {
    /// Delivers the event to `target`, or describes why it cannot.
    fn route(&mut self, target: &str, event: Event) -> Result<(), String>;
}

/// Options for [StateChart::initialize].
pub struct InterpreterOptions {
    pub log_adapter: Box<dyn LogAdapter>,
    pub min_log_level: LogLevel,
    pub microstep_limit: usize,
    pub evaluator: Arc<dyn ExpressionEvaluator>,
    pub invoke_handlers: HashMap<String, Box<dyn InvokeHandler>>,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        InterpreterOptions {
            log_adapter: Box::new(SinkLogAdapter::default()),
            min_log_level: LogLevel::Info,
            microstep_limit: DEFAULT_MICROSTEP_LIMIT,
            evaluator: Arc::new(ExpressionEngineEvaluator::new()),
            invoke_handlers: HashMap::new(),
        }
    }
}

impl InterpreterOptions {
    pub fn with_log_adapter(mut self, adapter: Box<dyn LogAdapter>, min_level: LogLevel) -> Self {
        self.log_adapter = adapter;
        self.min_log_level = min_level;
        self
    }

    pub fn with_invoke_handler(mut self, type_name: &str, handler: Box<dyn InvokeHandler>) -> Self {
        self.invoke_handlers.insert(type_name.to_string(), handler);
        self
    }

    pub fn with_microstep_limit(mut self, limit: usize) -> Self {
        self.microstep_limit = limit;
        self
    }
}

/// The runtime value of one running chart.
pub struct StateChart {
    pub document: Arc<Document>,
    pub configuration: Configuration,
    pub datamodel: DataStore,
    pub history: HistoryTracker,
    pub current_event: Option<Event>,
    internal_queue: VecDeque<Event>,
    external_queue: VecDeque<Event>,
    logger: Box<dyn LogAdapter>,
    min_log_level: LogLevel,
    evaluator: Arc<dyn ExpressionEvaluator>,
    invoke_handlers: HashMap<String, Box<dyn InvokeHandler>>,
    scheduler: Option<Box<dyn DelayedSendScheduler>>,
    router: Option<Box<dyn EventRouter>>,
    microstep_limit: usize,
    running: bool,
    send_id_counter: u32,
}

impl StateChart {
    /// Creates the runtime and performs the initialization macrostep: the
    /// datamodel is populated from `<data>` declarations, the root initial
    /// targets are entered as the entry set of a synthetic transition with
    /// an empty exit set, then eventless transitions and internal events are
    /// processed until a stable configuration is reached.
    pub fn initialize(document: Arc<Document>, options: InterpreterOptions) -> StateChart {
        let mut sc = StateChart {
            document,
            configuration: Configuration::new(),
            datamodel: DataStore::new(),
            history: HistoryTracker::new(),
            current_event: None,
            internal_queue: VecDeque::new(),
            external_queue: VecDeque::new(),
            logger: options.log_adapter,
            min_log_level: options.min_log_level,
            evaluator: options.evaluator,
            invoke_handlers: options.invoke_handlers,
            scheduler: None,
            router: None,
            microstep_limit: options.microstep_limit,
            running: true,
            send_id_counter: 0,
        };
        sc.initialize_datamodel();
        let document = sc.document.clone();
        match document.initial {
            None => {
                // Empty document: the configuration stays empty and events
                // are discarded.
                sc.running = false;
            }
            Some(initial) => {
                sc.enter_states(&[initial]);
                sc.macrostep(None);
                sc.pump();
            }
        }
        sc
    }

    /// True until a top-level final state has been entered.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Active leaf names in document order.
    pub fn active_leaf_names(&self) -> Vec<String> {
        self.configuration.leaf_names(&self.document)
    }

    /// Pending (internal, external) event counts. Both are zero after any
    /// completed `send_event`.
    pub fn queue_sizes(&self) -> (usize, usize) {
        (self.internal_queue.len(), self.external_queue.len())
    }

    pub fn evaluator(&self) -> Arc<dyn ExpressionEvaluator> {
        self.evaluator.clone()
    }

    /// Installs the delayed-send scheduler. Used by the actor driver.
    pub fn set_scheduler(&mut self, scheduler: Box<dyn DelayedSendScheduler>) {
        self.scheduler = Some(scheduler);
    }

    pub fn supports_delayed_send(&self) -> bool {
        self.scheduler.is_some()
    }

    pub fn schedule_delayed_send(&mut self, send_id: String, delay_ms: u64, event: Event) {
        match &mut self.scheduler {
            Some(scheduler) => scheduler.schedule(send_id.as_str(), delay_ms, event),
            None => self.external_queue.push_back(event),
        }
    }

    /// Cancels a delayed send by its id. Returns true if it was pending.
    pub fn cancel_delayed_send(&mut self, send_id: &str) -> bool {
        match &mut self.scheduler {
            Some(scheduler) => scheduler.cancel(send_id),
            None => false,
        }
    }

    /// Installs the outbound router for external send targets. Used by the
    /// actor driver; embedding hosts may install their own.
    pub fn set_router(&mut self, router: Box<dyn EventRouter>) {
        self.router = Some(router);
    }

    /// Hands an event addressed at an external target to the outbound
    /// router. Without a router the target is unsupported: a warning is
    /// logged and `error.communication` is raised for the chart to catch.
    pub(crate) fn dispatch_external_send(&mut self, target: &str, send_id: &str, event: Event) {
        let result = match &mut self.router {
            Some(router) => router.route(target, event),
            None => Err("no outbound router attached".to_string()),
        };
        if let Err(reason) = result {
            self.log_at(
                LogLevel::Warn,
                &format!("send: unsupported target '{}' ({})", target, reason),
            );
            let mut error = Event::error_communication(&format!(
                "cannot deliver to target '{}': {}",
                target, reason
            ));
            error
                .data
                .insert("sendid".to_string(), Data::String(send_id.to_string()));
            self.enqueue_internal(error);
        }
    }

    pub(crate) fn next_send_id(&mut self) -> String {
        self.send_id_counter += 1;
        format!("send_{}", self.send_id_counter)
    }

    /// ## Event processing
    ///
    /// Appends the event to the external queue and processes events until
    /// both queues are empty: internal events drain before the next external
    /// event, each event triggers at most one conflict-resolved transition
    /// set followed by the eventless chain. This produces a deterministic,
    /// fixed-point response to a single external event.
    pub fn send_event(&mut self, event: impl Into<Event>) {
        self.external_queue.push_back(event.into());
        self.pump();
    }

    pub fn enqueue_internal(&mut self, event: Event) {
        self.internal_queue.push_back(event);
    }

    pub fn enqueue_external(&mut self, event: Event) {
        self.external_queue.push_back(event);
    }

    fn pump(&mut self) {
        loop {
            let next = self
                .internal_queue
                .pop_front()
                .or_else(|| self.external_queue.pop_front());
            match next {
                Some(event) => self.macrostep(Some(event)),
                None => break,
            }
        }
    }

    /// ## Macrostep
    ///
    /// Processes one triggering event (if any), then loops: take eventless
    /// transitions while enabled, otherwise pop the next internal event and
    /// take the transitions it enables. Stops when no transitions are
    /// enabled and the internal queue is empty, or when the microstep cap
    /// is reached (warning, the chart stays in its last stable
    /// configuration).
    fn macrostep(&mut self, trigger: Option<Event>) {
        if !self.running {
            return;
        }
        let mut steps = 0usize;
        if let Some(event) = trigger {
            self.log_at(LogLevel::Debug, &format!("processing event '{}'", event));
            self.current_event = Some(event);
            let enabled = self.select_event_transitions();
            if enabled.is_empty() {
                self.log_at(LogLevel::Debug, "event enabled no transition, discarded");
            } else {
                steps += 1;
                self.microstep(&enabled);
            }
        }
        loop {
            if !self.running {
                break;
            }
            let eventless = self.select_eventless_transitions();
            if !eventless.is_empty() {
                if steps >= self.microstep_limit {
                    self.warn_microstep_cap();
                    break;
                }
                steps += 1;
                self.microstep(&eventless);
                self.current_event = None;
                continue;
            }
            match self.internal_queue.pop_front() {
                None => break,
                Some(event) => {
                    self.current_event = Some(event);
                    let enabled = self.select_event_transitions();
                    if !enabled.is_empty() {
                        if steps >= self.microstep_limit {
                            self.warn_microstep_cap();
                            break;
                        }
                        steps += 1;
                        self.microstep(&enabled);
                    }
                }
            }
        }
        self.current_event = None;
    }

    fn warn_microstep_cap(&mut self) {
        let limit = self.microstep_limit;
        self.log_at(
            LogLevel::Warn,
            &format!(
                "microstep limit of {} reached, aborting eventless chaining",
                limit
            ),
        );
    }

    /// ## Transition selection
    ///
    /// For every active atomic state in document order, walk the state and
    /// its ancestors and take the first transition whose event descriptor
    /// matches the current event and whose condition holds. The result is
    /// conflict-resolved before it is returned.
    fn select_event_transitions(&mut self) -> Vec<TransitionId> {
        self.select_transitions(false)
    }

    /// As above with the event descriptor required absent; conditions are
    /// still evaluated with whatever the current event slot holds.
    fn select_eventless_transitions(&mut self) -> Vec<TransitionId> {
        self.select_transitions(true)
    }

    fn select_transitions(&mut self, eventless: bool) -> Vec<TransitionId> {
        let document = self.document.clone();
        let event_name = self.current_event.as_ref().map(|e| e.name.clone());
        let mut enabled: Vec<TransitionId> = Vec::new();

        let mut atomic_states = self.configuration.active_leaves();
        atomic_states.sort_by(|a, b| document.document_order(a, b));

        for leaf in atomic_states {
            let mut chain = vec![leaf];
            chain.extend(document.hierarchy.proper_ancestors(leaf, 0));
            'leaf: for sid in chain {
                for tid in &document.state(sid).transitions {
                    let t = document.transition(*tid);
                    let matches = if eventless {
                        t.is_eventless()
                    } else {
                        match &event_name {
                            Some(name) => !t.is_eventless() && t.matches_event(name),
                            None => false,
                        }
                    };
                    if matches && self.condition_match(t) {
                        if !enabled.contains(tid) {
                            enabled.push(*tid);
                        }
                        break 'leaf;
                    }
                }
            }
        }
        self.remove_conflicting_transitions(&enabled)
    }

    /// A transition with a failing condition is disabled; an erroring
    /// condition is disabled as well and raises `error.execution`.
    fn condition_match(&mut self, t: &Transition) -> bool {
        match &t.cond {
            None => true,
            Some(slot) => match self.eval_condition(slot) {
                Ok(value) => value,
                Err(e) => {
                    self.log_at(
                        LogLevel::Warn,
                        &format!("condition of transition at {} failed: {}", t.location, e),
                    );
                    self.enqueue_internal(Event::error_execution(
                        "transition.condition",
                        &e.to_string(),
                    ));
                    false
                }
            },
        }
    }

    /// ## Conflict resolution (optimal transition set)
    ///
    /// Two transitions conflict if their exit sets intersect. Iterating in
    /// selection order, a conflicting later transition wins only if its
    /// source is a descendant of the kept transition's source (child wins);
    /// otherwise it is dropped. The result has pairwise-disjoint exit sets.
    fn remove_conflicting_transitions(&mut self, enabled: &[TransitionId]) -> Vec<TransitionId> {
        let document = self.document.clone();
        let mut filtered: Vec<TransitionId> = Vec::new();
        for tid1 in enabled {
            let exit1 = self.compute_exit_set(&[*tid1]);
            let mut preempted = false;
            let mut to_remove: Vec<TransitionId> = Vec::new();
            for tid2 in &filtered {
                let exit2 = self.compute_exit_set(&[*tid2]);
                if exit1.iter().any(|s| exit2.contains(s)) {
                    let t1 = document.transition(*tid1);
                    let t2 = document.transition(*tid2);
                    if document.hierarchy.is_descendant(t1.source, t2.source) {
                        to_remove.push(*tid2);
                    } else {
                        preempted = true;
                        break;
                    }
                }
            }
            if !preempted {
                filtered.retain(|t| !to_remove.contains(t));
                filtered.push(*tid1);
            }
        }
        filtered
    }

    /// ## Microstep
    ///
    /// One atomic application of a conflict-resolved transition set:
    /// record history, exit states in reverse document order, execute
    /// transition actions, enter states in document order, then seal the
    /// new configuration. Targetless transitions only execute actions.
    fn microstep(&mut self, transitions: &[TransitionId]) {
        let document = self.document.clone();
        self.exit_states(transitions);
        for tid in transitions {
            let t = document.transition(*tid);
            execute_action_list(&t.actions, self);
        }
        self.enter_states(transitions);
    }

    /// Exit set: every active state that is a proper descendant of the
    /// transition's domain. Targetless transitions contribute nothing.
    fn compute_exit_set(&self, transitions: &[TransitionId]) -> Vec<StateId> {
        let document = &self.document;
        let active = self.configuration.all_active_document_order(document);
        let mut exit_set: Vec<StateId> = Vec::new();
        for tid in transitions {
            let t = document.transition(*tid);
            if t.targets.is_empty() {
                continue;
            }
            let domain = self.transition_domain(t);
            for s in &active {
                if document.hierarchy.is_descendant(*s, domain) && !exit_set.contains(s) {
                    exit_set.push(*s);
                }
            }
        }
        exit_set
    }

    /// *W3C says*: the transition domain is the source state for internal
    /// transitions whose targets are all inside it, otherwise the least
    /// common compound ancestor of source and targets.
    fn transition_domain(&self, t: &Transition) -> StateId {
        let document = &self.document;
        let targets = self.effective_targets(t);
        if targets.is_empty() || t.source == 0 {
            // Targetless, or the synthetic root initial transition.
            return 0;
        }
        if t.kind == TransitionKind::Internal
            && document.state(t.source).kind == StateKind::Compound
            && targets
                .iter()
                .all(|s| document.hierarchy.is_descendant(*s, t.source))
        {
            return t.source;
        }
        let mut states = vec![t.source];
        states.extend(targets);
        document.hierarchy.lcca_of_set(&states)
    }

    /// Targets with history pseudo-states dereferenced: the recorded
    /// configuration of the history's parent, or the history default
    /// transition's targets when nothing was recorded.
    fn effective_targets(&self, t: &Transition) -> Vec<StateId> {
        let document = &self.document;
        let mut targets: Vec<StateId> = Vec::new();
        for sid in &t.targets {
            let state = document.state(*sid);
            match state.kind {
                StateKind::History(history_type) => {
                    let recorded = match history_type {
                        HistoryType::Shallow => self.history.get_shallow(state.parent),
                        HistoryType::Deep => self.history.get_deep(state.parent),
                    };
                    match recorded {
                        Some(list) if !list.is_empty() => {
                            for s in list {
                                if !targets.contains(s) {
                                    targets.push(*s);
                                }
                            }
                        }
                        _ => {
                            if let Some(default_tid) = state.transitions.first() {
                                for s in self.effective_targets(document.transition(*default_tid))
                                {
                                    if !targets.contains(&s) {
                                        targets.push(s);
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {
                    if !targets.contains(sid) {
                        targets.push(*sid);
                    }
                }
            }
        }
        targets
    }

    /// ## Exit phase
    ///
    /// Records history for every exited state with a history child, then
    /// runs onexit handlers in reverse document order and removes the
    /// states from the configuration.
    fn exit_states(&mut self, transitions: &[TransitionId]) {
        let document = self.document.clone();
        let mut exit_set = self.compute_exit_set(transitions);
        exit_set.sort_by(|a, b| document.exit_order(a, b));

        // History is recorded before anything is exited.
        let leaves = self.configuration.active_leaves();
        for sid in &exit_set {
            let state = document.state(*sid);
            if state
                .children
                .iter()
                .any(|c| document.state(*c).kind.is_history())
            {
                self.history.record(*sid, &leaves, &document);
            }
        }

        for sid in &exit_set {
            let state = document.state(*sid);
            self.log_at(LogLevel::Debug, &format!("exit state '{}'", state.name));
            for block in &state.onexit {
                execute_action_list(block, self);
            }
            self.configuration.remove_leaf(*sid);
        }
    }

    /// ## Entry phase
    ///
    /// Computes the complete entry set (targets, their required ancestors
    /// and the default descendants needed to satisfy the configuration
    /// invariants), then enters states in document order: onentry handlers,
    /// default-initial and default-history content, invokes, and done-event
    /// generation for final states.
    fn enter_states(&mut self, transitions: &[TransitionId]) {
        let document = self.document.clone();
        let mut states_to_enter: HashSet<StateId> = HashSet::new();
        let mut states_for_default_entry: HashSet<StateId> = HashSet::new();
        let mut default_history_content: HashMap<StateId, TransitionId> = HashMap::new();
        self.compute_entry_set(
            transitions,
            &mut states_to_enter,
            &mut states_for_default_entry,
            &mut default_history_content,
        );

        let mut entry_sorted: Vec<StateId> = states_to_enter.into_iter().collect();
        entry_sorted.sort_by(|a, b| document.entry_order(a, b));

        for sid in entry_sorted {
            let state = document.state(sid);
            self.log_at(LogLevel::Debug, &format!("enter state '{}'", state.name));
            if state.kind.is_leaf() {
                self.configuration.insert_leaf(sid);
            }
            for block in &state.onentry {
                execute_action_list(block, self);
            }
            if states_for_default_entry.contains(&sid) {
                if let Some(initial) = state.initial {
                    execute_action_list(&document.transition(initial).actions, self);
                }
            }
            if let Some(default_tid) = default_history_content.get(&sid) {
                execute_action_list(&document.transition(*default_tid).actions, self);
            }
            for invoke in &state.invokes {
                execute_invoke(invoke, self);
            }
            if state.kind == StateKind::Final {
                self.generate_done_events(sid);
            }
        }
        self.seal_configuration();
    }

    /// Entering a final state raises `done.state.<parent>`; if the
    /// grandparent is a parallel state whose regions are all complete,
    /// `done.state.<parallel>` follows. A top-level final state stops the
    /// interpreter.
    fn generate_done_events(&mut self, final_state: StateId) {
        let document = self.document.clone();
        let parent = document.state(final_state).parent;
        if parent == 0 {
            self.running = false;
            return;
        }
        let parent_state = document.state(parent);
        self.enqueue_internal(Event::new_internal(&format!(
            "done.state.{}",
            parent_state.name
        )));
        let grandparent = parent_state.parent;
        if grandparent != 0 && document.state(grandparent).kind == StateKind::Parallel {
            let all_complete = match document.hierarchy.parallel_regions(grandparent) {
                Some(regions) => regions.keys().all(|region| self.is_in_final(*region)),
                None => false,
            };
            if all_complete {
                self.enqueue_internal(Event::new_internal(&format!(
                    "done.state.{}",
                    document.state(grandparent).name
                )));
            }
        }
    }

    /// *W3C says*: a compound state is "in a final state" if one of its
    /// final children is active; a parallel state if all its regions are.
    fn is_in_final(&self, sid: StateId) -> bool {
        let document = &self.document;
        let state = document.state(sid);
        match state.kind {
            StateKind::Compound => state.children.iter().any(|c| {
                document.state(*c).kind == StateKind::Final
                    && self.configuration.leaves().contains(c)
            }),
            StateKind::Parallel => match document.hierarchy.parallel_regions(sid) {
                Some(regions) => regions.keys().all(|region| self.is_in_final(*region)),
                None => false,
            },
            _ => false,
        }
    }

    fn compute_entry_set(
        &self,
        transitions: &[TransitionId],
        states_to_enter: &mut HashSet<StateId>,
        states_for_default_entry: &mut HashSet<StateId>,
        default_history_content: &mut HashMap<StateId, TransitionId>,
    ) {
        let document = &self.document;
        for tid in transitions {
            let t = document.transition(*tid);
            for s in &t.targets {
                self.add_descendant_states_to_enter(
                    *s,
                    states_to_enter,
                    states_for_default_entry,
                    default_history_content,
                );
            }
            let ancestor = self.transition_domain(t);
            for s in self.effective_targets(t) {
                self.add_ancestor_states_to_enter(
                    s,
                    ancestor,
                    states_to_enter,
                    states_for_default_entry,
                    default_history_content,
                );
            }
        }
    }

    /// Adds `sid` and every descendant the chart will end up entering:
    /// history values (or the history default), the default initial chain
    /// of compound states, all regions of parallel states.
    fn add_descendant_states_to_enter(
        &self,
        sid: StateId,
        states_to_enter: &mut HashSet<StateId>,
        states_for_default_entry: &mut HashSet<StateId>,
        default_history_content: &mut HashMap<StateId, TransitionId>,
    ) {
        let document = &self.document;
        let state = document.state(sid);
        if let StateKind::History(history_type) = state.kind {
            let recorded = match history_type {
                HistoryType::Shallow => self.history.get_shallow(state.parent),
                HistoryType::Deep => self.history.get_deep(state.parent),
            };
            match recorded {
                Some(list) if !list.is_empty() => {
                    let list = list.clone();
                    for s in &list {
                        self.add_descendant_states_to_enter(
                            *s,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                    for s in &list {
                        self.add_ancestor_states_to_enter(
                            *s,
                            state.parent,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                }
                _ => {
                    // A history state has exactly one transition which
                    // specifies the default history configuration.
                    if let Some(default_tid) = state.transitions.first() {
                        let default_transition = document.transition(*default_tid);
                        default_history_content.insert(state.parent, *default_tid);
                        for s in &default_transition.targets {
                            self.add_descendant_states_to_enter(
                                *s,
                                states_to_enter,
                                states_for_default_entry,
                                default_history_content,
                            );
                        }
                        for s in &default_transition.targets {
                            self.add_ancestor_states_to_enter(
                                *s,
                                state.parent,
                                states_to_enter,
                                states_for_default_entry,
                                default_history_content,
                            );
                        }
                    }
                }
            }
            return;
        }
        states_to_enter.insert(sid);
        match state.kind {
            StateKind::Compound => {
                states_for_default_entry.insert(sid);
                if let Some(initial) = state.initial {
                    let initial_transition = document.transition(initial);
                    for s in &initial_transition.targets {
                        self.add_descendant_states_to_enter(
                            *s,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                    for s in &initial_transition.targets {
                        self.add_ancestor_states_to_enter(
                            *s,
                            sid,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                }
            }
            StateKind::Parallel => {
                for child in &state.children {
                    if document.state(*child).kind.is_history() {
                        continue;
                    }
                    if !states_to_enter
                        .iter()
                        .any(|s| document.hierarchy.is_descendant(*s, *child))
                    {
                        self.add_descendant_states_to_enter(
                            *child,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                }
            }
            _ => {}
        }
    }

    /// Adds the ancestors of `state` up to but excluding `ancestor`,
    /// filling in the regions of any parallel ancestor on the way.
    fn add_ancestor_states_to_enter(
        &self,
        state: StateId,
        ancestor: StateId,
        states_to_enter: &mut HashSet<StateId>,
        states_for_default_entry: &mut HashSet<StateId>,
        default_history_content: &mut HashMap<StateId, TransitionId>,
    ) {
        let document = &self.document;
        for anc in document.hierarchy.proper_ancestors(state, ancestor) {
            states_to_enter.insert(anc);
            if document.state(anc).kind == StateKind::Parallel {
                for child in &document.state(anc).children {
                    if document.state(*child).kind.is_history() {
                        continue;
                    }
                    if !states_to_enter
                        .iter()
                        .any(|s| document.hierarchy.is_descendant(*s, *child))
                    {
                        self.add_descendant_states_to_enter(
                            *child,
                            states_to_enter,
                            states_for_default_entry,
                            default_history_content,
                        );
                    }
                }
            }
        }
    }

    fn seal_configuration(&mut self) {
        let document = self.document.clone();
        let mut leaves = self.configuration.active_leaves();
        leaves.sort_by(|a, b| document.document_order(a, b));
        match Configuration::with_leaves(&document, leaves.clone()) {
            Ok(configuration) => self.configuration = configuration,
            Err(message) => {
                self.log_at(
                    LogLevel::Error,
                    &format!("configuration invariant violated: {}", message),
                );
                self.configuration = Configuration::from_leaves_unchecked(leaves);
            }
        }
    }

    /// ## Datamodel initialization
    ///
    /// `<data>` declarations are applied in document order, chart level
    /// first. A failing `expr` raises `error.execution` and leaves the
    /// entry defined as null.
    fn initialize_datamodel(&mut self) {
        let document = self.document.clone();
        for element in &document.data {
            self.initialize_data_element(element);
        }
        for sid in document.all_states_document_order() {
            for element in &document.state(sid).data {
                self.initialize_data_element(element);
            }
        }
    }

    fn initialize_data_element(&mut self, element: &DataElement) {
        let value = if let Some(expr) = &element.expr {
            match self.eval_value(expr) {
                Ok(v) => v,
                Err(e) => {
                    self.log_at(
                        LogLevel::Warn,
                        &format!("<data id='{}'> expression failed: {}", element.id, e),
                    );
                    self.enqueue_internal(Event::error_execution(
                        "data.execution",
                        &e.to_string(),
                    ));
                    Data::Null
                }
            }
        } else if let Some(body) = &element.body {
            Data::from_body(body)
        } else {
            Data::Null
        };
        self.datamodel.set(element.id.as_str(), value);
    }

    /// ## Expression plumbing
    ///
    /// All expression evaluation goes through the evaluator adapter with a
    /// context exposing the datamodel, the current event and `In()`.
    pub(crate) fn eval_value(&self, slot: &ExprSlot) -> Result<Data, ExprError> {
        let in_state = |name: &str| self.in_state(name);
        let context = EvalContext {
            data: &self.datamodel,
            event_name: self.current_event.as_ref().map(|e| e.name.as_str()),
            event_data: self.current_event.as_ref().map(|e| &e.data),
            in_state: &in_state,
        };
        match &slot.compiled {
            Some(compiled) => self.evaluator.evaluate_value(compiled, &context),
            None => self.evaluator.evaluate_source(slot.source.as_str(), &context),
        }
    }

    pub(crate) fn eval_condition(&self, slot: &ExprSlot) -> Result<bool, ExprError> {
        let in_state = |name: &str| self.in_state(name);
        let context = EvalContext {
            data: &self.datamodel,
            event_name: self.current_event.as_ref().map(|e| e.name.as_str()),
            event_data: self.current_event.as_ref().map(|e| &e.data),
            in_state: &in_state,
        };
        let compiled: CompiledExpr = match &slot.compiled {
            Some(c) => c.clone(),
            None => self.evaluator.compile(slot.source.as_str())?,
        };
        self.evaluator.evaluate_condition(&compiled, &context)
    }

    pub(crate) fn eval_params(
        &self,
        params: &[crate::document::Parameter],
        policy: ParamPolicy,
    ) -> Result<HashMap<String, Data>, ExprError> {
        let in_state = |name: &str| self.in_state(name);
        let context = EvalContext {
            data: &self.datamodel,
            event_name: self.current_event.as_ref().map(|e| e.name.as_str()),
            event_data: self.current_event.as_ref().map(|e| &e.data),
            in_state: &in_state,
        };
        self.evaluator.evaluate_params(params, &context, policy)
    }

    /// The `In()` predicate: true iff the named state is active, including
    /// ancestors.
    pub fn in_state(&self, name: &str) -> bool {
        match self.document.state_ids.get(name) {
            Some(sid) => self.configuration.is_active(&self.document, *sid),
            None => false,
        }
    }

    /// ## Invoke dispatch
    ///
    /// Looks up the handler by type. A missing handler, handler failure or
    /// success each map to their `error.*` / `done.invoke` event.
    pub(crate) fn dispatch_invoke(
        &mut self,
        invoke: &Invoke,
        params: HashMap<String, Data>,
        content: Option<Data>,
    ) {
        let invocation = Invocation {
            invoke_id: invoke.invoke_id.clone(),
            src: invoke.src.clone(),
            params,
            content,
        };
        let result = self
            .invoke_handlers
            .get_mut(invoke.type_name.as_str())
            .map(|handler| handler.invoke(&invocation));
        match result {
            None => {
                self.log_at(
                    LogLevel::Warn,
                    &format!("no invoke handler for type '{}'", invoke.type_name),
                );
                self.enqueue_internal(Event::error_execution(
                    "invoke.execution",
                    &format!("no invoke handler registered for type '{}'", invoke.type_name),
                ));
            }
            Some(InvokeResult::Ok) => {
                self.enqueue_internal(Event::new_internal(&done_invoke_name(invoke)));
            }
            Some(InvokeResult::OkWithData(data)) => {
                self.enqueue_internal(Event::new_internal(&done_invoke_name(invoke)).with_data(data));
            }
            Some(InvokeResult::CommunicationError(reason)) => {
                self.enqueue_internal(Event::error_communication(&reason));
            }
            Some(InvokeResult::ExecutionError(reason)) => {
                self.enqueue_internal(Event::error_execution("invoke.execution", &reason));
            }
        }
    }

    /// Emits one structured log record with the current active leaves and
    /// event name attached as metadata.
    pub fn log_at(&mut self, level: LogLevel, message: &str) {
        if level < self.min_log_level || !self.logger.enabled(level) {
            return;
        }
        let mut metadata = HashMap::new();
        metadata.insert(
            "active".to_string(),
            self.configuration.leaf_names(&self.document).join(","),
        );
        metadata.insert(
            "event".to_string(),
            self.current_event
                .as_ref()
                .map(|e| e.name.clone())
                .unwrap_or_default(),
        );
        self.logger.log(level, message, &metadata);
    }
}

fn done_invoke_name(invoke: &Invoke) -> String {
    match &invoke.invoke_id {
        Some(id) => format!("done.invoke.{}", id),
        None => "done.invoke".to_string(),
    }
}
