//! The document model: the typed, immutable representation of a state chart
//! produced by the reader and shared read-only by all running charts.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::evaluator::CompiledExpr;
use crate::executable_content::Action;
use crate::hierarchy::HierarchyCache;

pub type Name = String;

/// Interned state handle: index + 1 into the document's state storage,
/// `0` means "none".
pub type StateId = u32;

/// Interned transition handle: index + 1 into the document's transition
/// storage, `0` means "none".
pub type TransitionId = u32;

/// Document order index, stamped while reading.
pub type DocumentId = u32;

/// Source position for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// History pseudo-state flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryType {
    Shallow,
    Deep,
}

pub fn map_history_type(ts: &str) -> Result<HistoryType, String> {
    match ts.to_lowercase().as_str() {
        "shallow" | "" => Ok(HistoryType::Shallow),
        "deep" => Ok(HistoryType::Deep),
        _ => Err(format!("unknown history type '{}'", ts)),
    }
}

/// Kind of a state. Atomic vs. compound is fixed during validation, once all
/// children are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Atomic,
    Compound,
    Parallel,
    Final,
    History(HistoryType),
}

impl StateKind {
    /// True for states that may be members of a configuration.
    pub fn is_leaf(&self) -> bool {
        matches!(self, StateKind::Atomic | StateKind::Final)
    }

    pub fn is_history(&self) -> bool {
        matches!(self, StateKind::History(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Internal,
    External,
}

pub fn map_transition_type(ts: &str) -> Result<TransitionKind, String> {
    match ts.to_lowercase().as_str() {
        "internal" => Ok(TransitionKind::Internal),
        "external" | "" => Ok(TransitionKind::External),
        _ => Err(format!("unknown transition type '{}'", ts)),
    }
}

/// An expression attribute: the raw source plus the compiled form filled in
/// by the optimizer. A missing compiled form after optimization means the
/// compile failed and was deferred to runtime (conditions only).
#[derive(Debug, Clone)]
pub struct ExprSlot {
    pub source: String,
    pub compiled: Option<CompiledExpr>,
}

impl ExprSlot {
    pub fn from_source(source: &str) -> ExprSlot {
        ExprSlot {
            source: source.to_string(),
            compiled: None,
        }
    }
}

impl Display for ExprSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.source.as_str())
    }
}

/// A `<param>` element of `<send>` or `<invoke>`.
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub expr: Option<ExprSlot>,
    pub location: Option<String>,
}

impl Display for Parameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parameter{{name:{} expr:{:?} location:{:?}}}",
            self.name, self.expr, self.location
        )
    }
}

/// A `<content>` child of `<send>` or `<invoke>`: either a literal body or
/// an expression.
#[derive(Debug, Clone, Default)]
pub struct CommonContent {
    pub body: Option<String>,
    pub expr: Option<ExprSlot>,
}

/// One `<data>` declaration.
#[derive(Debug, Clone)]
pub struct DataElement {
    pub id: String,
    pub expr: Option<ExprSlot>,
    pub body: Option<String>,
    pub location: SourceLocation,
}

/// An `<invoke>` element, dispatched by `type` through the state chart's
/// invoke-handler registry.
#[derive(Debug, Clone)]
pub struct Invoke {
    pub doc_id: DocumentId,
    pub type_name: String,
    pub invoke_id: Option<String>,
    pub src: Option<String>,
    pub params: Vec<Parameter>,
    pub content: Option<CommonContent>,
    pub location: SourceLocation,
}

/// Stores all data for a state.\
/// Used for the SCXML elements `<state>`, `<parallel>`, `<final>` and
/// `<history>`.
#[derive(Debug)]
pub struct State {
    /// The internal id, used to reference the state.
    pub id: StateId,

    /// The SCXML id.
    pub name: Name,

    /// Document order.
    pub doc_id: DocumentId,

    pub kind: StateKind,

    /// Parent state, `0` for top-level states.
    pub parent: StateId,

    /// Depth below the chart root; top-level states have depth 0.
    pub depth: u32,

    /// Child states in document order.
    pub children: Vec<StateId>,

    /// Outgoing transitions in document order.
    pub transitions: Vec<TransitionId>,

    /// The initial transition (if the state has sub-states), synthesized
    /// from the `initial` attribute or the `<initial>` element.
    pub initial: Option<TransitionId>,

    /// One action list per `<onentry>` block, in document order.
    pub onentry: Vec<Vec<Action>>,

    /// One action list per `<onexit>` block, in document order.
    pub onexit: Vec<Vec<Action>>,

    /// `<data>` declarations of this state's `<datamodel>`.
    pub data: Vec<DataElement>,

    /// `<invoke>` children, run after the state is entered.
    pub invokes: Vec<Invoke>,

    pub location: SourceLocation,
}

impl State {
    pub fn new(name: &str) -> State {
        State {
            id: 0,
            name: name.to_string(),
            doc_id: 0,
            kind: StateKind::Atomic,
            parent: 0,
            depth: 0,
            children: Vec::new(),
            transitions: Vec::new(),
            initial: None,
            onentry: Vec::new(),
            onexit: Vec::new(),
            data: Vec::new(),
            invokes: Vec::new(),
            location: SourceLocation::default(),
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{<{}> {} {:?}}}", self.id, self.name, self.kind)
    }
}

#[derive(Debug)]
pub struct Transition {
    pub id: TransitionId,

    /// Document order.
    pub doc_id: DocumentId,

    pub source: StateId,

    /// Event descriptor tokens. Empty for eventless transitions.
    pub events: Vec<String>,

    pub cond: Option<ExprSlot>,

    /// Target states. Empty for targetless transitions.
    pub targets: Vec<StateId>,

    pub kind: TransitionKind,

    pub actions: Vec<Action>,

    pub location: SourceLocation,
}

impl Transition {
    pub fn new() -> Transition {
        Transition {
            id: 0,
            doc_id: 0,
            source: 0,
            events: Vec::new(),
            cond: None,
            targets: Vec::new(),
            kind: TransitionKind::External,
            actions: Vec::new(),
            location: SourceLocation::default(),
        }
    }

    /// True if the transition has no event descriptor.
    pub fn is_eventless(&self) -> bool {
        self.events.is_empty()
    }

    /// SCXML event descriptor matching: `*` matches everything, a dotted
    /// prefix matches itself and any longer dotted name, a trailing `.*`
    /// requires at least one token beyond the prefix.
    pub fn matches_event(&self, event_name: &str) -> bool {
        self.events.iter().any(|t| token_matches(t, event_name))
    }
}

impl Default for Transition {
    fn default() -> Self {
        Transition::new()
    }
}

fn token_matches(token: &str, event_name: &str) -> bool {
    if token == "*" {
        return true;
    }
    if let Some(prefix) = token.strip_suffix(".*") {
        return event_name.len() > prefix.len() + 1
            && event_name.starts_with(prefix)
            && event_name.as_bytes()[prefix.len()] == b'.';
    }
    if event_name == token {
        return true;
    }
    event_name.len() > token.len()
        && event_name.starts_with(token)
        && event_name.as_bytes()[token.len()] == b'.'
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{{:?} events:{:?} cond:{:?} targets:{:?}}}",
            self.kind, self.events, self.cond, self.targets
        )
    }
}

/// The validated, optimized chart representation. Immutable after
/// validation, safe to share read-only among many concurrent state charts.
#[derive(Debug, Default)]
pub struct Document {
    /// The `name` attribute of `<scxml>`, informational.
    pub name: Option<String>,

    pub version: String,

    /// The datamodel dialect named by the chart.
    pub datamodel_name: String,

    /// Synthetic root initial transition.
    pub initial: Option<TransitionId>,

    /// The only real storage of states, identified by id - 1.
    pub states: Vec<State>,

    /// The only real storage of transitions, identified by id - 1.
    pub transitions: Vec<Transition>,

    /// SCXML id to state id.
    pub state_ids: HashMap<Name, StateId>,

    /// Top-level states in document order.
    pub root_states: Vec<StateId>,

    /// Chart-level `<data>` declarations in document order.
    pub data: Vec<DataElement>,

    /// Pre-computed ancestor/descendant/LCCA tables, built by the optimizer.
    pub hierarchy: HierarchyCache,

    /// Element kinds detected while reading.
    pub used_features: BTreeSet<String>,

    /// Non-fatal build diagnostics (unreachable states, deferred condition
    /// compiles).
    pub warnings: Vec<String>,
}

impl Document {
    pub fn new() -> Document {
        Document {
            version: "1.0".to_string(),
            datamodel_name: "expression".to_string(),
            ..Default::default()
        }
    }

    /// Gets a state by id. The id MUST exist.
    pub fn state(&self, state_id: StateId) -> &State {
        &self.states[(state_id - 1) as usize]
    }

    pub fn state_mut(&mut self, state_id: StateId) -> &mut State {
        &mut self.states[(state_id - 1) as usize]
    }

    /// Gets a transition by id. The id MUST exist.
    pub fn transition(&self, transition_id: TransitionId) -> &Transition {
        &self.transitions[(transition_id - 1) as usize]
    }

    pub fn transition_mut(&mut self, transition_id: TransitionId) -> &mut Transition {
        &mut self.transitions[(transition_id - 1) as usize]
    }

    pub fn find_state(&self, name: &str) -> Option<&State> {
        self.state_ids.get(name).map(|id| self.state(*id))
    }

    /// Outbound transitions of a state in document order.
    pub fn transitions_from(&self, state_id: StateId) -> Vec<&Transition> {
        self.state(state_id)
            .transitions
            .iter()
            .map(|tid| self.transition(*tid))
            .collect()
    }

    /// All state ids sorted by document order.
    pub fn all_states_document_order(&self) -> Vec<StateId> {
        let mut ids: Vec<StateId> = self.states.iter().map(|s| s.id).collect();
        ids.sort_by_key(|sid| self.state(*sid).doc_id);
        ids
    }

    pub fn root_states(&self) -> &[StateId] {
        &self.root_states
    }

    pub fn document_order(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        self.state(*s1).doc_id.cmp(&self.state(*s2).doc_id)
    }

    /// Entry order: document order. Exit order is the reverse.
    pub fn entry_order(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        self.document_order(s1, s2)
    }

    pub fn exit_order(&self, s1: &StateId, s2: &StateId) -> std::cmp::Ordering {
        self.document_order(s2, s1)
    }
}

impl Display for Document {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Document{{v:{} states:{{",
            self.version
        )?;
        let mut first = true;
        for s in &self.states {
            if first {
                first = false;
            } else {
                write!(f, ",")?;
            }
            write!(f, "{}", s)?;
        }
        write!(f, "}}}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_descriptor_matching() {
        let mut t = Transition::new();
        t.events = vec!["user".to_string()];
        assert!(t.matches_event("user"));
        assert!(t.matches_event("user.login"));
        assert!(t.matches_event("user.login.failed"));
        assert!(!t.matches_event("username"));
        assert!(!t.matches_event("use"));

        t.events = vec!["*".to_string()];
        assert!(t.matches_event("anything.at.all"));

        t.events = vec!["user.*".to_string()];
        assert!(!t.matches_event("user"));
        assert!(t.matches_event("user.login"));
        assert!(!t.matches_event("userx.login"));

        t.events = vec!["timer".to_string(), "error.execution".to_string()];
        assert!(t.matches_event("timer"));
        assert!(t.matches_event("error.execution"));
        assert!(!t.matches_event("error"));
    }
}
