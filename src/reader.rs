//! Builder and validator for SCXML documents.\
//! A SAX-style event stream (by default produced from XML via quick-xml) is
//! folded over an element stack into a [Document]. Semantic validation
//! collects all errors; optimization compiles expressions and builds the
//! hierarchy cache. Invalid documents never reach the runtime.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[cfg(feature = "Debug_Reader")]
use crate::common::debug;

use crate::document::{
    map_history_type, map_transition_type, CommonContent, DataElement, Document, DocumentId,
    ExprSlot, HistoryType, Invoke, Parameter, SourceLocation, State, StateId, StateKind,
    Transition, TransitionId, TransitionKind,
};
use crate::evaluator::{ExpressionEngineEvaluator, ExpressionEvaluator};
use crate::executable_content::{
    Action, AssignAction, ForeachAction, IfAction, IfBranch, LogAction, RaiseAction, SendAction,
};

pub const SCXML_NS: &str = "http://www.w3.org/2005/07/scxml";

pub const TAG_SCXML: &str = "scxml";
pub const TAG_STATE: &str = "state";
pub const TAG_PARALLEL: &str = "parallel";
pub const TAG_FINAL: &str = "final";
pub const TAG_INITIAL: &str = "initial";
pub const TAG_HISTORY: &str = "history";
pub const TAG_TRANSITION: &str = "transition";
pub const TAG_ON_ENTRY: &str = "onentry";
pub const TAG_ON_EXIT: &str = "onexit";
pub const TAG_DATAMODEL: &str = "datamodel";
pub const TAG_DATA: &str = "data";
pub const TAG_ASSIGN: &str = "assign";
pub const TAG_LOG: &str = "log";
pub const TAG_RAISE: &str = "raise";
pub const TAG_IF: &str = "if";
pub const TAG_ELSEIF: &str = "elseif";
pub const TAG_ELSE: &str = "else";
pub const TAG_FOREACH: &str = "foreach";
pub const TAG_SEND: &str = "send";
pub const TAG_PARAM: &str = "param";
pub const TAG_CONTENT: &str = "content";
pub const TAG_INVOKE: &str = "invoke";

pub const ATTR_ID: &str = "id";
pub const ATTR_NAME: &str = "name";
pub const ATTR_INITIAL: &str = "initial";
pub const ATTR_DATAMODEL: &str = "datamodel";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_EVENT: &str = "event";
pub const ATTR_EVENTEXPR: &str = "eventexpr";
pub const ATTR_COND: &str = "cond";
pub const ATTR_TARGET: &str = "target";
pub const ATTR_TARGETEXPR: &str = "targetexpr";
pub const ATTR_TYPE: &str = "type";
pub const ATTR_DELAY: &str = "delay";
pub const ATTR_DELAYEXPR: &str = "delayexpr";
pub const ATTR_NAMELIST: &str = "namelist";
pub const ATTR_LOCATION: &str = "location";
pub const ATTR_EXPR: &str = "expr";
pub const ATTR_LABEL: &str = "label";
pub const ATTR_ARRAY: &str = "array";
pub const ATTR_ITEM: &str = "item";
pub const ATTR_INDEX: &str = "index";
pub const ATTR_SRC: &str = "src";

pub type AttributeMap = HashMap<String, String>;

/// SAX-style source events with positions, the builder's only input.
#[derive(Debug, Clone)]
pub enum SaxEvent {
    StartElement {
        name: String,
        attributes: AttributeMap,
        location: SourceLocation,
    },
    EndElement {
        name: String,
        location: SourceLocation,
    },
    Characters {
        text: String,
        location: SourceLocation,
    },
}

/// Failures of the build pipeline. Partial documents are never exposed.
#[derive(Debug)]
pub enum BuildError {
    /// The source could not be tokenized at all.
    MalformedSource(String),
    /// Semantic validation failed; `errors` is non-empty.
    ValidationFailed {
        errors: Vec<String>,
        warnings: Vec<String>,
    },
    /// Conflicting attributes/elements, e.g. `initial` attribute combined
    /// with an `<initial>` element.
    AttributeConflict(String),
}

impl Display for BuildError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::MalformedSource(msg) => write!(f, "malformed source: {}", msg),
            BuildError::ValidationFailed { errors, warnings } => write!(
                f,
                "validation failed with {} error(s), {} warning(s): {}",
                errors.len(),
                warnings.len(),
                errors.join("; ")
            ),
            BuildError::AttributeConflict(msg) => write!(f, "attribute conflict: {}", msg),
        }
    }
}

impl std::error::Error for BuildError {}

enum Frame {
    Scxml,
    State {
        sid: StateId,
        has_initial_attr: bool,
        has_initial_element: bool,
    },
    Initial {
        sid: StateId,
        transition: Option<TransitionId>,
    },
    Transition {
        tid: TransitionId,
        actions: Vec<Action>,
    },
    OnEntry {
        sid: StateId,
        actions: Vec<Action>,
    },
    OnExit {
        sid: StateId,
        actions: Vec<Action>,
    },
    If {
        branches: Vec<IfBranch>,
        current_cond: Option<ExprSlot>,
        current_actions: Vec<Action>,
        in_else: bool,
    },
    Foreach {
        array: ExprSlot,
        item: String,
        index: Option<String>,
        actions: Vec<Action>,
    },
    Datamodel,
    Data {
        element: DataElement,
        body: String,
    },
    Send {
        send: SendAction,
    },
    Invoke {
        invoke: Invoke,
    },
    Content {
        content: CommonContent,
        body: String,
    },
    SimpleAction {
        action: Action,
    },
    Param {
        parameter: Parameter,
    },
    /// Marker for `<elseif>`/`<else>`, which mutate the enclosing if-frame.
    Marker,
    Unknown,
}

/// Folds SAX events into a validated, optimized [Document].
pub struct DocumentBuilder {
    document: Document,
    stack: Vec<Frame>,
    errors: Vec<String>,
    warnings: Vec<String>,
    doc_id_counter: DocumentId,
    generated_id_count: u32,
    saw_scxml: bool,
    root_initial_attr: Option<String>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl Default for DocumentBuilder {
    fn default() -> Self {
        DocumentBuilder::new()
    }
}

impl DocumentBuilder {
    pub fn new() -> DocumentBuilder {
        DocumentBuilder::with_evaluator(Arc::new(ExpressionEngineEvaluator::new()))
    }

    /// Expressions are pre-compiled through the given evaluator; use the
    /// same dialect the chart will run with.
    pub fn with_evaluator(evaluator: Arc<dyn ExpressionEvaluator>) -> DocumentBuilder {
        DocumentBuilder {
            document: Document::new(),
            stack: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            doc_id_counter: 0,
            generated_id_count: 0,
            saw_scxml: false,
            root_initial_attr: None,
            evaluator,
        }
    }

    /// Consumes one SAX event.\
    /// Most problems are collected and reported together from
    /// [finish](Self::finish); only attribute conflicts abort immediately.
    pub fn process_event(&mut self, event: SaxEvent) -> Result<(), BuildError> {
        match event {
            SaxEvent::StartElement {
                name,
                attributes,
                location,
            } => self.start_element(name.as_str(), &attributes, location),
            SaxEvent::EndElement { name, location } => {
                self.end_element(name.as_str(), location);
                Ok(())
            }
            SaxEvent::Characters { text, .. } => {
                self.characters(text.as_str());
                Ok(())
            }
        }
    }

    /// Validates and optimizes the assembled document.
    pub fn finish(mut self) -> Result<Document, BuildError> {
        if !self.saw_scxml {
            return Err(BuildError::MalformedSource(
                "missing <scxml> root element".to_string(),
            ));
        }
        self.resolve_root_initial();
        self.validate();
        self.compile_expressions();
        if !self.errors.is_empty() {
            return Err(BuildError::ValidationFailed {
                errors: self.errors,
                warnings: self.warnings,
            });
        }
        self.synthesize_default_initials();
        self.document.hierarchy =
            crate::hierarchy::HierarchyCache::build(&self.document.states, &self.document.root_states);
        self.document.warnings = self.warnings;
        Ok(self.document)
    }

    /// Warnings collected so far (unreachable states and deferred
    /// condition compiles). Also part of [BuildError::ValidationFailed].
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    // ## Element dispatch

    fn start_element(
        &mut self,
        name: &str,
        attributes: &AttributeMap,
        location: SourceLocation,
    ) -> Result<(), BuildError> {
        if let Some(Frame::Unknown) = self.stack.last() {
            // Inside an ignored subtree everything is ignored.
            self.stack.push(Frame::Unknown);
            return Ok(());
        }
        if !self.saw_scxml && name != TAG_SCXML {
            self.errors
                .push(format!("<{}> at {} outside of <scxml>", name, location));
            self.stack.push(Frame::Unknown);
            return Ok(());
        }
        match name {
            TAG_SCXML => self.start_scxml(attributes, location),
            TAG_STATE => self.start_state(StateKind::Atomic, attributes, location),
            TAG_PARALLEL => self.start_state(StateKind::Parallel, attributes, location),
            TAG_FINAL => self.start_state(StateKind::Final, attributes, location),
            TAG_HISTORY => {
                let history_type = match map_history_type(
                    attributes.get(ATTR_TYPE).map(String::as_str).unwrap_or(""),
                ) {
                    Ok(t) => t,
                    Err(e) => {
                        self.errors.push(format!("{} at {}", e, location));
                        HistoryType::Shallow
                    }
                };
                self.start_state(StateKind::History(history_type), attributes, location)
            }
            TAG_INITIAL => return self.start_initial(location),
            TAG_TRANSITION => self.start_transition(attributes, location),
            TAG_ON_ENTRY => self.start_handler_block(true, location),
            TAG_ON_EXIT => self.start_handler_block(false, location),
            TAG_DATAMODEL => self.start_datamodel(location),
            TAG_DATA => self.start_data(attributes, location),
            TAG_LOG => {
                self.note_feature(TAG_LOG);
                self.log_unknown_attributes(TAG_LOG, attributes, &[ATTR_LABEL, ATTR_EXPR]);
                self.stack.push(Frame::SimpleAction {
                    action: Action::Log(LogAction {
                        label: attributes.get(ATTR_LABEL).cloned(),
                        expr: attributes
                            .get(ATTR_EXPR)
                            .map(|e| ExprSlot::from_source(e.as_str())),
                    }),
                });
            }
            TAG_RAISE => {
                self.note_feature(TAG_RAISE);
                self.log_unknown_attributes(TAG_RAISE, attributes, &[ATTR_EVENT]);
                self.stack.push(Frame::SimpleAction {
                    action: Action::Raise(RaiseAction {
                        event: attributes.get(ATTR_EVENT).cloned().unwrap_or_default(),
                    }),
                });
            }
            TAG_ASSIGN => self.start_assign(attributes, location),
            TAG_IF => self.start_if(attributes, location),
            TAG_ELSEIF => self.start_else_branch(attributes.get(ATTR_COND).cloned(), location),
            TAG_ELSE => self.start_else_branch(None, location),
            TAG_FOREACH => self.start_foreach(attributes, location),
            TAG_SEND => self.start_send(attributes, location),
            TAG_PARAM => self.start_param(attributes, location),
            TAG_CONTENT => {
                self.note_feature(TAG_CONTENT);
                self.stack.push(Frame::Content {
                    content: CommonContent {
                        body: None,
                        expr: attributes
                            .get(ATTR_EXPR)
                            .map(|e| ExprSlot::from_source(e.as_str())),
                    },
                    body: String::new(),
                });
            }
            TAG_INVOKE => self.start_invoke(attributes, location),
            _ => {
                #[cfg(feature = "Debug_Reader")]
                debug!("ignoring unknown element <{}> at {}", name, location);
                self.stack.push(Frame::Unknown);
            }
        }
        Ok(())
    }

    fn end_element(&mut self, name: &str, location: SourceLocation) {
        let frame = match self.stack.pop() {
            Some(f) => f,
            None => {
                self.errors
                    .push(format!("unbalanced </{}> at {}", name, location));
                return;
            }
        };
        match frame {
            Frame::Scxml
            | Frame::Datamodel
            | Frame::Marker
            | Frame::Unknown
            | Frame::State { .. } => {}
            Frame::Initial { sid, transition } => match transition {
                Some(tid) => self.document.state_mut(sid).initial = Some(tid),
                None => self
                    .errors
                    .push(format!("<initial> at {} requires a transition", location)),
            },
            Frame::Transition { tid, actions } => self.end_transition(tid, actions, location),
            Frame::OnEntry { sid, actions } => {
                self.document.state_mut(sid).onentry.push(actions);
            }
            Frame::OnExit { sid, actions } => {
                self.document.state_mut(sid).onexit.push(actions);
            }
            Frame::If {
                mut branches,
                current_cond,
                current_actions,
                ..
            } => {
                branches.push(IfBranch {
                    cond: current_cond,
                    actions: current_actions,
                });
                self.push_action(Action::If(IfAction { branches }), location);
            }
            Frame::Foreach {
                array,
                item,
                index,
                actions,
            } => {
                self.push_action(
                    Action::Foreach(ForeachAction {
                        array,
                        item,
                        index,
                        actions,
                    }),
                    location,
                );
            }
            Frame::Data { mut element, body } => {
                let trimmed = body.trim();
                if !trimmed.is_empty() {
                    element.body = Some(trimmed.to_string());
                }
                self.attach_data_element(element, location);
            }
            Frame::Send { send } => self.push_action(Action::SendEvent(send), location),
            Frame::Invoke { invoke } => self.attach_invoke(invoke, location),
            Frame::Content { mut content, body } => {
                let trimmed = body.trim();
                if !trimmed.is_empty() {
                    content.body = Some(trimmed.to_string());
                }
                self.attach_content(content, location);
            }
            Frame::SimpleAction { action } => self.push_action(action, location),
            Frame::Param { parameter } => self.attach_param(parameter, location),
        }
    }

    /// Character data goes only into `<content>` and `<data>` bodies.
    fn characters(&mut self, text: &str) {
        match self.stack.last_mut() {
            Some(Frame::Content { body, .. }) => body.push_str(text),
            Some(Frame::Data { body, .. }) => body.push_str(text),
            _ => {
                #[cfg(feature = "Debug_Reader")]
                if !text.trim().is_empty() {
                    debug!("ignoring character data '{}'", text.trim());
                }
            }
        }
    }

    // ## Structural elements

    fn start_scxml(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        if self.saw_scxml {
            self.errors
                .push(format!("nested <scxml> at {}", location));
            self.stack.push(Frame::Unknown);
            return;
        }
        self.saw_scxml = true;
        self.note_feature(TAG_SCXML);
        if let Some(ns) = attributes.get("xmlns") {
            if ns != SCXML_NS {
                self.errors
                    .push(format!("unexpected namespace '{}' at {}", ns, location));
            }
        }
        self.root_initial_attr = attributes.get(ATTR_INITIAL).cloned();
        if let Some(version) = attributes.get(ATTR_VERSION) {
            self.document.version = version.clone();
        }
        if let Some(name) = attributes.get(ATTR_NAME) {
            self.document.name = Some(name.clone());
        }
        if let Some(datamodel) = attributes.get(ATTR_DATAMODEL) {
            self.document.datamodel_name = datamodel.clone();
        }
        self.log_unknown_attributes(
            TAG_SCXML,
            attributes,
            &[
                "xmlns",
                ATTR_INITIAL,
                ATTR_VERSION,
                ATTR_NAME,
                ATTR_DATAMODEL,
                "binding",
            ],
        );
        self.stack.push(Frame::Scxml);
    }

    fn start_state(
        &mut self,
        kind: StateKind,
        attributes: &AttributeMap,
        location: SourceLocation,
    ) {
        let tag = match kind {
            StateKind::Parallel => TAG_PARALLEL,
            StateKind::Final => TAG_FINAL,
            StateKind::History(_) => TAG_HISTORY,
            _ => TAG_STATE,
        };
        self.note_feature(tag);
        let parent_ok = match self.stack.last() {
            Some(Frame::Scxml) => !kind.is_history(),
            Some(Frame::State { sid, .. }) => {
                let parent_kind = self.document.state(*sid).kind;
                !matches!(parent_kind, StateKind::Final | StateKind::History(_))
            }
            _ => false,
        };
        if !parent_ok {
            self.errors
                .push(format!("<{}> at {} is not allowed here", tag, location));
            self.stack.push(Frame::Unknown);
            return;
        }

        let name = match attributes.get(ATTR_ID) {
            Some(id) => id.clone(),
            None => self.generate_name(),
        };
        let parent = self.current_state_id();
        let sid = self.get_or_create_state(name.as_str());
        if self.document.state(sid).doc_id != 0 {
            self.errors
                .push(format!("duplicate state id '{}' at {}", name, location));
        }
        self.doc_id_counter += 1;
        {
            let doc_id = self.doc_id_counter;
            let state = self.document.state_mut(sid);
            state.doc_id = doc_id;
            state.kind = kind;
            state.location = location;
            state.parent = parent;
        }
        if parent != 0 {
            let parent_depth = self.document.state(parent).depth;
            self.document.state_mut(sid).depth = parent_depth + 1;
            let parent_state = self.document.state_mut(parent);
            if !parent_state.children.contains(&sid) {
                parent_state.children.push(sid);
            }
            // History children do not turn their parent into a compound
            // state.
            if !kind.is_history() && parent_state.kind == StateKind::Atomic {
                parent_state.kind = StateKind::Compound;
            }
        } else {
            self.document.root_states.push(sid);
        }

        let mut has_initial_attr = false;
        match kind {
            StateKind::Atomic | StateKind::Compound => {
                if let Some(id_refs) = attributes.get(ATTR_INITIAL) {
                    has_initial_attr = true;
                    let targets = self.parse_state_specification(id_refs);
                    let tid = self.create_transition(sid, location, |t| {
                        t.kind = TransitionKind::Internal;
                        t.targets = targets;
                    });
                    self.document.state_mut(sid).initial = Some(tid);
                }
                self.log_unknown_attributes(tag, attributes, &[ATTR_ID, ATTR_INITIAL]);
            }
            StateKind::History(_) => {
                self.log_unknown_attributes(tag, attributes, &[ATTR_ID, ATTR_TYPE]);
            }
            _ => {
                if attributes.contains_key(ATTR_INITIAL) {
                    self.errors.push(format!(
                        "<{}> at {} must not carry an 'initial' attribute",
                        tag, location
                    ));
                }
                self.log_unknown_attributes(tag, attributes, &[ATTR_ID]);
            }
        }
        self.stack.push(Frame::State {
            sid,
            has_initial_attr,
            has_initial_element: false,
        });
    }

    fn start_initial(&mut self, location: SourceLocation) -> Result<(), BuildError> {
        self.note_feature(TAG_INITIAL);
        match self.stack.last_mut() {
            Some(Frame::State {
                sid,
                has_initial_attr,
                has_initial_element,
            }) => {
                let sid = *sid;
                if *has_initial_attr {
                    return Err(BuildError::AttributeConflict(format!(
                        "state '{}' at {} specifies both an 'initial' attribute and an <initial> element",
                        self.document.state(sid).name, location
                    )));
                }
                if *has_initial_element {
                    self.errors.push(format!(
                        "more than one <initial> element at {}",
                        location
                    ));
                }
                *has_initial_element = true;
                self.stack.push(Frame::Initial {
                    sid,
                    transition: None,
                });
                Ok(())
            }
            _ => {
                self.errors
                    .push(format!("<initial> at {} is not allowed here", location));
                self.stack.push(Frame::Unknown);
                Ok(())
            }
        }
    }

    fn start_transition(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_TRANSITION);
        let source = match self.stack.last() {
            Some(Frame::State { sid, .. }) | Some(Frame::Initial { sid, .. }) => *sid,
            _ => {
                self.errors
                    .push(format!("<transition> at {} is not allowed here", location));
                self.stack.push(Frame::Unknown);
                return;
            }
        };
        let events: Vec<String> = attributes
            .get(ATTR_EVENT)
            .map(|e| e.split_ascii_whitespace().map(str::to_string).collect())
            .unwrap_or_default();
        let cond = attributes
            .get(ATTR_COND)
            .map(|c| ExprSlot::from_source(c.as_str()));
        let targets = attributes
            .get(ATTR_TARGET)
            .map(|t| self.parse_state_specification(t))
            .unwrap_or_default();
        let kind = match map_transition_type(
            attributes.get(ATTR_TYPE).map(String::as_str).unwrap_or(""),
        ) {
            Ok(k) => k,
            Err(e) => {
                self.errors.push(format!("{} at {}", e, location));
                TransitionKind::External
            }
        };
        self.log_unknown_attributes(
            TAG_TRANSITION,
            attributes,
            &[ATTR_EVENT, ATTR_COND, ATTR_TARGET, ATTR_TYPE],
        );
        let tid = self.create_transition(source, location, |t| {
            t.events = events;
            t.cond = cond;
            t.targets = targets;
            t.kind = kind;
        });
        self.stack.push(Frame::Transition {
            tid,
            actions: Vec::new(),
        });
    }

    fn end_transition(&mut self, tid: TransitionId, actions: Vec<Action>, location: SourceLocation) {
        self.document.transition_mut(tid).actions = actions;
        match self.stack.last_mut() {
            Some(Frame::Initial { transition, .. }) => {
                let t = self.document.transition(tid);
                if !t.is_eventless() || t.cond.is_some() {
                    self.errors.push(format!(
                        "the transition of <initial> at {} must have neither 'event' nor 'cond'",
                        location
                    ));
                }
                if t.targets.is_empty() {
                    self.errors.push(format!(
                        "the transition of <initial> at {} requires a target",
                        location
                    ));
                }
                if transition.is_some() {
                    self.errors.push(format!(
                        "<initial> at {} must contain exactly one transition",
                        location
                    ));
                } else {
                    *transition = Some(tid);
                }
            }
            Some(Frame::State { sid, .. }) => {
                let sid = *sid;
                self.document.state_mut(sid).transitions.push(tid);
            }
            _ => self
                .errors
                .push(format!("<transition> at {} is not allowed here", location)),
        }
    }

    fn start_handler_block(&mut self, entry: bool, location: SourceLocation) {
        let tag = if entry { TAG_ON_ENTRY } else { TAG_ON_EXIT };
        self.note_feature(tag);
        match self.stack.last() {
            Some(Frame::State { sid, .. })
                if !self.document.state(*sid).kind.is_history() =>
            {
                let sid = *sid;
                if entry {
                    self.stack.push(Frame::OnEntry {
                        sid,
                        actions: Vec::new(),
                    });
                } else {
                    self.stack.push(Frame::OnExit {
                        sid,
                        actions: Vec::new(),
                    });
                }
            }
            _ => {
                self.errors
                    .push(format!("<{}> at {} is not allowed here", tag, location));
                self.stack.push(Frame::Unknown);
            }
        }
    }

    fn start_datamodel(&mut self, location: SourceLocation) {
        self.note_feature(TAG_DATAMODEL);
        match self.stack.last() {
            Some(Frame::Scxml) | Some(Frame::State { .. }) => self.stack.push(Frame::Datamodel),
            _ => {
                self.errors
                    .push(format!("<datamodel> at {} is not allowed here", location));
                self.stack.push(Frame::Unknown);
            }
        }
    }

    fn start_data(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_DATA);
        if !matches!(self.stack.last(), Some(Frame::Datamodel)) {
            self.errors
                .push(format!("<data> at {} is only allowed in <datamodel>", location));
            self.stack.push(Frame::Unknown);
            return;
        }
        let id = match attributes.get(ATTR_ID) {
            Some(id) => id.clone(),
            None => {
                self.errors
                    .push(format!("<data> at {} requires an 'id'", location));
                self.generate_name()
            }
        };
        self.log_unknown_attributes(TAG_DATA, attributes, &[ATTR_ID, ATTR_EXPR]);
        self.stack.push(Frame::Data {
            element: DataElement {
                id,
                expr: attributes
                    .get(ATTR_EXPR)
                    .map(|e| ExprSlot::from_source(e.as_str())),
                body: None,
                location,
            },
            body: String::new(),
        });
    }

    fn attach_data_element(&mut self, element: DataElement, location: SourceLocation) {
        // The owner is the element enclosing the <datamodel> block.
        let owner = self
            .stack
            .iter()
            .rev()
            .find(|f| !matches!(f, Frame::Datamodel));
        match owner {
            Some(Frame::State { sid, .. }) => {
                let sid = *sid;
                self.document.state_mut(sid).data.push(element);
            }
            Some(Frame::Scxml) => self.document.data.push(element),
            _ => self
                .errors
                .push(format!("<data> at {} is not allowed here", location)),
        }
    }

    // ## Executable content

    fn start_assign(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_ASSIGN);
        let locattr = attributes.get(ATTR_LOCATION).cloned().unwrap_or_else(|| {
            self.errors
                .push(format!("<assign> at {} requires 'location'", location));
            String::new()
        });
        let expr = match attributes.get(ATTR_EXPR) {
            Some(e) => ExprSlot::from_source(e.as_str()),
            None => {
                self.errors
                    .push(format!("<assign> at {} requires 'expr'", location));
                ExprSlot::from_source("null")
            }
        };
        self.log_unknown_attributes(TAG_ASSIGN, attributes, &[ATTR_LOCATION, ATTR_EXPR]);
        self.stack.push(Frame::SimpleAction {
            action: Action::Assign(AssignAction {
                location: locattr,
                path: Vec::new(),
                expr,
            }),
        });
    }

    fn start_if(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_IF);
        let cond = match attributes.get(ATTR_COND) {
            Some(c) => ExprSlot::from_source(c.as_str()),
            None => {
                self.errors
                    .push(format!("<if> at {} requires 'cond'", location));
                ExprSlot::from_source("false")
            }
        };
        self.stack.push(Frame::If {
            branches: Vec::new(),
            current_cond: Some(cond),
            current_actions: Vec::new(),
            in_else: false,
        });
    }

    fn start_else_branch(&mut self, cond: Option<String>, location: SourceLocation) {
        let tag = if cond.is_some() { TAG_ELSEIF } else { TAG_ELSE };
        self.note_feature(tag);
        match self.stack.last_mut() {
            Some(Frame::If {
                branches,
                current_cond,
                current_actions,
                in_else,
            }) => {
                if *in_else {
                    self.errors.push(format!(
                        "<{}> at {} after <else> is not allowed",
                        tag, location
                    ));
                }
                branches.push(IfBranch {
                    cond: current_cond.take(),
                    actions: std::mem::take(current_actions),
                });
                match cond {
                    Some(c) => *current_cond = Some(ExprSlot::from_source(c.as_str())),
                    None => {
                        *current_cond = None;
                        *in_else = true;
                    }
                }
                self.stack.push(Frame::Marker);
            }
            _ => {
                self.errors.push(format!(
                    "<{}> at {} is only allowed inside <if>",
                    tag, location
                ));
                self.stack.push(Frame::Marker);
            }
        }
    }

    fn start_foreach(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_FOREACH);
        let array = match attributes.get(ATTR_ARRAY) {
            Some(a) => ExprSlot::from_source(a.as_str()),
            None => {
                self.errors
                    .push(format!("<foreach> at {} requires 'array'", location));
                ExprSlot::from_source("[]")
            }
        };
        let item = match attributes.get(ATTR_ITEM) {
            Some(i) => i.clone(),
            None => {
                self.errors
                    .push(format!("<foreach> at {} requires 'item'", location));
                self.generate_name()
            }
        };
        self.log_unknown_attributes(
            TAG_FOREACH,
            attributes,
            &[ATTR_ARRAY, ATTR_ITEM, ATTR_INDEX],
        );
        self.stack.push(Frame::Foreach {
            array,
            item,
            index: attributes.get(ATTR_INDEX).cloned(),
            actions: Vec::new(),
        });
    }

    fn start_send(&mut self, attributes: &AttributeMap, _location: SourceLocation) {
        self.note_feature(TAG_SEND);
        let send = SendAction {
            send_id: attributes.get(ATTR_ID).cloned(),
            event: attributes.get(ATTR_EVENT).cloned(),
            event_expr: attributes
                .get(ATTR_EVENTEXPR)
                .map(|e| ExprSlot::from_source(e.as_str())),
            target: attributes.get(ATTR_TARGET).cloned(),
            target_expr: attributes
                .get(ATTR_TARGETEXPR)
                .map(|e| ExprSlot::from_source(e.as_str())),
            delay: attributes.get(ATTR_DELAY).cloned(),
            delay_expr: attributes
                .get(ATTR_DELAYEXPR)
                .map(|e| ExprSlot::from_source(e.as_str())),
            name_list: attributes
                .get(ATTR_NAMELIST)
                .map(|n| n.split_ascii_whitespace().map(str::to_string).collect())
                .unwrap_or_default(),
            params: Vec::new(),
            content: None,
        };
        self.log_unknown_attributes(
            TAG_SEND,
            attributes,
            &[
                ATTR_ID,
                ATTR_EVENT,
                ATTR_EVENTEXPR,
                ATTR_TARGET,
                ATTR_TARGETEXPR,
                ATTR_DELAY,
                ATTR_DELAYEXPR,
                ATTR_NAMELIST,
            ],
        );
        self.stack.push(Frame::Send { send });
    }

    fn start_param(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_PARAM);
        let name = match attributes.get(ATTR_NAME) {
            Some(n) => n.clone(),
            None => {
                self.errors
                    .push(format!("<param> at {} requires 'name'", location));
                self.generate_name()
            }
        };
        self.log_unknown_attributes(
            TAG_PARAM,
            attributes,
            &[ATTR_NAME, ATTR_EXPR, ATTR_LOCATION],
        );
        self.stack.push(Frame::Param {
            parameter: Parameter {
                name,
                expr: attributes
                    .get(ATTR_EXPR)
                    .map(|e| ExprSlot::from_source(e.as_str())),
                location: attributes.get(ATTR_LOCATION).cloned(),
            },
        });
    }

    fn start_invoke(&mut self, attributes: &AttributeMap, location: SourceLocation) {
        self.note_feature(TAG_INVOKE);
        self.doc_id_counter += 1;
        let invoke = Invoke {
            doc_id: self.doc_id_counter,
            type_name: attributes.get(ATTR_TYPE).cloned().unwrap_or_else(|| {
                self.errors
                    .push(format!("<invoke> at {} requires 'type'", location));
                String::new()
            }),
            invoke_id: attributes.get(ATTR_ID).cloned(),
            src: attributes.get(ATTR_SRC).cloned(),
            params: Vec::new(),
            content: None,
            location,
        };
        self.log_unknown_attributes(TAG_INVOKE, attributes, &[ATTR_TYPE, ATTR_ID, ATTR_SRC]);
        self.stack.push(Frame::Invoke { invoke });
    }

    fn attach_param(&mut self, parameter: Parameter, location: SourceLocation) {
        match self.stack.last_mut() {
            Some(Frame::Send { send }) => send.params.push(parameter),
            Some(Frame::Invoke { invoke }) => invoke.params.push(parameter),
            _ => self.errors.push(format!(
                "<param> at {} is only allowed in <send> or <invoke>",
                location
            )),
        }
    }

    fn attach_content(&mut self, content: CommonContent, location: SourceLocation) {
        match self.stack.last_mut() {
            Some(Frame::Send { send }) => {
                if !send.name_list.is_empty() || !send.params.is_empty() {
                    self.errors.push(format!(
                        "<content> at {} must not be combined with 'namelist' or <param>",
                        location
                    ));
                }
                send.content = Some(content);
            }
            Some(Frame::Invoke { invoke }) => invoke.content = Some(content),
            _ => self.errors.push(format!(
                "<content> at {} is only allowed in <send> or <invoke>",
                location
            )),
        }
    }

    fn attach_invoke(&mut self, invoke: Invoke, location: SourceLocation) {
        match self.stack.last_mut() {
            Some(Frame::State { sid, .. }) => {
                let sid = *sid;
                self.document.state_mut(sid).invokes.push(invoke);
            }
            Some(
                Frame::Transition { .. }
                | Frame::OnEntry { .. }
                | Frame::OnExit { .. }
                | Frame::If { .. }
                | Frame::Foreach { .. },
            ) => self.push_action(Action::Invoke(invoke), location),
            _ => self
                .errors
                .push(format!("<invoke> at {} is not allowed here", location)),
        }
    }

    /// Appends an assembled action to the innermost action container.
    fn push_action(&mut self, action: Action, location: SourceLocation) {
        match self.stack.last_mut() {
            Some(Frame::Transition { actions, .. })
            | Some(Frame::OnEntry { actions, .. })
            | Some(Frame::OnExit { actions, .. })
            | Some(Frame::Foreach { actions, .. }) => actions.push(action),
            Some(Frame::If {
                current_actions, ..
            }) => current_actions.push(action),
            _ => self.errors.push(format!(
                "executable content at {} is not allowed here",
                location
            )),
        }
    }

    // ## Support

    fn note_feature(&mut self, tag: &str) {
        self.document.used_features.insert(tag.to_string());
    }

    fn generate_name(&mut self) -> String {
        self.generated_id_count += 1;
        format!("__id{}", self.generated_id_count)
    }

    fn current_state_id(&self) -> StateId {
        for frame in self.stack.iter().rev() {
            if let Frame::State { sid, .. } = frame {
                return *sid;
            }
        }
        0
    }

    fn get_or_create_state(&mut self, name: &str) -> StateId {
        match self.document.state_ids.get(name) {
            Some(sid) => *sid,
            None => {
                let mut state = State::new(name);
                state.id = (self.document.states.len() + 1) as StateId;
                let sid = state.id;
                self.document.state_ids.insert(state.name.clone(), sid);
                self.document.states.push(state);
                sid
            }
        }
    }

    fn parse_state_specification(&mut self, target_names: &str) -> Vec<StateId> {
        let mut targets = Vec::new();
        for name in target_names.split_ascii_whitespace() {
            targets.push(self.get_or_create_state(name));
        }
        targets
    }

    fn create_transition(
        &mut self,
        source: StateId,
        location: SourceLocation,
        init: impl FnOnce(&mut Transition),
    ) -> TransitionId {
        self.doc_id_counter += 1;
        let mut t = Transition::new();
        t.id = (self.document.transitions.len() + 1) as TransitionId;
        t.doc_id = self.doc_id_counter;
        t.source = source;
        t.location = location;
        init(&mut t);
        let tid = t.id;
        self.document.transitions.push(t);
        tid
    }

    fn log_unknown_attributes(&self, _tag: &str, attributes: &AttributeMap, known: &[&str]) {
        for key in attributes.keys() {
            if !known.contains(&key.as_str()) && !key.starts_with("xmlns") {
                #[cfg(feature = "Debug_Reader")]
                debug!("ignoring unknown attribute '{}' of <{}>", key, _tag);
                let _ = key;
            }
        }
    }

    // ## Validation

    fn resolve_root_initial(&mut self) {
        let targets = match self.root_initial_attr.take() {
            Some(id_refs) => self.parse_state_specification(id_refs.as_str()),
            None => match self
                .document
                .root_states
                .iter()
                .find(|sid| !self.document.state(**sid).kind.is_history())
            {
                Some(first) => vec![*first],
                None => Vec::new(),
            },
        };
        if targets.is_empty() {
            return;
        }
        let tid = self.create_transition(0, SourceLocation::default(), |t| {
            t.kind = TransitionKind::Internal;
            t.targets = targets;
        });
        self.document.initial = Some(tid);
    }

    fn is_descendant_by_parents(&self, state: StateId, ancestor: StateId) -> bool {
        let mut parent = self.document.state(state).parent;
        while parent != 0 {
            if parent == ancestor {
                return true;
            }
            parent = self.document.state(parent).parent;
        }
        false
    }

    fn validate(&mut self) {
        // Every referenced state must be declared.
        for state in &self.document.states {
            if state.doc_id == 0 {
                self.errors.push(format!(
                    "state '{}' is referenced but never declared",
                    state.name
                ));
            }
        }

        // History placement.
        let mut history_checks: Vec<String> = Vec::new();
        for state in &self.document.states {
            if !state.kind.is_history() {
                continue;
            }
            if state.parent == 0 {
                history_checks.push(format!(
                    "<history> '{}' must be inside a compound state",
                    state.name
                ));
                continue;
            }
            let parent = self.document.state(state.parent);
            match parent.kind {
                StateKind::Compound => {}
                StateKind::Parallel => history_checks.push(format!(
                    "<history> '{}' is not allowed inside <parallel> '{}'",
                    state.name, parent.name
                )),
                _ => history_checks.push(format!(
                    "<history> '{}' must be inside a compound state",
                    state.name
                )),
            }
            match state.transitions.as_slice() {
                [tid] => {
                    let t = self.document.transition(*tid);
                    if !t.is_eventless() || t.cond.is_some() || t.targets.is_empty() {
                        history_checks.push(format!(
                            "the default transition of <history> '{}' must be eventless, \
                             unconditional and targeted",
                            state.name
                        ));
                    }
                    for target in &t.targets {
                        if !self.is_descendant_by_parents(*target, state.parent) {
                            history_checks.push(format!(
                                "default target '{}' of <history> '{}' is not inside '{}'",
                                self.document.state(*target).name,
                                state.name,
                                parent.name
                            ));
                        }
                    }
                }
                _ => history_checks.push(format!(
                    "<history> '{}' requires exactly one default transition",
                    state.name
                )),
            }
        }
        self.errors.extend(history_checks);

        // Initial transitions must target descendants.
        let mut initial_checks: Vec<String> = Vec::new();
        for state in &self.document.states {
            if let Some(tid) = state.initial {
                for target in &self.document.transition(tid).targets {
                    if !self.is_descendant_by_parents(*target, state.id) {
                        initial_checks.push(format!(
                            "initial target '{}' of state '{}' is not a descendant",
                            self.document.state(*target).name,
                            state.name
                        ));
                    }
                }
            }
        }
        self.errors.extend(initial_checks);

        self.reachability_warnings();
    }

    /// Non-fatal reachability analysis: anything not on a path from the
    /// initial configuration is reported as a warning.
    fn reachability_warnings(&mut self) {
        if self.document.states.is_empty() {
            return;
        }
        let initial_targets: Vec<StateId> = match self.document.initial {
            Some(tid) => self.document.transition(tid).targets.clone(),
            None => return,
        };
        let mut reached: std::collections::HashSet<StateId> = std::collections::HashSet::new();
        let mut worklist: Vec<StateId> = Vec::new();
        let mut touch = |sid: StateId,
                         reached: &mut std::collections::HashSet<StateId>,
                         worklist: &mut Vec<StateId>| {
            if reached.insert(sid) {
                worklist.push(sid);
            }
        };
        for sid in initial_targets {
            touch(sid, &mut reached, &mut worklist);
        }
        while let Some(sid) = worklist.pop() {
            // Active ancestors.
            let mut parent = self.document.state(sid).parent;
            while parent != 0 {
                touch(parent, &mut reached, &mut worklist);
                parent = self.document.state(parent).parent;
            }
            let state = self.document.state(sid);
            match state.kind {
                StateKind::Compound => {
                    if let Some(tid) = state.initial {
                        for target in &self.document.transition(tid).targets {
                            touch(*target, &mut reached, &mut worklist);
                        }
                    } else if let Some(first) = state
                        .children
                        .iter()
                        .find(|c| !self.document.state(**c).kind.is_history())
                    {
                        touch(*first, &mut reached, &mut worklist);
                    }
                }
                StateKind::Parallel => {
                    for child in &state.children {
                        if !self.document.state(*child).kind.is_history() {
                            touch(*child, &mut reached, &mut worklist);
                        }
                    }
                }
                StateKind::History(_) => {
                    for tid in &state.transitions {
                        for target in &self.document.transition(*tid).targets {
                            touch(*target, &mut reached, &mut worklist);
                        }
                    }
                }
                _ => {}
            }
            for tid in &state.transitions {
                for target in &self.document.transition(*tid).targets {
                    touch(*target, &mut reached, &mut worklist);
                }
            }
        }
        for state in &self.document.states {
            if !reached.contains(&state.id) {
                self.warnings
                    .push(format!("state '{}' is unreachable", state.name));
            }
        }
    }

    // ## Optimization

    /// Compiles every condition and expression attribute.\
    /// Value and location compile failures are validation errors; condition
    /// compile failures are downgraded to runtime `error.execution` (the
    /// transition stays disabled).
    fn compile_expressions(&mut self) {
        let evaluator = self.evaluator.clone();
        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for index in 0..self.document.transitions.len() {
            let t = &mut self.document.transitions[index];
            if let Some(cond) = &mut t.cond {
                compile_condition_slot(&evaluator, cond, &mut warnings);
            }
            compile_action_list(&evaluator, &mut t.actions, &mut errors, &mut warnings);
        }
        for index in 0..self.document.states.len() {
            let state = &mut self.document.states[index];
            for block in &mut state.onentry {
                compile_action_list(&evaluator, block, &mut errors, &mut warnings);
            }
            for block in &mut state.onexit {
                compile_action_list(&evaluator, block, &mut errors, &mut warnings);
            }
            for invoke in &mut state.invokes {
                compile_invoke(&evaluator, invoke, &mut errors);
            }
            for element in &mut state.data {
                if let Some(expr) = &mut element.expr {
                    compile_value_slot(&evaluator, expr, &mut errors);
                }
            }
        }
        for element in &mut self.document.data {
            if let Some(expr) = &mut element.expr {
                compile_value_slot(&evaluator, expr, &mut errors);
            }
        }
        self.errors.extend(errors);
        self.warnings.extend(warnings);
    }

    /// Every compound state gets an initial transition; without an explicit
    /// one the first child in document order is entered.
    fn synthesize_default_initials(&mut self) {
        let mut missing: Vec<(StateId, StateId)> = Vec::new();
        for state in &self.document.states {
            if state.kind == StateKind::Compound && state.initial.is_none() {
                if let Some(first) = state
                    .children
                    .iter()
                    .find(|c| !self.document.state(**c).kind.is_history())
                {
                    missing.push((state.id, *first));
                }
            }
        }
        for (sid, target) in missing {
            let tid = self.create_transition(sid, SourceLocation::default(), |t| {
                t.kind = TransitionKind::Internal;
                t.targets = vec![target];
            });
            self.document.state_mut(sid).initial = Some(tid);
        }
    }
}

fn compile_value_slot(
    evaluator: &Arc<dyn ExpressionEvaluator>,
    slot: &mut ExprSlot,
    errors: &mut Vec<String>,
) {
    match evaluator.compile(slot.source.as_str()) {
        Ok(compiled) => slot.compiled = Some(compiled),
        Err(e) => errors.push(e.to_string()),
    }
}

fn compile_condition_slot(
    evaluator: &Arc<dyn ExpressionEvaluator>,
    slot: &mut ExprSlot,
    warnings: &mut Vec<String>,
) {
    match evaluator.compile(slot.source.as_str()) {
        Ok(compiled) => slot.compiled = Some(compiled),
        // Malformed conditions disable their transition at runtime.
        Err(e) => warnings.push(format!("{} (deferred to runtime)", e)),
    }
}

fn compile_invoke(
    evaluator: &Arc<dyn ExpressionEvaluator>,
    invoke: &mut Invoke,
    errors: &mut Vec<String>,
) {
    for param in &mut invoke.params {
        if let Some(expr) = &mut param.expr {
            compile_value_slot(evaluator, expr, errors);
        }
    }
    if let Some(content) = &mut invoke.content {
        if let Some(expr) = &mut content.expr {
            compile_value_slot(evaluator, expr, errors);
        }
    }
}

fn compile_action_list(
    evaluator: &Arc<dyn ExpressionEvaluator>,
    actions: &mut [Action],
    errors: &mut Vec<String>,
    warnings: &mut Vec<String>,
) {
    for action in actions {
        match action {
            Action::Log(log) => {
                if let Some(expr) = &mut log.expr {
                    compile_value_slot(evaluator, expr, errors);
                }
            }
            Action::Raise(_) => {}
            Action::Assign(assign) => {
                compile_value_slot(evaluator, &mut assign.expr, errors);
                match evaluator.resolve_location(assign.location.as_str()) {
                    Ok(path) => assign.path = path,
                    Err(e) => errors.push(e.to_string()),
                }
            }
            Action::If(if_action) => {
                for branch in &mut if_action.branches {
                    if let Some(cond) = &mut branch.cond {
                        compile_condition_slot(evaluator, cond, warnings);
                    }
                    compile_action_list(evaluator, &mut branch.actions, errors, warnings);
                }
            }
            Action::Foreach(foreach) => {
                compile_value_slot(evaluator, &mut foreach.array, errors);
                compile_action_list(evaluator, &mut foreach.actions, errors, warnings);
            }
            Action::SendEvent(send) => {
                for slot in [
                    &mut send.event_expr,
                    &mut send.target_expr,
                    &mut send.delay_expr,
                ]
                .into_iter()
                .flatten()
                {
                    compile_value_slot(evaluator, slot, errors);
                }
                for param in &mut send.params {
                    if let Some(expr) = &mut param.expr {
                        compile_value_slot(evaluator, expr, errors);
                    }
                }
                if let Some(content) = &mut send.content {
                    if let Some(expr) = &mut content.expr {
                        compile_value_slot(evaluator, expr, errors);
                    }
                }
            }
            Action::Invoke(invoke) => compile_invoke(evaluator, invoke, errors),
        }
    }
}

// ## XML source (quick-xml)

#[cfg(feature = "xml")]
mod xml_source {
    use super::*;
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;
    use std::str;

    /// Adapts quick-xml to the [SaxEvent] stream, tracking line/column
    /// positions for diagnostics.
    pub struct XmlEventSource<'a> {
        reader: Reader<&'a [u8]>,
        line_starts: Vec<usize>,
        pending_end: Option<SaxEvent>,
    }

    impl<'a> XmlEventSource<'a> {
        pub fn new(content: &'a str) -> XmlEventSource<'a> {
            let mut reader = Reader::from_str(content);
            reader.config_mut().trim_text(true);
            let mut line_starts = vec![0usize];
            for (i, b) in content.bytes().enumerate() {
                if b == b'\n' {
                    line_starts.push(i + 1);
                }
            }
            XmlEventSource {
                reader,
                line_starts,
                pending_end: None,
            }
        }

        fn location(&self) -> SourceLocation {
            let offset = self.reader.buffer_position() as usize;
            let line = self.line_starts.partition_point(|start| *start <= offset);
            let column = offset - self.line_starts[line - 1] + 1;
            SourceLocation {
                line: line as u32,
                column: column as u32,
            }
        }

        fn attributes(
            &self,
            e: &quick_xml::events::BytesStart,
        ) -> Result<AttributeMap, BuildError> {
            let mut map = AttributeMap::new();
            for attribute in e.attributes() {
                let attribute = attribute.map_err(|err| {
                    BuildError::MalformedSource(format!(
                        "bad attribute at {}: {}",
                        self.location(),
                        err
                    ))
                })?;
                let key = str::from_utf8(attribute.key.as_ref())
                    .map_err(|err| BuildError::MalformedSource(err.to_string()))?
                    .to_string();
                let value = attribute
                    .unescape_value()
                    .map_err(|err| BuildError::MalformedSource(err.to_string()))?
                    .into_owned();
                map.insert(key, value);
            }
            Ok(map)
        }

        fn element_name(bytes: &[u8]) -> Result<String, BuildError> {
            str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|err| BuildError::MalformedSource(err.to_string()))
        }

        /// Produces the next SAX event, or `None` at the end of input.
        pub fn next_event(&mut self) -> Result<Option<SaxEvent>, BuildError> {
            if let Some(end) = self.pending_end.take() {
                return Ok(Some(end));
            }
            loop {
                match self.reader.read_event() {
                    Err(e) => {
                        return Err(BuildError::MalformedSource(format!(
                            "error at {}: {}",
                            self.location(),
                            e
                        )))
                    }
                    Ok(XmlEvent::Eof) => return Ok(None),
                    Ok(XmlEvent::Start(e)) => {
                        let location = self.location();
                        return Ok(Some(SaxEvent::StartElement {
                            name: Self::element_name(e.local_name().as_ref())?,
                            attributes: self.attributes(&e)?,
                            location,
                        }));
                    }
                    Ok(XmlEvent::Empty(e)) => {
                        let location = self.location();
                        let name = Self::element_name(e.local_name().as_ref())?;
                        self.pending_end = Some(SaxEvent::EndElement {
                            name: name.clone(),
                            location,
                        });
                        return Ok(Some(SaxEvent::StartElement {
                            name,
                            attributes: self.attributes(&e)?,
                            location,
                        }));
                    }
                    Ok(XmlEvent::End(e)) => {
                        return Ok(Some(SaxEvent::EndElement {
                            name: Self::element_name(e.local_name().as_ref())?,
                            location: self.location(),
                        }))
                    }
                    Ok(XmlEvent::Text(e)) => {
                        let text = e
                            .unescape()
                            .map_err(|err| BuildError::MalformedSource(err.to_string()))?
                            .into_owned();
                        return Ok(Some(SaxEvent::Characters {
                            text,
                            location: self.location(),
                        }));
                    }
                    Ok(XmlEvent::CData(e)) => {
                        let bytes = e.into_inner();
                        let text = String::from_utf8_lossy(bytes.as_ref()).into_owned();
                        return Ok(Some(SaxEvent::Characters {
                            text,
                            location: self.location(),
                        }));
                    }
                    // Comments, processing instructions and declarations are
                    // not part of the chart.
                    Ok(_) => continue,
                }
            }
        }
    }
}

#[cfg(feature = "xml")]
pub use xml_source::XmlEventSource;

/// Builds a validated document from SCXML text.
#[cfg(feature = "xml")]
pub fn read_from_xml(content: &str) -> Result<Document, BuildError> {
    read_from_xml_with_evaluator(content, Arc::new(ExpressionEngineEvaluator::new()))
}

#[cfg(feature = "xml")]
pub fn read_from_xml_with_evaluator(
    content: &str,
    evaluator: Arc<dyn ExpressionEvaluator>,
) -> Result<Document, BuildError> {
    let mut source = XmlEventSource::new(content);
    let mut builder = DocumentBuilder::with_evaluator(evaluator);
    while let Some(event) = source.next_event()? {
        builder.process_event(event)?;
    }
    builder.finish()
}

/// Builds a validated document from an SCXML file.
#[cfg(feature = "xml")]
pub fn read_from_file(path: &std::path::Path) -> Result<Document, BuildError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| BuildError::MalformedSource(format!("failed to read {:?}: {}", path, e)))?;
    read_from_xml(content.as_str())
}

