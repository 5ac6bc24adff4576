//! Implementation of "executable content" elements.\
//! Actions are a tagged sum with a single `execute` surface. Every variant
//! is total: runtime failures become internal `error.execution` events, the
//! remaining actions of the block still run.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex::Regex;

use crate::common::warn;
use crate::datamodel::{Data, PathSegment};
use crate::document::{CommonContent, ExprSlot, Invoke, Parameter};
use crate::evaluator::ParamPolicy;
use crate::interpreter::{Event, StateChart};
use crate::logging::LogLevel;

/// Event name used by `<raise>` without an `event` attribute.
pub const ANONYMOUS_EVENT: &str = "anonymous_event";

/// The internal send target.
pub const SCXML_TARGET_INTERNAL: &str = "#_internal";

/// Executable content variants.
#[derive(Debug, Clone)]
pub enum Action {
    Log(LogAction),
    Raise(RaiseAction),
    Assign(AssignAction),
    If(IfAction),
    Foreach(ForeachAction),
    SendEvent(SendAction),
    Invoke(Invoke),
}

impl Action {
    /// Executes one action against the state chart. Never fails; failures
    /// surface as internal `error.*` events.
    pub fn execute(&self, sc: &mut StateChart) {
        match self {
            Action::Log(a) => a.execute(sc),
            Action::Raise(a) => a.execute(sc),
            Action::Assign(a) => a.execute(sc),
            Action::If(a) => a.execute(sc),
            Action::Foreach(a) => a.execute(sc),
            Action::SendEvent(a) => a.execute(sc),
            Action::Invoke(a) => execute_invoke(a, sc),
        }
    }
}

/// Executes a whole action list. Failed actions do not stop the block,
/// actions are best-effort.
pub fn execute_action_list(actions: &[Action], sc: &mut StateChart) {
    for action in actions {
        action.execute(sc);
    }
}

#[derive(Debug, Clone, Default)]
pub struct LogAction {
    pub label: Option<String>,
    pub expr: Option<ExprSlot>,
}

impl LogAction {
    fn execute(&self, sc: &mut StateChart) {
        let value = match &self.expr {
            None => None,
            Some(slot) => match sc.eval_value(slot) {
                Ok(v) => Some(v),
                Err(e) => {
                    sc.enqueue_internal(Event::error_execution("log.execution", &e.to_string()));
                    return;
                }
            },
        };
        let message = match (&self.label, value) {
            (Some(label), Some(v)) => format!("{}: {}", label, v),
            (Some(label), None) => label.clone(),
            (None, Some(v)) => v.to_string(),
            (None, None) => String::new(),
        };
        sc.log_at(LogLevel::Info, message.as_str());
    }
}

/// *W3C says*:
/// The `<raise>` element raises an event in the current SCXML session.\
/// The event will not be processed until the current block of executable
/// content has completed and all events already in the internal event queue
/// have been processed.
#[derive(Debug, Clone, Default)]
pub struct RaiseAction {
    pub event: String,
}

impl RaiseAction {
    fn execute(&self, sc: &mut StateChart) {
        let name = if self.event.is_empty() {
            ANONYMOUS_EVENT
        } else {
            self.event.as_str()
        };
        sc.enqueue_internal(Event::new_internal(name));
    }
}

#[derive(Debug, Clone)]
pub struct AssignAction {
    pub location: String,
    /// Resolved location path, filled by the optimizer.
    pub path: Vec<PathSegment>,
    pub expr: ExprSlot,
}

impl AssignAction {
    fn execute(&self, sc: &mut StateChart) {
        let path = if self.path.is_empty() {
            match sc.evaluator().resolve_location(self.location.as_str()) {
                Ok(p) => p,
                Err(e) => {
                    sc.enqueue_internal(self.error_event(&e.to_string()));
                    return;
                }
            }
        } else {
            self.path.clone()
        };
        let value = match sc.eval_value(&self.expr) {
            Ok(v) => v,
            Err(e) => {
                sc.enqueue_internal(self.error_event(&e.to_string()));
                return;
            }
        };
        let evaluator = sc.evaluator();
        if let Err(e) = evaluator.assign(&mut sc.datamodel, &path, value) {
            sc.enqueue_internal(self.error_event(&e.to_string()));
        }
    }

    fn error_event(&self, reason: &str) -> Event {
        let mut event = Event::error_execution("assign.execution", reason);
        event
            .data
            .insert("location".to_string(), Data::String(self.location.clone()));
        event
            .data
            .insert("expr".to_string(), Data::String(self.expr.source.clone()));
        event
    }
}

/// One `if`/`elseif`/`else` block. `cond` is `None` for the `else` block.
#[derive(Debug, Clone)]
pub struct IfBranch {
    pub cond: Option<ExprSlot>,
    pub actions: Vec<Action>,
}

/// `<if>` with its ordered `<elseif>`/`<else>` blocks. Conditions are
/// evaluated in document order; exactly one block runs.
#[derive(Debug, Clone, Default)]
pub struct IfAction {
    pub branches: Vec<IfBranch>,
}

impl IfAction {
    fn execute(&self, sc: &mut StateChart) {
        for branch in &self.branches {
            let taken = match &branch.cond {
                None => true,
                Some(slot) => match sc.eval_condition(slot) {
                    Ok(b) => b,
                    Err(e) => {
                        sc.enqueue_internal(Event::error_execution(
                            "if.execution",
                            &e.to_string(),
                        ));
                        false
                    }
                },
            };
            if taken {
                execute_action_list(&branch.actions, sc);
                return;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForeachAction {
    pub array: ExprSlot,
    pub item: String,
    pub index: Option<String>,
    pub actions: Vec<Action>,
}

impl ForeachAction {
    fn execute(&self, sc: &mut StateChart) {
        let array = match sc.eval_value(&self.array) {
            Ok(v) => v,
            Err(e) => {
                sc.enqueue_internal(Event::error_execution(
                    "foreach.execution",
                    &e.to_string(),
                ));
                return;
            }
        };
        let items = match array {
            Data::Array(items) => items,
            other => {
                sc.enqueue_internal(Event::error_execution(
                    "foreach.execution",
                    &format!("'{}' is not an ordered sequence: {}", self.array, other),
                ));
                return;
            }
        };

        // Snapshot before the loop. Variables that existed before are
        // restored afterwards, newly declared ones keep their final value.
        // The rule applies uniformly to 'item' and 'index'.
        let item_before = sc.datamodel.get(self.item.as_str()).cloned();
        let index_before = self
            .index
            .as_ref()
            .and_then(|i| sc.datamodel.get(i.as_str()).cloned());

        for (i, element) in items.iter().enumerate() {
            sc.datamodel.set(self.item.as_str(), element.clone());
            if let Some(index) = &self.index {
                sc.datamodel.set(index.as_str(), Data::Integer(i as i64));
            }
            execute_action_list(&self.actions, sc);
        }

        if let Some(previous) = item_before {
            sc.datamodel.set(self.item.as_str(), previous);
        }
        if let Some(index) = &self.index {
            if let Some(previous) = index_before {
                sc.datamodel.set(index.as_str(), previous);
            }
        }
    }
}

/// Holds all parameters of a `<send>` call.
#[derive(Debug, Clone, Default)]
pub struct SendAction {
    /// `<send>` attribute 'id', used to cancel delayed sends.
    pub send_id: Option<String>,
    pub event: Option<String>,
    pub event_expr: Option<ExprSlot>,
    pub target: Option<String>,
    pub target_expr: Option<ExprSlot>,
    pub delay: Option<String>,
    pub delay_expr: Option<ExprSlot>,
    /// Datamodel variables merged into the payload.
    pub name_list: Vec<String>,
    pub params: Vec<Parameter>,
    pub content: Option<CommonContent>,
}

impl SendAction {
    /// If unable to dispatch, places `error.communication` in the internal
    /// queue. If the target is not supported, places `error.execution`.
    fn execute(&self, sc: &mut StateChart) {
        let event_name = match self.evaluate_alternative(sc, &self.event, &self.event_expr) {
            Ok(Some(name)) if !name.is_empty() => name,
            Ok(_) => {
                sc.enqueue_internal(Event::error_execution(
                    "send.execution",
                    "<send> without 'event' or 'eventexpr'",
                ));
                return;
            }
            Err(e) => {
                sc.enqueue_internal(Event::error_execution("send.execution", &e));
                return;
            }
        };
        let target = match self.evaluate_alternative(sc, &self.target, &self.target_expr) {
            Ok(t) => t.unwrap_or_default(),
            Err(e) => {
                sc.enqueue_internal(Event::error_execution("send.execution", &e));
                return;
            }
        };
        let delay_source = match self.evaluate_alternative(sc, &self.delay, &self.delay_expr) {
            Ok(d) => d.unwrap_or_default(),
            Err(e) => {
                sc.enqueue_internal(Event::error_execution("send.execution", &e));
                return;
            }
        };
        let delay_ms = match parse_duration_to_milliseconds(delay_source.as_str()) {
            Some(ms) => ms,
            None => {
                sc.log_at(
                    LogLevel::Warn,
                    &format!("send: malformed delay '{}', using 0ms", delay_source),
                );
                0
            }
        };

        let data = match self.build_payload(sc) {
            Ok(d) => d,
            Err(e) => {
                sc.enqueue_internal(Event::error_execution("send.execution", &e));
                return;
            }
        };

        if delay_ms > 0 && target == SCXML_TARGET_INTERNAL {
            sc.enqueue_internal(Event::error_execution(
                "send.execution",
                "illegal delay for target '#_internal'",
            ));
            return;
        }

        let send_id = match &self.send_id {
            Some(id) => id.clone(),
            None => sc.next_send_id(),
        };

        let effective_delay = if delay_ms > 0 && !sc.supports_delayed_send() {
            sc.log_at(
                LogLevel::Warn,
                &format!(
                    "send '{}': delay {}ms not supported by this driver, sending immediately",
                    event_name, delay_ms
                ),
            );
            0
        } else {
            delay_ms
        };

        if target == SCXML_TARGET_INTERNAL {
            let mut event = Event::new_internal(event_name.as_str());
            event.data = data;
            sc.enqueue_internal(event);
        } else if target.is_empty() {
            let mut event = Event::new_external(event_name.as_str());
            event.data = data;
            if effective_delay > 0 {
                sc.schedule_delayed_send(send_id, effective_delay, event);
            } else {
                sc.enqueue_external(event);
            }
        } else {
            // Opaque target URI: handed to the outbound router (the actor
            // driver registers one), unsupported without it.
            if effective_delay > 0 {
                sc.log_at(
                    LogLevel::Warn,
                    &format!(
                        "send '{}': delay is not supported for external targets, routing immediately",
                        event_name
                    ),
                );
            }
            let mut event = Event::new_external(event_name.as_str());
            event.data = data;
            sc.dispatch_external_send(target.as_str(), send_id.as_str(), event);
        }
    }

    fn evaluate_alternative(
        &self,
        sc: &mut StateChart,
        value: &Option<String>,
        expr: &Option<ExprSlot>,
    ) -> Result<Option<String>, String> {
        if let Some(slot) = expr {
            return match sc.eval_value(slot) {
                Ok(v) => Ok(Some(v.to_string())),
                Err(e) => Err(e.to_string()),
            };
        }
        Ok(value.clone())
    }

    /// Payload precedence: `<content>` is exclusive, otherwise the merge of
    /// 'namelist' variables and `<param>` entries.
    fn build_payload(&self, sc: &mut StateChart) -> Result<HashMap<String, Data>, String> {
        let mut data = HashMap::new();
        if let Some(content) = &self.content {
            data.insert("content".to_string(), evaluate_content(sc, content)?);
            return Ok(data);
        }
        for name in &self.name_list {
            match sc.datamodel.get(name.as_str()) {
                Some(value) => {
                    data.insert(name.clone(), value.clone());
                }
                None => {
                    sc.enqueue_internal(Event::error_execution(
                        "send.execution",
                        &format!("namelist variable '{}' is undefined", name),
                    ));
                }
            }
        }
        let params = sc.eval_params(&self.params, ParamPolicy::Lenient);
        match params {
            Ok(values) => data.extend(values),
            Err(e) => return Err(e.to_string()),
        }
        Ok(data)
    }
}

/// Evaluates a `<content>` child: the expression if present, the literal
/// body otherwise.
pub fn evaluate_content(sc: &mut StateChart, content: &CommonContent) -> Result<Data, String> {
    if let Some(expr) = &content.expr {
        return sc.eval_value(expr).map_err(|e| e.to_string());
    }
    Ok(match &content.body {
        Some(body) => Data::from_body(body),
        None => Data::Null,
    })
}

/// Executes one `<invoke>` through the state chart's handler registry.\
/// The handler outcome maps to `done.invoke.<id>`, `error.communication` or
/// `error.execution`.
pub fn execute_invoke(invoke: &Invoke, sc: &mut StateChart) {
    let params = match sc.eval_params(&invoke.params, ParamPolicy::Strict) {
        Ok(p) => p,
        Err(e) => {
            sc.enqueue_internal(Event::error_execution("invoke.execution", &e.to_string()));
            return;
        }
    };
    let content = match &invoke.content {
        None => None,
        Some(c) => match evaluate_content(sc, c) {
            Ok(d) => Some(d),
            Err(e) => {
                sc.enqueue_internal(Event::error_execution("invoke.execution", &e));
                return;
            }
        },
    };
    sc.dispatch_invoke(invoke, params, content);
}

lazy_static! {
    /// A duration: `<N><unit>` with units `ms`, `s` or `m`.
    static ref DURATION_RE: Regex = Regex::new(r"^(\d+(?:\.\d+)?)(ms|s|m)$").unwrap();
}

/// Parses a duration string to milliseconds.\
/// Empty input is 0ms, malformed input is `None` (callers warn and fall
/// back to 0ms).
pub fn parse_duration_to_milliseconds(d: &str) -> Option<u64> {
    let trimmed = d.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    let captures = DURATION_RE.captures(trimmed)?;
    let value: f64 = match captures.get(1).unwrap().as_str().parse() {
        Ok(v) => v,
        Err(_) => {
            warn!("malformed duration number in '{}'", trimmed);
            return None;
        }
    };
    let factor = match captures.get(2).unwrap().as_str() {
        "ms" => 1f64,
        "s" => 1000f64,
        "m" => 60000f64,
        _ => return None,
    };
    Some((value * factor).round() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_parse() {
        assert_eq!(parse_duration_to_milliseconds("500ms"), Some(500));
        assert_eq!(parse_duration_to_milliseconds("6.7s"), Some(6700));
        assert_eq!(parse_duration_to_milliseconds("1m"), Some(60 * 1000));
        assert_eq!(parse_duration_to_milliseconds("0.001s"), Some(1));
        assert_eq!(parse_duration_to_milliseconds(""), Some(0));
        assert_eq!(parse_duration_to_milliseconds("  "), Some(0));

        assert_eq!(parse_duration_to_milliseconds("x1s"), None);
        assert_eq!(parse_duration_to_milliseconds("1sx"), None);
        assert_eq!(parse_duration_to_milliseconds("1h"), None);
        assert_eq!(parse_duration_to_milliseconds("-5ms"), None);
    }
}
