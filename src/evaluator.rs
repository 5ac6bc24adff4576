//! Evaluator adapter: compile-once / evaluate-many over the expression
//! engine, location-path resolution and safe nested assignment.\
//! The interpreter only touches expressions through this adapter, so
//! alternative dialects can plug in by implementing [ExpressionEvaluator].

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Display, Formatter};
use std::sync::Arc;

use crate::datamodel::{Data, DataStore, PathSegment};
use crate::document::Parameter;
use crate::expression_engine::expressions::{EvalContext, Expression};
use crate::expression_engine::lexer::{ExpressionLexer, NumericToken, Token};
use crate::expression_engine::parser::ExpressionParser;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprError {
    /// The expression text could not be compiled.
    Compile(String),
    /// The compiled expression failed to evaluate.
    Eval(String),
}

impl Display for ExprError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ExprError::Compile(msg) => write!(f, "compile error: {}", msg),
            ExprError::Eval(msg) => write!(f, "evaluation error: {}", msg),
        }
    }
}

/// A compiled, reusable expression. Cheap to clone, safe to share between
/// state charts running the same document.
#[derive(Clone)]
pub struct CompiledExpr {
    source: String,
    expression: Arc<dyn Expression>,
}

impl CompiledExpr {
    pub fn source(&self) -> &str {
        self.source.as_str()
    }
}

impl Debug for CompiledExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "CompiledExpr({})", self.source)
    }
}

/// Policy for [evaluate_params](ExpressionEvaluator::evaluate_params).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPolicy {
    /// Fail on the first parameter that does not evaluate.
    Strict,
    /// Drop parameters that do not evaluate.
    Lenient,
}

/// The adapter surface between the interpreter and an expression engine.
pub trait ExpressionEvaluator: Send + Sync {
    /// Compiles an expression. Pure; results are cached at validation time.
    fn compile(&self, text: &str) -> Result<CompiledExpr, ExprError>;

    /// Evaluates a compiled expression to a boolean.\
    /// Callers treat an error as "condition not satisfied" and convert the
    /// error into an `error.execution` event, per the recommendation's
    /// "malformed cond" rule.
    fn evaluate_condition(
        &self,
        compiled: &CompiledExpr,
        context: &EvalContext,
    ) -> Result<bool, ExprError>;

    /// Evaluates a compiled expression to a typed value.\
    /// Missing keys yield `Data::Null` rather than an error.
    fn evaluate_value(
        &self,
        compiled: &CompiledExpr,
        context: &EvalContext,
    ) -> Result<Data, ExprError>;

    /// Compiles and evaluates raw text in one step.
    fn evaluate_source(&self, text: &str, context: &EvalContext) -> Result<Data, ExprError> {
        let compiled = self.compile(text)?;
        self.evaluate_value(&compiled, context)
    }

    /// Parses a left-hand-side location path into ordered segments.\
    /// Fails if the text is not a valid assignment target.
    fn resolve_location(&self, text: &str) -> Result<Vec<PathSegment>, ExprError>;

    /// Sets the value at a location path, creating intermediate mappings as
    /// needed. Fails if a non-container is traversed.
    fn assign(
        &self,
        store: &mut DataStore,
        path: &[PathSegment],
        value: Data,
    ) -> Result<(), ExprError>;

    /// Produces a name to value map for a list of `<param>` elements.
    fn evaluate_params(
        &self,
        params: &[Parameter],
        context: &EvalContext,
        policy: ParamPolicy,
    ) -> Result<HashMap<String, Data>, ExprError>;
}

/// The default adapter implementation over the crate's expression engine.
#[derive(Default)]
pub struct ExpressionEngineEvaluator {}

impl ExpressionEngineEvaluator {
    pub fn new() -> ExpressionEngineEvaluator {
        ExpressionEngineEvaluator {}
    }
}

impl ExpressionEvaluator for ExpressionEngineEvaluator {
    fn compile(&self, text: &str) -> Result<CompiledExpr, ExprError> {
        match ExpressionParser::parse(text) {
            Ok(expression) => Ok(CompiledExpr {
                source: text.to_string(),
                expression: Arc::from(expression),
            }),
            Err(msg) => Err(ExprError::Compile(format!("'{}': {}", text, msg))),
        }
    }

    fn evaluate_condition(
        &self,
        compiled: &CompiledExpr,
        context: &EvalContext,
    ) -> Result<bool, ExprError> {
        match compiled.expression.eval(context) {
            Ok(value) => Ok(value.is_truthy()),
            Err(msg) => Err(ExprError::Eval(format!("'{}': {}", compiled.source, msg))),
        }
    }

    fn evaluate_value(
        &self,
        compiled: &CompiledExpr,
        context: &EvalContext,
    ) -> Result<Data, ExprError> {
        compiled
            .expression
            .eval(context)
            .map_err(|msg| ExprError::Eval(format!("'{}': {}", compiled.source, msg)))
    }

    fn resolve_location(&self, text: &str) -> Result<Vec<PathSegment>, ExprError> {
        let mut lexer = ExpressionLexer::new(text);
        let mut path = Vec::new();
        match lexer.next_token() {
            Token::Identifier(name) => path.push(PathSegment::Key(name)),
            other => {
                return Err(ExprError::Compile(format!(
                    "location '{}' must start with a name, found {}",
                    text, other
                )))
            }
        }
        loop {
            match lexer.next_token() {
                Token::EOE => break,
                Token::Separator('.') => match lexer.next_token() {
                    Token::Identifier(name) => path.push(PathSegment::Key(name)),
                    other => {
                        return Err(ExprError::Compile(format!(
                            "expected member name in location '{}', found {}",
                            text, other
                        )))
                    }
                },
                Token::Bracket('[') => {
                    let segment = match lexer.next_token() {
                        Token::Number(NumericToken::Integer(i)) if i >= 0 => {
                            PathSegment::Index(i as usize)
                        }
                        Token::TString(key) => PathSegment::Key(key),
                        other => {
                            return Err(ExprError::Compile(format!(
                                "expected index or key in location '{}', found {}",
                                text, other
                            )))
                        }
                    };
                    match lexer.next_token() {
                        Token::Bracket(']') => path.push(segment),
                        other => {
                            return Err(ExprError::Compile(format!(
                                "missing ']' in location '{}', found {}",
                                text, other
                            )))
                        }
                    }
                }
                other => {
                    return Err(ExprError::Compile(format!(
                        "unexpected {} in location '{}'",
                        other, text
                    )))
                }
            }
        }
        Ok(path)
    }

    fn assign(
        &self,
        store: &mut DataStore,
        path: &[PathSegment],
        value: Data,
    ) -> Result<(), ExprError> {
        store.set_path(path, value).map_err(ExprError::Eval)
    }

    fn evaluate_params(
        &self,
        params: &[Parameter],
        context: &EvalContext,
        policy: ParamPolicy,
    ) -> Result<HashMap<String, Data>, ExprError> {
        let mut values = HashMap::with_capacity(params.len());
        for param in params {
            let result = if let Some(location) = &param.location {
                self.resolve_location(location.as_str()).map(|path| {
                    context
                        .data
                        .get_path(&path)
                        .cloned()
                        .unwrap_or(Data::Null)
                })
            } else if let Some(expr) = &param.expr {
                match &expr.compiled {
                    Some(compiled) => self.evaluate_value(compiled, context),
                    None => self.evaluate_source(expr.source.as_str(), context),
                }
            } else {
                Err(ExprError::Compile(format!(
                    "param '{}' has neither 'expr' nor 'location'",
                    param.name
                )))
            };
            match result {
                Ok(value) => {
                    values.insert(param.name.clone(), value);
                }
                Err(e) => match policy {
                    ParamPolicy::Strict => return Err(e),
                    ParamPolicy::Lenient => {}
                },
            }
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ExprSlot;

    fn context(store: &DataStore) -> EvalContext {
        EvalContext {
            data: store,
            event_name: None,
            event_data: None,
            in_state: &|_| false,
        }
    }

    #[test]
    fn compile_once_evaluate_many() {
        let evaluator = ExpressionEngineEvaluator::new();
        let compiled = evaluator.compile("n + 1").unwrap();
        let mut store = DataStore::new();
        for i in 0..3 {
            store.set("n", Data::Integer(i));
            let ctx = context(&store);
            assert_eq!(
                evaluator.evaluate_value(&compiled, &ctx),
                Ok(Data::Integer(i + 1))
            );
        }
    }

    #[test]
    fn location_resolution() {
        let evaluator = ExpressionEngineEvaluator::new();
        assert_eq!(
            evaluator.resolve_location("users['admin'].active"),
            Ok(vec![
                PathSegment::Key("users".to_string()),
                PathSegment::Key("admin".to_string()),
                PathSegment::Key("active".to_string()),
            ])
        );
        assert_eq!(
            evaluator.resolve_location("counters[0]"),
            Ok(vec![
                PathSegment::Key("counters".to_string()),
                PathSegment::Index(0),
            ])
        );
        assert!(evaluator.resolve_location("1 + 2").is_err());
        assert!(evaluator.resolve_location("users[").is_err());
        assert!(evaluator.resolve_location("").is_err());
    }

    #[test]
    fn assign_creates_nested_mappings() {
        let evaluator = ExpressionEngineEvaluator::new();
        let mut store = DataStore::new();
        let path = evaluator.resolve_location("a.b.c").unwrap();
        evaluator
            .assign(&mut store, &path, Data::Integer(3))
            .unwrap();
        assert_eq!(store.get_path(&path), Some(&Data::Integer(3)));

        store.set("s", Data::String("scalar".to_string()));
        let bad = evaluator.resolve_location("s.x").unwrap();
        assert!(evaluator.assign(&mut store, &bad, Data::Null).is_err());
    }

    #[test]
    fn params_strict_and_lenient() {
        let evaluator = ExpressionEngineEvaluator::new();
        let mut store = DataStore::new();
        store.set("answer", Data::Integer(42));
        let params = vec![
            Parameter {
                name: "good".to_string(),
                expr: Some(ExprSlot::from_source("answer")),
                location: None,
            },
            Parameter {
                name: "bad".to_string(),
                expr: Some(ExprSlot::from_source("1 +")),
                location: None,
            },
        ];
        let ctx = context(&store);
        assert!(evaluator
            .evaluate_params(&params, &ctx, ParamPolicy::Strict)
            .is_err());
        let lenient = evaluator
            .evaluate_params(&params, &ctx, ParamPolicy::Lenient)
            .unwrap();
        assert_eq!(lenient.len(), 1);
        assert_eq!(lenient.get("good"), Some(&Data::Integer(42)));
    }

    #[test]
    fn params_by_location() {
        let evaluator = ExpressionEngineEvaluator::new();
        let mut store = DataStore::new();
        store.set("user", Data::String("ada".to_string()));
        let params = vec![Parameter {
            name: "who".to_string(),
            expr: None,
            location: Some("user".to_string()),
        }];
        let ctx = context(&store);
        let values = evaluator
            .evaluate_params(&params, &ctx, ParamPolicy::Strict)
            .unwrap();
        assert_eq!(values.get("who"), Some(&Data::String("ada".to_string())));
    }
}
