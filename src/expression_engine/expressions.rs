//! Reusable expression trees produced by the parser.\
//! Evaluation works on [Data] values and never mutates the datamodel,
//! conditional expressions are side-effect free.

use std::collections::HashMap;
use std::fmt::Debug;

use crate::datamodel::{
    Data, DataStore, EVENT_VARIABLE_FIELD_DATA, EVENT_VARIABLE_FIELD_NAME, EVENT_VARIABLE_NAME,
};
use crate::expression_engine::lexer::Operator;

/// Evaluation context handed to every expression node.\
/// Exposes the read-only datamodel, the current event (name and data) and
/// the `In(state)` predicate over the full active state set.
pub struct EvalContext<'a> {
    pub data: &'a DataStore,
    pub event_name: Option<&'a str>,
    pub event_data: Option<&'a HashMap<String, Data>>,
    pub in_state: &'a dyn Fn(&str) -> bool,
}

impl<'a> EvalContext<'a> {
    /// Looks up a top-level variable. The system variable `_event` is
    /// materialized from the current event slot.
    pub fn lookup(&self, name: &str) -> Data {
        if name == EVENT_VARIABLE_NAME {
            let mut ev = HashMap::with_capacity(2);
            ev.insert(
                EVENT_VARIABLE_FIELD_NAME.to_string(),
                match self.event_name {
                    Some(n) => Data::String(n.to_string()),
                    None => Data::Null,
                },
            );
            ev.insert(
                EVENT_VARIABLE_FIELD_DATA.to_string(),
                match self.event_data {
                    Some(d) => Data::Map(d.clone()),
                    None => Data::Null,
                },
            );
            return Data::Map(ev);
        }
        match self.data.get(name) {
            Some(d) => d.clone(),
            None => Data::Null,
        }
    }
}

/// A compiled expression node.
pub trait Expression: Debug + Send + Sync {
    fn eval(&self, context: &EvalContext) -> Result<Data, String>;
}

#[derive(Debug)]
pub struct ExpressionConstant {
    pub value: Data,
}

impl Expression for ExpressionConstant {
    fn eval(&self, _context: &EvalContext) -> Result<Data, String> {
        Ok(self.value.clone())
    }
}

#[derive(Debug)]
pub struct ExpressionVariable {
    pub name: String,
}

impl Expression for ExpressionVariable {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        Ok(context.lookup(self.name.as_str()))
    }
}

/// Member access `object.member`. Missing members yield null.
#[derive(Debug)]
pub struct ExpressionMemberAccess {
    pub object: Box<dyn Expression>,
    pub member: String,
}

impl Expression for ExpressionMemberAccess {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        match self.object.eval(context)? {
            Data::Map(m) => Ok(m.get(self.member.as_str()).cloned().unwrap_or(Data::Null)),
            Data::Null => Ok(Data::Null),
            other => Err(format!(
                "cannot access member '{}' of {}",
                self.member, other
            )),
        }
    }
}

/// Index access `object[index]`. Out-of-range indices yield null.
#[derive(Debug)]
pub struct ExpressionIndex {
    pub object: Box<dyn Expression>,
    pub index: Box<dyn Expression>,
}

impl Expression for ExpressionIndex {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        let object = self.object.eval(context)?;
        let index = self.index.eval(context)?;
        match (&object, &index) {
            (Data::Array(a), Data::Integer(i)) => {
                if *i < 0 {
                    return Ok(Data::Null);
                }
                Ok(a.get(*i as usize).cloned().unwrap_or(Data::Null))
            }
            (Data::Map(m), Data::String(k)) => {
                Ok(m.get(k.as_str()).cloned().unwrap_or(Data::Null))
            }
            (Data::Null, _) => Ok(Data::Null),
            (_, _) => Err(format!("cannot index {} with {}", object, index)),
        }
    }
}

#[derive(Debug)]
pub struct ExpressionArray {
    pub elements: Vec<Box<dyn Expression>>,
}

impl Expression for ExpressionArray {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        let mut values = Vec::with_capacity(self.elements.len());
        for e in &self.elements {
            values.push(e.eval(context)?);
        }
        Ok(Data::Array(values))
    }
}

#[derive(Debug)]
pub struct ExpressionNot {
    pub operand: Box<dyn Expression>,
}

impl Expression for ExpressionNot {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        let v = self.operand.eval(context)?;
        Ok(Data::Boolean(!v.is_truthy()))
    }
}

#[derive(Debug)]
pub struct ExpressionNegate {
    pub operand: Box<dyn Expression>,
}

impl Expression for ExpressionNegate {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        match self.operand.eval(context)? {
            Data::Integer(v) => Ok(Data::Integer(-v)),
            Data::Double(v) => Ok(Data::Double(-v)),
            other => Err(format!("cannot negate {}", other)),
        }
    }
}

/// Binary operator node. `&&` and `||` short-circuit.
#[derive(Debug)]
pub struct ExpressionOperator {
    pub operator: Operator,
    pub left: Box<dyn Expression>,
    pub right: Box<dyn Expression>,
}

impl Expression for ExpressionOperator {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        match self.operator {
            Operator::And => {
                let l = self.left.eval(context)?;
                if !l.is_truthy() {
                    return Ok(Data::Boolean(false));
                }
                let r = self.right.eval(context)?;
                return Ok(Data::Boolean(r.is_truthy()));
            }
            Operator::Or => {
                let l = self.left.eval(context)?;
                if l.is_truthy() {
                    return Ok(Data::Boolean(true));
                }
                let r = self.right.eval(context)?;
                return Ok(Data::Boolean(r.is_truthy()));
            }
            _ => {}
        }
        let left = self.left.eval(context)?;
        let right = self.right.eval(context)?;
        match self.operator {
            Operator::Plus => add(&left, &right),
            Operator::Minus => numeric(&left, &right, self.operator, |a, b| a - b),
            Operator::Multiply => numeric(&left, &right, self.operator, |a, b| a * b),
            Operator::Divide => {
                if right.as_number() == Some(0f64) {
                    Err("division by zero".to_string())
                } else {
                    numeric(&left, &right, self.operator, |a, b| a / b)
                }
            }
            Operator::Modulus => {
                if right.as_number() == Some(0f64) {
                    Err("division by zero".to_string())
                } else {
                    numeric(&left, &right, self.operator, |a, b| a % b)
                }
            }
            Operator::Equal => Ok(Data::Boolean(loose_eq(&left, &right))),
            Operator::NotEqual => Ok(Data::Boolean(!loose_eq(&left, &right))),
            Operator::Less => compare(&left, &right, |o| o == std::cmp::Ordering::Less),
            Operator::LessEqual => {
                compare(&left, &right, |o| o != std::cmp::Ordering::Greater)
            }
            Operator::Greater => compare(&left, &right, |o| o == std::cmp::Ordering::Greater),
            Operator::GreaterEqual => {
                compare(&left, &right, |o| o != std::cmp::Ordering::Less)
            }
            Operator::And | Operator::Or => unreachable!(),
            Operator::Not => Err("'!' is not a binary operator".to_string()),
        }
    }
}

fn both_integer(left: &Data, right: &Data) -> bool {
    matches!((left, right), (Data::Integer(_), Data::Integer(_)))
}

fn numeric(
    left: &Data,
    right: &Data,
    op: Operator,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Data, String> {
    match (left.as_number(), right.as_number()) {
        (Some(a), Some(b)) => {
            let v = f(a, b);
            if both_integer(left, right) && v.fract() == 0f64 {
                Ok(Data::Integer(v as i64))
            } else {
                Ok(Data::Double(v))
            }
        }
        _ => Err(format!("{:?} needs numeric operands, got {} and {}", op, left, right)),
    }
}

fn add(left: &Data, right: &Data) -> Result<Data, String> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return if both_integer(left, right) {
            match (left, right) {
                (Data::Integer(x), Data::Integer(y)) => Ok(Data::Integer(x.wrapping_add(*y))),
                _ => unreachable!(),
            }
        } else {
            Ok(Data::Double(a + b))
        };
    }
    // String concatenation when either side is a string.
    match (left, right) {
        (Data::String(_), _) | (_, Data::String(_)) => {
            Ok(Data::String(format!("{}{}", left, right)))
        }
        (_, _) => Err(format!("cannot add {} and {}", left, right)),
    }
}

fn loose_eq(left: &Data, right: &Data) -> bool {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return a == b;
    }
    left == right
}

fn compare(
    left: &Data,
    right: &Data,
    check: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<Data, String> {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match a.partial_cmp(&b) {
            Some(o) => Ok(Data::Boolean(check(o))),
            None => Ok(Data::Boolean(false)),
        };
    }
    match (left, right) {
        (Data::String(a), Data::String(b)) => Ok(Data::Boolean(check(a.cmp(b)))),
        (_, _) => Err(format!("cannot compare {} and {}", left, right)),
    }
}

/// Function call. Member call syntax `value.f(a)` is rewritten by the parser
/// into `f(value, a)`.
#[derive(Debug)]
pub struct ExpressionFunction {
    pub name: String,
    pub arguments: Vec<Box<dyn Expression>>,
}

impl Expression for ExpressionFunction {
    fn eval(&self, context: &EvalContext) -> Result<Data, String> {
        let mut args = Vec::with_capacity(self.arguments.len());
        for a in &self.arguments {
            args.push(a.eval(context)?);
        }
        match self.name.as_str() {
            "In" => {
                if args.len() != 1 {
                    return Err("wrong number of arguments for 'In'".to_string());
                }
                match &args[0] {
                    Data::String(state) => Ok(Data::Boolean((context.in_state)(state.as_str()))),
                    _ => Err("illegal argument type for 'In'".to_string()),
                }
            }
            "length" => {
                if args.len() != 1 {
                    return Err("wrong number of arguments for 'length'".to_string());
                }
                let len = match &args[0] {
                    Data::String(s) => s.chars().count(),
                    Data::Array(a) => a.len(),
                    Data::Map(m) => m.len(),
                    _ => return Err("wrong argument type for 'length'".to_string()),
                };
                Ok(Data::Integer(len as i64))
            }
            "isDefined" => {
                if args.len() != 1 {
                    return Err("wrong number of arguments for 'isDefined'".to_string());
                }
                Ok(Data::Boolean(!args[0].is_null()))
            }
            _ => Err(format!("unknown function '{}'", self.name)),
        }
    }
}
