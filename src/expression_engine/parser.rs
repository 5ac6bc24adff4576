//! Parser part of the expression engine.\
//! Recursive descent over the lexer tokens, producing a reusable
//! [Expression](crate::expression_engine::expressions::Expression) tree.

use crate::datamodel::Data;
use crate::expression_engine::expressions::{
    EvalContext, Expression, ExpressionArray, ExpressionConstant, ExpressionFunction,
    ExpressionIndex, ExpressionMemberAccess, ExpressionNegate, ExpressionNot, ExpressionOperator,
    ExpressionVariable,
};
use crate::expression_engine::lexer::{ExpressionLexer, NumericToken, Operator, Token};

/// Static tool struct to process expressions.
pub struct ExpressionParser {}

struct TokenStream {
    lexer: ExpressionLexer,
    peeked: Option<Token>,
}

impl TokenStream {
    fn new(text: &str) -> TokenStream {
        TokenStream {
            lexer: ExpressionLexer::new(text),
            peeked: None,
        }
    }

    fn peek(&mut self) -> Result<&Token, String> {
        if self.peeked.is_none() {
            let t = self.lexer.next_token();
            if let Token::Error(e) = t {
                return Err(e);
            }
            self.peeked = Some(t);
        }
        Ok(self.peeked.as_ref().unwrap())
    }

    fn next(&mut self) -> Result<Token, String> {
        if let Some(t) = self.peeked.take() {
            return Ok(t);
        }
        match self.lexer.next_token() {
            Token::Error(e) => Err(e),
            t => Ok(t),
        }
    }

    fn expect_bracket(&mut self, c: char) -> Result<(), String> {
        match self.next()? {
            Token::Bracket(b) if b == c => Ok(()),
            other => Err(format!("expected '{}', found {}", c, other)),
        }
    }
}

impl ExpressionParser {
    /// Parses an expression, returning a reusable expression tree.
    pub fn parse(text: &str) -> Result<Box<dyn Expression>, String> {
        let mut stream = TokenStream::new(text);
        let expression = Self::parse_or(&mut stream)?;
        match stream.next()? {
            Token::EOE => Ok(expression),
            other => Err(format!("unexpected trailing {}", other)),
        }
    }

    /// Parses and evaluates an expression in one go.\
    /// If possible, use [parse](Self::parse) and re-use the tree.
    pub fn execute(text: &str, context: &EvalContext) -> Result<Data, String> {
        Self::parse(text)?.eval(context)
    }

    fn parse_or(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_and(stream)?;
        while matches!(stream.peek()?, Token::Operator(Operator::Or)) {
            stream.next()?;
            let right = Self::parse_and(stream)?;
            left = Box::new(ExpressionOperator {
                operator: Operator::Or,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_and(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_equality(stream)?;
        while matches!(stream.peek()?, Token::Operator(Operator::And)) {
            stream.next()?;
            let right = Self::parse_equality(stream)?;
            left = Box::new(ExpressionOperator {
                operator: Operator::And,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_equality(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_comparison(stream)?;
        loop {
            let operator = match stream.peek()? {
                Token::Operator(op @ (Operator::Equal | Operator::NotEqual)) => *op,
                _ => break,
            };
            stream.next()?;
            let right = Self::parse_comparison(stream)?;
            left = Box::new(ExpressionOperator {
                operator,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_comparison(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_additive(stream)?;
        loop {
            let operator = match stream.peek()? {
                Token::Operator(
                    op @ (Operator::Less
                    | Operator::LessEqual
                    | Operator::Greater
                    | Operator::GreaterEqual),
                ) => *op,
                _ => break,
            };
            stream.next()?;
            let right = Self::parse_additive(stream)?;
            left = Box::new(ExpressionOperator {
                operator,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_additive(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_multiplicative(stream)?;
        loop {
            let operator = match stream.peek()? {
                Token::Operator(op @ (Operator::Plus | Operator::Minus)) => *op,
                _ => break,
            };
            stream.next()?;
            let right = Self::parse_multiplicative(stream)?;
            left = Box::new(ExpressionOperator {
                operator,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_multiplicative(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut left = Self::parse_unary(stream)?;
        loop {
            let operator = match stream.peek()? {
                Token::Operator(
                    op @ (Operator::Multiply | Operator::Divide | Operator::Modulus),
                ) => *op,
                _ => break,
            };
            stream.next()?;
            let right = Self::parse_unary(stream)?;
            left = Box::new(ExpressionOperator {
                operator,
                left,
                right,
            });
        }
        Ok(left)
    }

    fn parse_unary(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        match stream.peek()? {
            Token::Operator(Operator::Minus) => {
                stream.next()?;
                let operand = Self::parse_unary(stream)?;
                Ok(Box::new(ExpressionNegate { operand }))
            }
            Token::Operator(Operator::Not) => {
                stream.next()?;
                let operand = Self::parse_unary(stream)?;
                Ok(Box::new(ExpressionNot { operand }))
            }
            _ => Self::parse_postfix(stream),
        }
    }

    /// Postfix chain: member access, member calls and index access.
    fn parse_postfix(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        let mut expression = Self::parse_primary(stream)?;
        loop {
            match stream.peek()? {
                Token::Separator('.') => {
                    stream.next()?;
                    let member = match stream.next()? {
                        Token::Identifier(name) => name,
                        other => return Err(format!("expected member name, found {}", other)),
                    };
                    if matches!(stream.peek()?, Token::Bracket('(')) {
                        // Member call: rewrite value.f(args) to f(value, args).
                        stream.next()?;
                        let mut arguments = Self::parse_argument_list(stream)?;
                        arguments.insert(0, expression);
                        expression = Box::new(ExpressionFunction {
                            name: member,
                            arguments,
                        });
                    } else {
                        expression = Box::new(ExpressionMemberAccess {
                            object: expression,
                            member,
                        });
                    }
                }
                Token::Bracket('[') => {
                    stream.next()?;
                    let index = Self::parse_or(stream)?;
                    stream.expect_bracket(']')?;
                    expression = Box::new(ExpressionIndex {
                        object: expression,
                        index,
                    });
                }
                _ => break,
            }
        }
        Ok(expression)
    }

    fn parse_primary(stream: &mut TokenStream) -> Result<Box<dyn Expression>, String> {
        match stream.next()? {
            Token::Number(NumericToken::Integer(v)) => Ok(Box::new(ExpressionConstant {
                value: Data::Integer(v),
            })),
            Token::Number(NumericToken::Double(v)) => Ok(Box::new(ExpressionConstant {
                value: Data::Double(v),
            })),
            Token::TString(s) => Ok(Box::new(ExpressionConstant {
                value: Data::String(s),
            })),
            Token::Boolean(b) => Ok(Box::new(ExpressionConstant {
                value: Data::Boolean(b),
            })),
            Token::Null => Ok(Box::new(ExpressionConstant { value: Data::Null })),
            Token::Identifier(name) => {
                if matches!(stream.peek()?, Token::Bracket('(')) {
                    stream.next()?;
                    let arguments = Self::parse_argument_list(stream)?;
                    Ok(Box::new(ExpressionFunction { name, arguments }))
                } else {
                    Ok(Box::new(ExpressionVariable { name }))
                }
            }
            Token::Bracket('(') => {
                let inner = Self::parse_or(stream)?;
                stream.expect_bracket(')')?;
                Ok(inner)
            }
            Token::Bracket('[') => {
                let mut elements = Vec::new();
                if matches!(stream.peek()?, Token::Bracket(']')) {
                    stream.next()?;
                } else {
                    loop {
                        elements.push(Self::parse_or(stream)?);
                        match stream.next()? {
                            Token::Separator(',') => {}
                            Token::Bracket(']') => break,
                            other => {
                                return Err(format!("expected ',' or ']', found {}", other))
                            }
                        }
                    }
                }
                Ok(Box::new(ExpressionArray { elements }))
            }
            Token::EOE => Err("unexpected end of expression".to_string()),
            other => Err(format!("unexpected {}", other)),
        }
    }

    /// Parses an argument list, consuming the closing bracket.
    fn parse_argument_list(stream: &mut TokenStream) -> Result<Vec<Box<dyn Expression>>, String> {
        let mut arguments = Vec::new();
        if matches!(stream.peek()?, Token::Bracket(')')) {
            stream.next()?;
            return Ok(arguments);
        }
        loop {
            arguments.push(Self::parse_or(stream)?);
            match stream.next()? {
                Token::Separator(',') => {}
                Token::Bracket(')') => break,
                other => return Err(format!("expected ',' or ')', found {}", other)),
            }
        }
        Ok(arguments)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::datamodel::DataStore;

    fn eval(text: &str, store: &DataStore) -> Result<Data, String> {
        let no_states = |_: &str| false;
        let context = EvalContext {
            data: store,
            event_name: None,
            event_data: None,
            in_state: &no_states,
        };
        ExpressionParser::execute(text, &context)
    }

    #[test]
    fn arithmetic_precedence() {
        let store = DataStore::new();
        assert_eq!(eval("1 + 2 * 3", &store), Ok(Data::Integer(7)));
        assert_eq!(eval("(1 + 2) * 3", &store), Ok(Data::Integer(9)));
        assert_eq!(eval("10 % 3", &store), Ok(Data::Integer(1)));
        assert_eq!(eval("-2 + 5", &store), Ok(Data::Integer(3)));
    }

    #[test]
    fn division_by_zero_is_an_error() {
        let store = DataStore::new();
        assert!(eval("1 / 0", &store).is_err());
        assert!(eval("1 % 0", &store).is_err());
    }

    #[test]
    fn comparison_and_logic() {
        let mut store = DataStore::new();
        store.set("count", Data::Integer(4));
        assert_eq!(eval("count >= 4 && count < 10", &store), Ok(Data::Boolean(true)));
        assert_eq!(eval("count == 5 || false", &store), Ok(Data::Boolean(false)));
        assert_eq!(eval("!(count == 4)", &store), Ok(Data::Boolean(false)));
        assert_eq!(eval("count == 4.0", &store), Ok(Data::Boolean(true)));
    }

    #[test]
    fn string_concat_and_compare() {
        let store = DataStore::new();
        assert_eq!(
            eval("'user.' + 'login'", &store),
            Ok(Data::String("user.login".to_string()))
        );
        assert_eq!(eval("'abc' < 'abd'", &store), Ok(Data::Boolean(true)));
    }

    #[test]
    fn nested_member_and_index_access() {
        let mut store = DataStore::new();
        let mut admin = HashMap::new();
        admin.insert("active".to_string(), Data::Boolean(true));
        let mut users = HashMap::new();
        users.insert("admin".to_string(), Data::Map(admin));
        store.set("users", Data::Map(users));
        store.set(
            "counters",
            Data::Array(vec![Data::Integer(10), Data::Integer(20)]),
        );

        assert_eq!(eval("users.admin.active", &store), Ok(Data::Boolean(true)));
        assert_eq!(eval("users['admin'].active", &store), Ok(Data::Boolean(true)));
        assert_eq!(eval("counters[1]", &store), Ok(Data::Integer(20)));
        // Missing keys yield null, not an error.
        assert_eq!(eval("users.nobody.active", &store), Ok(Data::Null));
        assert_eq!(eval("counters[99]", &store), Ok(Data::Null));
    }

    #[test]
    fn builtin_functions() {
        let mut store = DataStore::new();
        store.set("list", Data::Array(vec![Data::Integer(1), Data::Integer(2)]));
        assert_eq!(eval("length(list)", &store), Ok(Data::Integer(2)));
        assert_eq!(eval("'abc'.length()", &store), Ok(Data::Integer(3)));
        assert_eq!(eval("isDefined(list)", &store), Ok(Data::Boolean(true)));
        assert_eq!(eval("isDefined(nothing)", &store), Ok(Data::Boolean(false)));
        assert!(eval("nosuch(1)", &store).is_err());
    }

    #[test]
    fn in_predicate_uses_context() {
        let store = DataStore::new();
        let active = |name: &str| name == "busy";
        let context = EvalContext {
            data: &store,
            event_name: None,
            event_data: None,
            in_state: &active,
        };
        assert_eq!(
            ExpressionParser::execute("In('busy')", &context),
            Ok(Data::Boolean(true))
        );
        assert_eq!(
            ExpressionParser::execute("In('idle')", &context),
            Ok(Data::Boolean(false))
        );
    }

    #[test]
    fn event_variable_access() {
        let store = DataStore::new();
        let mut payload = HashMap::new();
        payload.insert("user".to_string(), Data::String("ada".to_string()));
        let no_states = |_: &str| false;
        let context = EvalContext {
            data: &store,
            event_name: Some("login.ok"),
            event_data: Some(&payload),
            in_state: &no_states,
        };
        assert_eq!(
            ExpressionParser::execute("_event.name", &context),
            Ok(Data::String("login.ok".to_string()))
        );
        assert_eq!(
            ExpressionParser::execute("_event.data.user", &context),
            Ok(Data::String("ada".to_string()))
        );
    }

    #[test]
    fn malformed_expressions() {
        let store = DataStore::new();
        assert!(eval("1 +", &store).is_err());
        assert!(eval("(1 + 2", &store).is_err());
        assert!(eval("a b", &store).is_err());
        assert!(eval("a = 1", &store).is_err());
    }
}
