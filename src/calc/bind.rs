//! Form fields bound to named variables, and views that show arithmetic over
//! those variables. Values persist in the session under one JSON key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dom::{Document, NodeId};
use crate::session::{SessionError, SessionStore};

pub const BINDINGS_KEY: &str = "mb-lite";
pub const EVALUATION_FAILED: &str = "⚠︎";
pub const INPUT_CLASS: &str = "mb-input";
pub const VIEW_CLASS: &str = "mb-view";
pub const BIND_ATTR: &str = "data-bind";
pub const EXPR_ATTR: &str = "data-expr";

/// Deepest nesting of parentheses and unary signs an expression may use.
const MAX_NESTING: usize = 64;

#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum ExprError {
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unexpected `{found}` at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unknown variable `{name}`")]
    UnknownVariable { name: String },

    #[error("variable `{name}` is not a number")]
    NotANumber { name: String },

    #[error("expression does not evaluate to a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BindingValue {
    Number(f64),
    Text(String),
}

impl BindingValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(raw) => raw.trim().parse().ok(),
        }
    }

    pub fn display(&self) -> String {
        match self {
            Self::Number(value) => format_number(*value),
            Self::Text(raw) => raw.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableBindings {
    values: BTreeMap<String, BindingValue>,
}

impl VariableBindings {
    /// Reads the persisted bindings; unreadable state starts empty.
    pub fn load(store: &dyn SessionStore) -> Self {
        let Some(raw) = store.get(BINDINGS_KEY) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(values) => Self { values },
            Err(error) => {
                warn!(error = %error, "ignoring unreadable variable bindings");
                Self::default()
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&BindingValue> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(
        &mut self,
        store: &mut dyn SessionStore,
        name: &str,
        value: BindingValue,
    ) -> Result<(), SessionError> {
        self.values.insert(name.to_owned(), value);
        self.persist(store)
    }

    fn persist(&self, store: &mut dyn SessionStore) -> Result<(), SessionError> {
        // A map of strings and finite numbers always serializes.
        let raw = serde_json::to_string(&self.values).unwrap_or_else(|_| "{}".to_owned());
        store.set(BINDINGS_KEY, &raw)
    }

    pub fn evaluate(&self, expr: &str) -> Result<f64, ExprError> {
        let tokens = tokenize(expr)?;
        let mut parser = Parser {
            tokens: &tokens,
            position: 0,
            depth: 0,
            bindings: self,
        };
        let value = parser.expression()?;
        if let Some(token) = parser.peek() {
            return Err(token.unexpected());
        }
        if value.is_finite() {
            Ok(value)
        } else {
            Err(ExprError::NonFinite)
        }
    }

    /// Evaluated text for a view, or the failure marker.
    pub fn render(&self, expr: &str) -> String {
        match self.evaluate(expr) {
            Ok(value) => format_number(value),
            Err(error) => {
                debug!(expr, error = %error, "expression evaluation failed");
                EVALUATION_FAILED.to_owned()
            }
        }
    }
}

/// Inputs and views of one page, wired to a [`VariableBindings`].
#[derive(Debug, Clone, Default)]
pub struct BoundPage {
    inputs: Vec<(NodeId, String)>,
    views: Vec<(NodeId, String)>,
}

impl BoundPage {
    /// Restores persisted values into inputs and renders every view.
    pub fn attach(document: &mut Document, bindings: &VariableBindings) -> Self {
        let root = document.root();
        let inputs: Vec<(NodeId, String)> = document
            .select(root, |element| matches!(element.name(), "input" | "textarea"))
            .into_iter()
            .filter(|node| {
                document
                    .closest(*node, |element| element.has_class(INPUT_CLASS))
                    .is_some()
            })
            .filter_map(|node| {
                let element = document.element(node)?;
                let name = element.attr(BIND_ATTR).or_else(|| element.attr("name"))?;
                (!name.is_empty()).then(|| (node, name.to_owned()))
            })
            .collect();
        let views: Vec<(NodeId, String)> = document
            .select(root, |element| element.has_class(VIEW_CLASS))
            .into_iter()
            .map(|node| {
                let expr = document
                    .attr(node, EXPR_ATTR)
                    .map(str::to_owned)
                    .unwrap_or_else(|| document.text_content(node).trim().to_owned());
                (node, expr)
            })
            .collect();

        for (node, name) in &inputs {
            if let Some(value) = bindings.get(name) {
                document.set_attr(*node, "value", &value.display());
            }
        }
        let page = Self { inputs, views };
        page.recompute(document, bindings);
        page
    }

    pub fn binding_for(&self, input: NodeId) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(node, _)| *node == input)
            .map(|(_, name)| name.as_str())
    }

    /// Stores the new value of `input` and re-renders every view. Number
    /// inputs store numbers; everything else stores text.
    pub fn input_changed(
        &self,
        document: &mut Document,
        bindings: &mut VariableBindings,
        store: &mut dyn SessionStore,
        input: NodeId,
        raw: &str,
    ) -> Result<(), SessionError> {
        let Some(name) = self.binding_for(input) else {
            return Ok(());
        };
        document.set_attr(input, "value", raw);
        let value = if document.attr(input, "type") == Some("number") {
            BindingValue::Number(raw.trim().parse().unwrap_or(0.0))
        } else {
            BindingValue::Text(raw.to_owned())
        };
        bindings.set(store, name, value)?;
        self.recompute(document, bindings);
        Ok(())
    }

    fn recompute(&self, document: &mut Document, bindings: &VariableBindings) {
        for (node, expr) in &self.views {
            document.set_text_content(*node, bindings.render(expr));
        }
    }
}

/// Up to 14 significant digits, integers without a fraction.
pub fn format_number(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    let magnitude = value.abs().log10().floor() as i32;
    let decimals = (13 - magnitude).clamp(0, 15);
    let factor = 10f64.powi(decimals);
    let rounded = (value * factor).round() / factor;
    rounded.to_string()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number { value: f64, offset: usize },
    Ident { name: String, offset: usize },
    Op { symbol: char, offset: usize },
}

impl Token {
    fn unexpected(&self) -> ExprError {
        let (found, offset) = match self {
            Self::Number { value, offset } => (value.to_string(), *offset),
            Self::Ident { name, offset } => (name.clone(), *offset),
            Self::Op { symbol, offset } => (symbol.to_string(), *offset),
        };
        ExprError::UnexpectedToken { found, offset }
    }

    fn is_op(&self, expected: char) -> bool {
        matches!(self, Self::Op { symbol, .. } if *symbol == expected)
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = expr.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch.is_ascii_digit() || ch == '.' {
            let mut end = offset;
            while let Some(&(index, next)) = chars.peek() {
                if next.is_ascii_digit() || next == '.' {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            let literal = &expr[offset..end];
            let value = literal
                .parse()
                .map_err(|_| ExprError::UnexpectedToken {
                    found: literal.to_owned(),
                    offset,
                })?;
            tokens.push(Token::Number { value, offset });
        } else if ch.is_alphabetic() || ch == '_' {
            let mut end = offset;
            while let Some(&(index, next)) = chars.peek() {
                if next.is_alphanumeric() || next == '_' {
                    end = index + next.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident {
                name: expr[offset..end].to_owned(),
                offset,
            });
        } else if "+-*/^()".contains(ch) {
            tokens.push(Token::Op { symbol: ch, offset });
            chars.next();
        } else {
            return Err(ExprError::UnexpectedToken {
                found: ch.to_string(),
                offset,
            });
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    position: usize,
    depth: usize,
    bindings: &'a VariableBindings,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&'a Token> {
        let tokens = self.tokens;
        let token = tokens.get(self.position);
        self.position += 1;
        token
    }

    fn eat(&mut self, symbol: char) -> bool {
        if self.peek().is_some_and(|token| token.is_op(symbol)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self) -> Result<f64, ExprError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value += self.term()?;
            } else if self.eat('-') {
                value -= self.term()?;
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<f64, ExprError> {
        let mut value = self.unary()?;
        loop {
            if self.eat('*') {
                value *= self.unary()?;
            } else if self.eat('/') {
                value /= self.unary()?;
            } else {
                return Ok(value);
            }
        }
    }

    /// Every nested sub-expression passes through here, so this is where
    /// the nesting limit is enforced.
    fn unary(&mut self) -> Result<f64, ExprError> {
        if self.depth >= MAX_NESTING {
            return Err(self
                .peek()
                .map_or(ExprError::UnexpectedEnd, Token::unexpected));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    /// Unary minus binds looser than `^`, so `-2^2` is `-4`.
    fn signed(&mut self) -> Result<f64, ExprError> {
        if self.eat('-') {
            return Ok(-self.unary()?);
        }
        if self.eat('+') {
            return self.unary();
        }
        self.power()
    }

    fn power(&mut self) -> Result<f64, ExprError> {
        let base = self.primary()?;
        if self.eat('^') {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64, ExprError> {
        let bindings = self.bindings;
        match self.next() {
            None => Err(ExprError::UnexpectedEnd),
            Some(Token::Number { value, .. }) => Ok(*value),
            Some(Token::Ident { name, .. }) => {
                let value = bindings
                    .get(name)
                    .ok_or_else(|| ExprError::UnknownVariable { name: name.clone() })?;
                value
                    .as_number()
                    .ok_or_else(|| ExprError::NotANumber { name: name.clone() })
            }
            Some(token) if token.is_op('(') => {
                let value = self.expression()?;
                match self.next() {
                    Some(token) if token.is_op(')') => Ok(value),
                    Some(token) => Err(token.unexpected()),
                    None => Err(ExprError::UnexpectedEnd),
                }
            }
            Some(token) => Err(token.unexpected()),
        }
    }
}
