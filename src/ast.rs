//! Abstract Syntax Tree (AST) for the lifecycle DSL
//!
//! A program is a sequence of forms; each form is either a `;;` comment or a
//! verb call `(namespace.action :key value ... (child ...))`. Every type here
//! renders back to canonical DSL text through `Display`, which is the text the
//! accumulator stores.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A parsed DSL document
pub type Program = Vec<Form>;

/// Top-level form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Form {
    Comment(String),
    Call(VerbCall),
}

/// Argument key: `:keyword` or an attribute-typed `@attr{uuid}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArgKey {
    Keyword(String),
    Attribute(Uuid),
}

impl fmt::Display for ArgKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgKey::Keyword(name) => write!(f, ":{}", name),
            ArgKey::Attribute(id) => write!(f, "@attr{{{}}}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub key: ArgKey,
    pub value: Value,
}

impl fmt::Display for Argument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            ArgKey::Keyword(_) => write!(f, "{} {}", self.key, self.value),
            ArgKey::Attribute(_) => write!(f, "{} = {}", self.key, self.value),
        }
    }
}

/// Literal values accepted in argument position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Number(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Identifier(String),
    List(Vec<Value>),
}

impl Value {
    /// Short type label used in constraint messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Number(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Date(_) => "date",
            Value::Identifier(_) => "identifier",
            Value::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Identifier(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Convert an untrusted JSON value (e.g. generator output) into a DSL value.
    ///
    /// Returns `None` for objects and nulls, which have no DSL representation.
    pub fn from_json(value: &serde_json::Value) -> Option<Value> {
        match value {
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Value::Boolean(*b)),
            serde_json::Value::Number(n) => {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .ok()
                    .map(Value::Number)
            }
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Null | serde_json::Value::Object(_) => None,
        }
    }

    /// JSON form stored in shared context and lifecycle snapshots
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::String(s) | Value::Identifier(s) => serde_json::Value::String(s.clone()),
            Value::Number(n) => serde_json::Value::String(n.to_string()),
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\r' => write!(f, "\\r")?,
                        '\t' => write!(f, "\\t")?,
                        other => write!(f, "{}", other)?,
                    }
                }
                write!(f, "\"")
            }
            Value::Number(n) => write!(f, "{}", n),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Identifier(id) => write!(f, "{}", id),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A single verb invocation, possibly with nested child forms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerbCall {
    pub verb: String,
    pub args: Vec<Argument>,
    pub children: Vec<VerbCall>,
}

impl VerbCall {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            args: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.args.push(Argument {
            key: ArgKey::Keyword(name.into()),
            value,
        });
        self
    }

    pub fn with_attribute(mut self, attribute_id: Uuid, value: Value) -> Self {
        self.args.push(Argument {
            key: ArgKey::Attribute(attribute_id),
            value,
        });
        self
    }

    pub fn with_child(mut self, child: VerbCall) -> Self {
        self.children.push(child);
        self
    }

    /// Value of the first keyword argument named `name`
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.iter().find_map(|arg| match &arg.key {
            ArgKey::Keyword(key) if key == name => Some(&arg.value),
            _ => None,
        })
    }

    /// Namespace part of the verb (`kyc` for `kyc.begin`)
    pub fn namespace(&self) -> &str {
        self.verb.split('.').next().unwrap_or(&self.verb)
    }

    /// This verb followed by every nested verb, depth first
    pub fn verbs(&self) -> Vec<&str> {
        let mut verbs = vec![self.verb.as_str()];
        for child in &self.children {
            verbs.extend(child.verbs());
        }
        verbs
    }
}

impl fmt::Display for VerbCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}", self.verb)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        for child in &self.children {
            write!(f, " {}", child)?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Form::Comment(text) => write!(f, ";;{}", text),
            Form::Call(call) => write!(f, "{}", call),
        }
    }
}
