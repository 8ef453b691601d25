//! Resolved query IR.
//!
//! The query layer hands over a fully resolved, substitution-expanded query.
//! These types describe that object; nothing here parses query text.

use std::fmt;

use crate::error::Error;
use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};

/// Query actions understood by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Read records.
    Select,
    /// Create records that do not exist yet.
    Insert,
    /// Create or overwrite records.
    Replace,
    /// Change records that already exist.
    Update,
    /// Remove records.
    Delete,
}

impl Action {
    /// Canonical action tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "SELECT",
            Action::Insert => "INSERT",
            Action::Replace => "REPLACE",
            Action::Update => "UPDATE",
            Action::Delete => "DELETE",
        }
    }

    /// Parse an action tag (case-insensitive). Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "SELECT" => Some(Action::Select),
            "INSERT" => Some(Action::Insert),
            "REPLACE" => Some(Action::Replace),
            "UPDATE" => Some(Action::Update),
            "DELETE" => Some(Action::Delete),
            _ => None,
        }
    }

    /// Whether this action writes to the store.
    pub fn is_write(&self) -> bool {
        !matches!(self, Action::Select)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A joined entity reference within a query.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Subject {
    /// Alias the rest of the query uses to refer to this subject.
    pub alias: String,
    /// Name of the entity in the catalog.
    pub entity: String,
}

impl Subject {
    /// Create a subject with an explicit alias.
    pub fn new(alias: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            entity: entity.into(),
        }
    }
}

/// Predicate operators a key-value structure can evaluate natively.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PredicateOp {
    /// Equality against a single addressable record.
    Eq,
    /// Glob match (`*`, `?`, `[...]`) over natural keys.
    Match,
}

/// A filter condition bound to one subject.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Predicate {
    /// Alias of the subject this predicate restricts.
    pub subject: String,
    /// Column the predicate names.
    pub column: String,
    /// Operator.
    pub op: PredicateOp,
    /// Operand (the glob pattern for [`PredicateOp::Match`]).
    pub value: Value,
}

impl Predicate {
    /// Create an equality predicate.
    pub fn eq(
        subject: impl Into<String>,
        column: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            subject: subject.into(),
            column: column.into(),
            op: PredicateOp::Eq,
            value: value.into(),
        }
    }

    /// Create a glob predicate over natural keys.
    pub fn matches(subject: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            column: "key".to_string(),
            op: PredicateOp::Match,
            value: Value::String(pattern.into()),
        }
    }
}

/// A projected tuple column.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct TupleColumn {
    /// Alias of the subject the column belongs to.
    pub subject: String,
    /// Column name.
    pub column: String,
}

impl TupleColumn {
    /// Create a projected column.
    pub fn new(subject: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            column: column.into(),
        }
    }
}

/// `column = value` payload of a write query.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Assignment {
    /// Target column.
    pub column: String,
    /// New value.
    pub value: Value,
}

impl Assignment {
    /// Create an assignment.
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Limit clause.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Limit {
    /// Maximum number of records to return.
    pub count: u64,
    /// Number of records to skip.
    #[serde(default)]
    pub offset: u64,
}

impl Limit {
    /// Create a limit with count and offset.
    pub fn new(count: u64, offset: u64) -> Self {
        Self { count, offset }
    }

    /// Check whether the clause restricts anything.
    pub fn is_not_empty(&self) -> bool {
        self.count > 0 || self.offset > 0
    }
}

/// A resolved query.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Query {
    /// Resolved action tag as produced by the query layer.
    pub action: String,
    /// Subjects in declared join order.
    #[serde(default)]
    pub subjects: Vec<Subject>,
    /// Filter predicates, each tagged with its subject alias.
    #[serde(default)]
    pub predicates: Vec<Predicate>,
    /// Projected tuple columns.
    #[serde(default)]
    pub columns: Vec<TupleColumn>,
    /// Payload of write actions.
    #[serde(default)]
    pub assignments: Vec<Assignment>,
    /// Optional limit clause.
    #[serde(default)]
    pub limit: Option<Limit>,
    /// Original query text, kept for diagnostics.
    #[serde(default)]
    pub text: String,
    /// Storage the query layer routed this query to.
    #[serde(default)]
    pub storage: Option<String>,
}

impl Query {
    /// Create an empty query with a raw action tag.
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            subjects: vec![],
            predicates: vec![],
            columns: vec![],
            assignments: vec![],
            limit: None,
            text: String::new(),
            storage: None,
        }
    }

    /// Create a SELECT over one entity aliased by its own name.
    pub fn select(entity: impl Into<String>) -> Self {
        Self::for_entity(Action::Select, entity)
    }

    /// Create an INSERT into one entity.
    pub fn insert(entity: impl Into<String>) -> Self {
        Self::for_entity(Action::Insert, entity)
    }

    /// Create a REPLACE into one entity.
    pub fn replace(entity: impl Into<String>) -> Self {
        Self::for_entity(Action::Replace, entity)
    }

    /// Create an UPDATE of one entity.
    pub fn update(entity: impl Into<String>) -> Self {
        Self::for_entity(Action::Update, entity)
    }

    /// Create a DELETE from one entity.
    pub fn delete(entity: impl Into<String>) -> Self {
        Self::for_entity(Action::Delete, entity)
    }

    fn for_entity(action: Action, entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(action.as_str()).join(entity.clone(), entity)
    }

    /// Append a subject to the join list.
    pub fn join(mut self, alias: impl Into<String>, entity: impl Into<String>) -> Self {
        self.subjects.push(Subject::new(alias, entity));
        self
    }

    /// Add a predicate.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// Add a projected column.
    pub fn with_column(mut self, subject: impl Into<String>, column: impl Into<String>) -> Self {
        self.columns.push(TupleColumn::new(subject, column));
        self
    }

    /// Add a write assignment.
    pub fn with_assignment(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push(Assignment::new(column, value));
        self
    }

    /// Set the limit clause.
    pub fn with_limit(mut self, limit: Limit) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Attach the original query text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the routed storage name.
    pub fn with_storage(mut self, storage: impl Into<String>) -> Self {
        self.storage = Some(storage.into());
        self
    }

    /// The action, if the tag is one the engine knows.
    pub fn resolved_action(&self) -> Option<Action> {
        Action::parse(&self.action)
    }

    /// Alias of the first subject in join order.
    pub fn primary_alias(&self) -> Option<&str> {
        self.subjects.first().map(|s| s.alias.as_str())
    }

    /// Find a subject by alias.
    pub fn subject(&self, alias: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.alias == alias)
    }

    /// Decode a query from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }

    /// Encode this query as JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}
