//! Filter-expression language over materialized run records.
//!
//! Grammar: `clause (AND clause)*` where a clause is
//! `<entity>.<key> <comparator> <value>`, for example
//!
//! ```text
//! params.model = 'resnet' AND metrics.acc > 0.9 AND tags.team != 'infra'
//! ```
//!
//! Entities are `metrics`, `params`, `tags` and run-info attributes (either
//! `attributes.<field>` or the bare field name). Keys may be quoted with
//! single quotes, double quotes or backticks. There is no `OR`.

use std::cmp::Ordering;
use std::fmt;
use std::iter::Peekable;
use std::str::CharIndices;

use crate::error::{Result, StoreError};
use crate::models::{Run, RunInfo};
use crate::store::DEFAULT_EXPERIMENT_ID;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparator {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            Comparator::Eq => ord == Ordering::Equal,
            Comparator::Ne => ord != Ordering::Equal,
            Comparator::Lt => ord == Ordering::Less,
            Comparator::Le => ord != Ordering::Greater,
            Comparator::Gt => ord == Ordering::Greater,
            Comparator::Ge => ord != Ordering::Less,
        }
    }

    fn is_equality(self) -> bool {
        matches!(self, Comparator::Eq | Comparator::Ne)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Eq => "=",
            Comparator::Ne => "!=",
            Comparator::Lt => "<",
            Comparator::Le => "<=",
            Comparator::Gt => ">",
            Comparator::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Text(String),
}

/// Which record family a clause addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Metric,
    Param,
    Tag,
    Attribute,
}

#[derive(Debug, Clone)]
struct Clause {
    entity: EntityKind,
    key: String,
    comparator: Comparator,
    value: Value,
}

/// A parsed filter: the conjunction of its clauses.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    pub fn parse(filter: &str) -> Result<Filter> {
        Parser::new(filter).parse_filter()
    }

    /// A run matches when every clause holds. A clause referencing a key the
    /// run does not have evaluates to false, never an error.
    pub fn matches(&self, run: &Run) -> bool {
        self.clauses.iter().all(|clause| clause.matches(run))
    }
}

impl Clause {
    fn matches(&self, run: &Run) -> bool {
        match self.entity {
            EntityKind::Metric => match (run.data.metrics.get(&self.key), &self.value) {
                (Some(metric), Value::Number(n)) => {
                    self.comparator.holds(metric.value.total_cmp(n))
                }
                _ => false,
            },
            EntityKind::Param => self.text_matches(run.data.params.get(&self.key)),
            EntityKind::Tag => self.text_matches(run.data.tags.get(&self.key)),
            EntityKind::Attribute => self.attribute_matches(&run.info),
        }
    }

    fn text_matches(&self, stored: Option<&String>) -> bool {
        match (stored, &self.value) {
            (Some(stored), Value::Text(wanted)) => self.comparator.holds(stored.as_str().cmp(wanted)),
            _ => false,
        }
    }

    fn attribute_matches(&self, info: &RunInfo) -> bool {
        match self.key.as_str() {
            "start_time" => self.number_matches(Some(info.start_time)),
            "end_time" => self.number_matches(info.end_time),
            "run_id" => self.text_matches(Some(&info.run_id)),
            "experiment_id" => self.text_matches(Some(&info.experiment_id)),
            "name" | "run_name" => self.text_matches(Some(&info.name)),
            "user_id" => self.text_matches(Some(&info.user_id)),
            "status" => self.text_matches(Some(&info.status.to_string())),
            "source_type" => self.text_matches(Some(&info.source_type)),
            "source_name" => self.text_matches(Some(&info.source_name)),
            "entry_point_name" => self.text_matches(Some(&info.entry_point_name)),
            "artifact_uri" => self.text_matches(Some(&info.artifact_uri)),
            _ => false,
        }
    }

    fn number_matches(&self, stored: Option<i64>) -> bool {
        match (stored, &self.value) {
            (Some(stored), Value::Number(n)) => {
                self.comparator.holds((stored as f64).total_cmp(n))
            }
            _ => false,
        }
    }

}

const NUMERIC_ATTRIBUTES: &[&str] = &["start_time", "end_time"];
const STRING_ATTRIBUTES: &[&str] = &[
    "run_id",
    "experiment_id",
    "name",
    "run_name",
    "user_id",
    "status",
    "source_type",
    "source_name",
    "entry_point_name",
    "artifact_uri",
];

// ─── Parser ──────────────────────────────────────────────────────────────────

struct Parser<'a> {
    input: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn error(&self, message: impl Into<String>) -> StoreError {
        StoreError::InvalidParameterValue(format!(
            "Invalid filter '{}': {}",
            self.input,
            message.into()
        ))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.chars.peek(), Some((_, c)) if c.is_whitespace()) {
            self.chars.next();
        }
    }

    fn at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    /// Bare word: identifier characters plus the separators legal in keys.
    fn read_word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '/') {
                word.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        word
    }

    fn read_quoted(&mut self, quote: char) -> Result<String> {
        self.chars.next(); // opening quote
        let mut text = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == quote {
                return Ok(text);
            }
            text.push(c);
        }
        Err(self.error(format!("unterminated {quote} quote")))
    }

    fn parse_filter(mut self) -> Result<Filter> {
        let mut clauses = vec![];
        loop {
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            clauses.push(self.parse_clause()?);
            self.skip_whitespace();
            if self.at_end() {
                break;
            }
            let conjunction = self.read_word();
            if !conjunction.eq_ignore_ascii_case("and") {
                return Err(self.error(format!(
                    "expected 'AND' between clauses, found '{conjunction}'"
                )));
            }
        }
        if clauses.is_empty() {
            return Err(self.error("expected at least one clause"));
        }
        Ok(Filter { clauses })
    }

    fn parse_clause(&mut self) -> Result<Clause> {
        let (entity, key) = self.parse_identifier()?;
        self.skip_whitespace();
        let comparator = self.parse_comparator()?;
        self.skip_whitespace();
        let value = self.parse_value()?;
        let clause = Clause {
            entity,
            key,
            comparator,
            value,
        };
        self.validate_clause(&clause)?;
        Ok(clause)
    }

    fn parse_identifier(&mut self) -> Result<(EntityKind, String)> {
        let head = self.read_word();
        if head.is_empty() {
            return Err(self.error("expected an identifier"));
        }
        if !matches!(self.chars.peek(), Some((_, '.'))) {
            // Bare run-info attribute.
            return self.attribute_key(head);
        }
        self.chars.next(); // '.'
        let key = match self.chars.peek() {
            Some(&(_, quote)) if matches!(quote, '\'' | '"' | '`') => self.read_quoted(quote)?,
            _ => self.read_word(),
        };
        if key.is_empty() {
            return Err(self.error(format!("expected a key after '{head}.'")));
        }
        match head.as_str() {
            "metric" | "metrics" => Ok((EntityKind::Metric, key)),
            "param" | "params" | "parameter" | "parameters" => Ok((EntityKind::Param, key)),
            "tag" | "tags" => Ok((EntityKind::Tag, key)),
            "attribute" | "attributes" | "run" => self.attribute_key(key),
            other => Err(self.error(format!(
                "invalid entity '{other}'; expected metrics, params, tags or attributes"
            ))),
        }
    }

    fn attribute_key(&self, key: String) -> Result<(EntityKind, String)> {
        if NUMERIC_ATTRIBUTES.contains(&key.as_str()) || STRING_ATTRIBUTES.contains(&key.as_str())
        {
            Ok((EntityKind::Attribute, key))
        } else {
            Err(self.error(format!("invalid attribute key '{key}'")))
        }
    }

    fn parse_comparator(&mut self) -> Result<Comparator> {
        let mut op = String::new();
        while let Some(&(_, c)) = self.chars.peek() {
            if matches!(c, '=' | '!' | '<' | '>') {
                op.push(c);
                self.chars.next();
            } else {
                break;
            }
        }
        match op.as_str() {
            "=" => Ok(Comparator::Eq),
            "!=" => Ok(Comparator::Ne),
            "<" => Ok(Comparator::Lt),
            "<=" => Ok(Comparator::Le),
            ">" => Ok(Comparator::Gt),
            ">=" => Ok(Comparator::Ge),
            other => Err(self.error(format!("invalid comparator '{other}'"))),
        }
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.chars.peek() {
            Some(&(_, quote)) if matches!(quote, '\'' | '"') => {
                Ok(Value::Text(self.read_quoted(quote)?))
            }
            Some(_) => {
                let mut literal = String::new();
                while let Some(&(_, c)) = self.chars.peek() {
                    if c.is_whitespace() {
                        break;
                    }
                    literal.push(c);
                    self.chars.next();
                }
                literal
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| self.error(format!("expected a number or quoted string, found '{literal}'")))
            }
            None => Err(self.error("expected a comparison value")),
        }
    }

    /// Validation happens at parse time so bad filters fail before any run is
    /// materialized.
    fn validate_clause(&self, clause: &Clause) -> Result<()> {
        match clause.entity {
            EntityKind::Metric => {
                if !matches!(clause.value, Value::Number(_)) {
                    return Err(self.error(format!(
                        "metric '{}' requires a numeric comparison value",
                        clause.key
                    )));
                }
            }
            EntityKind::Param | EntityKind::Tag => {
                if !matches!(clause.value, Value::Text(_)) {
                    return Err(self.error(format!(
                        "'{}' requires a quoted string comparison value",
                        clause.key
                    )));
                }
                if !clause.comparator.is_equality() {
                    return Err(self.error(format!(
                        "comparator '{}' not supported for strings; use = or !=",
                        clause.comparator
                    )));
                }
            }
            EntityKind::Attribute => {
                let numeric = NUMERIC_ATTRIBUTES.contains(&clause.key.as_str());
                match (&clause.value, numeric) {
                    (Value::Number(_), true) => {}
                    (Value::Text(_), false) if clause.comparator.is_equality() => {}
                    (Value::Text(_), false) => {
                        return Err(self.error(format!(
                            "comparator '{}' not supported for attribute '{}'",
                            clause.comparator, clause.key
                        )));
                    }
                    _ => {
                        return Err(self.error(format!(
                            "type mismatch for attribute '{}'",
                            clause.key
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

// ─── Result ordering ─────────────────────────────────────────────────────────

/// Deterministic full ordering over search results: default-experiment runs
/// last, then start time descending, then run id ascending. Stable across
/// repeated identical calls, so pagination by truncation is consistent.
pub(crate) fn run_ordering(a: &Run, b: &Run) -> Ordering {
    let a_default = a.info.experiment_id == DEFAULT_EXPERIMENT_ID;
    let b_default = b.info.experiment_id == DEFAULT_EXPERIMENT_ID;
    a_default
        .cmp(&b_default)
        .then(b.info.start_time.cmp(&a.info.start_time))
        .then(a.info.run_id.cmp(&b.info.run_id))
}
