//! External data supplied to one evaluation run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::traits::Program;

/// A value stored under a key of the [`DataMap`].
#[derive(Clone)]
pub enum DataValue {
    /// A candidate program looked up by program tests.
    Program(Arc<dyn Program>),
    /// A plain answer looked up by answer-only tests.
    Answer(serde_json::Value),
}

impl fmt::Debug for DataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataValue::Program(p) => write!(f, "Program({})", p.describe()),
            DataValue::Answer(v) => write!(f, "Answer({v})"),
        }
    }
}

/// Snapshot of programs and answers keyed by name.
#[derive(Debug, Clone, Default)]
pub struct DataMap {
    entries: HashMap<String, DataValue>,
}

impl DataMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: DataValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn insert_program(
        &mut self,
        key: impl Into<String>,
        program: Arc<dyn Program>,
    ) -> &mut Self {
        self.insert(key, DataValue::Program(program))
    }

    pub fn insert_answer(
        &mut self,
        key: impl Into<String>,
        answer: impl Into<serde_json::Value>,
    ) -> &mut Self {
        self.insert(key, DataValue::Answer(answer.into()))
    }

    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.entries.get(key)
    }

    /// The program stored under `key`, if the key holds a program.
    pub fn program(&self, key: &str) -> Option<&Arc<dyn Program>> {
        match self.entries.get(key) {
            Some(DataValue::Program(p)) => Some(p),
            _ => None,
        }
    }

    /// The answer stored under `key`, if the key holds an answer.
    pub fn answer(&self, key: &str) -> Option<&serde_json::Value> {
        match self.entries.get(key) {
            Some(DataValue::Answer(v)) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
