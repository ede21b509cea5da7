// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A minimal value model for the fields of a routing-table record.
//!
//! The wire codec that produces these values is out of this crate's scope (see spec §1); this
//! enum only needs to represent what [`crate::routing::provider::ClusterCompositionProvider`]
//! reads back out of a [`Record`].

use std::collections::HashMap;

/// A value received from a [`Connection::run_procedure`](crate::pool::Connection::run_procedure)
/// call.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum Value {
    Null,
    Integer(i64),
    String(String),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
}

impl Value {
    pub fn try_into_map(self) -> Result<HashMap<String, Value>, Value> {
        match self {
            Value::Map(m) => Ok(m),
            other => Err(other),
        }
    }

    pub fn try_into_list(self) -> Result<Vec<Value>, Value> {
        match self {
            Value::List(l) => Ok(l),
            other => Err(other),
        }
    }

    pub fn try_into_string(self) -> Result<String, Value> {
        match self {
            Value::String(s) => Ok(s),
            other => Err(other),
        }
    }

    pub fn try_into_integer(self) -> Result<i64, Value> {
        match self {
            Value::Integer(i) => Ok(i),
            other => Err(other),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

/// A single result row returned by a remote procedure call, keyed by field name.
///
/// Grounded on the single-record contract required by
/// [`crate::routing::provider::ClusterCompositionProvider`]: the routing procedures always
/// return exactly one record.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: HashMap<String, Value>,
}

impl Record {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self { fields }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }
}
