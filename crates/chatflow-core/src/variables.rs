//! Run-scoped variable space shared by the nodes of one flow run.
//!
//! Keys are plain strings with no namespacing; a value written by one node is
//! visible to every node that runs after it on the same path. Parallel
//! branches never share a live store: each branch works on a [`fork`] and the
//! engine folds the forks back with [`merge`] in a fixed order.
//!
//! [`fork`]: VariableStore::fork
//! [`merge`]: VariableStore::merge

use crate::Value;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    vars: HashMap<String, Value>,
    /// Keys set or removed since this store was created or forked.
    touched: BTreeSet<String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.touched.insert(name.clone());
        self.vars.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn get_or(&self, name: &str, default: Value) -> Value {
        self.vars.get(name).cloned().unwrap_or(default)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.touched.insert(name.to_string());
        self.vars.remove(name)
    }

    /// Copy of every variable. Mutating the copy never affects the store.
    pub fn get_all(&self) -> HashMap<String, Value> {
        self.vars.clone()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Private copy for a parallel branch. The fork starts with the current
    /// values and an empty change set.
    pub fn fork(&self) -> Self {
        Self {
            vars: self.vars.clone(),
            touched: BTreeSet::new(),
        }
    }

    /// Keys changed in this store since it was forked.
    pub fn changed_keys(&self) -> impl Iterator<Item = &str> {
        self.touched.iter().map(String::as_str)
    }

    /// Apply every change a branch made to its fork. Values set by the branch
    /// replace ours and keys it removed are removed here. Returns the keys
    /// this store had changed itself that the branch overwrote with a
    /// different value.
    pub fn merge(&mut self, branch: VariableStore) -> Vec<String> {
        let VariableStore { mut vars, touched } = branch;
        let mut conflicts = Vec::new();

        for key in touched {
            let value = vars.remove(&key);
            if self.touched.contains(&key) && self.vars.get(&key) != value.as_ref() {
                conflicts.push(key.clone());
            }
            match value {
                Some(value) => self.set(key, value),
                None => {
                    self.remove(&key);
                }
            }
        }

        conflicts
    }
}
