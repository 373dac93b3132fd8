//! Scope names interned in a global table so tokens carry copyable symbols
//! instead of owned strings.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A dot-separated scope name such as `string.quoted.double.json`, stored as
/// an index into the global scope table.
///
/// Scopes created from equal strings compare equal; comparison and hashing
/// never touch the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scope(u32);

impl Scope {
    /// Interns a single scope name.
    pub fn new(name: &str) -> Scope {
        lock_scope_table().intern(name)
    }

    /// Parses a rule `name`/`contentName` value. TextMate allows several
    /// scope names separated by whitespace; each word becomes one scope.
    /// An empty or all-whitespace value yields no scopes.
    pub fn parse_list(value: &str) -> Vec<Scope> {
        value.split_whitespace().map(Scope::new).collect()
    }

    /// The scope name as a string. Allocates; meant for display and output,
    /// not for hot paths.
    pub fn build_string(self) -> String {
        lock_scope_table().resolve(self).to_string()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", lock_scope_table().resolve(*self))
    }
}

impl Serialize for Scope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(lock_scope_table().resolve(*self))
    }
}

impl<'de> Deserialize<'de> for Scope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Scope::new(&name))
    }
}

/// Global name → symbol table. Grammars loaded anywhere in the process share
/// it, so scopes from different grammars stay comparable.
#[derive(Default)]
struct ScopeTable {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl ScopeTable {
    fn intern(&mut self, name: &str) -> Scope {
        if let Some(&id) = self.index.get(name) {
            return Scope(id);
        }
        let id = u32::try_from(self.names.len()).expect("scope table overflow");
        self.names.push(name.to_owned());
        self.index.insert(name.to_owned(), id);
        Scope(id)
    }

    fn resolve(&self, scope: Scope) -> &str {
        &self.names[scope.0 as usize]
    }
}

static SCOPE_TABLE: LazyLock<Mutex<ScopeTable>> =
    LazyLock::new(|| Mutex::new(ScopeTable::default()));

fn lock_scope_table() -> MutexGuard<'static, ScopeTable> {
    SCOPE_TABLE.lock().expect("scope table poisoned")
}
