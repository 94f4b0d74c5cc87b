//! Content-addressed interning of strings and source locations
//!
//! Labels, file names and function names repeat across millions of events, so the
//! store keeps each distinct text once and refers to it by a [`StringId`]. Source
//! locations are interned the same way on their `(file, func, line)` triple.
//!
//! Interning is a pure function of content: the same text always yields the same
//! id, which makes re-ingesting or merging trace chunks safe. The find-or-insert
//! step runs under a single lock, so ingestion workers may intern concurrently
//! through a shared `&Interner` without ever allocating two ids for one value.
//!
//! # Example
//!
//! ```
//! use taskscope::interner::Interner;
//!
//! let interner = Interner::new();
//! let a = interner.intern_location("main.c", "compute", 42);
//! let b = interner.intern_location("main.c", "compute", 42);
//! assert_eq!(a, b);
//! assert_eq!(interner.resolve_location(a).unwrap().to_string(), "main.c:42 in compute");
//! ```

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Identifier of an interned string
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StringId(pub u32);

/// Identifier of an interned source location
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub u32);

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interned form of a source location: string ids plus a line number
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocationKey {
    pub file: StringId,
    pub func: StringId,
    pub line: u32,
}

/// Resolved source location, used for reporting
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub func: String,
    pub line: u32,
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self {
            file: "?".to_string(),
            func: "?".to_string(),
            line: 0,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} in {}", self.file, self.line, self.func)
    }
}

#[derive(Debug, Default)]
struct Tables {
    strings: Vec<Arc<str>>,
    string_ids: FnvHashMap<Arc<str>, StringId>,
    locations: Vec<LocationKey>,
    location_ids: FnvHashMap<LocationKey, LocationId>,
}

impl Tables {
    fn intern(&mut self, text: &str) -> StringId {
        if let Some(&id) = self.string_ids.get(text) {
            return id;
        }
        let id = StringId(self.strings.len() as u32);
        let text: Arc<str> = Arc::from(text);
        self.strings.push(text.clone());
        self.string_ids.insert(text, id);
        id
    }

    fn intern_key(&mut self, key: LocationKey) -> LocationId {
        if let Some(&id) = self.location_ids.get(&key) {
            return id;
        }
        let id = LocationId(self.locations.len() as u32);
        self.locations.push(key);
        self.location_ids.insert(key, id);
        id
    }
}

/// Thread-safe string and source-location interner
#[derive(Debug, Default)]
pub struct Interner {
    tables: Mutex<Tables>,
}

impl Interner {
    /// Create an empty interner
    pub fn new() -> Self {
        Self::default()
    }

    // Tables stay consistent even if a holder panicked: every insert pushes
    // before it indexes, and lookups tolerate both.
    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Intern `text`, returning the existing id if it was seen before
    pub fn intern(&self, text: &str) -> StringId {
        self.tables().intern(text)
    }

    /// Intern a `(file, func, line)` triple
    ///
    /// File and function names are interned in the same critical section as the
    /// triple itself.
    pub fn intern_location(&self, file: &str, func: &str, line: u32) -> LocationId {
        let mut tables = self.tables();
        let file = tables.intern(file);
        let func = tables.intern(func);
        tables.intern_key(LocationKey { file, func, line })
    }

    /// Intern a location whose strings are already interned
    ///
    /// Returns `None` if either string id is unknown.
    pub fn intern_location_key(&self, key: LocationKey) -> Option<LocationId> {
        let mut tables = self.tables();
        let known = |id: StringId| (id.0 as usize) < tables.strings.len();
        if !known(key.file) || !known(key.func) {
            return None;
        }
        Some(tables.intern_key(key))
    }

    /// Id of `text` if it has been interned; never allocates
    pub fn lookup(&self, text: &str) -> Option<StringId> {
        self.tables().string_ids.get(text).copied()
    }

    /// Id of a location triple if it has been interned; never allocates
    pub fn lookup_location(&self, file: &str, func: &str, line: u32) -> Option<LocationId> {
        let tables = self.tables();
        let file = *tables.string_ids.get(file)?;
        let func = *tables.string_ids.get(func)?;
        tables
            .location_ids
            .get(&LocationKey { file, func, line })
            .copied()
    }

    /// Text behind a string id
    pub fn resolve(&self, id: StringId) -> Option<Arc<str>> {
        self.tables().strings.get(id.0 as usize).cloned()
    }

    /// Interned key behind a location id
    pub fn location_key(&self, id: LocationId) -> Option<LocationKey> {
        self.tables().locations.get(id.0 as usize).copied()
    }

    /// Fully resolved location behind a location id
    pub fn resolve_location(&self, id: LocationId) -> Option<SourceLocation> {
        let tables = self.tables();
        let key = tables.locations.get(id.0 as usize)?;
        Some(SourceLocation {
            file: tables.strings.get(key.file.0 as usize)?.to_string(),
            func: tables.strings.get(key.func.0 as usize)?.to_string(),
            line: key.line,
        })
    }

    /// All interned strings, ordered by id
    pub fn strings(&self) -> Vec<(StringId, Arc<str>)> {
        self.tables()
            .strings
            .iter()
            .enumerate()
            .map(|(i, s)| (StringId(i as u32), s.clone()))
            .collect()
    }

    /// All interned locations, ordered by id
    pub fn locations(&self) -> Vec<(LocationId, LocationKey)> {
        self.tables()
            .locations
            .iter()
            .enumerate()
            .map(|(i, key)| (LocationId(i as u32), *key))
            .collect()
    }

    pub fn string_count(&self) -> usize {
        self.tables().strings.len()
    }

    pub fn location_count(&self) -> usize {
        self.tables().locations.len()
    }
}
