use std::collections::HashMap;

use cache_smoke::{Backend, CacheClient, SmokeResult};

/// Misbehaviour an [`InMemoryCache`] can be told to exhibit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Acknowledge writes without storing them.
    DropWrites,
    /// Append a suffix to every value read back.
    CorruptReads(String),
    /// Only store writes to keys not starting with this prefix.
    DropPrefix(String),
}

/// A `CacheClient` that keeps everything in a `HashMap`.
///
/// Every call is recorded so tests can assert on the exact sequence of
/// operations a check performed.
#[derive(Debug)]
pub struct InMemoryCache {
    backend: Backend,
    entries: HashMap<String, String>,
    fault: Option<Fault>,
    log: Vec<String>,
}

impl InMemoryCache {
    pub fn new(backend: Backend) -> Self {
        InMemoryCache {
            backend,
            entries: HashMap::new(),
            fault: None,
            log: Vec::new(),
        }
    }

    pub fn with_fault(mut self, fault: Fault) -> Self {
        self.fault = Some(fault);
        self
    }

    /// Store a value directly, bypassing faults and the call log.
    pub fn seed(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_owned(), value.to_owned());
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every operation so far, as `"set key value"` or `"get key"`.
    pub fn log(&self) -> &[String] {
        &self.log
    }
}

impl CacheClient for InMemoryCache {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn set(&mut self, key: &str, value: &str) -> SmokeResult<()> {
        self.log.push(format!("set {key} {value}"));
        let dropped = match &self.fault {
            Some(Fault::DropWrites) => true,
            Some(Fault::DropPrefix(prefix)) => key.starts_with(prefix.as_str()),
            _ => false,
        };
        if !dropped {
            self.entries.insert(key.to_owned(), value.to_owned());
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> SmokeResult<Option<String>> {
        self.log.push(format!("get {key}"));
        let value = self.entries.get(key).cloned();
        Ok(match &self.fault {
            Some(Fault::CorruptReads(suffix)) => value.map(|v| v + suffix),
            _ => value,
        })
    }
}
