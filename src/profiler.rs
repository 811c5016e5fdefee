//! Invocation profiler for the interpreter. Every call of a JIT candidate
//! is counted per method; once a method's count exceeds the threshold it is
//! considered hot and gets compiled.
use std::collections::HashMap;

use crate::class::{ClassId, MethodSymbol};

/// Identity of a method: its class and its index in the class's method
/// table. The index pins down the name and descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub class: ClassId,
    pub method: usize,
}

impl From<MethodSymbol> for MethodKey {
    fn from(symbol: MethodSymbol) -> Self {
        Self {
            class: symbol.class,
            method: symbol.method,
        }
    }
}

#[derive(Debug)]
pub struct Profiler {
    // Invocations before a method is considered hot.
    threshold: usize,
    // Record of methods and their invocation counts.
    records: HashMap<MethodKey, usize>,
}

impl Profiler {
    pub fn new(threshold: usize) -> Profiler {
        Profiler {
            threshold,
            records: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Records one invocation of `key`, returning the updated count.
    pub fn count_entry(&mut self, key: MethodKey) -> usize {
        let record = self.records.entry(key).or_insert(0);
        *record += 1;
        *record
    }

    pub fn count(&self, key: MethodKey) -> usize {
        self.records.get(&key).copied().unwrap_or(0)
    }

    pub fn is_hot(&self, key: MethodKey) -> bool {
        self.count(key) > self.threshold
    }
}

impl Default for Profiler {
    fn default() -> Self {
        Self::new(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(method: usize) -> MethodKey {
        MethodKey {
            class: ClassId::new(0),
            method,
        }
    }

    #[test]
    fn method_is_hot_after_exceeding_threshold() {
        let mut profiler = Profiler::default();
        assert_eq!(profiler.threshold(), 2);
        assert_eq!(profiler.count_entry(key(1)), 1);
        assert_eq!(profiler.count_entry(key(1)), 2);
        assert!(!profiler.is_hot(key(1)));
        profiler.count_entry(key(1));
        assert!(profiler.is_hot(key(1)));
        assert!(!profiler.is_hot(key(2)));
        assert_eq!(profiler.count(key(2)), 0);
    }

    #[test]
    fn zero_threshold_is_hot_on_first_call() {
        let mut profiler = Profiler::new(0);
        assert!(!profiler.is_hot(key(0)));
        profiler.count_entry(key(0));
        assert!(profiler.is_hot(key(0)));
    }
}
