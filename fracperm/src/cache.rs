//! Memoisation of parsed permission expressions.

use crate::error::Error;
use crate::invariant::{self, InvariantChecker, InvariantMerger};
use crate::sig::{self, Postcondition, Precondition, SignatureOptions, Spaces};
use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use perm_parse::Expr;

/// Least recently used cache from expression texts to expressions.
///
/// A cache with capacity 0 parses every text anew.
#[derive(Debug)]
pub struct ParseCache {
    capacity: usize,
    /// most recently used first
    entries: VecDeque<(String, Expr<String>)>,
    hits: usize,
    misses: usize,
}

impl Default for ParseCache {
    fn default() -> Self {
        Self::new(64)
    }
}

impl ParseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Parse a text, where an empty text denotes `true`.
    pub fn parse(&mut self, text: &str) -> Result<Expr<String>, Error> {
        if text.trim().is_empty() {
            return Ok(Expr::Bool(true));
        }
        if let Some(pos) = self.entries.iter().position(|(t, _)| t == text) {
            if let Some(entry) = self.entries.remove(pos) {
                self.hits += 1;
                let expr = entry.1.clone();
                self.entries.push_front(entry);
                return Ok(expr);
            }
        }
        self.misses += 1;
        let expr: Expr<String> = perm_parse::parse(text).map_err(|error| Error::Parse {
            text: text.to_string(),
            error,
        })?;
        if self.capacity > 0 {
            if self.entries.len() >= self.capacity {
                self.entries.pop_back();
            }
            self.entries.push_front((text.to_string(), expr.clone()));
        }
        Ok(expr)
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }

    /// Parse a pre- and postcondition, see [`sig::parse_signature`].
    pub fn parse_signature<'s>(
        &mut self,
        pre: &str,
        post: &str,
        spaces: &Spaces<'s>,
        options: &SignatureOptions,
    ) -> Result<(Precondition<'s>, Postcondition<'s>), Error> {
        sig::parse_signature_with(self, pre, post, spaces, options)
    }

    /// Parse a state invariant, see [`invariant::parse_invariant`].
    pub fn parse_invariant<'s>(
        &mut self,
        text: &str,
        field_spaces: &Spaces<'s>,
    ) -> Result<(InvariantMerger<'s>, InvariantChecker<'s>), Error> {
        invariant::parse_invariant_with(self, text, field_spaces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lru() -> Result<(), Error> {
        let mut cache = ParseCache::new(2);
        cache.parse("full(this)")?;
        cache.parse("pure(this)")?;
        cache.parse("full(this)")?;
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
        // evicts the least recently used `pure(this)`
        cache.parse("share(x)")?;
        assert_eq!(cache.len(), 2);
        cache.parse("full(this)")?;
        cache.parse("pure(this)")?;
        assert_eq!((cache.hits(), cache.misses()), (2, 4));
        Ok(())
    }

    #[test]
    fn disabled() -> Result<(), Error> {
        let mut cache = ParseCache::new(0);
        let e1 = cache.parse("full(this) in Open")?;
        let e2 = cache.parse("full(this) in Open")?;
        assert_eq!(e1, e2);
        assert_eq!((cache.hits(), cache.misses()), (0, 2));
        assert!(cache.is_empty());
        assert_eq!(cache.parse(" ")?, Expr::Bool(true));
        assert!(matches!(cache.parse("full(this"), Err(Error::Parse { .. })));
        Ok(())
    }
}
