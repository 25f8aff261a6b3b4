//! Time-ordered, prefix-addressable atom identifiers.
//!
//! An id is `"<repo>-<26char>"`. The 26-character tail is a 10-character
//! millisecond timestamp followed by 16 random characters, both in Crockford
//! base32, so ids sort lexicographically by creation time while the 80-bit
//! random suffix makes same-millisecond collisions a non-issue.
//!
//! Humans never type 26 characters. [`shorten`] computes the minimal
//! unambiguous prefix of the random portion (at least 4 characters) and
//! [`resolve`] maps such a prefix back to a full id, after normalizing the
//! characters people routinely confuse: input is uppercased, then
//! `I -> 1`, `L -> 1`, `O -> 0`. The Crockford alphabet omits I, L, O and U
//! precisely so this mapping is unambiguous.

use crate::domain::AtomId;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;

/// Crockford base32 alphabet (no I, L, O, U).
const ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

/// Length of the timestamp portion.
pub const TIME_LEN: usize = 10;

/// Length of the random portion.
pub const RAND_LEN: usize = 16;

/// Total length of the id tail after the repo prefix.
pub const SUFFIX_LEN: usize = TIME_LEN + RAND_LEN;

/// Minimum prefix length [`shorten`] will produce.
pub const MIN_PREFIX: usize = 4;

/// Generate a new id for the given repository at the given instant.
///
/// Exposed with an explicit timestamp so tests can pin ordering; use
/// [`new_id`] for the wall-clock version.
#[must_use]
pub fn new_id_at(repo_name: &str, at: DateTime<Utc>) -> AtomId {
    let mut tail = String::with_capacity(SUFFIX_LEN);
    tail.push_str(&encode_timestamp(at));

    let mut rng = rand::rng();
    for _ in 0..RAND_LEN {
        let idx = rng.random_range(0..ALPHABET.len());
        tail.push(ALPHABET[idx] as char);
    }

    AtomId::new(format!("{repo_name}-{tail}"))
}

/// Generate a new id for the given repository, stamped now.
#[must_use]
pub fn new_id(repo_name: &str) -> AtomId {
    new_id_at(repo_name, Utc::now())
}

/// Encode a timestamp as 10 Crockford base32 characters.
///
/// Milliseconds since the Unix epoch, most significant digit first and
/// zero-padded, so encoded values sort the same way the instants do.
/// Pre-epoch timestamps clamp to zero.
#[must_use]
pub fn encode_timestamp(at: DateTime<Utc>) -> String {
    let mut millis = u64::try_from(at.timestamp_millis()).unwrap_or(0);
    let mut buf = [b'0'; TIME_LEN];
    for slot in buf.iter_mut().rev() {
        *slot = ALPHABET[(millis % 32) as usize];
        millis /= 32;
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Normalize user input: uppercase, then map the confusable characters
/// `I`/`L` to `1` and `O` to `0`.
#[must_use]
pub fn normalize(input: &str) -> String {
    input
        .chars()
        .map(|c| match c.to_ascii_uppercase() {
            'I' | 'L' => '1',
            'O' => '0',
            upper => upper,
        })
        .collect()
}

/// Index over the randomness portion of every known id.
///
/// The exact map is keyed by the normalized full id; the trie is keyed by
/// the 16-character randomness so short prefixes resolve fast. The record
/// store owns one of these and keeps it in lockstep with the atom set.
#[derive(Debug, Default)]
pub struct IdIndex {
    exact: HashMap<String, AtomId>,
    trie: TrieNode,
}

#[derive(Debug, Default)]
struct TrieNode {
    children: HashMap<char, TrieNode>,
    /// Ids whose randomness ends exactly here. A vec because distinct atoms
    /// can share randomness across repos.
    ids: Vec<AtomId>,
}

impl IdIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an id. Ids without a well-formed 26-character tail are still
    /// findable by exact match, just not by prefix.
    pub fn insert(&mut self, id: &AtomId) {
        self.exact.insert(normalize(id.as_str()), id.clone());

        if let Some(randomness) = id.randomness() {
            let mut node = &mut self.trie;
            for c in normalize(randomness).chars() {
                node = node.children.entry(c).or_default();
            }
            if !node.ids.contains(id) {
                node.ids.push(id.clone());
            }
        }
    }

    /// Remove an id; a no-op if it was never indexed.
    pub fn remove(&mut self, id: &AtomId) {
        self.exact.remove(&normalize(id.as_str()));

        if let Some(randomness) = id.randomness() {
            remove_from_trie(&mut self.trie, &normalize(randomness), id);
        }
    }

    /// Number of exactly-indexed ids.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exact.len()
    }

    /// Whether the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// All ids whose randomness starts with the (already normalized) prefix.
    fn prefix_matches(&self, prefix: &str) -> Vec<AtomId> {
        let mut node = &self.trie;
        for c in prefix.chars() {
            match node.children.get(&c) {
                Some(child) => node = child,
                None => return Vec::new(),
            }
        }

        // Collect everything below, iteratively.
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(node) = stack.pop() {
            out.extend(node.ids.iter().cloned());
            stack.extend(node.children.values());
        }
        out.sort();
        out
    }
}

fn remove_from_trie(node: &mut TrieNode, key: &str, id: &AtomId) -> bool {
    match key.chars().next() {
        None => {
            node.ids.retain(|existing| existing != id);
        }
        Some(c) => {
            let Some(child) = node.children.get_mut(&c) else {
                return false;
            };
            let rest: String = key.chars().skip(1).collect();
            if remove_from_trie(child, &rest, id) {
                node.children.remove(&c);
            }
        }
    }
    node.ids.is_empty() && node.children.is_empty()
}

/// Compute the minimal disambiguating prefix of an id's randomness.
///
/// At least [`MIN_PREFIX`] characters; grows until no *other* indexed id
/// shares the prefix. Falls back to the full id string when the id has no
/// well-formed randomness portion.
#[must_use]
pub fn shorten(id: &AtomId, index: &IdIndex) -> String {
    let Some(randomness) = id.randomness() else {
        return id.as_str().to_string();
    };
    let normalized = normalize(randomness);

    for len in MIN_PREFIX..=RAND_LEN {
        let prefix: String = normalized.chars().take(len).collect();
        let matches = index.prefix_matches(&prefix);
        if matches.iter().all(|m| m == id) {
            return prefix;
        }
    }
    normalized
}

/// Resolve user input to a full id.
///
/// Normalization is applied first. A normalized exact match on a full id
/// wins; otherwise the input is treated as a randomness prefix and looked
/// up in the trie, optionally scoped to ids whose repo prefix is
/// `scope`.
///
/// # Errors
///
/// [`Error::NotFound`] when nothing matches, [`Error::Ambiguous`] (carrying
/// the candidates) when more than one id matches.
pub fn resolve(input: &str, index: &IdIndex, scope: Option<&str>) -> Result<AtomId> {
    let normalized = normalize(input);

    if let Some(id) = index.exact.get(&normalized) {
        return Ok(id.clone());
    }

    let mut matches = index.prefix_matches(&normalized);
    if let Some(repo) = scope {
        let prefix = format!("{repo}-");
        matches.retain(|id| id.as_str().starts_with(&prefix));
    }

    match matches.len() {
        0 => Err(Error::NotFound(input.to_string())),
        1 => Ok(matches.remove(0)),
        _ => Err(Error::Ambiguous {
            input: normalized,
            candidates: matches,
        }),
    }
}
