//! Key subspaces
//!
//! A [`Subspace`] is a raw byte prefix under which a component keeps its
//! keys. Nesting uses the tuple encoding for labels, so sibling subspaces
//! can never produce overlapping key ranges.

use crate::key::{strinc, Key};

/// A prefix of the key space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subspace {
    prefix: Vec<u8>,
}

impl Subspace {
    /// Subspace over a raw prefix
    pub fn new(prefix: impl Into<Vec<u8>>) -> Self {
        Subspace { prefix: prefix.into() }
    }

    /// Root subspace for a labeled component
    pub fn from_label(label: &str) -> Self {
        Subspace { prefix: Key::from_str(label).pack() }
    }

    /// The raw prefix bytes
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Nested subspace under a label
    pub fn subspace(&self, label: &str) -> Subspace {
        let mut prefix = self.prefix.clone();
        prefix.extend_from_slice(&Key::from_str(label).pack());
        Subspace { prefix }
    }

    /// Absolute key for a tuple within this subspace
    pub fn pack(&self, key: &Key) -> Vec<u8> {
        self.pack_raw(&key.pack())
    }

    /// Absolute key for raw relative bytes within this subspace
    pub fn pack_raw(&self, relative: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.prefix.len() + relative.len());
        out.extend_from_slice(&self.prefix);
        out.extend_from_slice(relative);
        out
    }

    /// Strip the prefix from an absolute key, if it belongs to this subspace
    pub fn unpack_raw<'a>(&self, absolute: &'a [u8]) -> Option<&'a [u8]> {
        absolute.strip_prefix(self.prefix.as_slice())
    }

    /// Absolute `[begin, end)` bounds covering every key in this subspace
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        (self.prefix.clone(), strinc(&self.prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_unpack() {
        let sub = Subspace::from_label("store").subspace("r");
        let key = Key::from_int(7);
        let abs = sub.pack(&key);
        assert_eq!(sub.unpack_raw(&abs), Some(key.pack().as_slice()));
        assert_eq!(Subspace::from_label("other").unpack_raw(&abs), None);
    }

    #[test]
    fn test_sibling_subspaces_disjoint() {
        let root = Subspace::from_label("s");
        let (a_begin, a_end) = root.subspace("index").range();
        let (b_begin, b_end) = root.subspace("indexes").range();
        assert!(a_end <= b_begin || b_end <= a_begin);
    }

    #[test]
    fn test_range_covers_members() {
        let sub = Subspace::from_label("x");
        let (begin, end) = sub.range();
        let member = sub.pack(&Key::from_str("anything"));
        assert!(member >= begin && member < end);
    }
}
