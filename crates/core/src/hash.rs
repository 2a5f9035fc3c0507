// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structural fingerprints for recipe values.
//!
//! Job identity is the SHA-256 of a canonical byte encoding of the job's
//! class name and kept constructor arguments. The encoding is purely
//! structural: a node is `(Tag, part, part, ...)`, nodes longer than
//! [`INLINE_LIMIT`] bytes are replaced by their SHA-256 digest, sets and
//! maps are ordered by the byte ordering of their element encodings.
//!
//! Stability contract: the bytes produced for a given abstract value must
//! never change between releases. Any change here forces a global
//! recomputation of every work directory.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// Nodes longer than this are collapsed to their SHA-256 digest.
pub const INLINE_LIMIT: usize = 4096;

/// Maximum encoder recursion before a cycle is assumed.
pub const MAX_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("value cannot be fingerprinted: {0}")]
    NonHashable(String),
    #[error("fingerprint recursion exceeded {MAX_DEPTH} levels; cyclic value in recipe")]
    Cycle,
}

/// A value that can contribute to a job fingerprint.
///
/// Returns the canonical node encoding for the value. Containers recurse
/// through [`Encoder::encode`], which enforces the depth limit.
pub trait Fingerprint {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError>;
}

/// Depth-tracking encoder threaded through fingerprint computation.
pub struct Encoder {
    depth: usize,
}

impl Encoder {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Encode a child value, guarding against unbounded recursion.
    pub fn encode(&mut self, value: &dyn Fingerprint) -> Result<Vec<u8>, HashError> {
        if self.depth >= MAX_DEPTH {
            return Err(HashError::Cycle);
        }
        self.depth += 1;
        let out = value.fingerprint(self);
        self.depth -= 1;
        out
    }

    /// A node with a tag and a single raw payload.
    pub fn leaf(&self, tag: &str, payload: &[u8]) -> Vec<u8> {
        seal(tag, std::slice::from_ref(&payload.to_vec()))
    }

    /// A node with a tag and already-encoded parts.
    pub fn group(&self, tag: &str, parts: &[Vec<u8>]) -> Vec<u8> {
        seal(tag, parts)
    }

    /// Start a record node (named fields in declaration order).
    ///
    /// Job argument hashing goes through this: the record name is the job's
    /// class name, and each kept argument is added with [`RecordEncoder::field`].
    /// Arguments excluded from hashing are simply never added.
    pub fn record(&mut self, name: &str) -> RecordEncoder<'_> {
        let head = self.leaf("Str", name.as_bytes());
        RecordEncoder {
            enc: self,
            parts: vec![head],
        }
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for record nodes. Fields hash in the order they are added.
pub struct RecordEncoder<'e> {
    enc: &'e mut Encoder,
    parts: Vec<Vec<u8>>,
}

impl RecordEncoder<'_> {
    pub fn field(&mut self, name: &str, value: &dyn Fingerprint) -> Result<&mut Self, HashError> {
        let key = self.enc.leaf("Str", name.as_bytes());
        let val = self.enc.encode(value)?;
        self.parts.push(seal("Field", &[key, val]));
        Ok(self)
    }

    pub fn finish(self) -> Vec<u8> {
        seal("Record", &self.parts)
    }
}

fn seal(tag: &str, parts: &[Vec<u8>]) -> Vec<u8> {
    let cap = tag.len() + 2 + parts.iter().map(|p| p.len() + 2).sum::<usize>();
    let mut out = Vec::with_capacity(cap);
    out.push(b'(');
    out.extend_from_slice(tag.as_bytes());
    for part in parts {
        out.extend_from_slice(b", ");
        out.extend_from_slice(part);
    }
    out.push(b')');
    if out.len() > INLINE_LIMIT {
        Sha256::digest(&out).to_vec()
    } else {
        out
    }
}

/// Canonical encoding of a value.
pub fn fingerprint(value: &dyn Fingerprint) -> Result<Vec<u8>, HashError> {
    Encoder::new().encode(value)
}

/// SHA-256 over the canonical encoding.
pub fn digest(value: &dyn Fingerprint) -> Result<[u8; 32], HashError> {
    Ok(digest_encoding(&fingerprint(value)?))
}

/// SHA-256 over an already-computed canonical encoding.
pub fn digest_encoding(encoding: &[u8]) -> [u8; 32] {
    Sha256::digest(encoding).into()
}

/// URL-safe base64 (no padding) of [`digest`]; the hash part of a sisyphus-id.
pub fn short_hash(value: &dyn Fingerprint) -> Result<String, HashError> {
    Ok(encode_digest(&digest(value)?))
}

/// Render a digest the way sisyphus-ids do.
pub fn encode_digest(digest: &[u8]) -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    URL_SAFE_NO_PAD.encode(digest)
}

/// Explicit byte-string wrapper.
///
/// `Vec<u8>` fingerprints as a sequence of integers; wrap raw bytes in this
/// to encode them as one opaque payload instead.
pub struct Bytes<'a>(pub &'a [u8]);

impl Fingerprint for Bytes<'_> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        Ok(enc.leaf("Bytes", self.0))
    }
}

macro_rules! fingerprint_int {
    ($($ty:ty)+) => {
        $(
            impl Fingerprint for $ty {
                fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
                    Ok(enc.leaf("Int", self.to_string().as_bytes()))
                }
            }
        )+
    };
}

fingerprint_int!(i8 i16 i32 i64 i128 isize u8 u16 u32 u64 u128 usize);

impl Fingerprint for bool {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        Ok(enc.leaf("Bool", if *self { b"true" } else { b"false" }))
    }
}

impl Fingerprint for f64 {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        if !self.is_finite() {
            return Err(HashError::NonHashable(format!("non-finite float {self}")));
        }
        // `{}` on floats is the shortest round-trip representation.
        Ok(enc.leaf("Float", self.to_string().as_bytes()))
    }
}

impl Fingerprint for f32 {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        if !self.is_finite() {
            return Err(HashError::NonHashable(format!("non-finite float {self}")));
        }
        Ok(enc.leaf("Float", self.to_string().as_bytes()))
    }
}

impl Fingerprint for str {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        Ok(enc.leaf("Str", self.as_bytes()))
    }
}

impl Fingerprint for String {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        self.as_str().fingerprint(enc)
    }
}

impl Fingerprint for () {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        Ok(enc.group("Unit", &[]))
    }
}

impl<T: Fingerprint> Fingerprint for Option<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        match self {
            None => Ok(enc.group("None", &[])),
            Some(v) => enc.encode(v),
        }
    }
}

impl<T: Fingerprint + ?Sized> Fingerprint for &T {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        (**self).fingerprint(enc)
    }
}

impl<T: Fingerprint + ?Sized> Fingerprint for Box<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        (**self).fingerprint(enc)
    }
}

impl<T: Fingerprint + ?Sized> Fingerprint for std::sync::Arc<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        (**self).fingerprint(enc)
    }
}

fn seq_node<'a, I>(enc: &mut Encoder, len: usize, items: I) -> Result<Vec<u8>, HashError>
where
    I: IntoIterator<Item = &'a dyn Fingerprint>,
{
    let mut parts = Vec::with_capacity(len + 1);
    parts.push(enc.leaf("Int", len.to_string().as_bytes()));
    for item in items {
        parts.push(enc.encode(item)?);
    }
    Ok(enc.group("Seq", &parts))
}

impl<T: Fingerprint> Fingerprint for [T] {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        seq_node(enc, self.len(), self.iter().map(|v| v as &dyn Fingerprint))
    }
}

impl<T: Fingerprint> Fingerprint for Vec<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        self.as_slice().fingerprint(enc)
    }
}

impl<A: Fingerprint, B: Fingerprint> Fingerprint for (A, B) {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        seq_node(enc, 2, [&self.0 as &dyn Fingerprint, &self.1])
    }
}

impl<A: Fingerprint, B: Fingerprint, C: Fingerprint> Fingerprint for (A, B, C) {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        seq_node(enc, 3, [&self.0 as &dyn Fingerprint, &self.1, &self.2])
    }
}

fn set_node<'a, I>(enc: &mut Encoder, items: I) -> Result<Vec<u8>, HashError>
where
    I: IntoIterator<Item = &'a dyn Fingerprint>,
{
    let mut parts = Vec::new();
    for item in items {
        parts.push(enc.encode(item)?);
    }
    parts.sort();
    Ok(enc.group("Set", &parts))
}

impl<T: Fingerprint> Fingerprint for BTreeSet<T> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        set_node(enc, self.iter().map(|v| v as &dyn Fingerprint))
    }
}

impl<T: Fingerprint, S> Fingerprint for HashSet<T, S> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        set_node(enc, self.iter().map(|v| v as &dyn Fingerprint))
    }
}

fn map_node<'a, K, V, I>(enc: &mut Encoder, entries: I) -> Result<Vec<u8>, HashError>
where
    K: AsRef<str> + 'a,
    V: Fingerprint + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut parts = Vec::new();
    for (key, value) in entries {
        let k = enc.leaf("Str", key.as_ref().as_bytes());
        let v = enc.encode(value)?;
        parts.push(seal("Field", &[k, v]));
    }
    parts.sort();
    Ok(enc.group("Map", &parts))
}

impl<K: AsRef<str>, V: Fingerprint> Fingerprint for BTreeMap<K, V> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        map_node(enc, self.iter())
    }
}

impl<K: AsRef<str>, V: Fingerprint, S> Fingerprint for HashMap<K, V, S> {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        map_node(enc, self.iter())
    }
}

impl Fingerprint for std::path::Path {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        Ok(enc.leaf("OsPath", self.to_string_lossy().as_bytes()))
    }
}

impl Fingerprint for std::path::PathBuf {
    fn fingerprint(&self, enc: &mut Encoder) -> Result<Vec<u8>, HashError> {
        self.as_path().fingerprint(enc)
    }
}

#[cfg(test)]
#[path = "hash_tests.rs"]
mod tests;
