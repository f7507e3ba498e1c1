//! Zero-copy text spans over shared line buffers, with an interning pool.
//!
//! A [`Span`] is an immutable view into an `Arc<str>` buffer. Records parsed
//! from one input line all borrow the same buffer, so field extraction never
//! copies text. Equality, ordering, and hashing are content-based: two spans
//! with equal character sequences compare equal regardless of which buffer
//! backs them.
//!
//! The [`InternPool`] deduplicates high-cardinality-but-repetitive values
//! (read-group ids, library names) to a canonical instance, after which
//! equality checks on interned spans degrade to pointer comparisons in the
//! common case.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::sharded::ShardedMap;

/// An immutable view into a shared text buffer.
///
/// Cloning a span is cheap (one `Arc` bump). The backing buffer is never
/// mutated after a record is parsed, so spans may be freely shared across
/// threads.
#[derive(Clone)]
pub struct Span {
    buf: Arc<str>,
    start: u32,
    len: u32,
}

impl Span {
    /// Creates a span covering an entire buffer.
    #[must_use]
    pub fn whole(buf: &Arc<str>) -> Self {
        Self { buf: Arc::clone(buf), start: 0, len: buf.len() as u32 }
    }

    /// Creates a span covering `[start, start + len)` of a buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds or does not fall on char
    /// boundaries (SAM text is ASCII, so byte offsets are char offsets).
    #[must_use]
    pub fn slice(buf: &Arc<str>, start: usize, len: usize) -> Self {
        assert!(buf.is_char_boundary(start) && buf.is_char_boundary(start + len));
        Self { buf: Arc::clone(buf), start: start as u32, len: len as u32 }
    }

    /// Creates a span backed by a fresh buffer holding `s`.
    ///
    /// Used for literal values ("*", "coordinate", rewritten RNAMEs); parsed
    /// fields should use [`Span::slice`] to share the line buffer instead.
    #[must_use]
    pub fn from_str(s: &str) -> Self {
        let buf: Arc<str> = Arc::from(s);
        Self::whole(&buf)
    }

    /// The span's text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.buf[self.start as usize..(self.start + self.len) as usize]
    }

    /// The span's bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.as_str().as_bytes()
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the span is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Byte at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.len()`.
    #[must_use]
    pub fn byte_at(&self, index: usize) -> u8 {
        self.as_bytes()[index]
    }

    /// A sub-span sharing this span's buffer.
    ///
    /// # Panics
    ///
    /// Panics if `start + len > self.len()`.
    #[must_use]
    pub fn sub(&self, start: usize, len: usize) -> Self {
        assert!(start + len <= self.len());
        Self::slice(&self.buf, self.start as usize + start, len)
    }

    /// Whether two spans are views of the same bytes of the same buffer.
    ///
    /// Content-equal spans from different buffers return `false`; this is the
    /// identity check the interning tests rely on.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buf, &other.buf) && self.start == other.start && self.len == other.len
    }
}

impl PartialEq for Span {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Span {}

impl PartialOrd for Span {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Span {
    /// Lexicographic by byte over the common prefix, then by length.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        if self.ptr_eq(other) {
            std::cmp::Ordering::Equal
        } else {
            self.as_bytes().cmp(other.as_bytes())
        }
    }
}

impl Hash for Span {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Span({:?})", self.as_str())
    }
}

impl PartialEq<&str> for Span {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// Interning pool mapping span content to one canonical instance.
///
/// Owned by a pipeline run, not a process global, so independent runs (and
/// tests) never share state.
#[derive(Default)]
pub struct InternPool {
    pool: ShardedMap<Span, Span>,
}

impl InternPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical span for this content.
    ///
    /// Concurrent inserts of equal content agree on one winner; the losing
    /// candidate is discarded and the winner returned.
    #[must_use]
    pub fn intern(&self, span: &Span) -> Span {
        self.pool.get_or_insert_with(span.clone(), || span.clone())
    }

    /// Number of distinct interned values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pool.len()
    }

    /// Whether the pool is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pool.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(span: &Span) -> u64 {
        let mut h = DefaultHasher::new();
        span.hash(&mut h);
        h.finish()
    }

    #[test]
    fn test_equality_across_buffers() {
        let a: Arc<str> = Arc::from("read1\t99\tchr1");
        let b: Arc<str> = Arc::from("xyz read1 tail");
        let sa = Span::slice(&a, 0, 5);
        let sb = Span::slice(&b, 4, 5);
        assert_eq!(sa, sb);
        assert_eq!(hash_of(&sa), hash_of(&sb));
        assert!(!sa.ptr_eq(&sb));
    }

    #[test]
    fn test_ordering() {
        let buf: Arc<str> = Arc::from("abcabd");
        let ab_c = Span::slice(&buf, 0, 3);
        let ab_d = Span::slice(&buf, 3, 3);
        let ab = Span::slice(&buf, 0, 2);
        assert!(ab_c < ab_d);
        // Shared prefix, shorter span sorts first
        assert!(ab < ab_c);
        assert_eq!(ab_c.cmp(&ab_c), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_byte_access() {
        let span = Span::from_str("10M5S");
        assert_eq!(span.len(), 5);
        assert_eq!(span.byte_at(2), b'M');
        assert!(!span.is_empty());
        assert!(Span::from_str("").is_empty());
    }

    #[test]
    fn test_intern_returns_canonical_instance() {
        let pool = InternPool::new();
        let a: Arc<str> = Arc::from("lib-A");
        let b: Arc<str> = Arc::from("lib-A");
        let first = pool.intern(&Span::whole(&a));
        let second = pool.intern(&Span::whole(&b));
        assert_eq!(first, second);
        assert!(first.ptr_eq(&second), "equal content must intern to one instance");
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_intern_distinct_content() {
        let pool = InternPool::new();
        let a = pool.intern(&Span::from_str("libA"));
        let b = pool.intern(&Span::from_str("libB"));
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_concurrent_intern_single_winner() {
        let pool = std::sync::Arc::new(InternPool::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = std::sync::Arc::clone(&pool);
                std::thread::spawn(move || pool.intern(&Span::from_str("shared-lib")))
            })
            .collect();
        let spans: Vec<Span> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(pool.len(), 1);
        for s in &spans[1..] {
            assert!(s.ptr_eq(&spans[0]));
        }
    }
}
