use crate::buffer::PooledBuf;
use crate::pool::Pool;

/// A logical buffer assembled from multiple pool-sized segments.
///
/// Used when a request exceeds the largest size class: the assembler strings
/// together top-class segments plus one tail segment, so oversize requests
/// still draw on pooled memory instead of the raw heap. Position and limit
/// address the concatenation of the segments; the segments' own cursors are
/// not consulted.
#[derive(Debug)]
pub struct CompositeBuf {
    segments: Vec<PooledBuf>,
    position: usize,
    limit: usize,
    appendable: bool,
}

impl CompositeBuf {
    pub(crate) fn new() -> Self {
        Self {
            segments: Vec::new(),
            position: 0,
            limit: 0,
            appendable: true,
        }
    }

    /// Wraps an existing pooled buffer as the first segment.
    pub(crate) fn from_initial(initial: PooledBuf) -> Self {
        Self {
            segments: vec![initial],
            position: 0,
            limit: 0,
            appendable: true,
        }
    }

    /// Sum of the segment capacities.
    pub fn capacity(&self) -> usize {
        self.segments.iter().map(PooledBuf::capacity).sum()
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    /// True while further segments may be appended.
    #[inline]
    pub fn appendable(&self) -> bool {
        self.appendable
    }

    pub fn set_appendable(&mut self, appendable: bool) {
        self.appendable = appendable;
    }

    pub fn set_position(&mut self, position: usize) {
        assert!(
            position <= self.limit,
            "position {position} beyond limit {}",
            self.limit
        );
        self.position = position;
    }

    pub fn set_limit(&mut self, limit: usize) {
        assert!(
            limit <= self.capacity(),
            "limit {limit} beyond capacity {}",
            self.capacity()
        );
        self.limit = limit;
        self.position = self.position.min(limit);
    }

    pub fn clear(&mut self) {
        self.position = 0;
        self.limit = self.capacity();
    }

    /// Appends a segment. Panics when the composite is frozen.
    pub fn append(&mut self, segment: PooledBuf) {
        assert!(self.appendable, "append to a frozen composite buffer");
        self.segments.push(segment);
    }

    /// Drops trailing segments that lie wholly past the limit.
    pub fn trim(&mut self) {
        let mut covered = 0;
        let mut keep = 0;
        while keep < self.segments.len() && covered < self.limit {
            covered += self.segments[keep].capacity();
            keep += 1;
        }
        // Truncation disposes the removed segments.
        self.segments.truncate(keep);
    }

    /// The segments, in order.
    pub fn segments(&self) -> &[PooledBuf] {
        &self.segments
    }

    /// Copies `src` to the current position and advances it.
    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.remaining(),
            "put of {} bytes overflows the {} remaining",
            src.len(),
            self.remaining()
        );
        let position = self.position;
        self.write_at(position, src);
        self.position += src.len();
    }

    /// Copies from the position into `dst` and advances.
    pub fn copy_to_slice(&mut self, dst: &mut [u8]) {
        assert!(
            dst.len() <= self.remaining(),
            "read of {} bytes exceeds the {} remaining",
            dst.len(),
            self.remaining()
        );
        self.read_at(self.position, dst);
        self.position += dst.len();
    }

    /// Absolute write spanning segment boundaries; cursors are untouched.
    pub(crate) fn write_at(&mut self, at: usize, src: &[u8]) {
        assert!(
            at + src.len() <= self.capacity(),
            "write escapes the composite"
        );
        let mut segment_start = 0;
        let mut written = 0;
        for segment in &mut self.segments {
            if written == src.len() {
                break;
            }
            let cap = segment.capacity();
            let abs = at + written;
            if abs < segment_start + cap {
                let offset = abs - segment_start;
                let take = (cap - offset).min(src.len() - written);
                segment.write_at(offset, &src[written..written + take]);
                written += take;
            }
            segment_start += cap;
        }
    }

    /// Absolute read spanning segment boundaries; cursors are untouched.
    pub(crate) fn read_at(&self, at: usize, dst: &mut [u8]) {
        assert!(
            at + dst.len() <= self.capacity(),
            "read escapes the composite"
        );
        let mut segment_start = 0;
        let mut read = 0;
        for segment in &self.segments {
            if read == dst.len() {
                break;
            }
            let cap = segment.capacity();
            let abs = at + read;
            if abs < segment_start + cap {
                let offset = abs - segment_start;
                let take = (cap - offset).min(dst.len() - read);
                segment.read_at(offset, &mut dst[read..read + take]);
                read += take;
            }
            segment_start += cap;
        }
    }

    /// Disposes every segment and empties the composite.
    pub fn dispose(&mut self) {
        for mut segment in self.segments.drain(..) {
            segment.dispose();
        }
        self.position = 0;
        self.limit = 0;
    }
}

/// Builds and extends composites from the pool table.
///
/// Greedy assembly: top-class segments while the outstanding bytes cover a
/// whole one, then a single tail segment from the smallest class covering the
/// remainder.
pub(crate) struct CompositeAssembler<'a> {
    pools: &'a [Pool],
}

impl<'a> CompositeAssembler<'a> {
    pub(crate) fn new(pools: &'a [Pool]) -> Self {
        debug_assert!(!pools.is_empty());
        Self { pools }
    }

    /// Fresh composite covering `total` bytes, limit set to exactly `total`.
    pub(crate) fn build(&self, total: usize) -> CompositeBuf {
        let mut composite = CompositeBuf::new();
        self.extend(&mut composite, total);
        composite.set_limit(total);
        composite
    }

    /// Appends segments until `extra` more bytes are covered. A frozen
    /// composite is thawed for the duration and frozen again afterwards.
    pub(crate) fn extend(&self, composite: &mut CompositeBuf, mut extra: usize) {
        let was_appendable = composite.appendable();
        composite.set_appendable(true);

        let top = &self.pools[self.pools.len() - 1];
        while extra >= top.buffer_size() {
            composite.append(top.allocate());
            extra -= top.buffer_size();
        }
        if extra > 0 {
            let pool = match self.pools.iter().find(|p| p.buffer_size() >= extra) {
                Some(pool) => pool,
                None => panic!("no size class can cover a remainder of {extra} bytes"),
            };
            composite.append(pool.allocate());
        }

        composite.set_appendable(was_appendable);
    }
}
