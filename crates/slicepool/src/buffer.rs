use crate::composite::CompositeBuf;
use crate::invariants::debug_assert_storage_len;
use crate::ring::{reclaim_storage, PoolSlice};
#[cfg(debug_assertions)]
use std::panic::Location;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

// =============================================================================
// SHARE-COUNT PROTOCOL
// =============================================================================
//
// A pool-owned buffer and every view derived from it (slice, duplicate,
// read-only, split) share one `BufCore`. The core holds the *full* backing
// region; handles carry their own window and cursors, so deriving a view
// never copies and splitting never reallocates.
//
// The count in the core tracks derivations, not handles: an origin starts at
// zero and every derived view adds one, so with H live handles the count is
// H - 1. Dispose decrements when it can; the one dispose that finds the count
// already at zero is the last holder and performs the return:
//
//   dispose:
//     already free         -> no-op
//     mark handle free; origin also raises `origin_free`
//     count > 0            -> decrement, stop (a sibling still holds it)
//     count == 0           -> last holder:
//         origin_free not raised -> the origin is still live and will finish
//         otherwise take the storage (exactly once) and offer it back to the
//         owning slice; on refusal the region drops to the allocator
//
// Exactly one handle ever observes the failed decrement, so the storage is
// taken exactly once no matter how disposals interleave across threads.
//
// Handles reach the bytes through raw pointers into the shared region. Sibling
// views may overlap (duplicate, read-only); writes go through `&mut self`
// methods that hold no reference across calls, and concurrent writes to
// overlapping windows from different threads are the caller's data race to
// avoid — a buffer handed to another thread is handed over, not shared, which
// is the same contract the surrounding I/O framework imposes.
//
// =============================================================================

pub(crate) struct BufCore {
    /// The full backing region, held leaked while any handle is live.
    data: *mut u8,
    len: usize,
    /// Raised by whichever dispose takes the storage out of the core.
    taken: AtomicBool,
    /// Derivation count; see the protocol above.
    share_count: AtomicU32,
    /// Raised when the origin handle itself is disposed.
    origin_free: AtomicBool,
    /// Non-owning in spirit: the slice outlives every buffer it ever handed
    /// out because slots store raw regions, never handles.
    slice: Arc<PoolSlice>,
}

// SAFETY: the share-count protocol gives the storage a single logical owner at
// hand-off points (slot swap on the way out, failed decrement on the way
// back), and byte access from live handles follows the aliasing contract
// documented above.
unsafe impl Send for BufCore {}
unsafe impl Sync for BufCore {}

impl Drop for BufCore {
    fn drop(&mut self) {
        if !*self.taken.get_mut() {
            // SAFETY: `data` is the region leaked for this core and nothing
            // took it, so this is the only owner.
            drop(unsafe { reclaim_storage(self.data, self.len) });
        }
    }
}

enum Disposal {
    AlreadyFree,
    /// A sibling (or the still-live origin) holds the storage.
    Pending,
    Returned,
    Dropped,
}

/// A pooled byte buffer, or a view into one.
///
/// Offers standard cursor semantics (`position <= limit <= capacity`) over a
/// window of the pooled region. Dropping a handle disposes it; the backing
/// region returns to its slice when the last handle of the family goes.
pub struct PooledBuf {
    core: Arc<BufCore>,
    /// Window start within the backing region.
    offset: usize,
    /// Window length; `capacity()` of this handle.
    window: usize,
    position: usize,
    limit: usize,
    read_only: bool,
    is_origin: bool,
    free: bool,
    #[cfg(debug_assertions)]
    disposed_at: Option<&'static Location<'static>>,
}

impl PooledBuf {
    /// Wraps a freshly claimed region as the pool-owned origin handle.
    pub(crate) fn origin(data: *mut u8, slice: Arc<PoolSlice>) -> Self {
        let len = slice.buffer_size();
        Self {
            core: Arc::new(BufCore {
                data,
                len,
                taken: AtomicBool::new(false),
                share_count: AtomicU32::new(0),
                origin_free: AtomicBool::new(false),
                slice,
            }),
            offset: 0,
            window: len,
            position: 0,
            limit: len,
            read_only: false,
            is_origin: true,
            free: false,
            #[cfg(debug_assertions)]
            disposed_at: None,
        }
    }

    // ---------------------------------------------------------------------
    // CURSORS
    // ---------------------------------------------------------------------

    /// Window length of this handle.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.window
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Bytes between position and limit.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.limit - self.position
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Moves the position. Panics if it would pass the limit.
    pub fn set_position(&mut self, position: usize) {
        self.check_dispose();
        assert!(
            position <= self.limit,
            "position {position} beyond limit {}",
            self.limit
        );
        self.position = position;
    }

    /// Moves the limit, clamping the position to it. Panics if it would pass
    /// the capacity.
    pub fn set_limit(&mut self, limit: usize) {
        self.check_dispose();
        assert!(
            limit <= self.window,
            "limit {limit} beyond capacity {}",
            self.window
        );
        self.limit = limit;
        self.position = self.position.min(limit);
    }

    /// Resets position to 0 and limit to capacity. Contents are untouched.
    pub fn clear(&mut self) {
        self.check_dispose();
        self.position = 0;
        self.limit = self.window;
    }

    // ---------------------------------------------------------------------
    // BYTE ACCESS
    // ---------------------------------------------------------------------

    /// The readable window, `[position, limit)`.
    pub fn as_slice(&self) -> &[u8] {
        self.check_dispose();
        // SAFETY: the window lies inside the backing region, which stays
        // leaked while this handle is live; see the aliasing contract above.
        unsafe { std::slice::from_raw_parts(self.data().add(self.position), self.remaining()) }
    }

    /// Copies `src` to the current position and advances it.
    pub fn put_slice(&mut self, src: &[u8]) {
        self.check_writable();
        assert!(
            src.len() <= self.remaining(),
            "put of {} bytes overflows the {} remaining",
            src.len(),
            self.remaining()
        );
        // SAFETY: destination range is inside the window; `src` is a separate
        // Rust allocation, so the ranges cannot overlap.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data().add(self.position), src.len());
        }
        self.position += src.len();
    }

    /// Writes one byte at the position and advances it.
    pub fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    /// Copies the source's remaining bytes here, advancing both cursors.
    pub fn put_from(&mut self, src: &mut PooledBuf) {
        self.check_writable();
        src.check_dispose();
        let n = src.remaining();
        assert!(
            n <= self.remaining(),
            "put of {n} bytes overflows the {} remaining",
            self.remaining()
        );
        // SAFETY: both ranges lie in leaked pooled regions; `copy` tolerates
        // the overlap two sibling views can produce.
        unsafe {
            ptr::copy(
                src.data().add(src.position),
                self.data().add(self.position),
                n,
            );
        }
        src.position += n;
        self.position += n;
    }

    /// Copies from the position into `dst` and advances.
    pub fn copy_to_slice(&mut self, dst: &mut [u8]) {
        self.check_dispose();
        assert!(
            dst.len() <= self.remaining(),
            "read of {} bytes exceeds the {} remaining",
            dst.len(),
            self.remaining()
        );
        // SAFETY: source range is inside the window; `dst` is a separate
        // allocation.
        unsafe {
            ptr::copy_nonoverlapping(self.data().add(self.position), dst.as_mut_ptr(), dst.len());
        }
        self.position += dst.len();
    }

    /// Reads one byte at the position and advances it.
    pub fn get_u8(&mut self) -> u8 {
        let mut byte = [0u8];
        self.copy_to_slice(&mut byte);
        byte[0]
    }

    /// Fills `[position, limit)` with `value` and advances to the limit.
    pub fn fill(&mut self, value: u8) {
        self.check_writable();
        // SAFETY: the filled range is inside the window.
        unsafe {
            ptr::write_bytes(self.data().add(self.position), value, self.remaining());
        }
        self.position = self.limit;
    }

    /// Absolute write into the window; cursors are untouched.
    pub(crate) fn write_at(&mut self, at: usize, src: &[u8]) {
        self.check_writable();
        assert!(at + src.len() <= self.window, "write escapes the window");
        // SAFETY: bounds checked against the window just above.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data().add(at), src.len());
        }
    }

    /// Absolute read from the window; cursors are untouched.
    pub(crate) fn read_at(&self, at: usize, dst: &mut [u8]) {
        self.check_dispose();
        assert!(at + dst.len() <= self.window, "read escapes the window");
        // SAFETY: bounds checked against the window just above.
        unsafe {
            ptr::copy_nonoverlapping(self.data().add(at), dst.as_mut_ptr(), dst.len());
        }
    }

    /// The whole window, `[0, capacity)`.
    pub(crate) fn window_bytes(&self) -> &[u8] {
        self.check_dispose();
        // SAFETY: as for `as_slice`.
        unsafe { std::slice::from_raw_parts(self.data(), self.window) }
    }

    #[inline]
    fn data(&self) -> *mut u8 {
        // SAFETY: `offset <= core.len` by construction of every window.
        unsafe { self.core.data.add(self.offset) }
    }

    // ---------------------------------------------------------------------
    // VIEWS
    // ---------------------------------------------------------------------

    /// View of `[position, limit)` with fresh cursors.
    pub fn slice(&self) -> PooledBuf {
        self.check_dispose();
        let len = self.remaining();
        self.derive(self.offset + self.position, len, 0, len, self.read_only)
    }

    /// View of the same window with the same cursors.
    pub fn duplicate(&self) -> PooledBuf {
        self.check_dispose();
        self.derive(
            self.offset,
            self.window,
            self.position,
            self.limit,
            self.read_only,
        )
    }

    /// Like [`duplicate`](Self::duplicate), but the view rejects writes.
    pub fn as_read_only(&self) -> PooledBuf {
        self.check_dispose();
        self.derive(self.offset, self.window, self.position, self.limit, true)
    }

    /// Splits this buffer at `at`: this handle keeps `[0, at)` of its window,
    /// the returned view owns `[at, capacity)`. Cursors land on whichever
    /// side they fall, clamped to the cut.
    ///
    /// The backing region itself is never cut; when the family is disposed
    /// the slice gets the original full-capacity region back.
    pub fn split(&mut self, at: usize) -> PooledBuf {
        self.check_dispose();
        assert!(at <= self.window, "split at {at} beyond capacity {}", self.window);

        let child = self.derive(
            self.offset + at,
            self.window - at,
            self.position.saturating_sub(at),
            self.limit.saturating_sub(at),
            self.read_only,
        );
        self.window = at;
        self.position = self.position.min(at);
        self.limit = self.limit.min(at);
        child
    }

    fn derive(
        &self,
        offset: usize,
        window: usize,
        position: usize,
        limit: usize,
        read_only: bool,
    ) -> PooledBuf {
        self.core.share_count.fetch_add(1, Ordering::Relaxed);
        PooledBuf {
            core: Arc::clone(&self.core),
            offset,
            window,
            position,
            limit,
            read_only,
            is_origin: false,
            free: false,
            #[cfg(debug_assertions)]
            disposed_at: None,
        }
    }

    // ---------------------------------------------------------------------
    // DISPOSAL
    // ---------------------------------------------------------------------

    /// Releases this handle. The backing region returns to its slice once the
    /// last handle of the family is disposed; disposing twice is a no-op.
    #[track_caller]
    pub fn dispose(&mut self) {
        let _ = self.dispose_inner(true);
    }

    /// True while this handle has not been disposed.
    #[inline]
    pub fn is_live(&self) -> bool {
        !self.free
    }

    pub(crate) fn owned_by(&self, slice: &PoolSlice) -> bool {
        ptr::eq(Arc::as_ptr(&self.core.slice), slice)
    }

    /// Dispose, reporting whether the storage entered the ring right now.
    pub(crate) fn dispose_into_ring(mut self) -> bool {
        matches!(self.dispose_inner(true), Disposal::Returned)
    }

    /// Dispose without ever returning the storage to the ring.
    pub(crate) fn discard(mut self) {
        let _ = self.dispose_inner(false);
    }

    #[track_caller]
    fn dispose_inner(&mut self, to_ring: bool) -> Disposal {
        if self.free {
            return Disposal::AlreadyFree;
        }
        self.free = true;
        #[cfg(debug_assertions)]
        {
            self.disposed_at = Some(Location::caller());
        }

        if self.is_origin {
            self.core.origin_free.store(true, Ordering::Release);
        }

        let decremented = self
            .core
            .share_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));
        if decremented.is_ok() {
            return Disposal::Pending;
        }

        // Count exhausted: this is the last holder.
        if !self.core.origin_free.load(Ordering::Acquire) {
            // The origin handle is still out; its own dispose finishes the
            // return.
            return Disposal::Pending;
        }

        if self.core.taken.swap(true, Ordering::AcqRel) {
            return Disposal::AlreadyFree;
        }
        // SAFETY: the `taken` swap above makes this the only reclamation of
        // the region this core leaked.
        let storage = unsafe { reclaim_storage(self.core.data, self.core.len) };
        debug_assert_storage_len!(storage.len(), self.core.slice.buffer_size());

        if !to_ring {
            self.core.slice.probes().buffer_released(self.core.len);
            return Disposal::Dropped;
        }
        match self.core.slice.restore(storage) {
            Ok(()) => Disposal::Returned,
            Err(storage) => {
                log::trace!(
                    "slice of {}-byte buffers refused a return; dropping the region",
                    self.core.len
                );
                self.core.slice.probes().buffer_released(self.core.len);
                drop(storage);
                Disposal::Dropped
            }
        }
    }

    #[inline]
    fn check_dispose(&self) {
        if self.free {
            self.disposed_panic();
        }
    }

    #[inline]
    fn check_writable(&self) {
        self.check_dispose();
        assert!(!self.read_only, "write to a read-only buffer view");
    }

    #[cold]
    fn disposed_panic(&self) -> ! {
        #[cfg(debug_assertions)]
        if let Some(at) = self.disposed_at {
            panic!("buffer used after dispose (disposed at {at})");
        }
        panic!("buffer used after dispose");
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if !self.free {
            let _ = self.dispose_inner(true);
        }
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("capacity", &self.window)
            .field("position", &self.position)
            .field("limit", &self.limit)
            .field("read_only", &self.read_only)
            .field("live", &!self.free)
            .finish()
    }
}

/// Plain heap-backed buffer with the same cursor surface as [`PooledBuf`].
///
/// Used for wrapped byte slices and strings, and as the canonical empty
/// buffer. Never touches a pool; dropping it frees the storage directly.
#[derive(Debug, Default, Clone)]
pub struct HeapBuf {
    storage: Box<[u8]>,
    position: usize,
    limit: usize,
}

impl HeapBuf {
    /// The canonical empty buffer.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wraps a copy of `bytes`, limit set to its length.
    pub fn from_slice(bytes: &[u8]) -> Self {
        Self::from_vec(bytes.to_vec())
    }

    /// Takes ownership of `bytes` without copying.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        let storage = bytes.into_boxed_slice();
        let limit = storage.len();
        Self {
            storage,
            position: 0,
            limit,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.len()
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

    pub fn as_slice(&self) -> &[u8] {
        &self.storage[self.position..self.limit]
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        assert!(
            src.len() <= self.remaining(),
            "put of {} bytes overflows the {} remaining",
            src.len(),
            self.remaining()
        );
        self.storage[self.position..self.position + src.len()].copy_from_slice(src);
        self.position += src.len();
    }

    pub fn copy_to_slice(&mut self, dst: &mut [u8]) {
        assert!(
            dst.len() <= self.remaining(),
            "read of {} bytes exceeds the {} remaining",
            dst.len(),
            self.remaining()
        );
        dst.copy_from_slice(&self.storage[self.position..self.position + dst.len()]);
        self.position += dst.len();
    }

    pub(crate) fn write_at(&mut self, at: usize, src: &[u8]) {
        self.storage[at..at + src.len()].copy_from_slice(src);
    }

    pub(crate) fn window_bytes(&self) -> &[u8] {
        &self.storage
    }
}

/// Any buffer the manager hands out: pooled, composite, or plain heap.
#[derive(Debug)]
pub enum Buffer {
    Pooled(PooledBuf),
    Composite(CompositeBuf),
    Heap(HeapBuf),
}

impl Buffer {
    /// The canonical empty buffer.
    pub fn empty() -> Self {
        Buffer::Heap(HeapBuf::empty())
    }

    pub fn capacity(&self) -> usize {
        match self {
            Buffer::Pooled(b) => b.capacity(),
            Buffer::Composite(c) => c.capacity(),
            Buffer::Heap(h) => h.capacity(),
        }
    }

    pub fn position(&self) -> usize {
        match self {
            Buffer::Pooled(b) => b.position(),
            Buffer::Composite(c) => c.position(),
            Buffer::Heap(h) => h.position(),
        }
    }

    pub fn limit(&self) -> usize {
        match self {
            Buffer::Pooled(b) => b.limit(),
            Buffer::Composite(c) => c.limit(),
            Buffer::Heap(h) => h.limit(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.limit() - self.position()
    }

    pub fn set_position(&mut self, position: usize) {
        match self {
            Buffer::Pooled(b) => b.set_position(position),
            Buffer::Composite(c) => c.set_position(position),
            Buffer::Heap(h) => h.set_position(position),
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        match self {
            Buffer::Pooled(b) => b.set_limit(limit),
            Buffer::Composite(c) => c.set_limit(limit),
            Buffer::Heap(h) => h.set_limit(limit),
        }
    }

    pub fn clear(&mut self) {
        match self {
            Buffer::Pooled(b) => b.clear(),
            Buffer::Composite(c) => c.clear(),
            Buffer::Heap(h) => h.clear(),
        }
    }

    pub fn put_slice(&mut self, src: &[u8]) {
        match self {
            Buffer::Pooled(b) => b.put_slice(src),
            Buffer::Composite(c) => c.put_slice(src),
            Buffer::Heap(h) => h.put_slice(src),
        }
    }

    pub fn copy_to_slice(&mut self, dst: &mut [u8]) {
        match self {
            Buffer::Pooled(b) => b.copy_to_slice(dst),
            Buffer::Composite(c) => c.copy_to_slice(dst),
            Buffer::Heap(h) => h.copy_to_slice(dst),
        }
    }

    /// Releases the buffer; pooled storage heads back towards its slice.
    pub fn dispose(self) {
        match self {
            Buffer::Pooled(mut b) => b.dispose(),
            Buffer::Composite(mut c) => c.dispose(),
            Buffer::Heap(_) => {}
        }
    }

    pub(crate) fn write_at(&mut self, at: usize, src: &[u8]) {
        match self {
            Buffer::Pooled(b) => b.write_at(at, src),
            Buffer::Composite(c) => c.write_at(at, src),
            Buffer::Heap(h) => h.write_at(at, src),
        }
    }

    pub fn as_pooled(&self) -> Option<&PooledBuf> {
        match self {
            Buffer::Pooled(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeBuf> {
        match self {
            Buffer::Composite(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_heap(&self) -> Option<&HeapBuf> {
        match self {
            Buffer::Heap(h) => Some(h),
            _ => None,
        }
    }
}

impl From<PooledBuf> for Buffer {
    fn from(b: PooledBuf) -> Self {
        Buffer::Pooled(b)
    }
}

impl From<CompositeBuf> for Buffer {
    fn from(c: CompositeBuf) -> Self {
        Buffer::Composite(c)
    }
}

impl From<HeapBuf> for Buffer {
    fn from(h: HeapBuf) -> Self {
        Buffer::Heap(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::Probes;
    use crate::ring::PoolSlice;
    use std::sync::Arc;

    fn test_slice() -> Arc<PoolSlice> {
        PoolSlice::new(128, 16, false, Probes::new(None))
    }

    #[test]
    fn dispose_returns_storage_to_slice() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        assert_eq!(s.elements_count(), 15);
        b.dispose();
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn dispose_twice_is_noop() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        b.dispose();
        b.dispose();
        drop(b);
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn duplicate_defers_return_until_last_dispose() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        let mut v = b.duplicate();

        b.dispose();
        assert_eq!(s.elements_count(), 15, "a view still holds the storage");

        v.dispose();
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn view_disposed_before_origin_still_returns_once() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        let mut v1 = b.slice();
        let mut v2 = b.as_read_only();

        v2.dispose();
        v1.dispose();
        assert_eq!(s.elements_count(), 15);

        b.dispose();
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn cursor_ops_follow_byte_buffer_semantics() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        assert_eq!(b.capacity(), 128);
        assert_eq!(b.limit(), 128);
        assert_eq!(b.position(), 0);

        b.put_slice(&[1, 2, 3, 4]);
        assert_eq!(b.position(), 4);

        b.set_limit(10);
        assert_eq!(b.remaining(), 6);

        b.set_position(0);
        let mut out = [0u8; 4];
        b.copy_to_slice(&mut out);
        assert_eq!(out, [1, 2, 3, 4]);

        b.clear();
        assert_eq!(b.position(), 0);
        assert_eq!(b.limit(), 128);
        // Contents survive a clear.
        assert_eq!(b.get_u8(), 1);
    }

    #[test]
    fn slice_view_covers_position_to_limit() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        b.put_slice(b"0123456789");
        b.set_position(2);
        b.set_limit(8);

        let mut v = b.slice();
        assert_eq!(v.capacity(), 6);
        assert_eq!(v.position(), 0);
        assert_eq!(v.limit(), 6);
        assert_eq!(v.as_slice(), b"234567");

        // Writes through the view land in the shared region.
        v.set_position(0);
        v.put_u8(b'X');
        b.set_position(2);
        assert_eq!(b.get_u8(), b'X');
    }

    #[test]
    fn split_partitions_the_window() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        b.set_limit(100);
        b.set_position(50);

        let child = b.split(40);
        assert_eq!(b.capacity(), 40);
        assert_eq!(b.limit(), 40);
        assert_eq!(b.position(), 40);
        assert_eq!(child.capacity(), 88);
        assert_eq!(child.position(), 10);
        assert_eq!(child.limit(), 60);
    }

    #[test]
    fn split_halves_write_disjoint_bytes_and_restore_full_region() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        let mut right = b.split(40);

        b.set_position(0);
        b.fill(0xAA);
        right.set_position(0);
        right.fill(0xBB);

        assert!(b.window_bytes().iter().all(|&x| x == 0xAA));
        assert!(right.window_bytes().iter().all(|&x| x == 0xBB));

        b.dispose();
        right.dispose();
        assert_eq!(s.elements_count(), 16, "full region went back to the ring");

        // The region handed out again has its full capacity.
        let b2 = s.poll().unwrap();
        assert_eq!(b2.capacity(), 128);
    }

    #[test]
    fn put_from_copies_between_buffers() {
        let s = test_slice();
        let mut src = s.poll().unwrap();
        let mut dst = s.poll().unwrap();

        src.put_slice(b"hello");
        src.set_limit(5);
        src.set_position(0);

        dst.put_from(&mut src);
        assert_eq!(src.remaining(), 0);
        dst.set_position(0);
        let mut out = [0u8; 5];
        dst.copy_to_slice(&mut out);
        assert_eq!(&out, b"hello");
    }

    #[test]
    #[should_panic(expected = "read-only")]
    fn read_only_view_rejects_writes() {
        let s = test_slice();
        let b = s.poll().unwrap();
        let mut ro = b.as_read_only();
        ro.put_u8(1);
    }

    #[test]
    #[should_panic(expected = "used after dispose")]
    fn use_after_dispose_panics() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        b.dispose();
        b.put_u8(1);
    }

    #[test]
    #[should_panic(expected = "overflows")]
    fn put_past_limit_panics() {
        let s = test_slice();
        let mut b = s.poll().unwrap();
        b.set_limit(2);
        b.put_slice(&[1, 2, 3]);
    }

    #[test]
    fn foreign_offer_is_rejected_and_dropped() {
        let s1 = test_slice();
        let s2 = test_slice();
        let b = s1.poll().unwrap();

        assert!(!s2.offer(b));
        assert_eq!(s2.elements_count(), 16);
        // The foreign region was dropped, not rerouted to its own slice.
        assert_eq!(s1.elements_count(), 15);
    }

    #[test]
    fn owned_offer_reports_ring_acceptance() {
        let s = test_slice();
        let b = s.poll().unwrap();
        assert!(s.offer(b));
        assert_eq!(s.elements_count(), 16);
    }

    #[test]
    fn heap_buf_round_trip() {
        let mut h = HeapBuf::from_slice(b"abcdef");
        assert_eq!(h.capacity(), 6);
        assert_eq!(h.limit(), 6);
        assert_eq!(h.as_slice(), b"abcdef");

        h.set_position(2);
        let mut out = [0u8; 2];
        h.copy_to_slice(&mut out);
        assert_eq!(&out, b"cd");

        let empty = HeapBuf::empty();
        assert_eq!(empty.capacity(), 0);
        assert_eq!(empty.remaining(), 0);
    }
}
