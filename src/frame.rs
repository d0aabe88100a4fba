//! Fixed pool of JPEG frame slots.
//!
//! Slots are allocated once, at pool creation, with the capacity of the largest
//! frame the active size/quality can produce. A slot leaves the pool inside a
//! [`FrameHandle`] and comes back when the handle is dropped or released; there
//! is no other way to return it, so a slot can be neither leaked back twice nor
//! read after release.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::future::{poll_fn, Future};
use core::pin::pin;
use core::sync::atomic::{AtomicBool, Ordering};
use core::task::Poll;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::waitqueue::MultiWakerRegistration;
use futures::future::{select, Either};

use crate::config::{FbLocation, MAX_FRAME_BUFFERS};
use crate::error::{CaptureError, InitError, PoolExhausted};
use crate::hal::Clock;

/// One frame slot. `len()` is only meaningful while the slot is checked out
/// and after a capture filled it.
#[derive(Default, Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    capacity: usize,
    width: u16,
    height: u16,
    timestamp_ms: u64,
}

impl FrameBuffer {
    fn with_capacity(capacity: usize) -> Result<Self, InitError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| InitError::NoMemory)?;
        Ok(Self {
            data,
            capacity,
            ..Self::default()
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// Monotonic time at which the frame's EOI was seen.
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
        self.timestamp_ms = 0;
    }

    /// Append frame bytes. Never grows past the slot capacity.
    pub fn extend(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
        if self.data.len() + bytes.len() > self.capacity {
            return Err(CaptureError::Overrun);
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn finish(&mut self, width: u16, height: u16, timestamp_ms: u64) {
        self.width = width;
        self.height = height;
        self.timestamp_ms = timestamp_ms;
    }
}

type Slots = heapless::Vec<Option<FrameBuffer>, MAX_FRAME_BUFFERS>;

/// Tasks that can wait on an exhausted pool at once without waking each
/// other. Past this every waiter is woken and re-registers.
pub const MAX_WAITERS: usize = 8;

struct PoolState {
    /// `None` while the slot is checked out.
    slots: Slots,
    waiters: MultiWakerRegistration<MAX_WAITERS>,
}

impl PoolState {
    fn take_free(&mut self) -> Option<(usize, FrameBuffer)> {
        self.slots
            .iter_mut()
            .enumerate()
            .find_map(|(index, slot)| slot.take().map(|frame| (index, frame)))
    }
}

struct PoolShared {
    state: BlockingMutex<CriticalSectionRawMutex, RefCell<PoolState>>,
    closed: AtomicBool,
    slot_len: usize,
    count: usize,
}

impl PoolShared {
    fn give_back(&self, index: usize, mut frame: FrameBuffer) {
        frame.clear();
        if self.closed.load(Ordering::Acquire) {
            // pool already torn down; the buffer is freed here
            return;
        }
        self.state.lock(|state| {
            let mut state = state.borrow_mut();
            if let Some(slot) = state.slots.get_mut(index) {
                *slot = Some(frame);
            }
            state.waiters.wake();
        });
    }
}

/// Cloneable handle to the pool; clones share the same slots.
#[derive(Clone)]
pub struct FramePool {
    shared: Arc<PoolShared>,
}

impl FramePool {
    /// Allocate `count` slots of `slot_len` bytes each. Nothing is kept if any
    /// allocation fails.
    pub fn new(count: usize, slot_len: usize, location: FbLocation) -> Result<Self, InitError> {
        if !(1..=MAX_FRAME_BUFFERS).contains(&count) || slot_len == 0 {
            return Err(InitError::InvalidConfig);
        }
        let mut slots = Slots::new();
        for _ in 0..count {
            let frame = FrameBuffer::with_capacity(slot_len).inspect_err(|_| {
                error!("pool: out of memory for {} x {} bytes", count, slot_len);
            })?;
            slots
                .push(Some(frame))
                .map_err(|_| InitError::InvalidConfig)?;
        }
        info!("pool: {} slots of {} bytes in {:?}", count, slot_len, location);
        Ok(Self {
            shared: Arc::new(PoolShared {
                state: BlockingMutex::new(RefCell::new(PoolState {
                    slots,
                    waiters: MultiWakerRegistration::new(),
                })),
                closed: AtomicBool::new(false),
                slot_len,
                count,
            }),
        })
    }

    /// Number of slots. Fixed for the pool's lifetime.
    pub fn capacity(&self) -> usize {
        self.shared.count
    }

    pub fn slot_len(&self) -> usize {
        self.shared.slot_len
    }

    /// Slots not currently checked out.
    pub fn available(&self) -> usize {
        self.shared
            .state
            .lock(|state| state.borrow().slots.iter().filter(|s| s.is_some()).count())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Whether `handle` was taken from this pool.
    pub fn owns(&self, handle: &FrameHandle) -> bool {
        Arc::ptr_eq(&self.shared, &handle.shared)
    }

    fn handle(&self, index: usize, frame: FrameBuffer) -> FrameHandle {
        FrameHandle {
            shared: self.shared.clone(),
            index,
            frame,
        }
    }

    /// Take the first free slot without waiting.
    pub fn try_acquire(&self) -> Result<FrameHandle, PoolExhausted> {
        let taken = self
            .shared
            .state
            .lock(|state| state.borrow_mut().take_free());
        match taken {
            Some((index, frame)) => Ok(self.handle(index, frame)),
            None => Err(PoolExhausted),
        }
    }

    /// Resolves with a slot once one is released. Each waiting task keeps its
    /// own waker registered, so a release wakes waiters and nothing else does.
    fn wait_slot(&self) -> impl Future<Output = Result<FrameHandle, PoolExhausted>> + '_ {
        poll_fn(move |cx| {
            let taken = self.shared.state.lock(|state| {
                let mut state = state.borrow_mut();
                let taken = state.take_free();
                if taken.is_none() {
                    state.waiters.register(cx.waker());
                }
                taken
            });
            match taken {
                Some((index, frame)) => Poll::Ready(Ok(self.handle(index, frame))),
                None if self.is_closed() => Poll::Ready(Err(PoolExhausted)),
                None => Poll::Pending,
            }
        })
    }

    /// Take a slot, waiting up to `timeout_ms` for one to be released.
    pub async fn acquire<C: Clock>(
        &self,
        clock: &C,
        timeout_ms: u32,
    ) -> Result<FrameHandle, PoolExhausted> {
        let released = pin!(self.wait_slot());
        let timeout = pin!(clock.delay_ms(timeout_ms));
        match select(released, timeout).await {
            Either::Left((res, _)) => res,
            Either::Right(_) => {
                // one last look; a release may have raced the timer
                self.try_acquire().inspect_err(|_| {
                    warn!("pool: exhausted after {} ms", timeout_ms);
                })
            }
        }
    }

    /// Free every slot that is not checked out and make outstanding handles free
    /// theirs when dropped. Waiters are woken and fail.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.state.lock(|state| {
            let mut state = state.borrow_mut();
            for slot in state.slots.iter_mut() {
                *slot = None;
            }
            state.waiters.wake();
        });
    }
}

/// Exclusive access to one filled frame slot.
pub struct FrameHandle {
    shared: Arc<PoolShared>,
    index: usize,
    frame: FrameBuffer,
}

impl FrameHandle {
    /// Index of the slot this handle owns.
    pub fn slot(&self) -> usize {
        self.index
    }

    pub fn data(&self) -> &[u8] {
        self.frame.data()
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.frame.capacity()
    }

    pub fn width(&self) -> u16 {
        self.frame.width()
    }

    pub fn height(&self) -> u16 {
        self.frame.height()
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.frame.timestamp_ms()
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut FrameBuffer {
        &mut self.frame
    }

    /// Return the slot to the pool. Same as dropping the handle.
    pub fn release(self) {}
}

impl AsRef<[u8]> for FrameHandle {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl core::fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameHandle")
            .field("slot", &self.index)
            .field("len", &self.frame.len())
            .field("width", &self.frame.width)
            .field("height", &self.frame.height)
            .field("timestamp_ms", &self.frame.timestamp_ms)
            .finish()
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        let frame = core::mem::take(&mut self.frame);
        self.shared.give_back(self.index, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimClock;
    use core::sync::atomic::AtomicUsize;
    use core::task::{Context, Waker};
    use embassy_futures::{block_on, join::join};
    use std::task::Wake;

    fn pool(count: usize) -> FramePool {
        FramePool::new(count, 8 * 1024, FbLocation::Dram).unwrap()
    }

    #[test]
    fn live_handles_never_share_a_slot() {
        let pool = pool(3);
        let a = pool.try_acquire().unwrap();
        let b = pool.try_acquire().unwrap();
        let c = pool.try_acquire().unwrap();
        let mut slots = [a.slot(), b.slot(), c.slot()];
        slots.sort();
        assert_eq!(slots, [0, 1, 2]);
        assert_eq!(pool.try_acquire().unwrap_err(), PoolExhausted);
        drop(b);
        let d = pool.try_acquire().unwrap();
        assert_eq!(d.slot(), 1);
        assert_ne!(d.slot(), a.slot());
        assert_ne!(d.slot(), c.slot());
    }

    #[test]
    fn release_makes_slot_available_with_stale_length_cleared() {
        let pool = pool(1);
        let mut h = pool.try_acquire().unwrap();
        h.buffer_mut().extend(&[0xFF, 0xD8, 0xFF, 0xD9]).unwrap();
        h.buffer_mut().finish(320, 240, 7);
        assert_eq!(h.len(), 4);
        h.release();
        assert_eq!(pool.available(), 1);
        let h = pool.try_acquire().unwrap();
        assert!(h.is_empty());
        assert_eq!(h.timestamp_ms(), 0);
    }

    #[test]
    fn handle_capacity_matches_slot_len() {
        let pool = FramePool::new(2, 60 * 1024, FbLocation::Psram).unwrap();
        let h = pool.try_acquire().unwrap();
        assert!(h.capacity() >= 60 * 1024);
        assert_eq!(pool.capacity(), 2);
    }

    #[test]
    fn extend_refuses_to_overflow() {
        let pool = FramePool::new(1, 4, FbLocation::Dram).unwrap();
        let mut h = pool.try_acquire().unwrap();
        h.buffer_mut().extend(&[1, 2, 3]).unwrap();
        assert_eq!(h.buffer_mut().extend(&[4, 5]), Err(CaptureError::Overrun));
        assert_eq!(h.len(), 3);
    }

    #[test]
    fn invalid_counts_are_rejected() {
        assert!(matches!(
            FramePool::new(0, 1024, FbLocation::Dram),
            Err(InitError::InvalidConfig)
        ));
        assert!(matches!(
            FramePool::new(MAX_FRAME_BUFFERS + 1, 1024, FbLocation::Dram),
            Err(InitError::InvalidConfig)
        ));
    }

    #[test]
    fn acquire_times_out_when_exhausted() {
        let pool = pool(1);
        let clock = SimClock::new();
        let _held = pool.try_acquire().unwrap();
        let res = block_on(pool.acquire(&clock, 50));
        assert_eq!(res.unwrap_err(), PoolExhausted);
        assert!(clock.now() >= 50);
    }

    #[test]
    fn acquire_wakes_on_release() {
        let pool = pool(1);
        let clock = SimClock::new();
        let held = pool.try_acquire().unwrap();
        let (got, _) = block_on(join(pool.acquire(&clock, 1000), async {
            clock.delay_ms(20).await;
            drop(held);
        }));
        let got = got.unwrap();
        assert_eq!(got.slot(), 0);
        assert!(clock.now() < 1000);
    }

    /// Time that never passes; only a release can finish a wait.
    struct FrozenClock;

    impl Clock for FrozenClock {
        fn now_ms(&self) -> u64 {
            0
        }

        async fn delay_ms(&self, _ms: u32) {
            core::future::pending::<()>().await
        }
    }

    #[derive(Default)]
    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingWaker {
        fn count(&self) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn concurrent_waiters_sleep_until_release() {
        let pool = pool(1);
        let clock = FrozenClock;
        let held = pool.try_acquire().unwrap();

        let a = Arc::new(CountingWaker::default());
        let b = Arc::new(CountingWaker::default());
        let a_waker = Waker::from(a.clone());
        let b_waker = Waker::from(b.clone());
        let mut a_cx = Context::from_waker(&a_waker);
        let mut b_cx = Context::from_waker(&b_waker);
        let mut first = pin!(pool.acquire(&clock, 1000));
        let mut second = pin!(pool.acquire(&clock, 1000));

        for _ in 0..10 {
            assert!(first.as_mut().poll(&mut a_cx).is_pending());
            assert!(second.as_mut().poll(&mut b_cx).is_pending());
        }
        assert_eq!((a.count(), b.count()), (0, 0));

        drop(held);
        assert!(a.count() >= 1);
        assert!(b.count() >= 1);
        let got = match first.as_mut().poll(&mut a_cx) {
            Poll::Ready(res) => res.unwrap(),
            Poll::Pending => panic!("released slot not handed out"),
        };
        assert_eq!(got.slot(), 0);
        let b_before = b.count();
        assert!(second.as_mut().poll(&mut b_cx).is_pending());
        assert_eq!(b.count(), b_before);

        drop(got);
        assert!(matches!(second.as_mut().poll(&mut b_cx), Poll::Ready(Ok(_))));
    }

    #[test]
    fn close_frees_idle_slots_and_late_returns() {
        let pool = pool(2);
        let held = pool.try_acquire().unwrap();
        pool.close();
        assert_eq!(pool.available(), 0);
        drop(held);
        assert_eq!(pool.available(), 0);
        assert!(pool.try_acquire().is_err());
        let clock = SimClock::new();
        assert!(block_on(pool.acquire(&clock, 100)).is_err());
        assert_eq!(clock.now(), 0);
    }
}
