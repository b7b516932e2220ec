use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::QueueError;
use crate::stats::QueueStats;

/// A link in the chain. Every node except the current tail carries a value;
/// the tail is an empty sentinel.
struct Node<T> {
    data: Option<T>,
    /// Owning link to the successor. `None` only on the tail.
    next: Option<NonNull<Node<T>>>,
}

impl<T> Node<T> {
    fn sentinel() -> NonNull<Node<T>> {
        let node = Box::new(Node {
            data: None,
            next: None,
        });
        NonNull::from(Box::leak(node))
    }
}

type FrontGuard<'a, T> = MutexGuard<'a, NonNull<Node<T>>>;

/// Unbounded multi-producer multi-consumer FIFO queue with split locking.
///
/// The chain is guarded by two independent locks:
/// - the front-lock owns `head` and detaching nodes,
/// - the back-lock owns `tail` and the tail node's `data`/`next` fields.
///
/// `push` only takes the back-lock, so producers and consumers run in
/// parallel. Consumers take the front-lock and briefly nest the back-lock to
/// read the current tail. Back-then-front is never taken anywhere, so the two
/// locks cannot deadlock against each other.
///
/// The tail is always an empty sentinel node: `push` writes into the old
/// sentinel and appends a fresh one, while pops only ever read `head`. The two
/// therefore never touch the same node unless the queue is empty, in which
/// case no pop proceeds.
///
/// `wait_and_pop` has no timeout. On a queue that never receives another push
/// it blocks forever; use [`ConcurrentQueue::close`] together with
/// [`ConcurrentQueue::wait_and_pop_or_closed`] when consumers need a way out.
pub struct ConcurrentQueue<T> {
    head: CachePadded<Mutex<NonNull<Node<T>>>>,
    tail: CachePadded<Mutex<NonNull<Node<T>>>>,
    data_cond: Condvar,
    closed: AtomicBool,
    pushed: AtomicU64,
    popped: AtomicU64,
    _owns: PhantomData<Box<Node<T>>>,
}

// Safety: values only ever move in and out by value, and every access to the
// chain happens under the lock that owns the touched fields.
unsafe impl<T: Send> Send for ConcurrentQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentQueue<T> {}

impl<T> ConcurrentQueue<T> {
    /// Create an empty queue holding a single sentinel node.
    pub fn new() -> Self {
        let sentinel = Node::sentinel();
        Self {
            head: CachePadded::new(Mutex::new(sentinel)),
            tail: CachePadded::new(Mutex::new(sentinel)),
            data_cond: Condvar::new(),
            closed: AtomicBool::new(false),
            pushed: AtomicU64::new(0),
            popped: AtomicU64::new(0),
            _owns: PhantomData,
        }
    }

    /// Append `value` at the back and wake one blocked consumer.
    ///
    /// Never blocks on consumers: only the back-lock is taken.
    pub fn push(&self, value: T) {
        let sentinel = Node::sentinel();
        {
            let mut tail = self.tail.lock();
            // SAFETY: the tail node is written only under the back-lock, and no
            // consumer dereferences it while it is still the tail.
            let node = unsafe { &mut *tail.as_ptr() };
            node.data = Some(value);
            node.next = Some(sentinel);
            *tail = sentinel;
            self.pushed.fetch_add(1, Ordering::Relaxed);
        }
        self.data_cond.notify_one();
    }

    /// Pop the front value without blocking. `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut head = self.head.lock();
        self.pop_head(&mut head)
    }

    /// Pop the front value into `out`. Returns `false`, leaving `out`
    /// untouched, when the queue is empty.
    pub fn try_pop_into(&self, out: &mut T) -> bool {
        match self.try_pop() {
            Some(value) => {
                *out = value;
                true
            }
            None => false,
        }
    }

    /// Pop the front value, blocking until one is available.
    pub fn wait_and_pop(&self) -> T {
        let mut head = self.head.lock();
        loop {
            if let Some(value) = self.pop_head(&mut head) {
                return value;
            }
            // Spurious wakeups fall through to another check.
            self.data_cond.wait(&mut head);
        }
    }

    /// Blocking pop into `out`.
    pub fn wait_and_pop_into(&self, out: &mut T) {
        *out = self.wait_and_pop();
    }

    /// Like [`wait_and_pop`](Self::wait_and_pop), but gives up with
    /// [`QueueError::Closed`] once the queue is both closed and drained.
    pub fn wait_and_pop_or_closed(&self) -> Result<T, QueueError> {
        let mut head = self.head.lock();
        loop {
            if let Some(value) = self.pop_head(&mut head) {
                return Ok(value);
            }
            if self.is_closed() {
                return Err(QueueError::Closed);
            }
            self.data_cond.wait(&mut head);
        }
    }

    /// Non-blocking pop that hands the value out behind an `Arc`.
    pub fn try_pop_shared(&self) -> Option<Arc<T>> {
        self.try_pop().map(Arc::new)
    }

    /// Blocking pop that hands the value out behind an `Arc`.
    pub fn wait_and_pop_shared(&self) -> Arc<T> {
        Arc::new(self.wait_and_pop())
    }

    /// Snapshot emptiness check. Stale as soon as it returns.
    pub fn is_empty(&self) -> bool {
        let head = self.head.lock();
        *head == self.peek_tail(&head)
    }

    /// Mark the queue closed and wake every waiter.
    ///
    /// Producers may still push; only
    /// [`wait_and_pop_or_closed`](Self::wait_and_pop_or_closed) observes the
    /// flag. Calling this more than once is harmless.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // A waiter checks the flag under the front-lock, so taking it here
        // guarantees it is either parked or will see the flag.
        drop(self.head.lock());
        self.data_cond.notify_all();
        debug!("queue closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Snapshot of the push/pop counters.
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
        }
    }

    /// Read the current tail. Taking the front guard by reference is what
    /// pins the lock order: the back-lock is only ever nested inside the
    /// front-lock, never the other way round.
    #[inline]
    fn peek_tail(&self, _front: &FrontGuard<'_, T>) -> NonNull<Node<T>> {
        *self.tail.lock()
    }

    /// Detach the head node and return its value, or `None` if head and tail
    /// coincide.
    fn pop_head(&self, head: &mut FrontGuard<'_, T>) -> Option<T> {
        let tail = self.peek_tail(head);
        if **head == tail {
            return None;
        }
        // SAFETY: head differs from the tail observed under the back-lock, so
        // the producer that filled this node has released it for good. The
        // node is reachable only through the front-lock we hold.
        let node = unsafe { &mut *head.as_ptr() };
        let next = node.next?;
        let value = node.data.take();
        let old = core::mem::replace(&mut **head, next);
        // SAFETY: `old` was allocated by `Node::sentinel` and is now unlinked.
        drop(unsafe { Box::from_raw(old.as_ptr()) });
        self.popped.fetch_add(1, Ordering::Relaxed);
        value
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("empty", &self.is_empty())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        // Walk the chain iteratively so long queues cannot overflow the stack.
        let mut cursor = Some(*self.head.get_mut());
        let mut undelivered = 0usize;
        while let Some(node) = cursor {
            // SAFETY: `&mut self` means no other thread can reach the chain,
            // and each node is freed exactly once as the cursor moves past it.
            let node = unsafe { Box::from_raw(node.as_ptr()) };
            if node.data.is_some() {
                undelivered += 1;
            }
            cursor = node.next;
        }
        if undelivered > 0 {
            trace!(undelivered, "dropping queue with undelivered items");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn queue_basic() {
        let q = ConcurrentQueue::new();
        assert!(q.is_empty());
        q.push(1);
        q.push(2);
        assert!(!q.is_empty());
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn try_pop_into_leaves_out_untouched_when_empty() {
        let q = ConcurrentQueue::new();
        let mut out = 7;
        assert!(!q.try_pop_into(&mut out));
        assert_eq!(out, 7);
        q.push(9);
        assert!(q.try_pop_into(&mut out));
        assert_eq!(out, 9);
    }

    #[test]
    fn moves_non_clone_values() {
        struct Token(Box<String>);

        let q = ConcurrentQueue::new();
        q.push(Token(Box::new("a".to_string())));
        q.push(Token(Box::new("b".to_string())));
        assert_eq!(*q.wait_and_pop().0, "a");
        assert_eq!(*q.try_pop().unwrap().0, "b");
    }

    #[test]
    fn shared_pop() {
        let q = ConcurrentQueue::new();
        q.push(String::from("x"));
        q.push(String::from("y"));
        let first = q.try_pop_shared().unwrap();
        let copy = Arc::clone(&first);
        assert_eq!(copy.as_str(), "x");
        assert_eq!(q.wait_and_pop_shared().as_str(), "y");
        assert!(q.try_pop_shared().is_none());
    }

    #[test]
    fn stats_track_pushes_and_pops() {
        let q = ConcurrentQueue::new();
        for i in 0..5 {
            q.push(i);
        }
        q.try_pop();
        q.try_pop();
        q.try_pop_into(&mut 0);
        let stats = q.stats();
        assert_eq!(stats.pushed, 5);
        assert_eq!(stats.popped, 3);
        assert_eq!(stats.approx_len(), 2);
    }

    #[test]
    fn empty_pops_do_not_count() {
        let q: ConcurrentQueue<u8> = ConcurrentQueue::new();
        assert!(q.try_pop().is_none());
        assert_eq!(q.stats(), QueueStats::default());
    }

    #[test]
    fn drop_releases_undelivered_values() {
        struct Counted(Arc<AtomicUsize>);
        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let q = ConcurrentQueue::new();
        for _ in 0..4 {
            q.push(Counted(drops.clone()));
        }
        drop(q.try_pop());
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        drop(q);
        assert_eq!(drops.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn drop_long_chain() {
        let q = ConcurrentQueue::new();
        for i in 0..200_000u32 {
            q.push(i);
        }
        drop(q);
    }

    #[test]
    fn close_is_idempotent_and_keeps_data() {
        let q = ConcurrentQueue::new();
        q.push(1);
        q.close();
        q.close();
        assert!(q.is_closed());
        assert_eq!(q.wait_and_pop_or_closed(), Ok(1));
        assert_eq!(q.wait_and_pop_or_closed(), Err(QueueError::Closed));
        // Closing does not reject producers.
        q.push(2);
        assert_eq!(q.wait_and_pop_or_closed(), Ok(2));
    }

    #[test]
    fn queue_concurrent() {
        let q = Arc::new(ConcurrentQueue::new());
        let q1 = q.clone();
        let q2 = q.clone();
        let prod = thread::spawn(move || {
            for i in 0..10_000 {
                q1.push(i);
            }
        });
        let prod2 = thread::spawn(move || {
            for i in 10_000..20_000 {
                q2.push(i);
            }
        });
        let mut seen = 0usize;
        let mut last = [None::<i32>; 2];
        while seen < 20_000 {
            if let Some(v) = q.try_pop() {
                let lane = (v / 10_000) as usize;
                if let Some(prev) = last[lane] {
                    assert!(v > prev, "per-producer order broken: {prev} then {v}");
                }
                last[lane] = Some(v);
                seen += 1;
            } else {
                thread::yield_now();
            }
        }
        prod.join().unwrap();
        prod2.join().unwrap();
        assert!(q.is_empty());
    }

    #[test]
    fn queue_is_send_and_sync() {
        fn assert_send_sync<Q: Send + Sync>() {}
        assert_send_sync::<ConcurrentQueue<String>>();
        assert_send_sync::<ConcurrentQueue<Box<u64>>>();
    }
}
