use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Mutex;
use tracing::trace;

/// Least-recently-used store
///
/// `LruCache` keeps at most `capacity` entries. The recency queue holds every
/// stored key exactly once, most recently used at the front. Any access
/// through [`LruCache::get`] promotes the key to the front without changing
/// the relative order of the other keys; inserting past capacity evicts from
/// the back.
///
/// The type itself is not synchronized. Share it through [`Memoized`], which
/// guards it with a mutex.
pub struct LruCache<K, V> {
    capacity: usize,
    queue: VecDeque<K>,
    store: HashMap<K, V>,
}

impl<K, V> LruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Capacity is clamped to at least one entry.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            queue: VecDeque::with_capacity(capacity + 1),
            store: HashMap::with_capacity(capacity + 1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Membership test, does not touch recency.
    pub fn contains(&self, key: &K) -> bool {
        self.store.contains_key(key)
    }

    /// Look up `key` and promote it to most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if !self.store.contains_key(key) {
            return None;
        }
        self.promote(key);
        self.store.get(key)
    }

    /// Store `value` under `key` as most recently used.
    ///
    /// Returns the evicted keys, oldest last touched first.
    pub fn insert(&mut self, key: K, value: V) -> Vec<K> {
        if self.store.insert(key.clone(), value).is_some() {
            self.promote(&key);
            return Vec::new();
        }
        self.queue.push_front(key);

        let mut evicted = Vec::new();
        while self.queue.len() > self.capacity {
            if let Some(oldest) = self.queue.pop_back() {
                self.store.remove(&oldest);
                evicted.push(oldest);
            }
        }
        evicted
    }

    /// Keys in recency order, most recently used first.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.queue.iter()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.store.clear();
    }

    fn promote(&mut self, key: &K) {
        if let Some(pos) = self.queue.iter().position(|k| k == key) {
            if pos == 0 {
                return;
            }
            if let Some(k) = self.queue.remove(pos) {
                self.queue.push_front(k);
            }
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("len", &self.queue.len())
            .finish()
    }
}

type MemoFn<K, V, E> = Box<dyn Fn(&K) -> Result<V, E> + Send + Sync>;

/// Memoized function
///
/// `Memoized` wraps a deterministic, idempotent function with a shared
/// [`LruCache`]. The key is the full argument value, so arguments that compare
/// equal share one entry.
///
/// # Semantics
///
/// * **Hit** - the key is promoted and a clone of the stored result is
///   returned. The wrapped function is not called.
/// * **Miss** - the function is called outside the lock. On `Ok` the result is
///   stored as most recently used and the least recently used keys beyond
///   capacity are evicted.
/// * **Failure** - an `Err` is returned to the caller and nothing is stored.
///
/// Two workers missing on the same key at the same time may both compute; the
/// second insert only refreshes the entry.
///
/// # Examples
///
/// ```rust
/// use sipd::cache::Memoized;
///
/// let square = Memoized::new(2, |n: &u32| Ok::<_, ()>(n * n));
/// assert_eq!(square.get_or_compute(3), Ok(9));
/// assert_eq!(square.get_or_compute(3), Ok(9));
/// assert_eq!(square.len(), 1);
/// ```
pub struct Memoized<K, V, E> {
    cache: Mutex<LruCache<K, V>>,
    function: MemoFn<K, V, E>,
}

impl<K, V, E> Memoized<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new<F>(capacity: usize, function: F) -> Self
    where
        F: Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            function: Box::new(function),
        }
    }

    pub fn get_or_compute(&self, key: K) -> Result<V, E> {
        if let Some(value) = self.cache.lock().unwrap().get(&key) {
            trace!("memoized hit");
            return Ok(value.clone());
        }

        let value = (self.function)(&key)?;
        let evicted = self.cache.lock().unwrap().insert(key, value.clone());
        trace!(evicted = evicted.len(), "memoized miss");
        Ok(value)
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().unwrap().capacity()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.cache.lock().unwrap().contains(key)
    }

    /// Snapshot of the recency queue, most recently used first.
    pub fn keys(&self) -> Vec<K> {
        self.cache.lock().unwrap().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }
}
