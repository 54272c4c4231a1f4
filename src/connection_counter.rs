//! Process-wide counter of in-flight outbound requests per backend. The backend set is
//! fixed once the ring is built, so a plain `HashMap<Url, AtomicI64>` behind an `Arc` is
//! enough: the map itself never mutates after construction, only its values do, via atomics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use url::Url;

#[derive(Debug)]
pub struct ConnectionCounter {
    counts: HashMap<Url, AtomicI64>,
}

impl ConnectionCounter {
    pub fn new(backend_urls: impl IntoIterator<Item = Url>) -> Self {
        let counts = backend_urls
            .into_iter()
            .map(|url| (url, AtomicI64::new(0)))
            .collect();
        ConnectionCounter { counts }
    }

    /// Increments the counter for `backend`. No-op (returns 0) if the backend is unknown to
    /// this counter, which should never happen for a backend drawn from the ring it was
    /// built alongside.
    pub fn increment(&self, backend: &Url) -> i64 {
        match self.counts.get(backend) {
            Some(counter) => counter.fetch_add(1, Ordering::SeqCst) + 1,
            None => 0,
        }
    }

    pub fn decrement(&self, backend: &Url) {
        if let Some(counter) = self.counts.get(backend) {
            counter.fetch_sub(1, Ordering::SeqCst);
        }
    }

    pub fn current(&self, backend: &Url) -> i64 {
        self.counts
            .get(backend)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Total in-flight requests across every backend this counter tracks.
    pub fn total(&self) -> i64 {
        self.counts.values().map(|c| c.load(Ordering::SeqCst)).sum()
    }

    /// Returns the backend (among `candidates`) with the largest in-flight count, used by
    /// the connection-ceiling eviction.
    pub fn busiest<'a>(&self, candidates: impl Iterator<Item = &'a Url>) -> Option<&'a Url> {
        candidates.max_by_key(|url| self.current(url))
    }
}

/// RAII guard that decrements on drop, so a dispatch's slot is released on every exit path
/// (success, error, or panic unwinding) without the dispatcher having to remember to call
/// `decrement` explicitly.
pub struct InFlightGuard<'a> {
    counter: &'a ConnectionCounter,
    backend: Url,
}

impl<'a> InFlightGuard<'a> {
    pub fn acquire(counter: &'a ConnectionCounter, backend: Url) -> Self {
        counter.increment(&backend);
        InFlightGuard { counter, backend }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.counter.decrement(&self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn increments_and_decrements_return_to_zero() {
        let counter = ConnectionCounter::new([url("http://a"), url("http://b")]);
        {
            let _g1 = InFlightGuard::acquire(&counter, url("http://a"));
            let _g2 = InFlightGuard::acquire(&counter, url("http://a"));
            assert_eq!(counter.current(&url("http://a")), 2);
            assert_eq!(counter.total(), 2);
        }
        assert_eq!(counter.current(&url("http://a")), 0);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn busiest_picks_largest_counter() {
        let counter = ConnectionCounter::new([url("http://a"), url("http://b")]);
        let _g = InFlightGuard::acquire(&counter, url("http://b"));
        let _g2 = InFlightGuard::acquire(&counter, url("http://b"));
        let candidates = vec![url("http://a"), url("http://b")];
        let busiest = counter.busiest(candidates.iter()).unwrap();
        assert_eq!(busiest, &url("http://b"));
    }
}
