//! A pool of live connections keyed by endpoint.
//!
//! Each endpoint holds a list of connections with an availability flag.
//! [`ConnectionPool::get`] hands out the first available connection and marks it unavailable,
//! [`ConnectionPool::add`] inserts a newly established connection that is already in use, and
//! [`ConnectionPool::release`] makes a connection available again.
//!
//! All three operations take the same lock, so a connection is never held by two callers at once.
//! The pool does not cap or evict connections.
//!
//! [`ConnectionPool::lease`] combines these into a guard that releases on drop, or removes the connection with
//! [`PoolLease::discard`] when it must not be reused (e.g. after a timeout).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

struct PooledConnection<C: ?Sized> {
    connection: Arc<C>,
    available: bool,
}

/// A pool of connections keyed by endpoint URI.
pub struct ConnectionPool<C: ?Sized> {
    endpoints: Mutex<HashMap<String, Vec<PooledConnection<C>>>>,
}

impl<C: ?Sized> std::fmt::Debug for ConnectionPool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoints = self.endpoints.lock();
        let mut map = f.debug_map();
        for (endpoint, connections) in endpoints.iter() {
            map.entry(endpoint, &connections.len());
        }
        map.finish()
    }
}

impl<C: ?Sized> Default for ConnectionPool<C> {
    fn default() -> Self {
        Self {
            endpoints: Mutex::default(),
        }
    }
}

impl<C: ?Sized> ConnectionPool<C> {
    /// Create a new empty connection pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the first available connection for `endpoint`, marking it unavailable.
    ///
    /// Returns [`None`] if there is no available connection.
    #[must_use]
    pub fn get(&self, endpoint: &str) -> Option<Arc<C>> {
        let mut endpoints = self.endpoints.lock();
        endpoints
            .get_mut(endpoint)?
            .iter_mut()
            .find(|pooled| pooled.available)
            .map(|pooled| {
                pooled.available = false;
                pooled.connection.clone()
            })
    }

    /// Add a newly established `connection` for `endpoint`. It is marked unavailable.
    pub fn add(&self, connection: Arc<C>, endpoint: &str) {
        let mut endpoints = self.endpoints.lock();
        endpoints
            .entry(endpoint.to_string())
            .or_default()
            .push(PooledConnection {
                connection,
                available: false,
            });
    }

    /// Mark `connection` available.
    ///
    /// Returns false if the connection is not in the pool.
    pub fn release(&self, connection: &Arc<C>) -> bool {
        let mut endpoints = self.endpoints.lock();
        for pooled in endpoints.values_mut().flatten() {
            if Arc::ptr_eq(&pooled.connection, connection) {
                pooled.available = true;
                return true;
            }
        }
        false
    }

    /// Remove `connection` from the pool.
    ///
    /// Returns false if the connection is not in the pool.
    pub fn remove(&self, connection: &Arc<C>) -> bool {
        let mut endpoints = self.endpoints.lock();
        for connections in endpoints.values_mut() {
            if let Some(position) = connections
                .iter()
                .position(|pooled| Arc::ptr_eq(&pooled.connection, connection))
            {
                connections.remove(position);
                return true;
            }
        }
        false
    }

    /// The number of connections held for `endpoint`.
    #[must_use]
    pub fn num_connections(&self, endpoint: &str) -> usize {
        self.endpoints.lock().get(endpoint).map_or(0, Vec::len)
    }

    /// The number of available connections held for `endpoint`.
    #[must_use]
    pub fn num_available(&self, endpoint: &str) -> usize {
        self.endpoints.lock().get(endpoint).map_or(0, |connections| {
            connections.iter().filter(|pooled| pooled.available).count()
        })
    }

    /// Lease a connection for `endpoint`, establishing one with `connect` if none is available.
    ///
    /// The connection is released back to the pool when the lease is dropped.
    ///
    /// # Errors
    /// Returns the error of `connect` if a connection could not be established.
    pub fn lease<E>(
        self: &Arc<Self>,
        endpoint: &str,
        connect: impl FnOnce() -> Result<Arc<C>, E>,
    ) -> Result<PoolLease<C>, E> {
        let connection = if let Some(connection) = self.get(endpoint) {
            connection
        } else {
            let connection = connect()?;
            self.add(connection.clone(), endpoint);
            log::debug!("connection pool: new connection to {endpoint}");
            connection
        };
        Ok(PoolLease {
            pool: self.clone(),
            connection,
            discarded: false,
        })
    }
}

/// A connection leased from a [`ConnectionPool`].
///
/// The connection is released when the lease is dropped.
pub struct PoolLease<C: ?Sized> {
    pool: Arc<ConnectionPool<C>>,
    connection: Arc<C>,
    discarded: bool,
}

impl<C: ?Sized> PoolLease<C> {
    /// The leased connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Remove the connection from the pool instead of releasing it.
    pub fn discard(mut self) {
        self.discarded = true;
        self.pool.remove(&self.connection);
        log::warn!("connection pool: discarded a connection");
    }
}

impl<C: ?Sized> Drop for PoolLease<C> {
    fn drop(&mut self) {
        if !self.discarded {
            self.pool.release(&self.connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn get_add_release() {
        let pool = ConnectionPool::<usize>::new();
        assert!(pool.get("s3://a").is_none());
        let conn = Arc::new(1);
        pool.add(conn.clone(), "s3://a");
        // Added connections are in use
        assert!(pool.get("s3://a").is_none());
        assert!(pool.release(&conn));
        let leased = pool.get("s3://a").unwrap();
        assert!(Arc::ptr_eq(&leased, &conn));
        assert!(pool.get("s3://a").is_none());
        assert!(pool.get("s3://b").is_none());
        assert!(!pool.release(&Arc::new(1)));
        assert!(pool.remove(&conn));
        assert_eq!(pool.num_connections("s3://a"), 0);
    }

    #[test]
    fn lease_releases_on_drop() {
        let pool = Arc::new(ConnectionPool::<str>::new());
        let lease = pool
            .lease("s3://a", || Ok::<_, ()>(Arc::from("conn")))
            .unwrap();
        assert_eq!(pool.num_available("s3://a"), 0);
        drop(lease);
        assert_eq!(pool.num_available("s3://a"), 1);

        let lease = pool
            .lease("s3://a", || Err::<Arc<str>, _>("should reuse"))
            .unwrap();
        assert_eq!(&**lease.connection(), "conn");
        lease.discard();
        assert_eq!(pool.num_connections("s3://a"), 0);
    }

    #[test]
    fn concurrent_leases_are_exclusive() {
        let pool = Arc::new(ConnectionPool::<AtomicUsize>::new());
        let created = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..200 {
                        let lease = pool
                            .lease("s3://a", || {
                                created.fetch_add(1, Ordering::SeqCst);
                                Ok::<_, ()>(Arc::new(AtomicUsize::new(0)))
                            })
                            .unwrap();
                        // A holder must be the only user of the connection
                        let holders = lease.connection().fetch_add(1, Ordering::SeqCst);
                        assert_eq!(holders, 0);
                        std::thread::yield_now();
                        lease.connection().fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
        let connections = pool.num_connections("s3://a");
        assert_eq!(connections, created.load(Ordering::SeqCst));
        assert!(connections <= 8);
        assert_eq!(pool.num_available("s3://a"), connections);

        let mut seen = HashSet::new();
        while let Some(conn) = pool.get("s3://a") {
            assert!(seen.insert(Arc::as_ptr(&conn) as usize));
        }
        assert_eq!(seen.len(), connections);
    }
}
