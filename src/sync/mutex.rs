//! Mutex and condvar wrappers - parking_lot if available, std otherwise.
//!
//! Both variants expose the same surface: `lock`, `try_lock`, and a
//! `Condvar` whose `wait`/`wait_for` take the guard by value.

#[cfg(feature = "parking_lot")]
mod imp {
    use std::time::Duration;

    pub use parking_lot::{Mutex, MutexGuard};

    /// Condition variable paired with [`Mutex`].
    #[derive(Default)]
    pub struct Condvar(parking_lot::Condvar);

    impl Condvar {
        /// Create a new condvar.
        pub const fn new() -> Self {
            Self(parking_lot::Condvar::new())
        }

        /// Block until notified.
        pub fn wait<'a, T>(&self, mut guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            self.0.wait(&mut guard);
            guard
        }

        /// Block until notified or `timeout` elapses. The flag is `true` on timeout.
        pub fn wait_for<'a, T>(
            &self,
            mut guard: MutexGuard<'a, T>,
            timeout: Duration,
        ) -> (MutexGuard<'a, T>, bool) {
            let result = self.0.wait_for(&mut guard, timeout);
            (guard, result.timed_out())
        }

        /// Wake every waiter.
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

#[cfg(not(feature = "parking_lot"))]
mod imp {
    use std::sync::{
        Condvar as StdCondvar, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError,
        TryLockError,
    };
    use std::time::Duration;

    /// Thin wrapper around std::sync::Mutex that ignores poisoning.
    #[derive(Default)]
    pub struct Mutex<T>(StdMutex<T>);

    impl<T> Mutex<T> {
        /// Create a new mutex.
        pub const fn new(value: T) -> Self {
            Self(StdMutex::new(value))
        }

        /// Lock the mutex.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            MutexGuard(self.0.lock().unwrap_or_else(PoisonError::into_inner))
        }

        /// Lock the mutex if it is free.
        pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
            match self.0.try_lock() {
                Ok(guard) => Some(MutexGuard(guard)),
                Err(TryLockError::Poisoned(poisoned)) => Some(MutexGuard(poisoned.into_inner())),
                Err(TryLockError::WouldBlock) => None,
            }
        }

        /// Consume the mutex, returning the value.
        pub fn into_inner(self) -> T {
            self.0.into_inner().unwrap_or_else(PoisonError::into_inner)
        }

        /// Borrow the value mutably without locking.
        pub fn get_mut(&mut self) -> &mut T {
            self.0.get_mut().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Guard for std mutex.
    pub struct MutexGuard<'a, T>(StdMutexGuard<'a, T>);

    impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            &self.0
        }
    }

    impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            &mut self.0
        }
    }

    /// Condition variable paired with [`Mutex`].
    #[derive(Default)]
    pub struct Condvar(StdCondvar);

    impl Condvar {
        /// Create a new condvar.
        pub const fn new() -> Self {
            Self(StdCondvar::new())
        }

        /// Block until notified.
        pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
            MutexGuard(self.0.wait(guard.0).unwrap_or_else(PoisonError::into_inner))
        }

        /// Block until notified or `timeout` elapses. The flag is `true` on timeout.
        pub fn wait_for<'a, T>(
            &self,
            guard: MutexGuard<'a, T>,
            timeout: Duration,
        ) -> (MutexGuard<'a, T>, bool) {
            let (guard, result) = self
                .0
                .wait_timeout(guard.0, timeout)
                .unwrap_or_else(PoisonError::into_inner);
            (MutexGuard(guard), result.timed_out())
        }

        /// Wake every waiter.
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

pub use imp::{Condvar, Mutex, MutexGuard};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_try_lock_contended() {
        let mutex = Mutex::new(1u32);
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert_eq!(*mutex.try_lock().unwrap(), 1);
    }

    #[test]
    fn test_condvar_wakes_waiter() {
        let pair = Arc::new((Mutex::new(false), Condvar::new()));
        let remote = Arc::clone(&pair);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            *remote.0.lock() = true;
            remote.1.notify_all();
        });

        let mut ready = pair.0.lock();
        while !*ready {
            ready = pair.1.wait(ready);
        }
        drop(ready);
        handle.join().unwrap();
    }

    #[test]
    fn test_condvar_timeout() {
        let mutex = Mutex::new(());
        let condvar = Condvar::new();
        let (_guard, timed_out) = condvar.wait_for(mutex.lock(), Duration::from_millis(1));
        assert!(timed_out);
    }
}
