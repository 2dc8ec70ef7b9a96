//! Explicitly resettable lazy cell.
//!
//! Native objects that depend on the presentation surface (command lists,
//! render-target views, swapchains) are created on first use and dropped
//! again when the surface changes. Unlike `OnceCell`, the cell can go back
//! to the empty state, but only through `reset`, which callers invoke at a
//! synchronisation point (after the device is idle).

/// A value that is created on first access and can be explicitly reset.
#[derive(Debug)]
pub enum ValueLazy<T> {
    /// The value has not been created yet, or was reset.
    NotCreated,
    /// The value exists.
    Created(T),
}

impl<T> Default for ValueLazy<T> {
    fn default() -> Self {
        Self::NotCreated
    }
}

impl<T> ValueLazy<T> {
    /// Create an empty cell.
    pub const fn new() -> Self {
        Self::NotCreated
    }

    /// Whether the value has been created.
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    /// Borrow the value if it exists.
    pub fn get(&self) -> Option<&T> {
        match self {
            Self::Created(value) => Some(value),
            Self::NotCreated => None,
        }
    }

    /// Return the value, creating it with `create` if necessary.
    ///
    /// A failed `create` leaves the cell empty.
    pub fn get_or_try_init<E>(&mut self, create: impl FnOnce() -> Result<T, E>) -> Result<&T, E> {
        if let Self::NotCreated = self {
            *self = Self::Created(create()?);
        }
        match self {
            Self::Created(value) => Ok(value),
            Self::NotCreated => unreachable!("lazy value initialised above"),
        }
    }

    /// Empty the cell, returning the previous value so the caller can
    /// release its native handles.
    pub fn reset(&mut self) -> Option<T> {
        match std::mem::take(self) {
            Self::Created(value) => Some(value),
            Self::NotCreated => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_once() {
        let mut lazy = ValueLazy::new();
        let mut calls = 0;
        for _ in 0..3 {
            let value = lazy
                .get_or_try_init(|| {
                    calls += 1;
                    Ok::<_, ()>(7u32)
                })
                .copied();
            assert_eq!(value, Ok(7));
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_reset_recreates() {
        let mut lazy = ValueLazy::new();
        lazy.get_or_try_init(|| Ok::<_, ()>(1u32)).unwrap();
        assert_eq!(lazy.reset(), Some(1));
        assert!(!lazy.is_created());
        assert_eq!(lazy.reset(), None);
        assert_eq!(lazy.get_or_try_init(|| Ok::<_, ()>(2u32)).copied(), Ok(2));
    }

    #[test]
    fn test_failed_init_stays_empty() {
        let mut lazy: ValueLazy<u32> = ValueLazy::new();
        assert_eq!(lazy.get_or_try_init(|| Err("boom")), Err("boom"));
        assert!(lazy.get().is_none());
    }
}
