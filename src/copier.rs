//! Copy semantics for stored keys and values.
//!
//! A store hands every key and value it stores through `copy_for_write`, and
//! every value it returns through `copy_for_read`. The default
//! [`IdentityCopier`] shares the value (a plain `clone`, which is cheap for
//! `Arc`-like values). Use [`DeepCopier`] to isolate callers from each
//! other's mutations of values behind shared pointers.

use std::{fmt, marker::PhantomData, sync::Arc};

/// Copies keys or values as they enter and leave a store.
pub trait Copier<T>: Send + Sync {
    /// Returns the instance handed to a caller that reads `value`.
    fn copy_for_read(&self, value: &T) -> T;

    /// Returns the instance the store keeps when a caller writes `value`.
    fn copy_for_write(&self, value: &T) -> T;
}

/// Stores and returns clones of the caller's instances.
pub struct IdentityCopier<T>(PhantomData<fn(T) -> T>);

impl<T> Default for IdentityCopier<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> fmt::Debug for IdentityCopier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IdentityCopier")
    }
}

impl<T: Clone> Copier<T> for IdentityCopier<T> {
    fn copy_for_read(&self, value: &T) -> T {
        value.clone()
    }

    fn copy_for_write(&self, value: &T) -> T {
        value.clone()
    }
}

/// Copies the contents behind an `Arc<T>` into a fresh `Arc` both ways, so
/// no two callers ever share the same allocation.
pub struct DeepCopier<T>(PhantomData<fn(T) -> T>);

impl<T> Default for DeepCopier<T> {
    fn default() -> Self {
        Self(PhantomData)
    }
}

impl<T> fmt::Debug for DeepCopier<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DeepCopier")
    }
}

impl<T: Clone> Copier<Arc<T>> for DeepCopier<T> {
    fn copy_for_read(&self, value: &Arc<T>) -> Arc<T> {
        Arc::new(T::clone(value))
    }

    fn copy_for_write(&self, value: &Arc<T>) -> Arc<T> {
        Arc::new(T::clone(value))
    }
}

pub(crate) type SharedCopier<T> = Arc<dyn Copier<T> + 'static>;

#[cfg(test)]
mod tests {
    use super::{Copier, DeepCopier, IdentityCopier};
    use std::sync::Arc;

    #[test]
    fn identity_copier_shares() {
        let copier = IdentityCopier::default();
        let value = Arc::new(vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&copier.copy_for_read(&value), &value));
        assert!(Arc::ptr_eq(&copier.copy_for_write(&value), &value));
    }

    #[test]
    fn deep_copier_isolates() {
        let copier = DeepCopier::default();
        let value = Arc::new(vec![1, 2, 3]);
        let read = copier.copy_for_read(&value);
        assert!(!Arc::ptr_eq(&read, &value));
        assert_eq!(read, value);
        assert!(!Arc::ptr_eq(&copier.copy_for_write(&value), &value));
    }
}
