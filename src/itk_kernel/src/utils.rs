//! Utility items shared by the kernel modules.

/// Types that have a `const`-evaluable initial value.
///
/// The kernel object tables are built in a `const fn`, so every control
/// block provides its zero state through this trait instead of `Default`
/// (which isn't `const`-callable).
pub(crate) trait Init {
    /// The initial value.
    const INIT: Self;
}
