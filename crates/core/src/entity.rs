//! Entity traits: identity, plus parent links for tree-shaped entities.

/// Entity marker + minimal interface.
pub trait Entity {
    /// Strongly-typed entity identifier.
    type Id: Copy + Eq + core::hash::Hash + core::fmt::Debug + core::fmt::Display;

    /// Returns the entity identifier.
    fn id(&self) -> Self::Id;
}

/// An entity that lives in a single-parent tree (modules, organization units).
///
/// `None` marks a root. Cycles are a data-integrity violation; traversals over
/// these nodes detect them instead of assuming they cannot happen.
pub trait TreeNode: Entity {
    fn parent_id(&self) -> Option<Self::Id>;
}
