//! Value object marker.

/// Immutable value compared by its contents, with no identity of its own.
///
/// Account codes (`"1.1.01"`) and entry numbers (`"JE-2026-000042"`) are
/// validated once at construction and never mutated afterwards.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
