//! Size constants for the column storage core.

/// Maximum number of elements a leaf may hold before it splits.
pub const MAX_LEAF_SIZE: usize = 1000;

/// Maximum number of children an inner B+-tree node may hold.
pub const MAX_INNER_CHILDREN: usize = 1000;

/// Longest string storable in a small-string leaf cell.
pub const SMALL_STRING_MAX: usize = 15;

/// Longest string storable in a medium-string leaf.
pub const MEDIUM_STRING_MAX: usize = 63;

/// Longest value storable in a small binary leaf.
pub const SMALL_BINARY_MAX: usize = 64;

/// Initial element capacity for freshly created leaves.
pub const LEAF_INITIAL_CAPACITY: usize = 8;
