//! Strongly-typed identifiers and the bounded reusable allocator behind them.
//!
//! Process and resource identifiers are dense unsigned integers drawn from a
//! bounded range. Zero is never representable; "no identifier" is expressed
//! as `Option` at API boundaries. Allocation is monotonic with wraparound
//! and duplicate-skip, so identifiers are eventually reused but never
//! aliased while live.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to define an integer identifier newtype.
///
/// Generates: struct, `new()`, `get()`, Display, Serialize, Deserialize.
macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(u32);

        impl $name {
            /// Wraps a raw identifier. Callers must never pass zero; the
            /// allocator is the normal source of these values.
            pub fn new(raw: u32) -> Self {
                debug_assert!(raw != 0, concat!(stringify!($name), " cannot be zero"));
                Self(raw)
            }

            /// The raw integer value.
            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(Pid, "Process identifier assigned by the scheduler.");
define_id!(Rid, "Resource identifier, unique per live (process, resource) pairing.");

/// Site identifier portion of an [`EntityId`].
pub type SiteId = u16;

/// Opaque world-model entity identifier, decomposable into `(site, entity)`.
///
/// The executor treats these as opaque except for grouping processes by
/// site and entity in the owner index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId {
    site: SiteId,
    entity: u64,
}

impl EntityId {
    pub fn new(site: SiteId, entity: u64) -> Self {
        Self { site, entity }
    }

    pub fn site(self) -> SiteId {
        self.site
    }

    pub fn entity(self) -> u64 {
        self.entity
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}-{}", self.site, self.entity)
    }
}

impl std::str::FromStr for EntityId {
    type Err = &'static str;

    /// Parses the user-facing `#site-entity` form; the leading `#` is
    /// optional.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.strip_prefix('#').unwrap_or(s);
        let (site, entity) = s.split_once('-').ok_or("expected site-entity")?;
        Ok(Self {
            site: site.parse().map_err(|_| "invalid site id")?,
            entity: entity.parse().map_err(|_| "invalid entity id")?,
        })
    }
}

/// Monotonic identifier allocator with wraparound and duplicate-skip.
///
/// Yields values in `1..=max`. The caller supplies the in-use predicate so
/// the allocator itself stays table-agnostic.
#[derive(Debug)]
pub struct IdAllocator {
    next: u32,
    max: u32,
}

impl IdAllocator {
    /// `max` is the inclusive upper bound on issued identifiers.
    pub fn new(max: u32) -> Self {
        debug_assert!(max >= 1);
        Self { next: 1, max }
    }

    /// Allocates the next identifier not currently in use.
    ///
    /// Returns `None` when `live_count` has reached the bound; callers
    /// treat that as saturation (fatal-logged, operation reports failure).
    pub fn allocate(&mut self, live_count: usize, in_use: impl Fn(u32) -> bool) -> Option<u32> {
        if live_count >= self.max as usize {
            return None;
        }

        loop {
            let candidate = self.next;
            self.next = if self.next >= self.max { 1 } else { self.next + 1 };

            if !in_use(candidate) {
                return Some(candidate);
            }
        }
    }

    /// The inclusive upper bound.
    pub fn max(&self) -> u32 {
        self.max
    }
}
