//! Effective-segment resolution over the element hierarchy.
//!
//! An element's effective segments are its own assigned segments plus, unless it breaks
//! inheritance, those of its ancestors. The walk goes from the nearest parent towards the root
//! and stops after the first ancestor that itself breaks inheritance. Ancestors without an
//! assignment row contribute nothing and do not stop the walk.

use crate::assigner::SegmentAssignment;
use crate::segment::SegmentSet;

/// Resolves the effective segment set from an element's own assignment and a lazy ancestor chain.
///
/// `ancestors` yields the assignment of each ancestor (nearest first), or `None` when that
/// ancestor has no row. It is only pulled as far as needed, so callers can back it with storage
/// lookups.
pub fn resolve_effective_segments<I, E>(
    own: Option<&SegmentAssignment>,
    ancestors: I,
) -> Result<SegmentSet, E>
where
    I: IntoIterator<Item = Result<Option<SegmentAssignment>, E>>,
{
    let mut effective = SegmentSet::new();

    if let Some(own) = own {
        effective.union_with(&own.segments);
        if own.breaks_inheritance {
            return Ok(effective);
        }
    }

    for ancestor in ancestors {
        let Some(ancestor) = ancestor? else {
            continue;
        };
        effective.union_with(&ancestor.segments);
        if ancestor.breaks_inheritance {
            break;
        }
    }

    Ok(effective)
}
