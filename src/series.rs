//! Grouping and merging of result series
//!
//! A `get` query produces one raw series per stored tag tuple. The
//! `SeriesSet` collapses those according to the query's group-by mask:
//! masked-out tag positions are rewritten to the empty string, and series
//! whose rewritten tuples are equal are folded together point by point.
//! Members are kept in insertion order; callers must treat the returned
//! groups as a set.

use crate::wire::{ResPoint, ResSeries};

/// Fold `other` into `point` (values summed, counts saturating-summed)
#[inline]
pub fn merge_point(point: &mut ResPoint, other: &ResPoint) {
    point.value += other.value;
    point.count = point.count.saturating_add(other.count);
}

/// True when two rewritten tuples belong to the same group
fn same_group(a: &ResSeries, b: &ResSeries) -> bool {
    a.fields.len() == b.fields.len() && a.fields.iter().zip(&b.fields).all(|(x, y)| x == y)
}

/// In-memory merge structure for one query's result groups
#[derive(Debug)]
pub struct SeriesSet {
    items: Vec<ResSeries>,
    group_by: Vec<bool>,
}

impl SeriesSet {
    /// Create an empty set with the query's group-by mask
    pub fn new(group_by: Vec<bool>) -> Self {
        Self {
            items: Vec::new(),
            group_by,
        }
    }

    /// Rewrite a tuple per the mask: position i keeps its value only if
    /// `group_by[i]` is true; positions at or beyond the mask length
    /// collapse to the empty string.
    fn group_fields(&self, fields: &mut [String]) {
        for (i, field) in fields.iter_mut().enumerate() {
            let keep = self.group_by.get(i).copied().unwrap_or(false);
            if !keep {
                field.clear();
            }
        }
    }

    /// Insert a series, folding it into an existing member when the
    /// rewritten tuples match.
    ///
    /// All series inserted for one query share the same aligned time range
    /// and output resolution, so matching members have equal point counts.
    pub fn insert(&mut self, mut series: ResSeries) {
        self.group_fields(&mut series.fields);

        for member in &mut self.items {
            if same_group(member, &series) {
                for (p, q) in member.points.iter_mut().zip(&series.points) {
                    merge_point(p, q);
                }
                return;
            }
        }

        self.items.push(series);
    }

    /// The merged groups in insertion order
    pub fn into_groups(self) -> Vec<ResSeries> {
        self.items
    }
}
