//! Immutable binary split/pane tree (C1).
//!
//! A `LayoutNode<T>` is either a leaf holding a `T` or a `Split` holding two
//! children and a proportional ratio. It is generic over the leaf type
//! because the same shape is produced twice in this crate: the tmux layout
//! parser (C2) builds a tree over raw tmux pane ids (`TmuxPaneId`), and the
//! workspace coordinator (C6) holds the translated tree over native
//! [`PaneId`]s after `apply_layout` maps each tmux id to a bound pane. All
//! mutation is copy-on-write: operations consume the tree and return a new
//! one rather than mutating in place, so a previous layout can always be
//! diffed against the next one (see [`LayoutNode::preserve_ratios`]).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, process-unique native pane identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PaneId(pub u64);

impl fmt::Display for PaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pane-{}", self.0)
    }
}

impl PaneId {
    /// Mint a fresh, process-unique id. Native ids need no structure beyond
    /// uniqueness (see the "opaque identifiers" design note); a counter is
    /// simpler than a random 128-bit token and just as adequate here.
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        PaneId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Direction of a split.
///
/// `Horizontal` panes sit side by side in a row (ratio is the width share
/// of the first child); `Vertical` panes are stacked in a column (ratio is
/// the height share of the first child). This matches tmux's own grammar:
/// a `{...}` row is a horizontal split, a `[...]` stack is vertical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitDirection {
    Horizontal,
    Vertical,
}

/// A node in a binary pane layout tree, generic over the leaf id type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutNode<T> {
    Pane(T),
    Split {
        direction: SplitDirection,
        /// Stored as bits of an `f32` so the type can derive `Eq`; use
        /// [`LayoutNode::ratio`] to read it back.
        ratio_bits: u32,
        first: Box<LayoutNode<T>>,
        second: Box<LayoutNode<T>>,
    },
}

/// Clamp and sanitize a ratio per the data-model invariant: `[0.1, 0.9]`,
/// with non-finite input coerced to `0.5`.
fn sanitize_ratio(ratio: f32) -> f32 {
    if ratio.is_finite() {
        ratio.clamp(0.1, 0.9)
    } else {
        0.5
    }
}

impl<T: Clone + PartialEq> LayoutNode<T> {
    pub fn pane(id: T) -> Self {
        LayoutNode::Pane(id)
    }

    pub fn split(direction: SplitDirection, ratio: f32, first: Self, second: Self) -> Self {
        LayoutNode::Split {
            direction,
            ratio_bits: sanitize_ratio(ratio).to_bits(),
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    pub fn ratio(&self) -> Option<f32> {
        match self {
            LayoutNode::Split { ratio_bits, .. } => Some(f32::from_bits(*ratio_bits)),
            LayoutNode::Pane(_) => None,
        }
    }

    pub fn is_pane(&self) -> bool {
        matches!(self, LayoutNode::Pane(_))
    }

    /// In-order traversal of every leaf id reachable from this node.
    pub fn collect_panes(&self) -> Vec<T> {
        let mut out = Vec::new();
        self.collect_panes_into(&mut out);
        out
    }

    fn collect_panes_into(&self, out: &mut Vec<T>) {
        match self {
            LayoutNode::Pane(id) => out.push(id.clone()),
            LayoutNode::Split { first, second, .. } => {
                first.collect_panes_into(out);
                second.collect_panes_into(out);
            }
        }
    }

    pub fn contains(&self, id: &T) -> bool {
        match self {
            LayoutNode::Pane(p) => p == id,
            LayoutNode::Split { first, second, .. } => first.contains(id) || second.contains(id),
        }
    }

    /// Locate the leaf with `pane_id = target` and replace it with a new
    /// split holding `target` and `new_pane` at ratio `0.5`. A no-op if
    /// `target` is absent.
    pub fn split_at(&self, target: &T, direction: SplitDirection, new_pane: T) -> Self {
        match self {
            LayoutNode::Pane(id) if id == target => Self::split(
                direction,
                0.5,
                LayoutNode::Pane(target.clone()),
                LayoutNode::Pane(new_pane),
            ),
            LayoutNode::Pane(_) => self.clone(),
            LayoutNode::Split {
                direction: d,
                ratio_bits,
                first,
                second,
            } => {
                if first.contains(target) {
                    Self::split(
                        *d,
                        f32::from_bits(*ratio_bits),
                        first.split_at(target, direction, new_pane),
                        (**second).clone(),
                    )
                } else if second.contains(target) {
                    Self::split(
                        *d,
                        f32::from_bits(*ratio_bits),
                        (**first).clone(),
                        second.split_at(target, direction, new_pane),
                    )
                } else {
                    self.clone()
                }
            }
        }
    }

    /// Remove the leaf matching `pane`. A split that loses exactly one
    /// child collapses to the surviving child (its ratio is lost); a tree
    /// that loses its only pane collapses entirely to `None`.
    pub fn remove_pane(&self, pane: &T) -> Option<Self> {
        match self {
            LayoutNode::Pane(id) => {
                if id == pane {
                    None
                } else {
                    Some(self.clone())
                }
            }
            LayoutNode::Split {
                direction,
                ratio_bits,
                first,
                second,
            } => {
                let new_first = first.remove_pane(pane);
                let new_second = second.remove_pane(pane);
                match (new_first, new_second) {
                    (Some(f), Some(s)) => {
                        Some(Self::split(*direction, f32::from_bits(*ratio_bits), f, s))
                    }
                    (Some(f), None) => Some(f),
                    (None, Some(s)) => Some(s),
                    (None, None) => None,
                }
            }
        }
    }

    /// Update the ratio of the split reached by walking `path` (a sequence
    /// over `{L, R}` from the root). Non-matching paths are a no-op.
    pub fn update_ratio_at(&self, path: &[Step], ratio: f32) -> Self {
        match (self, path.split_first()) {
            (
                LayoutNode::Split {
                    direction,
                    ratio_bits,
                    first,
                    second,
                },
                Some((step, rest)),
            ) => {
                if rest.is_empty() {
                    Self::split(*direction, ratio, (**first).clone(), (**second).clone())
                } else {
                    match step {
                        Step::Left => Self::split(
                            *direction,
                            f32::from_bits(*ratio_bits),
                            first.update_ratio_at(rest, ratio),
                            (**second).clone(),
                        ),
                        Step::Right => Self::split(
                            *direction,
                            f32::from_bits(*ratio_bits),
                            (**first).clone(),
                            second.update_ratio_at(rest, ratio),
                        ),
                    }
                }
            }
            _ => self.clone(),
        }
    }

    /// Structural merge used when the tmux controller supplies a fresh
    /// layout: if both `self` (the previous tree) and `next` are splits
    /// with the same direction, keep `self`'s ratio and recurse pairwise;
    /// otherwise take `next` wholesale.
    pub fn preserve_ratios(&self, next: &Self) -> Self {
        match (self, next) {
            (
                LayoutNode::Split {
                    direction: d1,
                    ratio_bits,
                    first: f1,
                    second: s1,
                },
                LayoutNode::Split {
                    direction: d2,
                    first: f2,
                    second: s2,
                    ..
                },
            ) if d1 == d2 => Self::split(
                *d1,
                f32::from_bits(*ratio_bits),
                f1.preserve_ratios(f2),
                s1.preserve_ratios(s2),
            ),
            _ => next.clone(),
        }
    }
}

/// A step in a root-to-split path, used by [`LayoutNode::update_ratio_at`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Left,
    Right,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(n: u64) -> PaneId {
        PaneId(n)
    }

    #[test]
    fn layout_split_scenario() {
        let l = LayoutNode::pane(p(1));
        let l2 = l.split_at(&p(1), SplitDirection::Horizontal, p(2));
        assert_eq!(
            l2,
            LayoutNode::split(
                SplitDirection::Horizontal,
                0.5,
                LayoutNode::pane(p(1)),
                LayoutNode::pane(p(2)),
            )
        );
        assert_eq!(l2.collect_panes(), vec![p(1), p(2)]);
    }

    #[test]
    fn split_at_missing_target_is_noop() {
        let l = LayoutNode::pane(p(1));
        let l2 = l.split_at(&p(99), SplitDirection::Vertical, p(2));
        assert_eq!(l, l2);
    }

    #[test]
    fn layout_collapse_scenario() {
        let l = LayoutNode::split(
            SplitDirection::Vertical,
            0.3,
            LayoutNode::pane(p(1)), // a
            LayoutNode::split(
                SplitDirection::Horizontal,
                0.7,
                LayoutNode::pane(p(2)), // b
                LayoutNode::pane(p(3)), // c
            ),
        );

        let l2 = l.remove_pane(&p(2)).unwrap();
        assert_eq!(
            l2,
            LayoutNode::split(
                SplitDirection::Vertical,
                0.3,
                LayoutNode::pane(p(1)),
                LayoutNode::pane(p(3)),
            )
        );

        let l3 = l2.remove_pane(&p(1)).unwrap();
        assert_eq!(l3, LayoutNode::pane(p(3)));

        assert!(l3.remove_pane(&p(3)).is_none());
    }

    #[test]
    fn ratio_is_clamped_and_non_finite_coerced() {
        let l: LayoutNode<PaneId> = LayoutNode::split(
            SplitDirection::Horizontal,
            1.5,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        assert_eq!(l.ratio(), Some(0.9));

        let l2: LayoutNode<PaneId> = LayoutNode::split(
            SplitDirection::Horizontal,
            f32::NAN,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        assert_eq!(l2.ratio(), Some(0.5));
    }

    #[test]
    fn update_ratio_at_path() {
        let l = LayoutNode::split(
            SplitDirection::Vertical,
            0.5,
            LayoutNode::pane(p(1)),
            LayoutNode::split(
                SplitDirection::Horizontal,
                0.5,
                LayoutNode::pane(p(2)),
                LayoutNode::pane(p(3)),
            ),
        );
        let l2 = l.update_ratio_at(&[Step::Right], 0.8);
        match l2 {
            LayoutNode::Split { ratio_bits, second, .. } => {
                assert_eq!(f32::from_bits(ratio_bits), 0.5);
                assert_eq!(second.ratio(), Some(0.8));
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn update_ratio_at_nonmatching_path_is_noop() {
        let l = LayoutNode::split(
            SplitDirection::Vertical,
            0.5,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        let l2 = l.update_ratio_at(&[Step::Left, Step::Right], 0.9);
        assert_eq!(l, l2);
    }

    #[test]
    fn preserve_ratios_idempotent_on_identical_input() {
        let l = LayoutNode::split(
            SplitDirection::Horizontal,
            0.7,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        assert_eq!(l.preserve_ratios(&l), l);
    }

    #[test]
    fn preserve_ratios_takes_next_wholesale_on_structural_difference() {
        let prev = LayoutNode::pane(p(1));
        let next = LayoutNode::split(
            SplitDirection::Horizontal,
            0.6,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        assert_eq!(prev.preserve_ratios(&next), next);

        let prev2 = LayoutNode::split(
            SplitDirection::Vertical,
            0.6,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        let next2 = LayoutNode::split(
            SplitDirection::Horizontal,
            0.3,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        assert_eq!(prev2.preserve_ratios(&next2), next2);
    }

    #[test]
    fn preserve_ratios_keeps_prev_ratio_on_matching_structure() {
        // Scenario 6 from the spec's testable properties.
        let prev = LayoutNode::split(
            SplitDirection::Horizontal,
            0.7,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        let next = LayoutNode::split(
            SplitDirection::Horizontal,
            0.5,
            LayoutNode::pane(p(1)),
            LayoutNode::pane(p(2)),
        );
        let merged = prev.preserve_ratios(&next);
        assert_eq!(merged, prev);
    }

    #[test]
    fn no_duplicate_panes_after_split_and_remove_sequence() {
        let l = LayoutNode::pane(p(1));
        let l = l.split_at(&p(1), SplitDirection::Horizontal, p(2));
        let l = l.split_at(&p(2), SplitDirection::Vertical, p(3));
        let panes = l.collect_panes();
        let mut sorted = panes.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(panes.len(), sorted.len());
    }
}
