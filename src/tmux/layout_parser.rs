//! Parser from tmux's wire layout grammar into the binary [`LayoutNode`]
//! tree (C2).
//!
//! tmux's `%layout-change` and `list-windows -F '#{window_layout}'` report
//! layouts as `WxH,X,Y,paneNumber` for a leaf and `WxH,X,Y{...}` /
//! `WxH,X,Y[...]` for an N-ary split, optionally preceded by a 4-hex-digit
//! checksum. `{...}` panes sit side by side in a row (a horizontal split);
//! `[...]` panes are stacked in a column (a vertical split). tmux's own
//! tree is N-ary; ours is strictly binary, so an N-ary split folds
//! left-leaning, with each fold's ratio set to the span of everything
//! folded so far over the running total span (`width` for a horizontal
//! row, `height` for a vertical stack).
//!
//! Leaves hold a [`TmuxPaneId`], not a native [`crate::layout::PaneId`] —
//! translating tmux pane numbers to bound native panes is the controller's
//! job (C5), once it knows which tab a window maps to.

use super::types::TmuxPaneId;
use crate::layout::{LayoutNode, SplitDirection};

pub(crate) type TmuxLayoutNode = LayoutNode<TmuxPaneId>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Dims {
    width: u32,
    height: u32,
}

/// Parse a tmux layout string into a binary layout tree over tmux pane ids.
///
/// Returns `None` on any malformed input; callers fall back to a synthetic
/// single-pane layout rather than propagating a parse error (see §7).
pub fn parse_layout(layout_str: &str) -> Option<TmuxLayoutNode> {
    let layout_str = strip_checksum(layout_str.trim());
    if layout_str.is_empty() {
        return None;
    }
    let (_, node, rest) = parse_node(layout_str)?;
    if !rest.is_empty() {
        return None;
    }
    Some(node)
}

/// The fallback layout the controller installs when parsing fails:
/// a single synthetic pane `%0`.
pub fn fallback_layout() -> TmuxLayoutNode {
    LayoutNode::pane(TmuxPaneId(0))
}

fn strip_checksum(s: &str) -> &str {
    if let Some(comma_idx) = s.find(',')
        && comma_idx == 4
        && s[..4].chars().all(|c| c.is_ascii_hexdigit())
    {
        return &s[5..];
    }
    s
}

fn parse_node(s: &str) -> Option<(Dims, TmuxLayoutNode, &str)> {
    let (width, s) = parse_number(s)?;
    let s = s.strip_prefix('x')?;
    let (height, s) = parse_number(s)?;
    let s = s.strip_prefix(',')?;
    let (_x, s) = parse_number(s)?;
    let s = s.strip_prefix(',')?;
    let (_y, s) = parse_number(s)?;

    let dims = Dims { width, height };

    if let Some(rest) = s.strip_prefix('{') {
        let (children, rest) = parse_children(rest, '}')?;
        let node = fold_children(SplitDirection::Horizontal, children)?;
        Some((dims, node, rest))
    } else if let Some(rest) = s.strip_prefix('[') {
        let (children, rest) = parse_children(rest, ']')?;
        let node = fold_children(SplitDirection::Vertical, children)?;
        Some((dims, node, rest))
    } else if let Some(rest) = s.strip_prefix(',') {
        let (id, rest) = parse_number(rest)?;
        Some((dims, LayoutNode::pane(TmuxPaneId(id as u64)), rest))
    } else {
        None
    }
}

fn parse_children(s: &str, end_char: char) -> Option<(Vec<(Dims, TmuxLayoutNode)>, &str)> {
    let mut children = Vec::new();
    let mut remaining = s;
    loop {
        let (dims, node, rest) = parse_node(remaining)?;
        children.push((dims, node));
        remaining = rest;
        if let Some(rest) = remaining.strip_prefix(end_char) {
            return Some((children, rest));
        } else if let Some(rest) = remaining.strip_prefix(',') {
            remaining = rest;
        } else {
            return None;
        }
    }
}

fn parse_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let num = s[..end].parse().ok()?;
    Some((num, &s[end..]))
}

fn span(direction: SplitDirection, dims: Dims) -> u32 {
    match direction {
        SplitDirection::Horizontal => dims.width,
        SplitDirection::Vertical => dims.height,
    }
}

/// Fold an N-ary child list into a left-leaning binary tree, with each
/// fold's ratio set to `span(accumulated) / span(accumulated + next)`.
fn fold_children(
    direction: SplitDirection,
    children: Vec<(Dims, TmuxLayoutNode)>,
) -> Option<TmuxLayoutNode> {
    let mut iter = children.into_iter();
    let (first_dims, first_node) = iter.next()?;
    let mut acc_span = span(direction, first_dims) as f32;
    let mut acc_node = first_node;

    for (dims, node) in iter {
        let this_span = span(direction, dims) as f32;
        let total = acc_span + this_span;
        let ratio = if total > 0.0 { acc_span / total } else { 0.5 };
        acc_node = LayoutNode::split(direction, ratio, acc_node, node);
        acc_span = total;
    }

    Some(acc_node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_pane() {
        let node = parse_layout("89x24,0,0,1").unwrap();
        assert_eq!(node, LayoutNode::pane(TmuxPaneId(1)));
    }

    #[test]
    fn parses_side_by_side_split() {
        // Two equal-width panes side by side.
        let node = parse_layout("89x24,0,0{44x24,0,0,1,44x24,45,0,2}").unwrap();
        match node {
            LayoutNode::Split {
                direction,
                ratio_bits,
                first,
                second,
            } => {
                assert_eq!(direction, SplitDirection::Horizontal);
                assert!((f32::from_bits(ratio_bits) - 0.5).abs() < 0.01);
                assert_eq!(*first, LayoutNode::pane(TmuxPaneId(1)));
                assert_eq!(*second, LayoutNode::pane(TmuxPaneId(2)));
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn parses_stacked_split() {
        let node = parse_layout("89x24,0,0[89x12,0,0,1,89x11,0,13,2]").unwrap();
        match node {
            LayoutNode::Split { direction, .. } => assert_eq!(direction, SplitDirection::Vertical),
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn strips_checksum_prefix() {
        let node = parse_layout("f865,89x24,0,0,1").unwrap();
        assert_eq!(node, LayoutNode::pane(TmuxPaneId(1)));
    }

    #[test]
    fn checksum_prefixed_two_pane_split_scenario() {
        let node = parse_layout("9d2f,120x30,0,0{60x30,0,0,1,60x30,60,0,2}").unwrap();
        assert_eq!(
            node,
            LayoutNode::split(
                SplitDirection::Horizontal,
                0.5,
                LayoutNode::pane(TmuxPaneId(1)),
                LayoutNode::pane(TmuxPaneId(2)),
            )
        );
    }

    #[test]
    fn folds_three_way_split_left_leaning_with_span_ratio() {
        // Three side-by-side panes of width 20, 20, 40 (total 80).
        let node = parse_layout("80x24,0,0{20x24,0,0,1,20x24,20,0,2,40x24,40,0,3}").unwrap();
        match node {
            LayoutNode::Split {
                ratio_bits,
                first,
                second,
                ..
            } => {
                // Outer fold: (20+20)=40 vs new 40 => ratio 0.5
                assert!((f32::from_bits(ratio_bits) - 0.5).abs() < 0.01);
                assert_eq!(*second, LayoutNode::pane(TmuxPaneId(3)));
                assert!((first.ratio().unwrap() - 0.5).abs() < 0.01);
            }
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn parses_nested_splits_and_collects_all_panes() {
        let node =
            parse_layout("89x24,0,0{44x24,0,0[44x12,0,0,1,44x11,0,13,2],44x24,45,0,3}").unwrap();
        let mut ids: Vec<u64> = node.collect_panes().into_iter().map(|p| p.0).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn malformed_input_returns_none() {
        assert!(parse_layout("").is_none());
        assert!(parse_layout("not-a-layout").is_none());
        assert!(parse_layout("89x24,0,0{44x24,0,0,1").is_none());
    }

    #[test]
    fn fallback_is_a_single_synthetic_pane() {
        assert_eq!(fallback_layout(), LayoutNode::pane(TmuxPaneId(0)));
    }
}
