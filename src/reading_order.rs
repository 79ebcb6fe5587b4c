//! Top-to-bottom, left-to-right ordering of detected text regions.

use crate::geometry::Quad;

/// Two anchors closer than this vertically are treated as the same line.
pub const SAME_LINE_THRESHOLD: i32 = 10;

/// Sort regions into reading order.
///
/// Regions are sorted by the `(y, x)` of their first corner, then a single
/// left-to-right pass swaps neighbours that sit on the same line
/// (`|dy| < 10`) but are horizontally inverted.
///
/// The repair pass runs exactly once and does not iterate to a fixed point,
/// so a run of three or more inverted regions on one line can stay
/// partially out of order.
pub fn sorted_boxes(mut boxes: Vec<Quad>) -> Vec<Quad> {
    boxes.sort_by(|a, b| {
        let (a, b) = (a.first(), b.first());
        a.y.cmp(&b.y).then(a.x.cmp(&b.x))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        let cur = boxes[i].first();
        let next = boxes[i + 1].first();
        if (next.y - cur.y).abs() < SAME_LINE_THRESHOLD && next.x < cur.x {
            boxes.swap(i, i + 1);
        }
    }

    boxes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchored(x: i32, y: i32) -> Quad {
        Quad::from_rect(x, y, x + 30, y + 12)
    }

    fn anchors(boxes: &[Quad]) -> Vec<(i32, i32)> {
        boxes.iter().map(|b| (b.first().x, b.first().y)).collect()
    }

    #[test]
    fn test_same_line_inversion_is_swapped() {
        let a = anchored(50, 100);
        let b = anchored(20, 104);
        assert_eq!(sorted_boxes(vec![a, b]), vec![b, a]);
    }

    #[test]
    fn test_primary_order_is_by_y() {
        let boxes = vec![anchored(10, 300), anchored(40, 50), anchored(70, 150)];
        let ys: Vec<i32> = sorted_boxes(boxes).iter().map(|b| b.first().y).collect();
        assert_eq!(ys, vec![50, 150, 300]);
    }

    #[test]
    fn test_equal_y_breaks_tie_on_x() {
        let boxes = vec![anchored(90, 20), anchored(10, 20), anchored(50, 20)];
        assert_eq!(anchors(&sorted_boxes(boxes)), vec![(10, 20), (50, 20), (90, 20)]);
    }

    #[test]
    fn test_gap_of_ten_is_a_new_line() {
        let a = anchored(50, 100);
        let b = anchored(20, 110);
        assert_eq!(sorted_boxes(vec![b, a]), vec![a, b]);
    }

    #[test]
    fn test_single_pass_leaves_long_chains_partially_ordered() {
        // One line, three regions, each lower anchor further left.
        let a = anchored(90, 100);
        let b = anchored(50, 102);
        let c = anchored(10, 104);
        // A full fix would give [c, b, a]; one pass only bubbles `a` right.
        assert_eq!(sorted_boxes(vec![a, b, c]), vec![b, c, a]);
    }

    #[test]
    fn test_sort_keeps_every_region() {
        let boxes = vec![
            anchored(5, 5),
            anchored(5, 5),
            anchored(300, 7),
            anchored(0, 400),
            anchored(120, 60),
        ];
        let mut sorted = sorted_boxes(boxes.clone());
        assert_eq!(sorted.len(), boxes.len());

        let mut expected = anchors(&boxes);
        let mut got = anchors(&sorted);
        expected.sort();
        got.sort();
        assert_eq!(got, expected);

        sorted.dedup();
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn test_empty_and_single() {
        assert!(sorted_boxes(Vec::new()).is_empty());
        let only = anchored(3, 4);
        assert_eq!(sorted_boxes(vec![only]), vec![only]);
    }
}
