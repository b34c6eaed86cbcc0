use super::*;

#[test]
fn test_uniform_tree_reads_everywhere() {
    let tree = QTree::new(4, 7);
    assert_eq!(tree.size(), 16);
    assert_eq!(tree.get(0, 0), 7);
    assert_eq!(tree.get(15, 15), 7);
    // out-of-domain reads are 0
    assert_eq!(tree.get(16, 0), 0);
}

#[test]
fn test_set_then_get() {
    let mut tree = QTree::new(5, 0);
    tree.set(3, 17, 9);
    tree.set(31, 0, 2);
    assert_eq!(tree.get(3, 17), 9);
    assert_eq!(tree.get(31, 0), 2);
    assert_eq!(tree.get(3, 18), 0);
}

#[test]
fn test_set_collapses_back_to_leaf() {
    let mut tree = QTree::new(3, 0);
    tree.set(5, 2, 4);
    tree.set(5, 2, 0);
    assert_eq!(tree, QTree::new(3, 0));
}

#[test]
fn test_fill_whole_domain_is_one_leaf() {
    let mut tree = QTree::new(6, 0);
    tree.fill(0, 0, 64, 64, 3);
    assert_eq!(tree, QTree::new(6, 3));
}

#[test]
fn test_fill_partial_rect() {
    let mut tree = QTree::new(4, 0);
    tree.fill(2, 3, 9, 11, 5);
    for y in 0..16 {
        for x in 0..16 {
            let expect = if (2..9).contains(&x) && (3..11).contains(&y) { 5 } else { 0 };
            assert_eq!(tree.get(x, y), expect, "cell ({}, {})", x, y);
        }
    }
}

#[test]
fn test_fill_clamps_to_domain() {
    let mut tree = QTree::new(2, 0);
    tree.fill(3, 3, 100, 100, 1);
    assert_eq!(tree.count_if(|v| v == 1), 1);
}

#[test]
fn test_for_each_quad_is_maximal_and_ordered() {
    let mut tree = QTree::new(2, 0);
    tree.fill(0, 0, 2, 2, 1); // lower-left quadrant uniform

    let mut quads = Vec::new();
    tree.for_each_quad(|x, y, size, v| quads.push((x, y, size, v)));

    // one maximal 2x2 quad followed by the three empty quadrants
    assert_eq!(
        quads,
        vec![(0, 0, 2, 1), (2, 0, 2, 0), (0, 2, 2, 0), (2, 2, 2, 0)]
    );
}

#[test]
fn test_combine_or_and_sub() {
    let mut a = QTree::new(4, 0);
    let mut b = QTree::new(4, 0);
    a.fill(0, 0, 8, 16, 0b01);
    b.fill(4, 0, 16, 16, 0b10);

    let or = a.combine(&b, |x, y| x | y);
    assert_eq!(or.get(0, 0), 0b01);
    assert_eq!(or.get(5, 5), 0b11);
    assert_eq!(or.get(12, 12), 0b10);

    let and = a.combine(&b, |x, y| x & y);
    assert!(!and.any(|v| v != 0));

    let sub = a.combine(&b, |x, y| x & !y);
    assert_eq!(sub.get(0, 0), 0b01);
    assert_eq!(sub.get(5, 5), 0b01);
}

#[test]
fn test_combine_collapses_result() {
    let mut a = QTree::new(3, 0);
    a.fill(0, 0, 4, 4, 1);
    let b = a.map(|v| 1 - v); // complement
    let or = a.combine(&b, |x, y| x | y);
    assert_eq!(or, QTree::new(3, 1));
}

#[test]
fn test_count_if() {
    let mut tree = QTree::new(5, 0);
    tree.fill(0, 0, 10, 10, 2);
    assert_eq!(tree.count_if(|v| v == 2), 100);
    assert_eq!(tree.count_if(|v| v == 0), 32 * 32 - 100);
}

#[test]
fn test_serialize_roundtrip() {
    let mut tree = QTree::new(6, 0);
    tree.fill(1, 1, 33, 29, 5);
    tree.set(63, 63, 300);
    tree.set(0, 62, 1);

    let blob = tree.serialize();
    let back = QTree::deserialize(6, &blob).unwrap();
    assert_eq!(back, tree);
}

#[test]
fn test_serialize_uniform_is_tiny() {
    let blob = QTree::new(10, 0).serialize();
    // one split bit plus a one-byte varint
    assert_eq!(blob.len(), 2);
}

#[test]
fn test_deserialize_rejects_overdeep_split() {
    let mut deep = QTree::new(2, 0);
    deep.set(0, 0, 1);
    let blob = deep.serialize();
    // claiming a shallower domain than the blob encodes must fail
    assert!(QTree::deserialize(1, &blob).is_err());
}

#[test]
fn test_rastermask_basics() {
    let mut mask = RasterMask::empty(8);
    assert!(mask.is_empty());
    mask.set(1, 2, true);
    mask.fill(4, 4, 8, 8, true);
    assert!(mask.get(1, 2));
    assert!(mask.get(5, 7));
    assert!(!mask.get(0, 0));
    assert_eq!(mask.count(), 1 + 16);
    assert!(!mask.is_empty());
    assert!(!mask.is_full());
}

#[test]
fn test_rastermask_invert_and_algebra() {
    let mut a = RasterMask::empty(4);
    a.fill(0, 0, 2, 4, true);
    let inv = a.invert();
    assert_eq!(inv.count(), 8);
    assert!(a.intersect(&inv).is_empty());
    assert!(a.union(&inv).is_full());
    assert_eq!(a.subtract(&a).count(), 0);
}

#[test]
fn test_rastermask_serialize_roundtrip() {
    let mut mask = RasterMask::empty(256);
    mask.fill(10, 20, 100, 200, true);
    mask.set(255, 255, true);
    let blob = mask.serialize();
    let back = RasterMask::deserialize(&blob).unwrap();
    assert_eq!(back, mask);
}
