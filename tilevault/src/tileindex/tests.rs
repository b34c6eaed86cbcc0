use super::*;
use crate::tileid::TileId;

fn material(index: &TileIndex, lod: Lod) -> Vec<TileId> {
    let mut out = Vec::new();
    index.traverse(lod, |id, _| out.push(id));
    out
}

#[test]
fn test_empty_index() {
    let index = TileIndex::new();
    assert!(index.is_empty());
    assert_eq!(index.lod_range(), LodRange::Empty);
    assert_eq!(index.get(TileId::new(3, 1, 1)), 0);
    assert!(!index.exists(TileId::new(3, 1, 1)));
}

#[test]
fn test_set_get_exists() {
    let mut index = TileIndex::new();
    let id = TileId::new(4, 7, 2);
    index.set(id, flags::MESH | flags::ATLAS);
    assert_eq!(index.get(id), flags::MESH | flags::ATLAS);
    assert!(index.exists(id));
    assert!(!index.is_empty());
    assert_eq!(index.lod_range(), LodRange::single(4));

    // children bit alone is not material
    let other = TileId::new(4, 0, 0);
    index.set(other, flags::CHILDREN);
    assert!(!index.exists(other));
}

#[test]
fn test_set_mask() {
    let mut index = TileIndex::new();
    let id = TileId::new(2, 1, 1);
    index.set_mask(id, flags::MESH, MaskOp::Set);
    index.set_mask(id, flags::NAVTILE, MaskOp::Set);
    assert_eq!(index.get(id), flags::MESH | flags::NAVTILE);
    index.set_mask(id, flags::MESH, MaskOp::Clear);
    assert_eq!(index.get(id), flags::NAVTILE);
}

#[test]
fn test_make_absolute_marks_all_ancestors() {
    let mut index = TileIndex::new();
    index.set(TileId::new(2, 0, 0), flags::MESH);
    index.set(TileId::new(2, 3, 3), flags::MESH);
    index.make_absolute();

    assert_eq!(material(&index, 0), vec![TileId::ROOT]);
    assert_eq!(
        material(&index, 1),
        vec![TileId::new(1, 0, 0), TileId::new(1, 1, 1)]
    );
    assert_eq!(
        material(&index, 2),
        vec![TileId::new(2, 0, 0), TileId::new(2, 3, 3)]
    );
    assert_eq!(index.get(TileId::ROOT), flags::CHILDREN);

    // idempotent
    let snapshot = index.clone();
    index.make_absolute();
    assert_eq!(index, snapshot);
}

#[test]
fn test_make_complete_marks_descendants() {
    let mut index = TileIndex::with_range(LodRange::of(1, 3));
    index.set(TileId::new(1, 1, 0), flags::MESH);
    index.make_complete();

    for id in crate::tileid::children(TileId::new(1, 1, 0)) {
        assert_eq!(index.get(id) & flags::CHILDREN, flags::CHILDREN);
        for grandchild in crate::tileid::children(id) {
            assert_eq!(index.get(grandchild) & flags::CHILDREN, flags::CHILDREN);
        }
    }
    // untouched subtree stays clear
    assert_eq!(index.get(TileId::new(2, 0, 0)), 0);

    let snapshot = index.clone();
    index.make_complete();
    assert_eq!(index, snapshot);
}

#[test]
fn test_make_full_ancestors_have_children_bit() {
    let mut index = TileIndex::new();
    index.set(TileId::new(5, 9, 22), flags::MESH | flags::ATLAS);
    index.set(TileId::new(3, 1, 1), flags::MESH);
    index.make_full();

    // every ancestor of every material tile carries the children bit
    for lod in 0..5 {
        let ancestor = TileId::new(5, 9, 22).ancestor_at(lod);
        assert_ne!(index.get(ancestor) & flags::CHILDREN, 0, "lod {}", lod);
    }
    for lod in 0..3 {
        let ancestor = TileId::new(3, 1, 1).ancestor_at(lod);
        assert_ne!(index.get(ancestor) & flags::CHILDREN, 0, "lod {}", lod);
    }
}

#[test]
fn test_traverse_row_major() {
    let mut index = TileIndex::new();
    index.set(TileId::new(2, 3, 0), flags::MESH);
    index.set(TileId::new(2, 1, 2), flags::MESH);
    index.set(TileId::new(2, 0, 2), flags::MESH);
    index.set(TileId::new(2, 2, 1), flags::MESH);

    let order = material(&index, 2);
    assert_eq!(
        order,
        vec![
            TileId::new(2, 3, 0),
            TileId::new(2, 2, 1),
            TileId::new(2, 0, 2),
            TileId::new(2, 1, 2),
        ]
    );
}

#[test]
fn test_set_algebra() {
    let mut a = TileIndex::new();
    let mut b = TileIndex::new();
    a.set(TileId::new(3, 1, 1), flags::MESH);
    a.set(TileId::new(3, 2, 2), flags::MESH);
    b.set(TileId::new(3, 2, 2), flags::ATLAS);
    b.set(TileId::new(4, 0, 0), flags::MESH);

    let union = a.unite(&b);
    assert_eq!(union.get(TileId::new(3, 1, 1)), flags::MESH);
    assert_eq!(union.get(TileId::new(3, 2, 2)), flags::MESH | flags::ATLAS);
    assert_eq!(union.get(TileId::new(4, 0, 0)), flags::MESH);

    let both = a.intersect(&b);
    assert!(both.is_empty());

    let mut c = TileIndex::new();
    c.set(TileId::new(3, 1, 1), flags::MESH | flags::ATLAS);
    let diff = c.subtract(&a);
    assert_eq!(diff.get(TileId::new(3, 1, 1)), flags::ATLAS);
}

#[test]
fn test_translate_shifts_tiles() {
    let mut index = TileIndex::new();
    index.set(TileId::new(3, 1, 2), flags::MESH);
    let moved = index.translate(2, -1, 1);
    assert_eq!(moved.get(TileId::new(4, 3, 1)), flags::MESH);
    assert!(moved.tree(3).is_none());

    // shifts falling outside the grid are dropped
    let gone = index.translate(-5, 0, 0);
    assert!(gone.is_empty());
}

#[test]
fn test_clipped_and_filtered() {
    let mut index = TileIndex::new();
    index.set(TileId::new(2, 0, 0), flags::MESH);
    index.set(TileId::new(4, 0, 0), flags::ATLAS);

    let clipped = index.clipped(LodRange::of(3, 4));
    assert_eq!(clipped.get(TileId::new(2, 0, 0)), 0);
    assert_eq!(clipped.get(TileId::new(4, 0, 0)), flags::ATLAS);

    let filtered = index.filtered(flags::MESH);
    assert!(filtered.exists(TileId::new(2, 0, 0)));
    assert!(!filtered.exists(TileId::new(4, 0, 0)));
}

#[test]
fn test_sphere_of_influence_spans_pyramid() {
    let mut index = TileIndex::new();
    index.set(TileId::new(3, 4, 4), flags::MESH);

    let soi = index.sphere_of_influence(LodRange::of(0, 4), flags::MESH);
    assert_ne!(soi.get(TileId::new(3, 4, 4)), 0);
    assert_ne!(soi.get(TileId::new(2, 2, 2)), 0);
    assert_ne!(soi.get(TileId::ROOT), 0);
    assert_ne!(soi.get(TileId::new(4, 8, 8)), 0);
}

#[test]
fn test_serialize_roundtrip() {
    let mut index = TileIndex::new();
    index.set(TileId::new(2, 1, 3), flags::MESH | flags::ATLAS);
    index.set(TileId::new(6, 60, 33), flags::NAVTILE | flags::MESH);
    index.make_full();

    let blob = index.serialize();
    let back = TileIndex::deserialize(&blob, "test").unwrap();
    assert_eq!(back, index);
}

#[test]
fn test_serialize_empty_roundtrip() {
    let blob = TileIndex::new().serialize();
    let back = TileIndex::deserialize(&blob, "test").unwrap();
    assert!(back.is_empty());
    assert_eq!(back.allocated_range(), LodRange::Empty);
}

#[test]
fn test_deserialize_rejects_garbage() {
    assert!(TileIndex::deserialize(b"XX\x01\x00\x00\x00\x00\x00", "test").is_err());
    assert!(TileIndex::deserialize(b"TI", "test").is_err());
}
