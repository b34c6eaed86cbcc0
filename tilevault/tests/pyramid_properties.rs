//! Pyramid-level properties of the tile index and encoder.

use tempfile::TempDir;

use tilevault::encoder::{Encoder, TileGenerator, TileResult};
use tilevault::error::Result;
use tilevault::refframe::{NodeInfo, ReferenceFrame, Registry};
use tilevault::tileid::{Extents2, TileId};
use tilevault::tileindex::{flags, TileIndex};
use tilevault::tileset::{CreateMode, TileSet, TileSetProperties};

#[test]
fn make_absolute_marks_the_expected_pyramid() {
    let mut index = TileIndex::new();
    index.set(TileId::new(2, 0, 0), flags::MESH);
    index.set(TileId::new(2, 3, 3), flags::MESH);
    index.make_absolute();

    let mut seen = Vec::new();
    for lod in 0..=2 {
        let mut at_lod = Vec::new();
        index.traverse(lod, |id, _| at_lod.push(id));
        seen.push(at_lod);
    }

    assert_eq!(seen[0], vec![TileId::new(0, 0, 0)]);
    assert_eq!(seen[1], vec![TileId::new(1, 0, 0), TileId::new(1, 1, 1)]);
    assert_eq!(seen[2], vec![TileId::new(2, 0, 0), TileId::new(2, 3, 3)]);
}

#[test]
fn make_complete_reaches_every_descendant() {
    let mut index = TileIndex::with_range(tilevault::tileid::LodRange::of(1, 4));
    index.set(TileId::new(1, 0, 0), flags::MESH);
    index.make_complete();

    // every descendant of the material tile carries the children bit
    for lod in 2..=4u8 {
        let per_axis = 1u32 << (lod - 1);
        for y in 0..per_axis {
            for x in 0..per_axis {
                let id = TileId::new(lod, x, y);
                assert_ne!(
                    index.get(id) & flags::CHILDREN,
                    0,
                    "missing children bit at {}",
                    id
                );
            }
        }
    }
}

#[test]
fn serialization_preserves_every_flag() {
    let mut index = TileIndex::new();
    index.set(TileId::new(3, 1, 2), flags::MESH | flags::ATLAS);
    index.set(TileId::new(7, 100, 30), flags::NAVTILE | flags::MESH);
    index.set(TileId::new(5, 9, 9), flags::REFERENCE);
    index.make_full();

    let blob = index.serialize();
    let back = TileIndex::deserialize(&blob, "roundtrip").unwrap();

    assert_eq!(back, index);
    for lod in 0..=7u8 {
        let mut lhs = Vec::new();
        let mut rhs = Vec::new();
        index.traverse(lod, |id, v| lhs.push((id, v)));
        back.traverse(lod, |id, v| rhs.push((id, v)));
        assert_eq!(lhs, rhs, "lod {}", lod);
    }
}

#[test]
fn encoder_declining_the_root_produces_an_empty_set() {
    struct Never;
    impl TileGenerator for Never {
        fn generate(
            &self,
            _id: TileId,
            _node: &NodeInfo,
            _parent: &TileResult,
        ) -> Result<TileResult> {
            Ok(TileResult::NoData)
        }
    }

    let registry = Registry::with_frame(ReferenceFrame::single(
        "pp",
        "local",
        Extents2::new(0.0, 0.0, 8.0, 8.0),
    ));
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nothing");
    let ts = TileSet::create(
        &path,
        TileSetProperties::new("nothing", "pp"),
        &registry,
        CreateMode::FailIfExists,
    )
    .unwrap();

    let (ts, outcome) = Encoder::new(ts).run(&Never).unwrap();
    assert_eq!(outcome, tilevault::encoder::Outcome::Finished);
    assert!(ts.empty());
    drop(ts);

    // flush happened as part of the run: the set opens cleanly and is empty
    let ts = TileSet::open(&path, &registry, tilevault::driver::Mode::ReadOnly).unwrap();
    assert!(ts.empty());
    assert!(ts.lod_range().is_empty());
}
