use super::*;
use std::io::Cursor;

use tempfile::TempDir;

use crate::refframe::Validity;
use crate::tileid::{Child, Extents2};

fn registry() -> Registry {
    Registry::with_frame(ReferenceFrame::single(
        "pp",
        "local",
        Extents2::new(0.0, 0.0, 16.0, 16.0),
    ))
}

fn tiny_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([80, 120, 40, 255]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

fn square_mesh(extents: &Extents2, height: f64) -> Mesh {
    let (x0, y0, x1, y1) = (extents.min_x, extents.min_y, extents.max_x, extents.max_y);
    let mut mesh = Mesh::new();
    mesh.submeshes.push(crate::mesh::SubMesh {
        vertices: vec![
            [x0, y0, height],
            [x1, y0, height],
            [x1, y1, height],
            [x0, y1, height],
        ],
        tc: vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
        faces: vec![[0, 1, 2], [0, 2, 3]],
        faces_tc: vec![[0, 1, 2], [0, 2, 3]],
        ..Default::default()
    });
    mesh
}

fn full_tile(frame: &ReferenceFrame, id: TileId, height: f64) -> Tile {
    let node = NodeInfo::new(frame, id);
    Tile {
        mesh: Some(square_mesh(node.extents(), height)),
        atlas: Some({
            let mut atlas = Atlas::new();
            atlas.push(tiny_png());
            atlas
        }),
        navtile: None,
        credits: BTreeSet::new(),
        alien: false,
    }
}

fn new_set(dir: &TempDir, name: &str) -> TileSet {
    TileSet::create(
        &dir.path().join(name),
        TileSetProperties::new(name, "pp"),
        &registry(),
        CreateMode::FailIfExists,
    )
    .unwrap()
}

#[test]
fn test_fresh_set_is_empty() {
    let dir = TempDir::new().unwrap();
    let mut ts = new_set(&dir, "empty");
    assert!(ts.empty());
    assert_eq!(ts.lod_range(), LodRange::Empty);
    ts.flush().unwrap();

    let ts = TileSet::open(&dir.path().join("empty"), &registry(), Mode::ReadOnly).unwrap();
    assert!(ts.empty());
    assert_eq!(ts.lod_range(), LodRange::Empty);
    assert!(matches!(
        ts.get_mesh(TileId::new(1, 0, 0)),
        Err(Error::NoSuchFile(_))
    ));
}

#[test]
fn test_set_flush_reopen_get() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let id = TileId::new(3, 2, 1);

    {
        let mut ts = new_set(&dir, "hills");
        let tile = full_tile(ts.reference_frame(), id, 4.0);
        ts.set_tile(id, &tile, None).unwrap();
        // reads observe the write before any flush
        assert!(ts.exists(id));
        assert_eq!(ts.get_mesh(id).unwrap().submeshes.len(), 1);
        ts.flush().unwrap();
    }

    let ts = TileSet::open(&dir.path().join("hills"), &registry, Mode::ReadOnly).unwrap();
    assert!(ts.exists(id));
    assert_eq!(ts.lod_range(), LodRange::single(3));

    let mesh = ts.get_mesh(id).unwrap();
    assert_eq!(mesh.submeshes.len(), 1);
    assert_eq!(mesh.submeshes[0].vertices.len(), 4);
    assert_eq!(mesh.submeshes[0].faces.len(), 2);
    assert!(ts.fully_covered(id).unwrap());

    let atlas = ts.get_atlas(id).unwrap();
    assert_eq!(atlas.len(), 1);
    assert_eq!(atlas.image_size(0).unwrap(), (4, 4));

    assert!(!ts.exists(TileId::new(3, 2, 2)));
    assert_eq!(ts.get_reference(id).unwrap(), 0);
}

#[test]
fn test_unflushed_set_is_unreadable() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("limbo");
    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("limbo", "pp"),
            &registry(),
            CreateMode::FailIfExists,
        )
        .unwrap();
        let tile = full_tile(ts.reference_frame(), TileId::new(2, 0, 0), 1.0);
        ts.set_tile(TileId::new(2, 0, 0), &tile, None).unwrap();
        // dropped without flush
    }
    assert!(!TileSet::check(&path));
    assert!(matches!(
        TileSet::open(&path, &registry(), Mode::ReadOnly),
        Err(Error::NoSuchFile(_))
    ));
}

#[test]
fn test_create_modes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("set");
    let registry = registry();
    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("set", "pp"),
            &registry,
            CreateMode::FailIfExists,
        )
        .unwrap();
        ts.flush().unwrap();
    }
    assert!(matches!(
        TileSet::create(
            &path,
            TileSetProperties::new("set", "pp"),
            &registry,
            CreateMode::FailIfExists
        ),
        Err(Error::AlreadyExists(_))
    ));
    // overwrite drops the old content
    let mut ts = TileSet::create(
        &path,
        TileSetProperties::new("set", "pp"),
        &registry,
        CreateMode::Overwrite,
    )
    .unwrap();
    ts.flush().unwrap();
    assert!(TileSet::open(&path, &registry, Mode::ReadOnly).unwrap().empty());
}

#[test]
fn test_mesh_atlas_pairing_rules() {
    let dir = TempDir::new().unwrap();
    let mut ts = new_set(&dir, "rules");
    let frame = ts.reference_frame().clone();
    let id = TileId::new(2, 1, 1);
    let node = NodeInfo::new(&frame, id);

    // mesh without atlas is rejected unless the tile is alien
    let bare = Tile {
        mesh: Some(square_mesh(node.extents(), 0.0)),
        ..Default::default()
    };
    assert!(matches!(
        ts.set_tile(id, &bare, None),
        Err(Error::InconsistentInput(_))
    ));

    let alien = Tile {
        mesh: Some(square_mesh(node.extents(), 0.0)),
        alien: true,
        ..Default::default()
    };
    ts.set_tile(id, &alien, None).unwrap();
    assert_ne!(ts.tile_index().get(id) & crate::tileindex::flags::ALIEN, 0);

    // atlas image count must parallel submeshes
    let mut mismatched = full_tile(&frame, id, 0.0);
    mismatched.atlas.as_mut().unwrap().push(tiny_png());
    assert!(matches!(
        ts.set_tile(id, &mismatched, None),
        Err(Error::InconsistentInput(_))
    ));
}

#[test]
fn test_navtile_requires_mesh() {
    let dir = TempDir::new().unwrap();
    let mut ts = new_set(&dir, "nav");
    let frame = ts.reference_frame().clone();
    let id = TileId::new(3, 1, 1);

    let mut navtile = NavTile::with_size(16);
    navtile.set(0, 0, 12.0);
    navtile.set(5, 5, -2.0);

    assert!(matches!(
        ts.set_nav_tile(id, &navtile),
        Err(Error::InconsistentInput(_))
    ));

    ts.set_tile(id, &full_tile(&frame, id, 5.0), None).unwrap();
    ts.set_nav_tile(id, &navtile).unwrap();

    let back = ts.get_nav_tile(id).unwrap();
    assert_eq!(back, navtile);

    // metanode reflects the navtile and widens the height range
    let meta = ts.get_meta_node(id).unwrap();
    assert!(meta.has_navtile());
    assert_eq!(meta.height_min, -2.0);
    assert_eq!(meta.height_max, 12.0);
}

#[test]
fn test_meta_propagation_to_parents() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let path = dir.path().join("pyramid");
    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("pyramid", "pp"),
            &registry,
            CreateMode::FailIfExists,
        )
        .unwrap();
        let frame = ts.reference_frame().clone();
        let low = TileId::new(6, 0, 0);
        let high = TileId::new(6, 1, 1);
        let mut tile_low = full_tile(&frame, low, -3.0);
        tile_low.credits.insert(11);
        ts.set_tile(low, &tile_low, None).unwrap();
        ts.set_tile(high, &full_tile(&frame, high, 9.0), None).unwrap();
        ts.flush().unwrap();
    }

    let ts = TileSet::open(&path, &registry, Mode::ReadOnly).unwrap();

    let parent = ts.get_meta_node(TileId::new(5, 0, 0)).unwrap();
    assert!(parent.has_child(Child::LowerLeft));
    assert!(parent.has_child(Child::UpperRight));
    assert!(!parent.has_child(Child::LowerRight));
    assert!(!parent.has_mesh());
    assert_eq!(parent.height_min, -3.0);
    assert_eq!(parent.height_max, 9.0);

    // the chain continues to the root
    let root = ts.get_meta_node(TileId::ROOT).unwrap();
    assert!(root.has_any_child());

    // leaf node kept its own payload flags and credits
    let leaf = ts.get_meta_node(TileId::new(6, 0, 0)).unwrap();
    assert!(leaf.has_mesh());
    assert!(leaf.has_atlas());
    assert!(leaf.credits.contains(&11));

    let meta_tile = ts.get_meta_tile(TileId::new(6, 1, 1)).unwrap();
    assert_eq!(meta_tile.id(), TileId::new(6, 0, 0));
    assert_eq!(meta_tile.len(), 2);
}

#[test]
fn test_read_only_rejects_writes() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let path = dir.path().join("frozen");
    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("frozen", "pp"),
            &registry,
            CreateMode::FailIfExists,
        )
        .unwrap();
        ts.flush().unwrap();
    }
    let mut ts = TileSet::open(&path, &registry, Mode::ReadOnly).unwrap();
    let frame = ts.reference_frame().clone();
    let id = TileId::new(2, 0, 0);
    assert!(matches!(
        ts.set_tile(id, &full_tile(&frame, id, 0.0), None),
        Err(Error::ReadOnly(_))
    ));
    assert!(matches!(ts.flush(), Err(Error::ReadOnly(_))));
}

#[test]
fn test_reopen_read_write_keeps_populating() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let path = dir.path().join("grow");
    let first = TileId::new(4, 0, 0);
    let second = TileId::new(4, 15, 15);

    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("grow", "pp"),
            &registry,
            CreateMode::FailIfExists,
        )
        .unwrap();
        let frame = ts.reference_frame().clone();
        ts.set_tile(first, &full_tile(&frame, first, 1.0), None).unwrap();
        ts.flush().unwrap();
    }
    {
        let mut ts = TileSet::open(&path, &registry, Mode::ReadWrite).unwrap();
        let frame = ts.reference_frame().clone();
        ts.set_tile(second, &full_tile(&frame, second, 2.0), None).unwrap();
        ts.flush().unwrap();
    }

    let ts = TileSet::open(&path, &registry, Mode::ReadOnly).unwrap();
    assert!(ts.exists(first));
    assert!(ts.exists(second));
    // both leaves roll up into the shared root metanode
    let root = ts.get_meta_node(TileId::ROOT).unwrap();
    assert_eq!(root.height_min, 1.0);
    assert_eq!(root.height_max, 2.0);
}

#[test]
fn test_rejects_tiles_outside_valid_area() {
    let dir = TempDir::new().unwrap();
    let mut root_node = crate::refframe::RFNode::new(
        TileId::ROOT,
        "local",
        Extents2::new(0.0, 0.0, 4.0, 4.0),
    );
    root_node.valid_extents = Some(Extents2::new(0.0, 0.0, 2.0, 2.0));
    let frame = ReferenceFrame::new("clipped", vec![root_node]).unwrap();
    let registry = Registry::with_frame(frame);

    let mut ts = TileSet::create(
        &dir.path().join("clip"),
        TileSetProperties::new("clip", "clipped"),
        &registry,
        CreateMode::FailIfExists,
    )
    .unwrap();
    let frame = ts.reference_frame().clone();

    // upper-right quadrant is fully outside the valid area
    let outside = TileId::new(1, 1, 1);
    assert_eq!(NodeInfo::new(&frame, outside).validity(), Validity::Invalid);
    let tile = full_tile(&frame, outside, 0.0);
    assert!(matches!(
        ts.set_tile(outside, &tile, None),
        Err(Error::InconsistentInput(_))
    ));

    let inside = TileId::new(1, 0, 0);
    ts.set_tile(inside, &full_tile(&frame, inside, 0.0), None).unwrap();
}

#[test]
fn test_properties_updates_persist() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let path = dir.path().join("props");
    {
        let mut ts = TileSet::create(
            &path,
            TileSetProperties::new("props", "pp"),
            &registry,
            CreateMode::FailIfExists,
        )
        .unwrap();
        ts.add_credits([3, 5]);
        ts.add_bound_layers([2]);
        ts.set_position(Position {
            position: [8.0, 8.0, 100.0],
            vertical_extent: 500.0,
            ..Default::default()
        });
        ts.flush().unwrap();
    }
    let ts = TileSet::open(&path, &registry, Mode::ReadOnly).unwrap();
    assert_eq!(ts.properties().credits, [3, 5].into_iter().collect());
    assert_eq!(ts.properties().bound_layers, [2].into_iter().collect());
    assert_eq!(ts.properties().position.vertical_extent, 500.0);
}

#[test]
fn test_plain_driver_backend() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let path = dir.path().join("plainset");
    let id = TileId::new(3, 5, 5);
    {
        let mut props = TileSetProperties::new("plainset", "pp");
        props.driver_options = serde_json::json!({ "driver": "plain" });
        let mut ts = TileSet::create(&path, props, &registry, CreateMode::FailIfExists).unwrap();
        let frame = ts.reference_frame().clone();
        ts.set_tile(id, &full_tile(&frame, id, 7.0), None).unwrap();
        ts.flush().unwrap();
    }
    // payloads are individual files under the root
    assert!(path.join("3-5-5.mesh").is_file());
    let ts = TileSet::open(&path, &registry, Mode::ReadOnly).unwrap();
    assert_eq!(ts.get_mesh(id).unwrap().submeshes.len(), 1);
}
