use std::fs;
use std::path::{Path, PathBuf};

use geoindex::hasher::hash_file;
use geoindex::{AddOptions, EntryType, Index, IndexError};
use geoindex_artifacts::{
    ArtifactCache, ArtifactConfig, BuildOptions, Builder, CacheStats, Thumbnail, ThumbnailTarget,
    TileRequest,
};
use image::{Rgba, RgbaImage};
use tempfile::TempDir;

/// A 64x64 raster covering 0..8E, 0..8N with a matching world file.
fn georeferenced_png(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(format!("{name}.png"));
    let image = RgbaImage::from_fn(64, 64, |x, y| Rgba([(x * 4) as u8, (y * 4) as u8, 128, 255]));
    image.save(&path).unwrap();
    fs::write(
        dir.join(format!("{name}.pgw")),
        "0.125\n0\n0\n-0.125\n0.0625\n7.9375\n",
    )
    .unwrap();
    path
}

fn plain_png(dir: &Path) -> PathBuf {
    let path = dir.join("photo.png");
    RgbaImage::from_pixel(30, 20, Rgba([1, 2, 3, 255])).save(&path).unwrap();
    path
}

fn cache_in(temp: &TempDir) -> ArtifactCache {
    ArtifactCache::new(ArtifactConfig::with_cache_dir(temp.path().join("cache")))
}

#[test]
fn tile_cache_is_deterministic_and_force_rerenders() {
    let temp = TempDir::new().unwrap();
    let raster = georeferenced_png(temp.path(), "ortho");
    let cache = cache_in(&temp);
    // z=3 covers 0..45E with the tile north of the equator at y=3.
    let request = TileRequest::new(3, 4, 3);

    let first = cache.generate_tile(&raster, &request).unwrap();
    let first_bytes = fs::read(&first).unwrap();
    let second = cache.generate_tile(&raster, &request).unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read(&second).unwrap(), first_bytes);
    assert_eq!(
        cache.stats(),
        CacheStats {
            tiles_rendered: 1,
            tiles_cached: 1,
            ..CacheStats::default()
        }
    );

    let forced = TileRequest {
        force_recreate: true,
        ..request
    };
    cache.generate_tile(&raster, &forced).unwrap();
    assert_eq!(cache.stats().tiles_rendered, 2);

    let tile = image::open(&first).unwrap();
    assert_eq!((tile.width(), tile.height()), (256, 256));
}

#[test]
fn tms_and_xyz_address_the_same_ground() {
    let temp = TempDir::new().unwrap();
    let raster = georeferenced_png(temp.path(), "ortho");
    let cache = cache_in(&temp);

    let xyz = cache.generate_tile(&raster, &TileRequest::new(3, 4, 3)).unwrap();
    let tms = TileRequest {
        y: 4,
        tms: true,
        ..TileRequest::new(3, 4, 0)
    };
    let tms = cache.generate_tile(&raster, &tms).unwrap();
    assert_ne!(xyz, tms);
    assert_eq!(
        image::open(&xyz).unwrap().to_rgba8(),
        image::open(&tms).unwrap().to_rgba8()
    );
}

#[test]
fn tile_errors() {
    let temp = TempDir::new().unwrap();
    let raster = georeferenced_png(temp.path(), "ortho");
    let cache = cache_in(&temp);

    let plain = plain_png(temp.path());
    assert!(matches!(
        cache.generate_tile(&plain, &TileRequest::new(0, 0, 0)),
        Err(IndexError::NotGeoreferenced(_))
    ));
    // Western hemisphere tile does not touch the raster.
    assert!(matches!(
        cache.generate_tile(&raster, &TileRequest::new(1, 0, 0)),
        Err(IndexError::Validation(_))
    ));
    assert!(matches!(
        cache.generate_tile(&raster, &TileRequest::new(1, 2, 0)),
        Err(IndexError::Validation(_))
    ));
}

#[test]
fn thumbnails_to_memory_and_file() {
    let temp = TempDir::new().unwrap();
    let photo = plain_png(temp.path());
    let cache = cache_in(&temp);

    let Thumbnail::Memory(bytes) = cache
        .generate_thumbnail(&photo, 15, ThumbnailTarget::Memory)
        .unwrap()
    else {
        panic!("expected in-memory thumbnail");
    };
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (15, 10));

    let dest = temp.path().join("out/thumb.jpg");
    let written = cache
        .generate_thumbnail(&photo, 15, ThumbnailTarget::File(dest.clone()))
        .unwrap();
    assert_eq!(written, Thumbnail::File(dest.clone()));
    assert_eq!(fs::read(&dest).unwrap(), bytes);
    assert_eq!(cache.stats().thumbnails_rendered, 1);
    assert_eq!(cache.stats().thumbnails_cached, 1);
}

#[test]
fn build_is_idempotent_unless_forced() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("dataset");
    fs::create_dir_all(root.join("ortho")).unwrap();
    georeferenced_png(&root.join("ortho"), "a");
    plain_png(&root);
    let index = Index::open_or_init(&root).unwrap();
    index.add(&[&root], AddOptions { recursive: true }).unwrap();
    assert_eq!(
        index.read_lease().entry("ortho/a.png").map(|e| e.entry_type),
        Some(EntryType::GeoImage)
    );

    let builder = Builder::new(&index, ArtifactConfig::with_cache_dir(temp.path().join("cache")));
    assert!(builder.is_buildable("ortho/a.png"));
    assert!(!builder.is_buildable("photo.png"));
    assert!(!builder.is_buildable("missing.png"));

    let report = builder.build(None, None, BuildOptions::default()).unwrap();
    assert_eq!(report.built, vec!["ortho/a.png"]);
    let hash = index.read_lease().entry("ortho/a.png").unwrap().hash.clone();
    let out = index.index_dir().join("build").join(&hash);
    assert!(out.join("overview.png").is_file());
    assert!(out.join("build.json").is_file());

    let again = builder.build(Some("ortho"), None, BuildOptions::default()).unwrap();
    assert_eq!(again.skipped, vec!["ortho/a.png"]);
    assert!(again.built.is_empty());

    let dest = temp.path().join("elsewhere");
    let forced = builder
        .build(Some("ortho/a.png"), Some(&dest), BuildOptions { force: true })
        .unwrap();
    assert_eq!(forced.built, vec!["ortho/a.png"]);
    assert!(dest.join(&hash).join("overview.png").is_file());
}

#[test]
fn explicit_non_buildable_source_is_build_error() {
    let temp = TempDir::new().unwrap();
    plain_png(temp.path());
    let index = Index::open_or_init(temp.path()).unwrap();
    index.add(&["photo.png"], AddOptions::default()).unwrap();
    let builder = Builder::new(&index, ArtifactConfig::with_cache_dir(temp.path().join("c")));
    assert!(matches!(
        builder.build(Some("photo.png"), None, BuildOptions::default()),
        Err(IndexError::Build(_))
    ));
    let report = builder.build(None, None, BuildOptions::default()).unwrap();
    assert!(report.built.is_empty() && report.skipped.is_empty());
}

#[test]
fn entry_scoped_artifacts_use_the_index() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("dataset");
    fs::create_dir_all(&root).unwrap();
    georeferenced_png(&root, "ortho");
    let index = Index::open_or_init(&root).unwrap();
    index.add(&["ortho.png"], AddOptions::default()).unwrap();
    let cache = cache_in(&temp);

    let tile = cache
        .tile_for_entry(&index, "ortho.png", &TileRequest::new(3, 4, 3))
        .unwrap();
    let hash = index.read_lease().entry("ortho.png").unwrap().hash.clone();
    assert!(tile.starts_with(temp.path().join("cache/tiles").join(&hash)));

    let thumb = cache
        .thumbnail_for_entry(&index, "ortho.png", 32, ThumbnailTarget::Memory)
        .unwrap();
    assert!(matches!(thumb, Thumbnail::Memory(bytes) if !bytes.is_empty()));

    assert!(matches!(
        cache.tile_for_entry(&index, "nope.png", &TileRequest::new(0, 0, 0)),
        Err(IndexError::NotFound(_))
    ));
}

#[test]
fn entry_artifacts_follow_edits_made_after_add() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("dataset");
    fs::create_dir_all(&root).unwrap();
    let raster = georeferenced_png(&root, "ortho");
    let index = Index::open_or_init(&root).unwrap();
    index.add(&["ortho.png"], AddOptions::default()).unwrap();
    let cache = cache_in(&temp);
    let request = TileRequest::new(3, 4, 3);
    let before = cache.tile_for_entry(&index, "ortho.png", &request).unwrap();

    RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 255])).save(&raster).unwrap();
    let current = hash_file(&raster).unwrap();
    let after = cache.tile_for_entry(&index, "ortho.png", &request).unwrap();
    assert_ne!(before, after);
    assert!(after.starts_with(temp.path().join("cache/tiles").join(&current)));
    assert_eq!(cache.stats().tiles_rendered, 2);

    let thumb = temp.path().join("thumb.jpg");
    cache
        .thumbnail_for_entry(&index, "ortho.png", 16, ThumbnailTarget::File(thumb.clone()))
        .unwrap();
    let pixel = image::open(&thumb).unwrap().to_rgb8().get_pixel(8, 8).0;
    assert!(pixel.iter().all(|channel| channel.abs_diff(9) <= 4));
}

#[test]
fn rebuild_after_edit_uses_current_content() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("dataset");
    fs::create_dir_all(&root).unwrap();
    let raster = georeferenced_png(&root, "ortho");
    let index = Index::open_or_init(&root).unwrap();
    index.add(&["ortho.png"], AddOptions::default()).unwrap();
    let builder = Builder::new(&index, ArtifactConfig::with_cache_dir(temp.path().join("c")));
    builder.build(None, None, BuildOptions::default()).unwrap();

    RgbaImage::from_pixel(64, 64, Rgba([9, 9, 9, 255])).save(&raster).unwrap();
    let report = builder.build(None, None, BuildOptions::default()).unwrap();
    assert_eq!(report.built, vec!["ortho.png"]);
    let out = index.index_dir().join("build").join(hash_file(&raster).unwrap());
    assert!(out.join("overview.png").is_file());
}

#[test]
fn thumbnail_cache_is_keyed_by_quality() {
    let temp = TempDir::new().unwrap();
    let photo = plain_png(temp.path());
    let dir = temp.path().join("cache");
    let high = ArtifactCache::new(ArtifactConfig::with_cache_dir(dir.clone()));
    let low = ArtifactCache::new(ArtifactConfig {
        jpeg_quality: 20,
        ..ArtifactConfig::with_cache_dir(dir)
    });

    high.generate_thumbnail(&photo, 15, ThumbnailTarget::Memory).unwrap();
    low.generate_thumbnail(&photo, 15, ThumbnailTarget::Memory).unwrap();
    assert_eq!(high.stats().thumbnails_rendered, 1);
    assert_eq!(low.stats().thumbnails_rendered, 1);
    assert_eq!(low.stats().thumbnails_cached, 0);
}
