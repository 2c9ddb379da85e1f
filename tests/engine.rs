use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Result, bail};
use image::{DynamicImage, Rgb, RgbImage};
use rstest::*;
use tempfile::TempDir;

use picsearch::archive::Embedding;
use picsearch::config::StalePolicy;
use picsearch::engine::Staleness;
use picsearch::index::IndexBackend;
use picsearch::lock::RootLock;
use picsearch::{Encoder, Engine, EngineBuilder, Error, Query, QueryOutcome};

const DIM: usize = 8;

const RED: [u8; 3] = [255, 0, 0];
const GREEN: [u8; 3] = [0, 255, 0];
const BLUE: [u8; 3] = [0, 0, 255];
const YELLOW: [u8; 3] = [255, 255, 0];

/// 以左上角像素的颜色作为向量，并记录编码次数
#[derive(Default)]
struct ColorEncoder {
    calls: AtomicUsize,
}

impl ColorEncoder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.calls.store(0, Ordering::SeqCst);
    }
}

fn color_vec(rgb: [f32; 3]) -> Embedding {
    let mut v = vec![0.; DIM];
    v[..3].copy_from_slice(&rgb);
    v[3] = 0.01;
    v
}

impl Encoder for ColorEncoder {
    fn dim(&self) -> usize {
        DIM
    }

    fn encode_image(&self, image: &DynamicImage) -> Result<Embedding> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let [r, g, b] = image.to_rgb8().get_pixel(0, 0).0;
        Ok(color_vec([r as f32 / 255., g as f32 / 255., b as f32 / 255.]))
    }

    fn encode_text(&self, text: &str) -> Result<Embedding> {
        Ok(match text {
            "red" => color_vec([1., 0., 0.]),
            "green" => color_vec([0., 1., 0.]),
            "blue" => color_vec([0., 0., 1.]),
            _ => bail!("unknown color: {text}"),
        })
    }
}

/// 输出维数与 ColorEncoder 不同的编码器
struct FlatEncoder;

impl Encoder for FlatEncoder {
    fn dim(&self) -> usize {
        4
    }

    fn encode_image(&self, _image: &DynamicImage) -> Result<Embedding> {
        Ok(vec![1.; 4])
    }

    fn encode_text(&self, _text: &str) -> Result<Embedding> {
        Ok(vec![1.; 4])
    }
}

fn put(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(4, 4, Rgb(rgb)).save(&path).unwrap();
    path
}

fn set_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn open(dir: &Path, backend: IndexBackend) -> Engine<ColorEncoder> {
    EngineBuilder::new(dir).backend(backend).open(ColorEncoder::default()).unwrap()
}

fn path_of(engine: &Engine<ColorEncoder>, name: &str) -> String {
    engine.root().path().join(name).to_string_lossy().into_owned()
}

#[fixture]
fn colors() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    put(dir.path(), "red.png", RED);
    put(dir.path(), "green.png", GREEN);
    put(dir.path(), "blue.png", BLUE);
    dir
}

#[rstest]
#[case::hnsw(IndexBackend::Hnsw)]
#[case::usearch(IndexBackend::Usearch)]
fn first_run_encodes_everything(colors: TempDir, #[case] backend: IndexBackend) -> Result<()> {
    let engine = open(colors.path(), backend);
    let report = engine.index_flow()?;

    assert_eq!(report.total, 3);
    assert_eq!(report.encoded, 3);
    assert_eq!(report.reused, 0);
    assert_eq!(report.rejected, 0);
    assert!(report.archive_path.exists());
    assert!(report.index_path.exists());

    let archive = engine.load_archive()?;
    let indices = archive.iter().map(|e| e.index).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(engine.load_index()?.unwrap().len(), 3);
    Ok(())
}

#[rstest]
#[case::hnsw(IndexBackend::Hnsw)]
#[case::usearch(IndexBackend::Usearch)]
fn second_run_reuses_archive(colors: TempDir, #[case] backend: IndexBackend) -> Result<()> {
    let engine = open(colors.path(), backend);
    engine.index_flow()?;
    let before = engine.load_archive()?;

    engine.encoder().reset();
    let report = engine.index_flow()?;

    assert_eq!(engine.encoder().calls(), 0);
    assert_eq!(report.reused, 3);
    assert_eq!(report.encoded, 0);
    assert_eq!(engine.load_archive()?.entries(), before.entries());
    Ok(())
}

#[rstest]
fn deleted_image_is_dropped(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    fs::remove_file(colors.path().join("green.png"))?;
    engine.encoder().reset();
    let report = engine.index_flow()?;

    assert_eq!(report.total, 2);
    assert_eq!(engine.encoder().calls(), 0);
    let archive = engine.load_archive()?;
    assert!(archive.iter().all(|e| e.path != path_of(&engine, "green.png")));
    assert_eq!(archive.iter().map(|e| e.index).collect::<Vec<_>>(), vec![0, 1]);
    assert_eq!(engine.load_index()?.unwrap().len(), 2);
    Ok(())
}

#[rstest]
fn modified_image_is_reencoded(colors: TempDir) -> Result<()> {
    let red = colors.path().join("red.png");
    set_mtime(&red, 1_000_000);
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    put(colors.path(), "red.png", YELLOW);
    set_mtime(&red, 2_000_000);
    engine.encoder().reset();
    let report = engine.index_flow()?;

    assert_eq!(engine.encoder().calls(), 1);
    assert_eq!(report.encoded, 1);
    assert_eq!(report.reused, 2);

    let archive = engine.load_archive()?;
    assert!(archive.find("red_1000000").is_none());
    let entry = archive.find("red_2000000").unwrap();
    assert_eq!(entry.embedding, color_vec([1., 1., 0.]));
    Ok(())
}

#[rstest]
fn moved_image_keeps_embedding(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    fs::create_dir(colors.path().join("sub"))?;
    fs::rename(colors.path().join("blue.png"), colors.path().join("sub/blue.png"))?;
    engine.encoder().reset();
    engine.index_flow()?;

    assert_eq!(engine.encoder().calls(), 0);
    let archive = engine.load_archive()?;
    assert!(archive.iter().any(|e| e.path == path_of(&engine, "sub/blue.png")));
    Ok(())
}

#[rstest]
fn extensions_filter_scan(colors: TempDir) -> Result<()> {
    put(colors.path(), "upper.PNG", YELLOW);
    fs::write(colors.path().join("notes.txt"), b"not an image")?;
    let engine = EngineBuilder::new(colors.path()).extensions("png").open(ColorEncoder::default())?;
    assert_eq!(engine.scan().len(), 4);

    let engine = EngineBuilder::new(colors.path()).extensions("jpg").open(ColorEncoder::default())?;
    assert!(engine.scan().is_empty());
    Ok(())
}

#[rstest]
fn undecodable_image_is_rejected(colors: TempDir) -> Result<()> {
    fs::write(colors.path().join("broken.png"), b"definitely not a png")?;
    let engine = open(colors.path(), IndexBackend::Hnsw);

    let report = engine.index_flow()?;
    assert_eq!(report.total, 3);
    assert_eq!(report.rejected, 1);
    let archive = engine.load_archive()?;
    assert!(archive.iter().all(|e| !e.path.ends_with("broken.png")));
    Ok(())
}

#[rstest]
#[case::hnsw(IndexBackend::Hnsw)]
#[case::usearch(IndexBackend::Usearch)]
fn query_by_image(#[case] backend: IndexBackend) -> Result<()> {
    let dir = tempfile::tempdir()?;
    let a = put(dir.path(), "a.jpg", RED);
    let b = put(dir.path(), "b.png", BLUE);
    set_mtime(&a, 100);
    set_mtime(&b, 200);
    let engine = open(dir.path(), backend);
    engine.index_flow()?;

    let archive = engine.load_archive()?;
    assert_eq!(archive.find("a_100").unwrap().path, path_of(&engine, "a.jpg"));
    assert_eq!(archive.find("b_200").unwrap().path, path_of(&engine, "b.png"));

    let outcome = engine.query_flow(&Query::image(&a))?;
    assert_eq!(outcome.paths(), vec![path_of(&engine, "a.jpg"), path_of(&engine, "b.png")]);

    let outcome = engine.query_flow(&Query::image(&a).with_count(1))?;
    assert_eq!(outcome.paths(), vec![path_of(&engine, "a.jpg")]);
    Ok(())
}

#[rstest]
fn query_by_text_and_image(colors: TempDir) -> Result<()> {
    put(colors.path(), "yellow.png", YELLOW);
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    let query = Query::text("red").with_image(colors.path().join("green.png"));
    let QueryOutcome::Ranked(hits) = engine.query_flow(&query)? else {
        panic!("expected ranked results");
    };
    assert_eq!(hits.len(), 4);
    assert_eq!(hits[0].path, path_of(&engine, "yellow.png"));
    assert_eq!(hits[3].path, path_of(&engine, "blue.png"));
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
    Ok(())
}

#[rstest]
fn invalid_queries(colors: TempDir) {
    let engine = open(colors.path(), IndexBackend::Hnsw);

    let err = engine.query_flow(&Query::default()).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoQuery)));

    let err = engine.query_flow(&Query::text("   ")).unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::EmptyQuery)));
}

#[rstest]
fn unindexed_root_needs_indexing(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    assert_eq!(engine.query_flow(&Query::text("red"))?, QueryOutcome::NeedsIndexing);
    assert!(!engine.root().archive().exists());
    Ok(())
}

#[rstest]
fn empty_root_returns_nothing() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let engine = open(dir.path(), IndexBackend::Hnsw);
    assert_eq!(engine.query_flow(&Query::text("red"))?, QueryOutcome::Ranked(vec![]));

    let report = engine.index_flow()?;
    assert_eq!(report.total, 0);
    assert_eq!(engine.query_flow(&Query::text("red"))?, QueryOutcome::Ranked(vec![]));
    Ok(())
}

#[rstest]
fn stale_archive_reindexed_on_query(colors: TempDir) -> Result<()> {
    let engine = EngineBuilder::new(colors.path())
        .stale_policy(StalePolicy::Reindex)
        .open(ColorEncoder::default())?;

    let outcome = engine.query_flow(&Query::text("blue"))?;
    assert_eq!(outcome.paths()[0], path_of(&engine, "blue.png"));

    put(colors.path(), "yellow.png", YELLOW);
    let outcome = engine.query_flow(&Query::text("green"))?;
    assert_eq!(outcome.paths().len(), 4);
    Ok(())
}

#[rstest]
fn rejected_image_keeps_root_fresh(colors: TempDir) -> Result<()> {
    fs::write(colors.path().join("broken.png"), b"definitely not a png")?;
    let engine = EngineBuilder::new(colors.path())
        .stale_policy(StalePolicy::Reindex)
        .open(ColorEncoder::default())?;
    engine.index_flow()?;

    assert_eq!(engine.load_archive()?.rejected().len(), 1);
    assert_eq!(engine.status()?.staleness, Staleness::Fresh);

    let saved = fs::metadata(engine.root().archive())?.modified()?;
    assert_eq!(engine.query_flow(&Query::text("red"))?.paths().len(), 3);
    assert_eq!(fs::metadata(engine.root().archive())?.modified()?, saved);

    let report = engine.index_flow()?;
    assert_eq!(report.rejected, 1);
    assert_eq!(report.reused, 3);
    Ok(())
}

#[rstest]
fn root_with_only_broken_images() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::write(dir.path().join("broken.png"), b"definitely not a png")?;
    let engine = open(dir.path(), IndexBackend::Hnsw);

    let report = engine.index_flow()?;
    assert_eq!(report.total, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(engine.status()?.staleness, Staleness::Fresh);
    assert_eq!(engine.query_flow(&Query::text("red"))?, QueryOutcome::Ranked(vec![]));
    Ok(())
}

#[rstest]
fn broken_twin_does_not_hide_valid_image() -> Result<()> {
    let dir = tempfile::tempdir()?;
    fs::create_dir(dir.path().join("d1"))?;
    fs::create_dir(dir.path().join("d2"))?;
    let broken = dir.path().join("d1/a.jpg");
    fs::write(&broken, b"definitely not a jpeg")?;
    let valid = put(&dir.path().join("d2"), "a.png", RED);
    set_mtime(&broken, 50);
    set_mtime(&valid, 50);

    let engine = open(dir.path(), IndexBackend::Hnsw);
    let report = engine.index_flow()?;

    assert_eq!(report.total, 1);
    let archive = engine.load_archive()?;
    assert_eq!(archive.find("a_50").unwrap().path, path_of(&engine, "d2/a.png"));
    Ok(())
}

#[rstest]
#[case::hnsw(IndexBackend::Hnsw)]
#[case::usearch(IndexBackend::Usearch)]
fn encoder_dimension_must_match_archive(colors: TempDir, #[case] backend: IndexBackend) -> Result<()> {
    open(colors.path(), backend).index_flow()?;

    let engine = EngineBuilder::new(colors.path()).backend(backend).open(FlatEncoder)?;
    let err = engine.query_flow(&Query::text("red")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<Error>(),
        Some(Error::DimensionMismatch { expected: 4, found: 8, .. })
    ));
    Ok(())
}

#[rstest]
fn repeated_queries_reload_index(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    let first = engine.query_flow(&Query::text("blue").with_count(1))?;
    for _ in 0..5 {
        assert_eq!(engine.query_flow(&Query::text("blue").with_count(1))?, first);
    }
    assert_eq!(first.paths(), vec![path_of(&engine, "blue.png")]);
    Ok(())
}

#[rstest]
fn stale_archive_still_answers(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    put(colors.path(), "yellow.png", YELLOW);
    assert!(matches!(engine.status()?.staleness, Staleness::CatalogMismatch { archive: 3, on_disk: 4 }));
    assert_eq!(engine.query_flow(&Query::text("green"))?.paths().len(), 3);
    Ok(())
}

#[rstest]
fn status_reports_state(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    let status = engine.status()?;
    assert_eq!(status.archive, 0);
    assert_eq!(status.index, None);
    assert_eq!(status.on_disk, 3);
    assert_eq!(status.staleness, Staleness::MissingIndex);

    engine.index_flow()?;
    let status = engine.status()?;
    assert_eq!(status.index, Some(3));
    assert_eq!(status.staleness, Staleness::Fresh);
    Ok(())
}

#[rstest]
fn locked_root_is_refused(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    let _lock = RootLock::exclusive(engine.root().lock())?;

    let err = engine.index_flow().unwrap_err();
    assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Locked(_))));
    Ok(())
}

#[rstest]
fn corrupt_archive_starts_fresh(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    fs::write(engine.root().archive(), b"garbage")?;

    let report = engine.index_flow()?;
    assert_eq!(report.encoded, 3);
    assert_eq!(engine.load_archive()?.len(), 3);
    Ok(())
}

#[rstest]
fn export_matches_archive(colors: TempDir) -> Result<()> {
    let engine = open(colors.path(), IndexBackend::Hnsw);
    engine.index_flow()?;

    let data = engine.export()?;
    let archive = engine.load_archive()?;
    assert_eq!(data.dim(), (3, DIM));
    for entry in archive.iter() {
        assert_eq!(data.row(entry.index).to_vec(), entry.embedding);
    }
    Ok(())
}
