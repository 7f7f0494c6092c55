use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use assert_fs::TempDir;
use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array1, Array2, s};
use rstest::*;

use clipsearch::encoder::{EncodeError, Encoder, PaletteEncoder};
use clipsearch::ids::read_ids;
use clipsearch::merge::merge;
use clipsearch::pipeline::PipelineReport;
use clipsearch::utils::{compile_globs, scan_images};
use clipsearch::{Config, Error, Pipeline, SearchEngine};

const RED: [u8; 3] = [220, 20, 20];
const GREEN: [u8; 3] = [30, 200, 40];
const BLUE: [u8; 3] = [20, 60, 240];
const WHITE: [u8; 3] = [255, 255, 255];
const BLACK: [u8; 3] = [0, 0, 0];

fn solid(path: &Path, rgb: [u8; 3]) {
    RgbImage::from_pixel(8, 8, Rgb(rgb)).save(path).unwrap();
}

/// 测试用编码器，按设定的方式出错
enum StubEncoder {
    /// 编码图片时直接返回错误
    Fail,
    /// 少返回一行向量
    DropRow,
}

impl Encoder for StubEncoder {
    fn name(&self) -> &str {
        "stub"
    }

    fn encode_images(&self, images: &[DynamicImage]) -> Result<Array2<f32>, EncodeError> {
        match self {
            StubEncoder::Fail => Err(EncodeError::Unsupported("stub".into())),
            StubEncoder::DropRow => {
                let features = PaletteEncoder::default().encode_images(images)?;
                Ok(features.slice(s![1.., ..]).to_owned())
            }
        }
    }

    fn encode_text(&self, text: &str) -> Result<Array1<f32>, EncodeError> {
        PaletteEncoder::default().encode_text(text)
    }
}

struct Workspace {
    _root: TempDir,
    config: Config,
}

impl Workspace {
    fn files(&self) -> Vec<PathBuf> {
        let re = compile_globs(&self.config.ext_list).unwrap();
        scan_images(&self.config.photos_path, &re).unwrap()
    }

    fn run(&self) -> clipsearch::Result<PipelineReport> {
        Pipeline::new(&self.config, Arc::new(PaletteEncoder::default())).run(&self.files())
    }

    fn run_with(&self, encoder: StubEncoder) -> clipsearch::Result<PipelineReport> {
        Pipeline::new(&self.config, Arc::new(encoder)).run(&self.files())
    }

    /// 所有批次产物的内容，按文件名排序
    fn batch_artifacts(&self) -> Vec<(String, Vec<u8>)> {
        let mut artifacts = fs::read_dir(&self.config.features_path)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| {
                let name = path.file_name().unwrap().to_string_lossy();
                name.len() == 14 && (name.ends_with(".npy") || name.ends_with(".csv"))
            })
            .map(|path| {
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                (name, fs::read(&path).unwrap())
            })
            .collect::<Vec<_>>();
        artifacts.sort();
        artifacts
    }

    fn photo(&self, name: &str) -> PathBuf {
        self.config.photos_path.join(name)
    }
}

/// 5 张图片，batch_size = 2，共 3 个批次
#[fixture]
fn workspace() -> Workspace {
    let root = TempDir::new().unwrap();
    let photos = root.path().join("photos");
    fs::create_dir(&photos).unwrap();
    for (name, rgb) in
        [("a.png", RED), ("b.png", GREEN), ("c.png", BLUE), ("d.png", WHITE), ("e.png", BLACK)]
    {
        solid(&photos.join(name), rgb);
    }
    let config = Config {
        features_path: root.path().join("features"),
        photos_path: photos,
        batch_size: 2,
        ..Default::default()
    };
    Workspace { _root: root, config }
}

#[rstest]
fn process_and_search(workspace: Workspace) -> Result<()> {
    let report = workspace.run()?;
    assert_eq!(report.batches, 3);
    assert_eq!(report.processed, 3);
    assert_eq!(report.rows, 5);
    assert!(report.failed.is_empty());

    let dir = workspace.config.features_dir();
    let merged = merge(&dir)?;
    assert_eq!((merged.batches, merged.rows), (3, 5));

    let engine = SearchEngine::open(&dir)?;
    let result = engine.search_text(&PaletteEncoder::default(), "red", 1, None)?;
    assert!(result[0].1.ends_with("a.png"));
    let result = engine.search_text(&PaletteEncoder::default(), "蓝色", 1, None)?;
    assert!(result[0].1.ends_with("c.png"));
    Ok(())
}

#[rstest]
fn rerun_is_idempotent(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    workspace.run()?;
    merge(&dir)?;
    let features = fs::read(dir.features())?;
    let ids = fs::read(dir.photo_ids())?;
    let artifacts = workspace.batch_artifacts();
    assert_eq!(artifacts.len(), 6);

    let report = workspace.run()?;
    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped, 3);
    assert_eq!(workspace.batch_artifacts(), artifacts);
    merge(&dir)?;
    assert_eq!(fs::read(dir.features())?, features);
    assert_eq!(fs::read(dir.photo_ids())?, ids);
    Ok(())
}

#[rstest]
fn failed_batch_is_skipped_then_retried(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    fs::write(workspace.photo("c.png"), b"not an image")?;

    let report = workspace.run()?;
    assert_eq!(report.failed, vec![1]);
    assert_eq!(report.processed, 2);
    assert!(!dir.batch_features(1).exists());
    assert!(!dir.batch_ids(1).exists());

    let merged = merge(&dir)?;
    assert_eq!(merged.rows, 3);
    let ids = read_ids(dir.photo_ids())?;
    assert_eq!(ids.len(), 3);
    assert!(ids.iter().all(|id| !id.ends_with("c.png") && !id.ends_with("d.png")));

    solid(&workspace.photo("c.png"), BLUE);
    let report = workspace.run()?;
    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(merge(&dir)?.rows, 5);
    Ok(())
}

#[rstest]
fn merged_ids_follow_scan_order(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    workspace.run()?;
    merge(&dir)?;
    let expected = workspace
        .files()
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(read_ids(dir.photo_ids())?, expected);
    Ok(())
}

#[rstest]
fn leftover_ids_are_replaced(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    fs::create_dir_all(dir.path())?;
    fs::write(dir.batch_ids(0), "photo_id\n/stale/path.png\n")?;

    workspace.run()?;
    let ids = read_ids(dir.batch_ids(0))?;
    assert_eq!(ids.len(), 2);
    assert!(ids[0].ends_with("a.png"));
    Ok(())
}

#[rstest]
fn changed_batch_size_is_rejected(mut workspace: Workspace) -> Result<()> {
    workspace.run()?;
    workspace.config.batch_size = 3;
    let err = workspace.run().unwrap_err();
    assert!(matches!(err, Error::StaleConfig { found: 2, configured: 3 }));
    Ok(())
}

#[rstest]
fn parallel_workers_match_sequential(mut workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    workspace.run()?;
    merge(&dir)?;
    let sequential = fs::read(dir.features())?;

    fs::remove_dir_all(dir.path())?;
    workspace.config.workers = 3;
    let report = workspace.run()?;
    assert_eq!(report.processed, 3);
    merge(&dir)?;
    assert_eq!(fs::read(dir.features())?, sequential);
    Ok(())
}

#[rstest]
fn rebuild_stale_batch(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    workspace.run()?;

    // 新增的图片排在最前面，所有批次的内容都会变化
    solid(&workspace.photo("0.png"), RED);
    let encoder = Arc::new(PaletteEncoder::default());
    let report = Pipeline::new(&workspace.config, encoder.clone()).run(&workspace.files())?;
    assert_eq!(report.processed, 0);
    assert_eq!(report.skipped, 3);

    let report =
        Pipeline::new(&workspace.config, encoder).rebuild_stale(true).run(&workspace.files())?;
    assert_eq!(report.processed, 3);
    assert_eq!(merge(&dir)?.rows, 6);
    assert!(read_ids(dir.photo_ids())?[0].ends_with("0.png"));
    Ok(())
}

#[rstest]
fn encoder_failure_is_retried(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    let report = workspace.run_with(StubEncoder::Fail)?;
    assert_eq!(report.failed, vec![0, 1, 2]);
    assert_eq!(report.processed, 0);
    for batch in 0..3 {
        assert!(!dir.batch_features(batch).exists());
        assert!(!dir.batch_ids(batch).exists());
        assert!(!dir.batch_manifest(batch).exists());
    }
    assert_eq!(merge(&dir)?.rows, 0);

    let report = workspace.run()?;
    assert_eq!(report.processed, 3);
    assert_eq!(merge(&dir)?.rows, 5);
    Ok(())
}

#[rstest]
fn short_encoder_output_fails_batch(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    let report = workspace.run_with(StubEncoder::DropRow)?;
    assert_eq!(report.failed, vec![0, 1, 2]);
    assert!(workspace.batch_artifacts().is_empty());

    let report = workspace.run()?;
    assert_eq!(report.processed, 3);
    assert!(report.failed.is_empty());
    assert_eq!(merge(&dir)?.rows, 5);
    Ok(())
}

#[rstest]
fn lock_left_by_killed_run(workspace: Workspace) -> Result<()> {
    let dir = workspace.config.features_dir();
    fs::create_dir_all(dir.path())?;
    fs::write(dir.batch_lock(1), b"")?;

    let report = workspace.run()?;
    assert_eq!(report.processed, 3);
    assert!(report.locked.is_empty());
    assert_eq!(merge(&dir)?.rows, 5);
    Ok(())
}
