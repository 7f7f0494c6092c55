use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fd_lock::RwLock;
use image::{DynamicImage, ImageReader};
use indicatif::ProgressBar;
use log::{debug, error, info, warn};
use ndarray_npy::write_npy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{Config, FeaturesDir, tmp_path};
use crate::encoder::{EncodeError, Encoder};
use crate::error::{Error, Result};
use crate::ids::write_ids;
use crate::metrics;
use crate::utils::pb_style;

/// 将文件列表按固定大小划分为批次
#[derive(Debug, Clone, Copy)]
pub struct BatchPlan<'a> {
    files: &'a [PathBuf],
    batch_size: usize,
}

impl<'a> BatchPlan<'a> {
    pub fn new(files: &'a [PathBuf], batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch_size must be positive");
        Self { files, batch_size }
    }

    /// 批次数量，即 ceil(文件数 / batch_size)
    pub fn len(&self) -> usize {
        self.files.len().div_ceil(self.batch_size)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// 第 `batch` 个批次包含的文件
    pub fn batch(&self, batch: usize) -> &'a [PathBuf] {
        let start = (batch * self.batch_size).min(self.files.len());
        let end = ((batch + 1) * self.batch_size).min(self.files.len());
        &self.files[start..end]
    }
}

/// 批次清单，记录生成该批次时的文件列表指纹
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub files: usize,
    pub fingerprint: String,
}

impl BatchManifest {
    pub fn of(files: &[PathBuf]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for file in files {
            hasher.update(file.as_os_str().as_encoded_bytes());
            hasher.update(b"\0");
        }
        Self { files: files.len(), fingerprint: hasher.finalize().to_hex().to_string() }
    }
}

/// 特征目录元数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirMeta {
    pub batch_size: usize,
}

/// 单个批次的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 新生成了批次产物，包含的行数
    Processed(usize),
    /// 批次产物已存在
    Skipped,
    /// 其他进程正在处理该批次
    Locked,
}

/// 一次流水线运行的汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineReport {
    pub total_files: usize,
    pub batches: usize,
    pub processed: usize,
    pub skipped: usize,
    /// 本次新写入的向量行数
    pub rows: usize,
    /// 处理失败的批次编号，按升序排列
    pub failed: Vec<usize>,
    /// 正被其他进程处理的批次编号
    pub locked: Vec<usize>,
}

/// 可断点续跑的批量特征计算流水线
pub struct Pipeline {
    dir: FeaturesDir,
    encoder: Arc<dyn Encoder>,
    batch_size: usize,
    workers: usize,
    rebuild_stale: bool,
}

impl Pipeline {
    pub fn new(config: &Config, encoder: Arc<dyn Encoder>) -> Self {
        Self {
            dir: config.features_dir(),
            encoder,
            batch_size: config.batch_size,
            workers: config.workers,
            rebuild_stale: false,
        }
    }

    /// 文件列表变化导致批次内容与清单不一致时，是否删除并重新计算该批次
    pub fn rebuild_stale(mut self, rebuild_stale: bool) -> Self {
        self.rebuild_stale = rebuild_stale;
        self
    }

    /// 处理所有未完成的批次
    ///
    /// 单个批次失败不会中断运行，失败的批次记录在返回值中，下次运行时重试
    pub fn run(&self, files: &[PathBuf]) -> Result<PipelineReport> {
        fs::create_dir_all(self.dir.path())?;
        self.check_meta()?;

        let plan = BatchPlan::new(files, self.batch_size);
        let total = plan.len();
        let pb = ProgressBar::new(total as u64).with_style(pb_style());

        let run_one = |batch: usize| {
            pb.suspend(|| println!("Processing batch {}/{}", batch + 1, total));
            let outcome = self.process_batch(batch, plan.batch(batch));
            pb.inc(1);
            (batch, outcome)
        };

        let outcomes = if self.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .map_err(std::io::Error::other)?;
            pool.install(|| (0..total).into_par_iter().map(run_one).collect::<Vec<_>>())
        } else {
            (0..total).map(run_one).collect::<Vec<_>>()
        };

        let mut report =
            PipelineReport { total_files: files.len(), batches: total, ..Default::default() };
        for (batch, outcome) in outcomes {
            match outcome {
                Ok(BatchOutcome::Processed(rows)) => {
                    report.processed += 1;
                    report.rows += rows;
                    metrics::inc_batch("processed");
                }
                Ok(BatchOutcome::Skipped) => {
                    report.skipped += 1;
                    metrics::inc_batch("skipped");
                }
                Ok(BatchOutcome::Locked) => {
                    warn!("批次 {} 正被其他进程处理，本次跳过", batch);
                    report.locked.push(batch);
                    metrics::inc_batch("locked");
                }
                Err(e) => {
                    pb.suspend(|| println!("Problem with batch {}", batch + 1));
                    error!("批次 {} 处理失败: {}", batch, e);
                    report.failed.push(batch);
                    metrics::inc_batch("failed");
                }
            }
        }

        pb.finish_with_message("批次处理完成");
        info!(
            "共 {} 个批次: 新处理 {}, 跳过 {}, 失败 {}, 被占用 {}",
            report.batches,
            report.processed,
            report.skipped,
            report.failed.len(),
            report.locked.len()
        );
        Ok(report)
    }

    /// 检查特征目录是否由相同的 batch_size 生成，不同的 batch_size 会使已有批次的边界失效
    fn check_meta(&self) -> Result<()> {
        let path = self.dir.meta();
        match fs::read(&path) {
            Ok(data) => {
                let meta: DirMeta = serde_json::from_slice(&data)?;
                if meta.batch_size != self.batch_size {
                    return Err(Error::StaleConfig {
                        found: meta.batch_size,
                        configured: self.batch_size,
                    });
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let meta = DirMeta { batch_size: self.batch_size };
                publish_json(&path, &meta)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 处理单个批次
    pub fn process_batch(&self, batch: usize, files: &[PathBuf]) -> Result<BatchOutcome> {
        let features_path = self.dir.batch_features(batch);
        if features_path.exists() && !self.is_stale(batch, files)? {
            debug!("跳过已完成的批次 {}", batch);
            return Ok(BatchOutcome::Skipped);
        }

        // 锁由操作系统持有，进程被杀死后自动释放，遗留的锁文件不会阻塞后续运行
        let lock_path = self.dir.batch_lock(batch);
        let mut lock = RwLock::new(
            OpenOptions::new().write(true).create(true).truncate(false).open(&lock_path)?,
        );
        let _guard = match lock.try_write() {
            Ok(guard) => guard,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(BatchOutcome::Locked),
            Err(e) => return Err(e.into()),
        };

        // 获取锁之后再检查一次，其他进程可能刚刚完成这个批次
        if features_path.exists() {
            if !self.is_stale(batch, files)? {
                return Ok(BatchOutcome::Skipped);
            }
            info!("重新计算已过期的批次 {}", batch);
            remove_if_exists(&features_path)?;
        }
        // 上次中断时可能留下了没有特征文件的标识文件
        remove_if_exists(&self.dir.batch_ids(batch))?;
        remove_if_exists(&self.dir.batch_manifest(batch))?;

        let images = files
            .par_iter()
            .map(|path| {
                load_image(path).map_err(|source| Error::BatchDecode {
                    batch,
                    path: path.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let features = self.encoder.encode_images(&images)?;
        if features.nrows() != images.len() {
            return Err(EncodeError::Malformed(format!(
                "输入 {} 张图片，返回 {} 个向量",
                images.len(),
                features.nrows()
            ))
            .into());
        }

        let ids = files.iter().map(|path| path.to_string_lossy()).collect::<Vec<_>>();
        self.publish(batch, files, &features, &ids)?;
        // 特征文件已发布，之后拿到锁的进程都会直接跳过
        if let Err(e) = fs::remove_file(&lock_path) {
            debug!("无法删除锁文件 {}: {}", lock_path.display(), e);
        }
        Ok(BatchOutcome::Processed(features.nrows()))
    }

    /// 检查已完成的批次是否对应当前的文件列表
    ///
    /// 返回 true 表示该批次需要重新计算，只在开启 rebuild_stale 时可能为 true
    fn is_stale(&self, batch: usize, files: &[PathBuf]) -> Result<bool> {
        let path = self.dir.batch_manifest(batch);
        let manifest: BatchManifest = match fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)?,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        if manifest == BatchManifest::of(files) {
            return Ok(false);
        }
        if !self.rebuild_stale {
            warn!("批次 {} 的文件列表已发生变化，其结果可能已过期，使用 --rebuild-stale 重新计算", batch);
            return Ok(false);
        }
        Ok(true)
    }

    /// 写入批次产物
    ///
    /// 所有文件先写到临时路径再 rename，特征文件最后发布，它的存在即表示批次已完成
    fn publish<S: AsRef<str>>(
        &self,
        batch: usize,
        files: &[PathBuf],
        features: &ndarray::Array2<f32>,
        ids: &[S],
    ) -> Result<()> {
        let features_path = self.dir.batch_features(batch);
        let ids_path = self.dir.batch_ids(batch);
        let manifest_path = self.dir.batch_manifest(batch);
        let (features_tmp, ids_tmp) = (tmp_path(&features_path), tmp_path(&ids_path));

        let result = (|| -> Result<()> {
            write_ids(&ids_tmp, ids)?;
            write_npy(&features_tmp, features)?;
            File::open(&features_tmp)?.sync_all()?;
            fs::rename(&ids_tmp, &ids_path)?;
            publish_json(&manifest_path, &BatchManifest::of(files))?;
            fs::rename(&features_tmp, &features_path)?;
            Ok(())
        })();

        if result.is_err() {
            for path in [&features_tmp, &ids_tmp, &ids_path, &manifest_path] {
                let _ = fs::remove_file(path);
            }
        }
        result
    }
}

/// 读取并解码一张图片，根据文件内容判断格式
pub fn load_image(path: &Path) -> Result<DynamicImage, image::ImageError> {
    ImageReader::open(path)?.with_guessed_format()?.decode()
}

fn publish_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    fs::write(&tmp, serde_json::to_vec(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
