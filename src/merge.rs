use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::{read_npy, write_npy};

use crate::config::{FeaturesDir, tmp_path};
use crate::error::{Error, Result};
use crate::ids::{read_ids, write_ids};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    pub batches: usize,
    pub rows: usize,
    pub dim: usize,
}

#[derive(Debug, Default)]
struct BatchFiles {
    features: Option<PathBuf>,
    ids: Option<PathBuf>,
}

/// 列出目录中的所有批次产物，按批次编号升序排列
///
/// 只识别 10 位数字命名的 `.npy` 和 `.csv` 文件，合并后的文件与临时文件会被忽略
fn list_batches(dir: &FeaturesDir) -> Result<BTreeMap<usize, BatchFiles>> {
    let mut batches = BTreeMap::<usize, BatchFiles>::new();
    for entry in fs::read_dir(dir.path())? {
        let path = entry?.path();
        let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
            continue;
        };
        let stem = stem.to_string_lossy();
        if stem.len() != 10 || !stem.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let Ok(batch) = stem.parse::<usize>() else {
            continue;
        };
        match ext.to_str() {
            Some("npy") => batches.entry(batch).or_default().features = Some(path),
            Some("csv") => batches.entry(batch).or_default().ids = Some(path),
            _ => {}
        }
    }
    Ok(batches)
}

/// 将所有批次的特征与标识按批次编号顺序拼接，写入合并后的索引
///
/// 任何批次只有特征没有标识（或相反）、行数不一致、维度不一致时直接失败，不写入任何文件
pub fn merge(dir: &FeaturesDir) -> Result<MergeReport> {
    let batches = list_batches(dir)?;
    info!("合并 {} 个批次", batches.len());

    let mut features = Vec::with_capacity(batches.len());
    let mut ids = Vec::new();
    let mut dim = None;

    for (batch, files) in &batches {
        let corrupt = |reason: String| Error::CorruptBatch { batch: *batch, reason };
        let (features_path, ids_path) = match (&files.features, &files.ids) {
            (Some(f), Some(i)) => (f, i),
            (Some(_), None) => return Err(corrupt("缺少标识文件".into())),
            (None, Some(_)) => return Err(corrupt("缺少特征文件".into())),
            (None, None) => unreachable!(),
        };

        let batch_features: Array2<f32> = read_npy(features_path)?;
        let batch_ids = read_ids(ids_path)?;
        if batch_features.nrows() != batch_ids.len() {
            return Err(corrupt(format!(
                "{} 行特征, {} 个标识",
                batch_features.nrows(),
                batch_ids.len()
            )));
        }
        match dim {
            None => dim = Some(batch_features.ncols()),
            Some(d) if d != batch_features.ncols() => {
                return Err(corrupt(format!("维度为 {}，其他批次为 {}", batch_features.ncols(), d)));
            }
            _ => {}
        }
        debug!("批次 {}: {} 行", batch, batch_ids.len());

        features.push(batch_features);
        ids.extend(batch_ids);
    }

    let dim = dim.unwrap_or(0);
    let merged = if features.is_empty() {
        Array2::zeros((0, dim))
    } else {
        let views = features.iter().map(|f| f.view()).collect::<Vec<_>>();
        ndarray::concatenate(Axis(0), &views).map_err(std::io::Error::other)?
    };
    assert_eq!(merged.nrows(), ids.len(), "merged rows and ids must stay aligned");

    let (features_path, ids_path) = (dir.features(), dir.photo_ids());
    let (features_tmp, ids_tmp) = (tmp_path(&features_path), tmp_path(&ids_path));
    write_npy(&features_tmp, &merged)?;
    write_ids(&ids_tmp, &ids)?;
    fs::rename(&ids_tmp, &ids_path)?;
    fs::rename(&features_tmp, &features_path)?;

    info!("合并完成: {} 行, {} 维", merged.nrows(), dim);
    Ok(MergeReport { batches: batches.len(), rows: merged.nrows(), dim })
}
