use std::cmp::Ordering as CmpOrdering;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{debug, info};
use ndarray::prelude::*;
use ndarray_npy::read_npy;

use crate::config::FeaturesDir;
use crate::encoder::Encoder;
use crate::error::{Error, Result};
use crate::ids::read_ids;
use crate::metrics;

/// 每次扫描的行数，两次扫描之间检查是否已取消
const SCAN_CHUNK: usize = 8192;

/// 查询取消标记，可在线程间共享
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// 返回一个在 drop 时取消查询的守卫
    pub fn drop_guard(&self) -> CancelOnDrop {
        CancelOnDrop(self.clone())
    }
}

pub struct CancelOnDrop(CancelFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// 穷举搜索引擎
///
/// 加载后只读，可以在多个线程中同时查询
#[derive(Debug)]
pub struct SearchEngine {
    features: Array2<f32>,
    ids: Vec<String>,
}

/// 降序排列分数，分数相同时按行号升序
fn rank_order(a: &(usize, f32), b: &(usize, f32)) -> CmpOrdering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

impl SearchEngine {
    pub fn new(features: Array2<f32>, ids: Vec<String>) -> Result<Self> {
        if features.nrows() != ids.len() {
            return Err(Error::CorruptIndex { rows: features.nrows(), ids: ids.len() });
        }
        if ids.is_empty() {
            return Err(Error::EmptyIndex);
        }
        Ok(Self { features, ids })
    }

    /// 从特征目录加载合并后的索引
    pub fn open(dir: &FeaturesDir) -> Result<Self> {
        let (features_path, ids_path) = (dir.features(), dir.photo_ids());
        for path in [&features_path, &ids_path] {
            if !path.exists() {
                return Err(Error::IndexMissing(path.clone()));
            }
        }
        debug!("读取索引: {}", features_path.display());
        let features: Array2<f32> = read_npy(&features_path)?;
        let ids = read_ids(&ids_path)?;
        let engine = Self::new(features, ids)?;
        info!("索引已加载: {} 张图片, {} 维", engine.len(), engine.dim());
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.features.ncols()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// 计算查询向量与每一行的点积，返回前 k 个 `(行号, 分数)`
    ///
    /// 分数相同时行号小的在前，NaN 视为负无穷
    pub fn rank(
        &self,
        query: ArrayView1<f32>,
        k: usize,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dim() {
            return Err(Error::DimensionMismatch { expected: self.dim(), got: query.len() });
        }

        let mut scored = Vec::with_capacity(self.len());
        for (n, chunk) in self.features.axis_chunks_iter(Axis(0), SCAN_CHUNK).enumerate() {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return Err(Error::Cancelled);
            }
            let offset = n * SCAN_CHUNK;
            scored.extend(chunk.dot(&query).into_iter().enumerate().map(|(i, s)| {
                (offset + i, if s.is_nan() { f32::NEG_INFINITY } else { s })
            }));
        }

        let k = k.min(scored.len());
        if k == 0 {
            return Ok(vec![]);
        }
        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        // 比较函数对不同行号不会返回 Equal，因此不稳定排序的结果也是确定的
        scored.sort_unstable_by(rank_order);
        Ok(scored)
    }

    /// 使用查询向量搜索，返回前 k 个 `(分数, 图片标识)`
    pub fn search_vector(&self, query: ArrayView1<f32>, k: usize) -> Result<Vec<(f32, String)>> {
        self.search_vector_cancellable(query, k, None)
    }

    pub fn search_vector_cancellable(
        &self,
        query: ArrayView1<f32>,
        k: usize,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<(f32, String)>> {
        let ranked = self.rank(query, k, cancel)?;
        Ok(ranked.into_iter().map(|(row, score)| (score, self.ids[row].clone())).collect())
    }

    /// 使用文本搜索，文本先经过编码器转换为查询向量
    pub fn search_text(
        &self,
        encoder: &dyn Encoder,
        text: &str,
        k: usize,
        cancel: Option<&CancelFlag>,
    ) -> Result<Vec<(f32, String)>> {
        let start = Instant::now();
        let query = encoder.encode_text(text)?;
        let result = self.search_vector_cancellable(query.view(), k, cancel);
        let elapsed = start.elapsed().as_secs_f64();
        debug!("搜索 {:?} 耗时 {:.2}ms", text, elapsed * 1000.);
        metrics::observe_search(if result.is_ok() { "ok" } else { "error" }, elapsed);
        result
    }
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[fixture]
    fn engine() -> SearchEngine {
        SearchEngine::new(
            array![[1., 0.], [0., 1.], [0.7, 0.7]],
            vec!["item1".into(), "item2".into(), "item3".into()],
        )
        .unwrap()
    }

    #[rstest]
    fn rank_scenario(engine: SearchEngine) {
        let result = engine.search_vector(array![1f32, 0.].view(), 3).unwrap();
        let ids = result.iter().map(|(_, id)| id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["item1", "item3", "item2"]);
        assert!((result[0].0 - 1.).abs() < 1e-6);
        assert!((result[1].0 - 0.7).abs() < 1e-6);
        assert!(result[2].0.abs() < 1e-6);
    }

    #[rstest]
    fn k_larger_than_corpus(engine: SearchEngine) {
        let result = engine.search_vector(array![0f32, 1.].view(), 10).unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result[0].1, "item2");
    }

    #[rstest]
    fn top_k_truncates(engine: SearchEngine) {
        let result = engine.search_vector(array![1f32, 0.].view(), 1).unwrap();
        assert_eq!(result, vec![(1., "item1".to_string())]);
    }

    #[rstest]
    #[case(2.0)]
    #[case(0.25)]
    #[case(37.5)]
    fn scaling_query_keeps_order(engine: SearchEngine, #[case] scale: f32) {
        let q = array![0.9f32, 0.3];
        let base = engine.rank(q.view(), 3, None).unwrap();
        let scaled = engine.rank((&q * scale).view(), 3, None).unwrap();
        let rows = |v: &[(usize, f32)]| v.iter().map(|(r, _)| *r).collect::<Vec<_>>();
        assert_eq!(rows(&base), rows(&scaled));
    }

    #[test]
    fn ties_keep_row_order() {
        let engine = SearchEngine::new(
            array![[0., 1.], [1., 0.], [0., 1.], [1., 0.], [0., 1.]],
            (0..5).map(|i| i.to_string()).collect(),
        )
        .unwrap();
        for _ in 0..3 {
            let ranked = engine.rank(array![0f32, 1.].view(), 5, None).unwrap();
            let rows = ranked.iter().map(|(r, _)| *r).collect::<Vec<_>>();
            assert_eq!(rows, vec![0, 2, 4, 1, 3]);
        }
        let top = engine.rank(array![0f32, 1.].view(), 2, None).unwrap();
        assert_eq!(top.iter().map(|(r, _)| *r).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn nan_scores_rank_last() {
        let engine = SearchEngine::new(
            array![[f32::NAN, 0.], [0., 1.]],
            vec!["nan".into(), "ok".into()],
        )
        .unwrap();
        let result = engine.search_vector(array![1f32, 0.].view(), 2).unwrap();
        assert_eq!(result[0].1, "ok");
        assert_eq!(result[1].1, "nan");
    }

    #[rstest]
    fn dimension_mismatch(engine: SearchEngine) {
        let err = engine.search_vector(array![1f32, 0., 0.].view(), 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { expected: 2, got: 3 }));
    }

    #[rstest]
    fn cancelled_scan(engine: SearchEngine) {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = engine.search_vector_cancellable(array![1f32, 0.].view(), 1, Some(&cancel));
        assert!(matches!(err, Err(Error::Cancelled)));
    }

    #[test]
    fn drop_guard_cancels() {
        let cancel = CancelFlag::new();
        {
            let _guard = cancel.drop_guard();
            assert!(!cancel.is_cancelled());
        }
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn empty_index() {
        let err = SearchEngine::new(Array2::zeros((0, 4)), vec![]).unwrap_err();
        assert!(matches!(err, Error::EmptyIndex));
    }

    #[test]
    fn misaligned_index() {
        let err = SearchEngine::new(Array2::zeros((2, 4)), vec!["a".into()]).unwrap_err();
        assert!(matches!(err, Error::CorruptIndex { rows: 2, ids: 1 }));
    }

    #[test]
    fn missing_index_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = SearchEngine::open(&FeaturesDir::new(tmp.path())).unwrap_err();
        assert!(matches!(err, Error::IndexMissing(_)));
    }
}
