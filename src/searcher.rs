use std::fmt;
use std::path::Path;

use log::{debug, warn};
use rayon::ThreadPool;
use serde::Serialize;

use crate::config::Acceleration;
use crate::context::{ExecutionContext, probe_search_pool};
use crate::error::Result;
use crate::index::{FlatIndex, IndexArtifact, Metric};

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// 图片路径
    pub path: String,
    /// 相似度得分，含义取决于索引的度量
    pub score: f32,
    /// 图片在索引中的序号
    pub ordinal: usize,
}

/// 索引状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStatus {
    /// 是否有可用的索引
    pub active: bool,
    pub count: usize,
    pub dimension: usize,
    pub metric: Option<Metric>,
    pub context: ExecutionContext,
    /// 加载时采用了与配置不同的维度
    pub adopted_dimension: Option<usize>,
}

impl IndexStatus {
    /// 索引未加载时的状态
    pub fn inactive() -> Self {
        Self {
            active: false,
            count: 0,
            dimension: 0,
            metric: None,
            context: ExecutionContext::Baseline,
            adopted_dimension: None,
        }
    }
}

impl fmt::Display for IndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.active {
            return write!(f, "索引未加载或加载失败");
        }
        write!(f, "索引已加载 ({} 向量, 维度 {})", self.count, self.dimension)?;
        if let Some(metric) = self.metric {
            write!(f, "，度量 {metric}")?;
        }
        write!(f, "，执行环境 {}", self.context)
    }
}

/// 加载好的索引，负责把向量搜索结果映射回图片路径
///
/// 加载后只读，可以在多个线程间共享并同时搜索
pub struct Searcher {
    index: FlatIndex,
    paths: Vec<String>,
    pool: Option<ThreadPool>,
    adopted_dimension: Option<usize>,
}

impl Searcher {
    /// 从索引文件和映射文件加载
    ///
    /// # Arguments
    ///
    /// * `index_path` - 索引文件路径
    /// * `mapping_path` - 映射文件路径
    /// * `dimension` - 配置的向量维度
    /// * `acceleration` - 是否尝试使用多线程搜索
    pub fn load(
        index_path: &Path,
        mapping_path: &Path,
        dimension: usize,
        acceleration: Acceleration,
    ) -> Result<Self> {
        let loaded = IndexArtifact::load(index_path, mapping_path, dimension)?;
        let mut searcher = Self::new(loaded.artifact, acceleration);
        searcher.adopted_dimension = loaded.adopted_dimension;
        Ok(searcher)
    }

    /// 使用内存中的索引创建
    pub fn new(artifact: IndexArtifact, acceleration: Acceleration) -> Self {
        let pool = probe_search_pool(acceleration);
        debug!("搜索执行环境: {}", if pool.is_some() { "多线程" } else { "单线程" });
        Self { index: artifact.index, paths: artifact.paths, pool, adopted_dimension: None }
    }

    pub fn context(&self) -> ExecutionContext {
        match self.pool {
            Some(_) => ExecutionContext::Accelerated,
            None => ExecutionContext::Baseline,
        }
    }

    pub fn index(&self) -> &FlatIndex {
        &self.index
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    /// 搜索与查询向量最相似的 k 张图片，按从好到坏排序
    ///
    /// 索引为空时返回空列表；序号越界的结果会被丢弃
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.index.is_empty() {
            warn!("索引为空，无法执行搜索");
            return Ok(vec![]);
        }
        // 结果数量不会超过向量总数，避免为很大的 k 分配占位项
        let k = k.min(self.index.ntotal());
        let neighbors = match &self.pool {
            Some(pool) => self.index.search_with(pool, query, k)?,
            None => self.index.search(query, k)?,
        };

        let hits = neighbors
            .into_iter()
            .filter_map(|n| {
                let ordinal = usize::try_from(n.ordinal).ok()?;
                match self.paths.get(ordinal) {
                    Some(path) => Some(SearchHit { path: path.clone(), score: n.score, ordinal }),
                    None => {
                        if !n.is_missing() {
                            warn!("搜索返回无效序号 {}", n.ordinal);
                        }
                        None
                    }
                }
            })
            .collect();
        Ok(hits)
    }

    /// 当前索引状态，不会产生任何副作用
    pub fn status(&self) -> IndexStatus {
        IndexStatus {
            active: true,
            count: self.index.ntotal(),
            dimension: self.index.dimension(),
            metric: Some(self.index.metric()),
            context: self.context(),
            adopted_dimension: self.adopted_dimension,
        }
    }
}
