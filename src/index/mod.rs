mod artifact;
mod topk;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use ndarray::{Array2, ArrayView2};
use rayon::ThreadPool;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub use artifact::*;
use topk::TopK;

use crate::error::{Error, Result};

/// 并行搜索时每个任务处理的向量数量
const ROWS_PER_TASK: usize = 4096;

/// 相似度度量
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// 内积，对归一化向量等价于余弦相似度，越大越相似
    #[value(alias = "ip")]
    InnerProduct,
    /// 欧氏距离的平方，越小越相似
    #[value(alias = "l2")]
    SquaredL2,
}

impl Metric {
    /// 计算两个向量的得分
    #[inline]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Self::InnerProduct => a.iter().zip(b).map(|(x, y)| x * y).sum(),
            Self::SquaredL2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        }
    }

    /// 将得分转换为「越大越好」的排序键
    #[inline]
    fn goodness(self, score: f32) -> f32 {
        match self {
            Self::InnerProduct => score,
            Self::SquaredL2 => -score,
        }
    }

    /// 占位结果使用的最差得分
    pub fn worst_score(self) -> f32 {
        match self {
            Self::InnerProduct => f32::NEG_INFINITY,
            Self::SquaredL2 => f32::INFINITY,
        }
    }

    /// 判断得分 a 是否不差于 b
    pub fn at_least_as_good(self, a: f32, b: f32) -> bool {
        self.goodness(a) >= self.goodness(b)
    }

    pub(crate) fn tag(self) -> u8 {
        match self {
            Self::InnerProduct => 0,
            Self::SquaredL2 => 1,
        }
    }

    pub(crate) fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(Self::InnerProduct),
            1 => Ok(Self::SquaredL2),
            _ => Err(Error::UnsupportedMetric(format!("tag {tag}"))),
        }
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ip" | "inner-product" | "inner_product" => Ok(Self::InnerProduct),
            "l2" | "squared-l2" | "squared_l2" => Ok(Self::SquaredL2),
            _ => Err(Error::UnsupportedMetric(s.to_string())),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InnerProduct => write!(f, "inner-product"),
            Self::SquaredL2 => write!(f, "squared-l2"),
        }
    }
}

/// 搜索结果中的一项
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// 向量在索引中的序号，没有结果时为 -1
    pub ordinal: i64,
    /// 与查询向量的得分
    pub score: f32,
}

impl Neighbor {
    /// 结果不足 k 个时用于填充的占位项
    pub fn missing(metric: Metric) -> Self {
        Self { ordinal: -1, score: metric.worst_score() }
    }

    pub fn is_missing(&self) -> bool {
        self.ordinal < 0
    }
}

/// 精确搜索的平坦索引，所有向量按插入顺序连续存放
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// 创建一个空索引
    ///
    /// # Arguments
    ///
    /// * `dimension` - 向量维数，不能为 0
    /// * `metric` - 相似度度量
    pub fn new(dimension: usize, metric: Metric) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config("索引维度不能为 0".into()));
        }
        Ok(Self { metric, dimension, data: vec![] })
    }

    /// 根据度量名称创建索引，不支持的名称会返回错误
    pub fn with_metric_name(dimension: usize, metric: &str) -> Result<Self> {
        Self::new(dimension, metric.parse()?)
    }

    pub(crate) fn from_raw(dimension: usize, metric: Metric, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 || data.len() % dimension != 0 {
            return Err(Error::CorruptArtifact(format!(
                "数据长度 {} 不是维度 {} 的整数倍",
                data.len(),
                dimension
            )));
        }
        Ok(Self { metric, dimension, data })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// 该索引中的向量数量
    pub fn ntotal(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 按顺序追加若干条向量，任意一条维度不符或包含非有限值时不做任何修改
    pub fn insert<V: AsRef<[f32]>>(&mut self, vectors: &[V]) -> Result<()> {
        for v in vectors {
            let v = v.as_ref();
            if v.len() != self.dimension {
                return Err(Error::DimensionMismatch { expected: self.dimension, actual: v.len() });
            }
            if v.iter().any(|x| !x.is_finite()) {
                return Err(Error::NonFiniteVector);
            }
        }
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v.as_ref());
        }
        Ok(())
    }

    /// 第 i 条向量
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        self.data.get(i * self.dimension..(i + 1) * self.dimension)
    }

    /// 所有向量的视图，大小为 (ntotal, dimension)
    pub fn vectors(&self) -> ArrayView2<'_, f32> {
        ArrayView2::from_shape((self.ntotal(), self.dimension), &self.data)
            .expect("data length is a multiple of dimension")
    }

    pub fn to_array(&self) -> Array2<f32> {
        self.vectors().to_owned()
    }

    pub(crate) fn raw(&self) -> &[f32] {
        &self.data
    }

    /// 在调用线程上精确搜索 k 个最近邻
    ///
    /// 返回结果固定为 k 个，按从好到坏排序，不足的部分用 [`Neighbor::missing`] 填充
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_query(query)?;
        let mut topk = TopK::new(k, self.metric);
        self.scan(query, 0, &self.data, &mut topk);
        Ok(self.finish(topk, k))
    }

    /// 与 `search` 相同，但把扫描分摊到线程池中
    pub fn search_with(&self, pool: &ThreadPool, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        self.check_query(query)?;
        let chunk = ROWS_PER_TASK * self.dimension;
        let topk = pool.install(|| {
            self.data
                .par_chunks(chunk)
                .enumerate()
                .map(|(i, block)| {
                    let mut topk = TopK::new(k, self.metric);
                    self.scan(query, i * ROWS_PER_TASK, block, &mut topk);
                    topk
                })
                .reduce(|| TopK::new(k, self.metric), TopK::merge)
        });
        Ok(self.finish(topk, k))
    }

    fn check_query(&self, query: &[f32]) -> Result<()> {
        if query.len() != self.dimension {
            return Err(Error::QueryDimension { expected: self.dimension, actual: query.len() });
        }
        Ok(())
    }

    fn scan(&self, query: &[f32], base: usize, block: &[f32], topk: &mut TopK) {
        for (i, v) in block.chunks_exact(self.dimension).enumerate() {
            topk.push(base + i, self.metric.score(query, v));
        }
    }

    fn finish(&self, topk: TopK, k: usize) -> Vec<Neighbor> {
        let mut neighbors = topk.into_sorted();
        neighbors.resize(k, Neighbor::missing(self.metric));
        neighbors
    }
}
