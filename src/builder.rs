use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{info, warn};
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::config::{DEFAULT_DIMENSION, DEFAULT_SUFFIX};
use crate::embedder::{Embedder, EmbeddingVector};
use crate::error::{Error, Result};
use crate::index::{FlatIndex, IndexArtifact, Metric};
use crate::utils::{pb_style, suffix_regex};

/// 离线构建索引
///
/// ```no_run
/// # use vitsearch::{IndexBuilder, Metric};
/// # fn f(embedder: &dyn vitsearch::Embedder) -> vitsearch::Result<()> {
/// let built = IndexBuilder::new("data").metric(Metric::InnerProduct).build(embedder)?;
/// built.artifact.save("index/a.index".as_ref(), "index/a.bin".as_ref())?;
/// # Ok(()) }
/// ```
pub struct IndexBuilder {
    source: PathBuf,
    suffix: String,
    dimension: usize,
    metric: Metric,
    progress: bool,
}

/// 构建统计
#[derive(Debug, Clone)]
pub struct BuildReport {
    /// 扫描到的图片数量
    pub scanned: usize,
    /// 成功提取特征的数量
    pub embedded: usize,
    /// 提取失败被跳过的数量
    pub skipped: usize,
    pub elapsed: Duration,
}

pub struct BuiltIndex {
    pub artifact: IndexArtifact,
    pub report: BuildReport,
}

impl IndexBuilder {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            suffix: DEFAULT_SUFFIX.to_string(),
            dimension: DEFAULT_DIMENSION,
            metric: Metric::InnerProduct,
            progress: false,
        }
    }

    /// 扫描的文件后缀名，多个后缀用逗号分隔，不区分大小写
    pub fn suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    /// 是否显示进度条
    pub fn progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// 列出数据目录下所有支持的图片，按文件名排序
    ///
    /// 目录不存在或没有任何匹配的文件时返回错误
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        if !self.source.is_dir() {
            return Err(Error::SourceMissing(self.source.clone()));
        }
        let re = suffix_regex(&self.suffix)?;
        let mut files = vec![];
        for entry in WalkDir::new(&self.source).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if entry.file_type().is_file() && has_suffix(entry.path(), &re) {
                files.push(entry.into_path());
            }
        }
        if files.is_empty() {
            return Err(Error::EmptySource(self.source.clone()));
        }
        info!("在 {} 中找到 {} 张图片", self.source.display(), files.len());
        Ok(files)
    }

    /// 扫描数据目录并构建索引
    pub fn build(&self, embedder: &dyn Embedder) -> Result<BuiltIndex> {
        let files = self.scan()?;
        self.build_from(&files, embedder)
    }

    /// 对给定的图片列表提取特征并构建索引
    ///
    /// 单张图片失败时跳过；至少需要一张图片成功；任何向量维度与索引不符都会直接失败
    pub fn build_from(&self, files: &[PathBuf], embedder: &dyn Embedder) -> Result<BuiltIndex> {
        let start = Instant::now();
        let mut index = FlatIndex::new(self.dimension, self.metric)?;

        let pb = if self.progress {
            ProgressBar::new(files.len() as u64).with_style(pb_style())
        } else {
            ProgressBar::hidden()
        };
        pb.set_message("提取特征中");

        // 并行提取，collect 保持与 files 相同的顺序
        let results = files
            .par_iter()
            .map(|path| {
                let result = embedder.extract(path);
                pb.inc(1);
                result
            })
            .collect::<Vec<_>>();
        pb.finish_and_clear();

        let mut vectors: Vec<EmbeddingVector> = Vec::with_capacity(files.len());
        let mut paths = Vec::with_capacity(files.len());
        for (path, result) in files.iter().zip(results) {
            match result {
                Ok(vector) => {
                    if vector.dimension() != index.dimension() {
                        return Err(Error::DimensionMismatch {
                            expected: index.dimension(),
                            actual: vector.dimension(),
                        });
                    }
                    vectors.push(vector);
                    paths.push(path.to_string_lossy().into_owned());
                }
                Err(e) => warn!("跳过图片: {e}"),
            }
        }

        if vectors.is_empty() {
            return Err(Error::NoEmbeddings);
        }

        index.insert(&vectors)?;
        let report = BuildReport {
            scanned: files.len(),
            embedded: vectors.len(),
            skipped: files.len() - vectors.len(),
            elapsed: start.elapsed(),
        };
        info!(
            "索引构建完成：{} 个向量，跳过 {} 张图片，耗时 {:.2}s",
            report.embedded,
            report.skipped,
            report.elapsed.as_secs_f32()
        );

        Ok(BuiltIndex { artifact: IndexArtifact::new(index, paths)?, report })
    }
}

fn has_suffix(path: &Path, re: &Regex) -> bool {
    path.extension().map(|ext| re.is_match(&ext.to_string_lossy())).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn scan_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        for name in ["b.JPG", "a.png", "c.txt", "d.jpeg.bak", "e.Gif"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        fs::create_dir(dir.path().join("nested.png")).unwrap();
        let files = IndexBuilder::new(dir.path()).scan().unwrap();
        let names = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.png", "b.JPG", "e.Gif"]);
    }

    #[test]
    fn scan_does_not_descend() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("a.png"), b"").unwrap();
        assert!(matches!(IndexBuilder::new(dir.path()).scan(), Err(Error::EmptySource(_))));
    }

    #[test]
    fn missing_source_is_reported() {
        let dir = TempDir::new().unwrap();
        let err = IndexBuilder::new(dir.path().join("nope")).scan().unwrap_err();
        assert!(matches!(err, Error::SourceMissing(_)));
    }

    #[test]
    fn custom_suffix_list() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.webp"), b"").unwrap();
        fs::write(dir.path().join("b.png"), b"").unwrap();
        let files = IndexBuilder::new(dir.path()).suffix("webp").scan().unwrap();
        assert_eq!(files.len(), 1);
    }
}
