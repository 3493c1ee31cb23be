use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{DEFAULT_SUFFIX, EmbedderOptions};
use crate::index::Metric;
use crate::{IndexBuilder, Opts, VitEmbedder};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    /// 图片目录，默认为 <CONF_DIR>/data
    pub source: Option<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
    /// 相似度度量
    #[arg(long, value_enum, default_value_t = Metric::InnerProduct)]
    pub metric: Metric,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let source = self.source.clone().unwrap_or_else(|| opts.conf_dir.data_dir());
        let builder = IndexBuilder::new(source)
            .suffix(self.suffix.clone())
            .dimension(self.embedder.dimension)
            .metric(self.metric)
            .progress(true);

        // 先确认有图片可以处理，再加载模型
        let files = builder.scan()?;

        let model = self.embedder.model_file(&opts.conf_dir);
        info!("加载模型: {}", model.display());
        let embedder = block_in_place(|| {
            VitEmbedder::open(&model, self.embedder.dimension, opts.acceleration)
        })?;

        let built = block_in_place(|| builder.build_from(&files, &embedder))?;

        fs::create_dir_all(opts.conf_dir.index_dir())?;
        built.artifact.save(&opts.conf_dir.index(), &opts.conf_dir.mapping())?;
        info!(
            "索引已保存到 {}，共 {} 张图片",
            opts.conf_dir.index_dir().display(),
            built.report.embedded
        );
        Ok(())
    }
}
