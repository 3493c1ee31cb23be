use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;
use ndarray_npy::write_npy;

use crate::cli::SubCommandExtend;
use crate::config::DEFAULT_DIMENSION;
use crate::{IndexArtifact, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ExportCommand {
    /// 特征向量的输出路径
    #[arg(short, long, default_value = "features.npy")]
    pub output: PathBuf,
    /// 图片路径列表的输出路径，JSON 格式，顺序与特征向量一致
    #[arg(long, default_value = "paths.json")]
    pub paths: PathBuf,
    /// 配置的特征维度，与索引不同时以索引为准
    #[arg(long, value_name = "DIM", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
}

impl SubCommandExtend for ExportCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let loaded =
            IndexArtifact::load(&opts.conf_dir.index(), &opts.conf_dir.mapping(), self.dimension)?;
        let artifact = loaded.artifact;
        write_npy(&self.output, &artifact.index.to_array())?;
        fs::write(&self.paths, serde_json::to_vec_pretty(&artifact.paths)?)?;
        info!("导出成功：{} 个向量", artifact.index.ntotal());
        Ok(())
    }
}
