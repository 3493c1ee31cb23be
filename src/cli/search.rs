use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::{debug, info};
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, SearchOptions};
use crate::dispatch::{CancelToken, QueryImage, execute};
use crate::{Opts, SearchHit, Searcher, VitEmbedder};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 索引缺失时不必加载模型
        let searcher = block_in_place(|| {
            Searcher::load(
                &opts.conf_dir.index(),
                &opts.conf_dir.mapping(),
                self.embedder.dimension,
                opts.acceleration,
            )
        })?;
        debug!("{}", searcher.status());

        let model = self.embedder.model_file(&opts.conf_dir);
        let dimension = searcher.index().dimension();
        let embedder =
            block_in_place(|| VitEmbedder::open(&model, dimension, opts.acceleration))?;

        info!("正在搜索 {}", self.image.display());
        let image = QueryImage::Path(self.image.clone());
        let result = block_in_place(|| {
            execute(&embedder, &searcher, &image, self.search.count, &CancelToken::new())
        })?;

        print_result(&result, self.output_format)
    }
}

pub fn print_result(result: &[SearchHit], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?)
        }
        OutputFormat::Table => {
            for hit in result {
                println!("{:.4}\t{}", hit.score, hit.path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}
