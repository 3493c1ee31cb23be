use anyhow::Result;
use clap::Parser;
use log::warn;

use crate::cli::{OutputFormat, SubCommandExtend};
use crate::config::DEFAULT_DIMENSION;
use crate::{IndexStatus, Opts, Searcher};

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    /// 配置的特征维度，与索引不同时以索引为准
    #[arg(long, value_name = "DIM", default_value_t = DEFAULT_DIMENSION)]
    pub dimension: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatusCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let status = match Searcher::load(
            &opts.conf_dir.index(),
            &opts.conf_dir.mapping(),
            self.dimension,
            opts.acceleration,
        ) {
            Ok(searcher) => searcher.status(),
            Err(e) => {
                warn!("{e}");
                IndexStatus::inactive()
            }
        };

        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Table => println!("{status}"),
        }
        Ok(())
    }
}
