use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use tokio::io::{AsyncBufReadExt, BufReader, stdin};
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend, print_result};
use crate::config::{DEFAULT_SUFFIX, EmbedderOptions, SearchOptions};
use crate::dispatch::{QueryDispatcher, QueryImage};
use crate::{IndexBuilder, Opts, Searcher, VitEmbedder};

const HELP: &str = "\
输入图片路径进行搜索，新的查询会取代尚未完成的查询
  :status    显示索引状态
  :k <N>     设置返回的结果数量
  :cancel    放弃当前查询
  :help      显示帮助
  :quit      退出";

#[derive(Parser, Debug, Clone)]
pub struct ShellCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 图片目录，默认为 <CONF_DIR>/data
    pub source: Option<PathBuf>,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
}

/// 一行输入对应的操作
#[derive(Debug, PartialEq)]
enum Command {
    Query(PathBuf),
    Count(usize),
    Status,
    Cancel,
    Help,
    Quit,
    Empty,
    Unknown(String),
}

fn parse_line(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    if !line.starts_with(':') {
        return Command::Query(PathBuf::from(line));
    }
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(":status"), None) => Command::Status,
        (Some(":cancel"), None) => Command::Cancel,
        (Some(":help"), None) => Command::Help,
        (Some(":quit" | ":q" | ":exit"), None) => Command::Quit,
        (Some(":k"), Some(n)) => match n.parse::<usize>() {
            Ok(n) if (1..=1000).contains(&n) => Command::Count(n),
            _ => Command::Unknown(line.to_string()),
        },
        _ => Command::Unknown(line.to_string()),
    }
}

impl SubCommandExtend for ShellCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        // 启动前检查数据目录和索引，任一缺失都拒绝启动
        let source = self.source.clone().unwrap_or_else(|| opts.conf_dir.data_dir());
        IndexBuilder::new(source).suffix(self.suffix.clone()).scan()?;

        let searcher = block_in_place(|| {
            Searcher::load(
                &opts.conf_dir.index(),
                &opts.conf_dir.mapping(),
                self.embedder.dimension,
                opts.acceleration,
            )
        })?;
        let model = self.embedder.model_file(&opts.conf_dir);
        let dimension = searcher.index().dimension();
        let embedder =
            block_in_place(|| VitEmbedder::open(&model, dimension, opts.acceleration))?;

        let (dispatcher, mut outcomes) =
            QueryDispatcher::new(Arc::new(embedder), Arc::new(searcher));
        info!("{}", dispatcher.searcher().status());
        info!("推理执行环境: {}", dispatcher.embedder().context());
        println!("{HELP}");

        let mut count = self.search.count;
        let mut lines = BufReader::new(stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match parse_line(&line) {
                        Command::Query(path) => {
                            let ticket = dispatcher.submit(QueryImage::Path(path), count);
                            info!("查询 #{} 已提交", ticket.0);
                        }
                        Command::Count(n) => count = n,
                        Command::Status => println!("{}", dispatcher.searcher().status()),
                        Command::Cancel => dispatcher.cancel(),
                        Command::Help => println!("{HELP}"),
                        Command::Quit => break,
                        Command::Empty => {}
                        Command::Unknown(s) => println!("未知命令: {s}，输入 :help 查看帮助"),
                    }
                }
                Some(outcome) = dispatcher.next_outcome(&mut outcomes) => {
                    match outcome.result {
                        Ok(hits) => {
                            println!("查询 #{} 用时 {:.3}s", outcome.ticket.0, outcome.elapsed.as_secs_f32());
                            if hits.is_empty() {
                                println!("没有结果");
                            }
                            print_result(&hits, OutputFormat::Table)?;
                        }
                        Err(e) => error!("查询 #{} 失败: {e}", outcome.ticket.0),
                    }
                }
            }
        }
        dispatcher.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_map_to_commands() {
        assert_eq!(parse_line("  a/b.png "), Command::Query(PathBuf::from("a/b.png")));
        assert_eq!(parse_line(":status"), Command::Status);
        assert_eq!(parse_line(":k 12"), Command::Count(12));
        assert_eq!(parse_line(":q"), Command::Quit);
        assert_eq!(parse_line(""), Command::Empty);
        assert!(matches!(parse_line(":k 0"), Command::Unknown(_)));
        assert!(matches!(parse_line(":nope"), Command::Unknown(_)));
    }
}
