use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{EmbedderOptions, SearchOptions};
use crate::dispatch::QueryDispatcher;
use crate::{Opts, Searcher, VitEmbedder, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub embedder: EmbedderOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
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

        // HTTP 请求之间互不取代，只使用一次性查询
        let (dispatcher, _) = QueryDispatcher::new(Arc::new(embedder), Arc::new(searcher));

        // 创建应用状态
        let state = server::AppState::new(dispatcher, self.clone());

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
