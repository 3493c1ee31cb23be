use std::sync::Arc;

use crate::cli::server::ServerCommand;
use crate::config::SearchOptions;
use crate::dispatch::QueryDispatcher;

/// 应用状态
pub struct AppState {
    /// 查询调度器，持有模型和索引
    pub dispatcher: QueryDispatcher,
    /// 搜索配置选项
    pub search: SearchOptions,
}

impl AppState {
    /// 创建新的应用状态
    pub fn new(dispatcher: QueryDispatcher, opts: ServerCommand) -> Arc<Self> {
        Arc::new(AppState { dispatcher, search: opts.search })
    }
}
