use std::fmt;

use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::config::Acceleration;

/// 实际使用的执行环境，在启动时探测一次后固定下来
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// 单线程 CPU
    Baseline,
    /// 加速环境：推理使用 GPU，搜索使用多线程
    Accelerated,
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Accelerated => write!(f, "accelerated"),
        }
    }
}

/// 为搜索准备线程池
///
/// 只有一个 CPU 核心、关闭加速或线程池创建失败时返回 `None`，此时搜索在调用线程上完成
pub fn probe_search_pool(acceleration: Acceleration) -> Option<ThreadPool> {
    if acceleration == Acceleration::Off {
        debug!("已关闭加速，搜索使用单线程");
        return None;
    }
    let threads = num_cpus::get();
    if threads < 2 {
        debug!("只有 {} 个 CPU 核心，搜索使用单线程", threads);
        return None;
    }
    match ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("vitsearch-search-{i}"))
        .build()
    {
        Ok(pool) => {
            debug!("搜索线程池已创建：{} 个线程", threads);
            Some(pool)
        }
        Err(e) => {
            debug!("创建搜索线程池失败，回退到单线程: {e}");
            None
        }
    }
}
