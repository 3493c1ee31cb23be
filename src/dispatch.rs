use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::mpsc::{Receiver, Sender, channel};
use tokio::task::spawn_blocking;

use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::metrics;
use crate::searcher::{SearchHit, Searcher};

/// 查询用的图片，可以是文件也可以是上传的数据
#[derive(Debug, Clone)]
pub enum QueryImage {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

impl From<PathBuf> for QueryImage {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

/// 取消标记，由新查询或显式取消设置
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// 提交查询时返回的编号，编号递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueryTicket(pub u64);

/// 已完成查询的结果
#[derive(Debug)]
pub struct QueryOutcome {
    pub ticket: QueryTicket,
    pub result: Result<Vec<SearchHit>>,
    pub elapsed: Duration,
}

/// 查询调度器：持有特征提取器和搜索器，把「提取 + 搜索」放到阻塞线程中执行
///
/// 通过 [`QueryDispatcher::submit`] 提交的查询会取代之前未完成的查询，
/// 被取代的查询不会再投递结果。[`QueryDispatcher::query`] 则用于一次性的请求。
pub struct QueryDispatcher {
    embedder: Arc<dyn Embedder>,
    searcher: Arc<Searcher>,
    generation: AtomicU64,
    current: Mutex<Option<(QueryTicket, CancelToken)>>,
    tx: Sender<QueryOutcome>,
}

impl QueryDispatcher {
    /// 创建调度器，返回值中的接收端用于获取 `submit` 的结果
    pub fn new(
        embedder: Arc<dyn Embedder>,
        searcher: Arc<Searcher>,
    ) -> (Self, Receiver<QueryOutcome>) {
        let (tx, rx) = channel(8);
        let dispatcher = Self {
            embedder,
            searcher,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
            tx,
        };
        (dispatcher, rx)
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn embedder(&self) -> &dyn Embedder {
        &*self.embedder
    }

    /// 提交一个新查询，并放弃之前尚未完成的查询
    ///
    /// 放弃是尽力而为的：已经开始的特征提取不会被打断，只是其结果会被丢弃
    pub fn submit(&self, image: impl Into<QueryImage>, k: usize) -> QueryTicket {
        let ticket = QueryTicket(self.generation.fetch_add(1, Ordering::AcqRel) + 1);
        let token = CancelToken::new();
        let previous = self
            .current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace((ticket, token.clone()));
        if let Some((_, previous)) = previous {
            previous.cancel();
        }

        let image = image.into();
        let embedder = self.embedder.clone();
        let searcher = self.searcher.clone();
        let tx = self.tx.clone();
        spawn_blocking(move || {
            let start = Instant::now();
            let result = execute(&*embedder, &searcher, &image, k, &token);
            if token.is_cancelled() || matches!(result, Err(Error::Cancelled)) {
                debug!("丢弃已被取代的查询 {}", ticket.0);
                return;
            }
            // 接收端关闭说明前端已经退出，结果直接丢弃即可
            let _ = tx.blocking_send(QueryOutcome { ticket, result, elapsed: start.elapsed() });
        });
        ticket
    }

    /// 放弃当前未完成的查询
    pub fn cancel(&self) {
        if let Some((_, token)) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take()
        {
            token.cancel();
        }
    }

    /// 该编号是否仍是最近一次提交且未被取消的查询
    pub fn is_current(&self, ticket: QueryTicket) -> bool {
        matches!(
            &*self.current.lock().unwrap_or_else(PoisonError::into_inner),
            Some((current, _)) if *current == ticket
        )
    }

    /// 等待下一个仍然有效的结果
    ///
    /// 工作线程检查取消标记之后、发送结果之前仍可能被取代，这类迟到的结果在这里丢弃
    pub async fn next_outcome(&self, rx: &mut Receiver<QueryOutcome>) -> Option<QueryOutcome> {
        while let Some(outcome) = rx.recv().await {
            if self.is_current(outcome.ticket) {
                return Some(outcome);
            }
            debug!("丢弃过期的查询结果 {}", outcome.ticket.0);
        }
        None
    }

    /// 执行一次查询并等待结果，不影响 `submit` 提交的查询
    pub async fn query(&self, image: QueryImage, k: usize) -> Result<Vec<SearchHit>> {
        let embedder = self.embedder.clone();
        let searcher = self.searcher.clone();
        spawn_blocking(move || execute(&*embedder, &searcher, &image, k, &CancelToken::new()))
            .await
            .map_err(|e| Error::Task(e.to_string()))?
    }
}

/// 提取查询图片的特征并搜索
///
/// 特征提取完成后检查一次取消标记，已取消的查询不再搜索
pub fn execute(
    embedder: &dyn Embedder,
    searcher: &Searcher,
    image: &QueryImage,
    k: usize,
    token: &CancelToken,
) -> Result<Vec<SearchHit>> {
    let start = Instant::now();
    let vector = match image {
        QueryImage::Path(path) => embedder.extract(path)?,
        QueryImage::Bytes(bytes) => embedder.extract_bytes(bytes)?,
    };
    if token.is_cancelled() {
        return Err(Error::Cancelled);
    }
    let hits = searcher.search(&vector, k)?;

    metrics::observe_search(searcher.context(), start.elapsed().as_secs_f32());
    if let Some(top) = hits.first() {
        metrics::observe_top_score(searcher.index().metric(), top.score);
    }
    debug!("查询耗时: {:.3}s", start.elapsed().as_secs_f32());
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use image::DynamicImage;

    use super::*;
    use crate::config::Acceleration;
    use crate::embedder::EmbeddingVector;
    use crate::index::{FlatIndex, IndexArtifact, Metric};

    /// 第一次调用时通知测试，然后阻塞直到测试放行
    struct GatedEmbedder {
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl GatedEmbedder {
        fn open() -> Self {
            Self { gate: Mutex::new(None) }
        }
    }

    impl Embedder for GatedEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn embed_image(&self, _image: &DynamicImage) -> Result<EmbeddingVector> {
            unreachable!()
        }

        fn extract_bytes(&self, bytes: &[u8]) -> Result<EmbeddingVector> {
            let gate = self.gate.lock().unwrap().take();
            if let Some((started, release)) = gate {
                started.send(()).unwrap();
                release.recv().unwrap();
            }
            EmbeddingVector::normalized(vec![bytes[0] as f32, bytes[1] as f32])
        }
    }

    fn searcher() -> Arc<Searcher> {
        let mut index = FlatIndex::new(2, Metric::InnerProduct).unwrap();
        index.insert(&[[1.0, 0.0], [0.0, 1.0]]).unwrap();
        let artifact = IndexArtifact::new(index, vec!["x.png".into(), "y.png".into()]).unwrap();
        Arc::new(Searcher::new(artifact, Acceleration::Off))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn newer_query_supersedes_older() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let embedder = Arc::new(GatedEmbedder { gate: Mutex::new(Some((started_tx, release_rx))) });
        let (dispatcher, mut rx) = QueryDispatcher::new(embedder, searcher());

        let stale = dispatcher.submit(QueryImage::Bytes(vec![1, 0]), 1);
        // 等待第一个查询进入特征提取
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        let fresh = dispatcher.submit(QueryImage::Bytes(vec![0, 1]), 1);
        release_tx.send(()).unwrap();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(outcome.ticket, fresh);
        assert!(stale < fresh);
        assert_eq!(outcome.result.unwrap()[0].path, "y.png");

        drop(dispatcher);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn query_returns_hits_directly() {
        let embedder = Arc::new(GatedEmbedder::open());
        let (dispatcher, _rx) = QueryDispatcher::new(embedder, searcher());
        let hits = dispatcher.query(QueryImage::Bytes(vec![3, 0]), 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].path, "x.png");
        assert!((hits[0].score - 1.0).abs() < 1e-5);
    }

    fn late_outcome(ticket: QueryTicket) -> QueryOutcome {
        QueryOutcome { ticket, result: Ok(vec![]), elapsed: Duration::ZERO }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn late_outcome_of_superseded_query_is_dropped() {
        let (dispatcher, mut rx) = QueryDispatcher::new(Arc::new(GatedEmbedder::open()), searcher());

        let stale = dispatcher.submit(QueryImage::Bytes(vec![1, 0]), 1);
        let fresh = dispatcher.submit(QueryImage::Bytes(vec![0, 1]), 1);
        // 模拟旧查询在取消检查之后才发送结果
        dispatcher.tx.send(late_outcome(stale)).await.unwrap();

        let outcome = dispatcher.next_outcome(&mut rx).await.unwrap();
        assert_eq!(outcome.ticket, fresh);
        assert_eq!(outcome.result.unwrap()[0].path, "y.png");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancel_after_extraction_delivers_nothing() {
        let (dispatcher, mut rx) = QueryDispatcher::new(Arc::new(GatedEmbedder::open()), searcher());

        let cancelled = dispatcher.submit(QueryImage::Bytes(vec![1, 0]), 1);
        assert!(dispatcher.is_current(cancelled));
        dispatcher.cancel();
        assert!(!dispatcher.is_current(cancelled));
        dispatcher.tx.send(late_outcome(cancelled)).await.unwrap();

        // 之后唯一能收到的结果是新的查询
        let next = dispatcher.submit(QueryImage::Bytes(vec![0, 1]), 1);
        let outcome = dispatcher.next_outcome(&mut rx).await.unwrap();
        assert_eq!(outcome.ticket, next);
        assert_ne!(outcome.ticket, cancelled);
    }

    #[test]
    fn cancelled_token_skips_search() {
        let embedder = GatedEmbedder::open();
        let token = CancelToken::new();
        token.cancel();
        let result = execute(&embedder, &searcher(), &QueryImage::Bytes(vec![1, 1]), 1, &token);
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
