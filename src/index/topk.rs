use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::{Metric, Neighbor};

/// 堆中的候选项，「更大」表示「更差」，所以堆顶总是当前最差的结果
struct Candidate {
    goodness: f32,
    ordinal: usize,
    score: f32,
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other.goodness.total_cmp(&self.goodness).then(self.ordinal.cmp(&other.ordinal))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// 保留最好的 k 个结果，得分相同时序号小的优先
pub(super) struct TopK {
    heap: BinaryHeap<Candidate>,
    k: usize,
    metric: Metric,
}

impl TopK {
    pub fn new(k: usize, metric: Metric) -> Self {
        Self { heap: BinaryHeap::with_capacity(k.min(1024) + 1), k, metric }
    }

    pub fn push(&mut self, ordinal: usize, score: f32) {
        if self.k == 0 {
            return;
        }
        let candidate = Candidate { goodness: self.metric.goodness(score), ordinal, score };
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    pub fn merge(mut self, other: Self) -> Self {
        for c in other.heap {
            self.push(c.ordinal, c.score);
        }
        self
    }

    /// 按从好到坏的顺序输出
    pub fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| Neighbor { ordinal: c.ordinal as i64, score: c.score })
            .collect()
    }
}
