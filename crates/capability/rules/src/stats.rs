//! 统计工具：有界历史队列与基础统计量。

use std::collections::VecDeque;

/// 历史队列默认容量。
pub const HISTORY_CAPACITY: usize = 10;

/// 有界历史队列（满后淘汰最旧值）。
#[derive(Debug, Clone)]
pub struct ValueHistory {
    values: VecDeque<f64>,
    capacity: usize,
}

impl ValueHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn mean(&self) -> Option<f64> {
        mean(self.values.iter().copied())
    }

    pub fn population_std(&self) -> Option<f64> {
        population_std(self.values.iter().copied())
    }

    /// 相对均值的偏离比例 `|x - mean| / |mean|`；均值为 0 时返回 `None`。
    pub fn relative_deviation(&self, value: f64) -> Option<f64> {
        let mean = self.mean()?;
        if mean.abs() < f64::EPSILON {
            return None;
        }
        Some((value - mean).abs() / mean.abs())
    }
}

impl Default for ValueHistory {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

pub fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// 总体标准差（除以 n）。
pub fn population_std(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.into_iter().collect();
    let mean = mean(values.iter().copied())?;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// 样本标准差（除以 n - 1）；少于两个样本时为 0。
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let Some(mean) = mean(values.iter().copied()) else {
        return 0.0;
    };
    let variance = values.iter().map(|value| (value - mean).powi(2)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// 变异系数 `std / |mean|`；均值为 0 时为 0。
pub fn coefficient_of_variation(std: f64, mean: f64) -> f64 {
    if mean.abs() < f64::EPSILON {
        0.0
    } else {
        std / mean.abs()
    }
}

/// 首末两点的每小时变化率；时间跨度不足 0.01 小时视为 0。
pub fn slope_per_hour(first: (u64, f64), last: (u64, f64)) -> f64 {
    let hours = (last.0 as f64 - first.0 as f64) / 3600.0;
    if hours < 0.01 {
        return 0.0;
    }
    (last.1 - first.1) / hours
}

/// 序列是否严格递增。
pub fn strictly_rising(values: &[f64]) -> bool {
    values.windows(2).all(|pair| pair[1] > pair[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_evicts_oldest() {
        let mut history = ValueHistory::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            history.push(value);
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.mean(), Some(3.0));
    }

    #[test]
    fn std_variants() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(population_std(values), Some(2.0));
        assert!((sample_std(&values) - 2.138).abs() < 1e-3);
        assert_eq!(sample_std(&[1.0]), 0.0);
        assert_eq!(population_std(std::iter::empty()), None);
    }

    #[test]
    fn slope_ignores_short_spans() {
        assert_eq!(slope_per_hour((0, 20.0), (30, 40.0)), 0.0);
        assert_eq!(slope_per_hour((0, 20.0), (7200, 40.0)), 10.0);
    }

    #[test]
    fn relative_deviation_requires_nonzero_mean() {
        let mut history = ValueHistory::default();
        assert_eq!(history.relative_deviation(1.0), None);
        history.push(100.0);
        assert_eq!(history.relative_deviation(150.0), Some(0.5));
        assert!(strictly_rising(&[1.0, 2.0, 3.0]));
        assert!(!strictly_rising(&[1.0, 1.0, 3.0]));
    }
}
