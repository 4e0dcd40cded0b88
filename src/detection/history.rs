//! Bounded detection history, newest first

use super::DetectionResult;
use std::collections::VecDeque;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub label: String,
    pub confidence: f32,
    pub at: SystemTime,
}

impl HistoryEntry {
    /// Whole-percent confidence, e.g. `92%`
    pub fn confidence_text(&self) -> String {
        format!("{}%", (self.confidence * 100.0).round() as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectionHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl DetectionHistory {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            entries: VecDeque::with_capacity(limit + 1),
            limit,
        }
    }

    /// Insert at position 0, evicting the oldest entries beyond the limit
    pub fn push(&mut self, result: &DetectionResult, at: SystemTime) {
        self.entries.push_front(HistoryEntry {
            label: result.label.clone(),
            confidence: result.confidence,
            at,
        });
        self.entries.truncate(self.limit);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn get(&self, index: usize) -> Option<&HistoryEntry> {
        self.entries.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for DetectionHistory {
    fn default() -> Self {
        Self::new(10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(label: &str) -> DetectionResult {
        DetectionResult {
            label: label.to_string(),
            confidence: 0.5,
        }
    }

    #[test]
    fn never_exceeds_limit_and_evicts_oldest() {
        let mut history = DetectionHistory::new(10);
        for i in 0..15 {
            history.push(&result(&format!("L{}", i)), SystemTime::now());
            assert!(history.len() <= 10);
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.get(0).unwrap().label, "L14");
        assert_eq!(history.get(9).unwrap().label, "L5");
        assert!(history.iter().all(|e| e.label != "L4"));
    }

    #[test]
    fn newest_entry_is_first() {
        let mut history = DetectionHistory::default();
        history.push(&result("A"), SystemTime::now());
        history.push(&result("B"), SystemTime::now());
        let labels: Vec<_> = history.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, vec!["B", "A"]);
    }

    #[test]
    fn confidence_is_rounded_to_whole_percent() {
        let entry = HistoryEntry {
            label: "HELLO".to_string(),
            confidence: 0.926,
            at: SystemTime::now(),
        };
        assert_eq!(entry.confidence_text(), "93%");
    }
}
