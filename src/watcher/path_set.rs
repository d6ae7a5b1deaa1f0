//! 已监听路径集合

use std::collections::HashSet;

use parking_lot::Mutex;

/// 线程安全的路径集合，`insert` 是原子的检查并插入
#[derive(Debug, Default)]
pub struct PathSet {
    paths: Mutex<HashSet<String>>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入路径，已存在时返回 `false`
    pub fn insert(&self, path: &str) -> bool {
        let mut paths = self.paths.lock();
        if paths.contains(path) {
            return false;
        }
        paths.insert(path.to_string())
    }

    pub fn remove(&self, path: &str) -> bool {
        self.paths.lock().remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// 排序后的路径快照
    pub fn snapshot(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.paths.lock().iter().cloned().collect();
        paths.sort();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_insert_is_exclusive() {
        let set = PathSet::new();
        assert!(set.insert("/a"));
        assert!(!set.insert("/a"));
        assert!(set.contains("/a"));
        assert!(set.remove("/a"));
        assert!(!set.remove("/a"));
        assert!(set.insert("/a"));
    }

    #[test]
    fn test_concurrent_insert_single_winner() {
        let set = Arc::new(PathSet::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let set = Arc::clone(&set);
                std::thread::spawn(move || set.insert("/root/svc"))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(set.snapshot(), vec!["/root/svc".to_string()]);
    }
}
