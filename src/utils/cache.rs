//! 请求级缓存：LRU + TTL
//!
//! Mutex 保护的内存缓存；get 时惰性过期，写满时淘汰最久未访问条目。
//! 键由调用方负责规范化（编排器用小写去空白后的问题文本）。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    last_access: Instant,
}

/// LRU+TTL 缓存；V 需 Clone（命中时返回副本，避免持锁跨 await）
pub struct RequestCache<V> {
    inner: Mutex<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    max_size: usize,
}

impl<V: Clone> RequestCache<V> {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            ttl,
            max_size: max_size.max(1),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().expect("cache lock poisoned");
        let now = Instant::now();
        match guard.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.last_access = now;
                Some(entry.value.clone())
            }
            Some(_) => {
                guard.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        let mut guard = self.inner.lock().expect("cache lock poisoned");
        let now = Instant::now();
        if guard.len() >= self.max_size {
            // 淘汰最久未访问的条目
            if let Some(oldest) = guard
                .iter()
                .min_by_key(|(_, e)| e.last_access)
                .map(|(k, _)| k.clone())
            {
                guard.remove(&oldest);
            }
        }
        guard.insert(
            key.into(),
            CacheEntry {
                value,
                expires_at: now + self.ttl,
                last_access: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_and_miss() {
        let cache = RequestCache::new(Duration::from_secs(60), 10);
        cache.set("q1", "a1".to_string());
        assert_eq!(cache.get("q1").as_deref(), Some("a1"));
        assert!(cache.get("q2").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = RequestCache::new(Duration::from_millis(0), 10);
        cache.set("q1", 1u32);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("q1").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = RequestCache::new(Duration::from_secs(60), 2);
        cache.set("a", 1u32);
        std::thread::sleep(Duration::from_millis(2));
        cache.set("b", 2u32);
        std::thread::sleep(Duration::from_millis(2));
        // 访问 a，使 b 成为最久未访问
        cache.get("a");
        std::thread::sleep(Duration::from_millis(2));
        cache.set("c", 3u32);
        assert_eq!(cache.len(), 2);
        assert!(cache.get("b").is_none());
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
    }
}
