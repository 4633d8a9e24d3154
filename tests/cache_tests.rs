//! Integration tests for the decoded image cache.

use std::path::Path;
use std::time::Instant;

use photo_preload::cache::{
    BidirectionalCache, BudgetPolicy, CacheError, DirectionTag, NavigationDirection, PutOutcome,
};
use photo_preload::decode::{DecodedImage, ImagePath};
use photo_preload::monitor::MemoryPressureLevel;

const MB: usize = 1024 * 1024;

fn path(name: &str) -> ImagePath {
    Path::new(name).into()
}

fn image(size: usize) -> DecodedImage {
    DecodedImage::new(vec![0u8; size], 1, 1)
}

fn assert_within_budget(cache: &BidirectionalCache) {
    assert!(
        cache.total_bytes() <= cache.budget(),
        "total {} exceeds budget {}",
        cache.total_bytes(),
        cache.budget()
    );
}

#[test]
fn test_forward_paging_evicts_oldest() {
    let mut cache = BidirectionalCache::new(100 * MB);
    cache.set_navigation(NavigationDirection::Forward);

    for name in ["img-1", "img-2", "img-3"] {
        cache
            .put(path(name), image(40 * MB), DirectionTag::Forward, Instant::now())
            .unwrap();
        assert_within_budget(&cache);
    }

    assert!(!cache.contains(Path::new("img-1")));
    assert!(cache.contains(Path::new("img-2")));
    assert!(cache.contains(Path::new("img-3")));
    assert_eq!(cache.total_bytes(), 80 * MB);
    assert_eq!(cache.stats().evictions, 1);
}

#[test]
fn test_budget_holds_across_mixed_workload() {
    let mut cache = BidirectionalCache::new(1000);
    let sizes = [120, 340, 75, 500, 60, 260, 410, 90, 330, 150];
    let tags = [DirectionTag::Forward, DirectionTag::Backward, DirectionTag::Neutral];

    for (i, size) in sizes.iter().enumerate() {
        let direction = if i % 4 == 0 {
            NavigationDirection::Backward
        } else {
            NavigationDirection::Forward
        };
        cache.set_navigation(direction);
        let name = format!("img-{}", i % 6);
        cache
            .put(path(&name), image(*size), tags[i % 3], Instant::now())
            .unwrap();
        assert_within_budget(&cache);
        if i == 3 {
            cache.set_budget(600).unwrap();
            assert_within_budget(&cache);
        }
    }

    // One entry per path, and the byte total matches the entries.
    let mut seen = std::collections::HashSet::new();
    for p in cache.paths() {
        assert!(seen.insert(p.clone()));
    }
    assert!(cache.check_invariants().is_ok());
}

#[test]
fn test_displayed_survives_budget_collapse() {
    let mut cache = BidirectionalCache::new(1000);
    cache.set_navigation(NavigationDirection::Forward);
    cache
        .put(path("shown"), image(400), DirectionTag::Backward, Instant::now())
        .unwrap();
    cache
        .put(path("next"), image(400), DirectionTag::Forward, Instant::now())
        .unwrap();
    cache.set_displayed(Some(path("shown"))).unwrap();

    let report = cache.set_budget(100).unwrap();
    assert_eq!(report.evicted.len(), 1);
    assert!(cache.contains(Path::new("shown")));
    assert_eq!(cache.budget(), 400);
    assert_within_budget(&cache);
}

#[test]
fn test_late_prefetch_loses_to_newer_decode() {
    let mut cache = BidirectionalCache::new(1000);
    let prefetch_started = Instant::now();
    let request_started = prefetch_started + std::time::Duration::from_millis(10);

    // The request path finished first with the newer decode.
    cache
        .put(path("p"), image(100), DirectionTag::Neutral, request_started)
        .unwrap();
    let outcome = cache
        .put(path("p"), image(100), DirectionTag::Forward, prefetch_started)
        .unwrap();

    assert_eq!(outcome, PutOutcome::Stale);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_oversized_entry_refused() {
    let mut cache = BidirectionalCache::new(10 * MB);
    let err = cache
        .put(path("panorama"), image(11 * MB), DirectionTag::Forward, Instant::now())
        .unwrap_err();
    assert!(matches!(err, CacheError::EntryTooLarge { .. }));
    assert!(cache.is_empty());
}

#[test]
fn test_budget_policy_drives_cache() {
    let policy = BudgetPolicy::new(100 * MB, 20 * MB, 0.75, 0.5);
    let mut cache = BidirectionalCache::new(policy.budget_for(MemoryPressureLevel::Low));
    for i in 0..10 {
        cache
            .put(path(&format!("img-{i}")), image(10 * MB), DirectionTag::Forward, Instant::now())
            .unwrap();
    }
    assert_eq!(cache.len(), 10);

    for level in MemoryPressureLevel::ALL {
        cache.set_budget(policy.budget_for(level)).unwrap();
        assert_within_budget(&cache);
    }
    assert_eq!(cache.len(), 2);
}
