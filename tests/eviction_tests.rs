//! Integration tests for the direction-biased eviction policy.

use std::path::Path;
use std::time::Instant;

use photo_preload::cache::evictor::Evictor;
use photo_preload::cache::{BidirectionalCache, CacheEntry, DirectionTag, NavigationDirection};
use photo_preload::decode::DecodedImage;

fn make_entry(name: &str, tag: DirectionTag, tick: u64) -> CacheEntry {
    CacheEntry::new(
        Path::new(name).into(),
        DecodedImage::new(vec![0u8; 100], 1, 1),
        tag,
        Instant::now(),
        tick,
    )
}

fn names<'a>(victims: impl Iterator<Item = &'a std::sync::Arc<Path>>) -> Vec<String> {
    victims.map(|p| p.display().to_string()).collect()
}

#[test]
fn test_backward_navigation_keeps_backward_entries() {
    let evictor = Evictor::new();
    let entries = vec![
        make_entry("fwd-old", DirectionTag::Forward, 1),
        make_entry("back-old", DirectionTag::Backward, 2),
        make_entry("fwd-new", DirectionTag::Forward, 3),
        make_entry("neutral", DirectionTag::Neutral, 4),
    ];

    let victims = evictor.select_victims(entries.iter(), NavigationDirection::Backward, 300, &[]);
    assert_eq!(
        names(victims.iter().map(|v| &v.path)),
        vec!["fwd-old", "fwd-new", "neutral"]
    );
}

#[test]
fn test_idle_ignores_tags() {
    let evictor = Evictor::new();
    let entries = vec![
        make_entry("c", DirectionTag::Neutral, 30),
        make_entry("a", DirectionTag::Forward, 10),
        make_entry("b", DirectionTag::Backward, 20),
    ];

    let victims = evictor.select_victims(entries.iter(), NavigationDirection::Idle, 300, &[]);
    assert_eq!(names(victims.iter().map(|v| &v.path)), vec!["a", "b", "c"]);
}

#[test]
fn test_untouched_entries_leave_in_insertion_order() {
    let mut cache = BidirectionalCache::new(500);
    cache.set_navigation(NavigationDirection::Forward);
    for name in ["first", "second", "third", "fourth", "fifth"] {
        cache
            .put(
                Path::new(name).into(),
                DecodedImage::new(vec![0u8; 100], 1, 1),
                DirectionTag::Forward,
                Instant::now(),
            )
            .unwrap();
    }

    let report = cache.evict_to_target(300).unwrap();
    assert_eq!(names(report.evicted.iter()), vec!["first", "second"]);
}

#[test]
fn test_reversal_sacrifices_old_direction_first() {
    let mut cache = BidirectionalCache::new(1000);
    cache.set_navigation(NavigationDirection::Forward);
    for i in 0..5 {
        cache
            .put(
                Path::new(&format!("ahead-{i}")).into(),
                DecodedImage::new(vec![0u8; 100], 1, 1),
                DirectionTag::Forward,
                Instant::now(),
            )
            .unwrap();
    }

    cache.set_navigation(NavigationDirection::Backward);
    for i in 0..3 {
        cache
            .put(
                Path::new(&format!("behind-{i}")).into(),
                DecodedImage::new(vec![0u8; 100], 1, 1),
                DirectionTag::Backward,
                Instant::now(),
            )
            .unwrap();
    }

    let report = cache.evict_to_target(300).unwrap();
    assert_eq!(report.evicted.len(), 5);
    for i in 0..3 {
        assert!(cache.contains(Path::new(&format!("behind-{i}"))));
    }
}
