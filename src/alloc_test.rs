use super::*;

#[test]
fn test_tail_carve_updates_free_tail_length() {
    let mut alloc = Allocator::new(1000, 200, false);
    let (offset, len) = alloc.request(50).unwrap();
    assert_eq!(offset, 800);
    assert_eq!(len, 50);
    assert_eq!(alloc.free_tail_length(), 150);
    assert_eq!(alloc.total_length(), 1000);
}

#[test]
fn test_no_space_without_auto_grow() {
    let mut alloc = Allocator::new(1000, 10, false);
    assert!(matches!(alloc.request(50), Err(Error::NoSpace(_))));
}

#[test]
fn test_auto_grow_extends_total_length() {
    let mut alloc = Allocator::new(1000, 10, true);
    let (offset, len) = alloc.request(50).unwrap();
    assert_eq!(offset, 1000);
    assert_eq!(len, 50);
    assert_eq!(alloc.total_length(), 1040);
    assert_eq!(alloc.free_tail_length(), 0);
}

#[test]
fn test_release_contiguous_with_tail_extends_it() {
    let mut alloc = Allocator::new(1000, 0, false);
    alloc.release(1000, 100);
    assert_eq!(alloc.total_length(), 1000);
    assert_eq!(alloc.free_tail_length(), 100);
    assert!(alloc.reclaimed_regions().is_empty());
}

#[test]
fn test_release_non_contiguous_goes_to_reclaimed_list() {
    let mut alloc = Allocator::new(1000, 0, false);
    alloc.release(200, 50);
    assert_eq!(alloc.reclaimed_regions(), &[(200, 50)]);
}

#[test]
fn test_best_fit_prefers_smallest_sufficient_region() {
    let mut alloc = Allocator::new(1000, 0, false);
    alloc.release(0, 200);
    alloc.release(300, 80);
    let (offset, len) = alloc.request(50).unwrap();
    assert_eq!((offset, len), (300, 80));
    assert_eq!(alloc.reclaimed_regions(), &[(0, 200)]);
}

#[test]
fn test_rebuild_required_trip_at_half_reclaimed() {
    let mut alloc = Allocator::new(1000, 0, false);
    alloc.release(0, 600);
    match alloc.request(10) {
        Err(Error::RebuildRequired(_)) => {}
        other => panic!("expected RebuildRequired, got {:?}", other),
    }
}
