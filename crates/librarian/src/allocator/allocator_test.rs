//! Unit tests for the allocator primitives

#[cfg(test)]
mod tests {
    use super::super::*;

    fn known<V: Clone>(pairs: &[(&str, V)]) -> BTreeMap<String, V> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    fn updates(keys: &[&str]) -> BTreeMap<String, bool> {
        keys.iter().map(|k| ((*k).to_string(), true)).collect()
    }

    #[test]
    fn test_vni_allocation_with_stride() {
        let mut alloc = NextFreeValueFromRanges::<u32>::new(&[(100, 16_777_100)], 100).unwrap();
        let result = allocate(&mut alloc, &BTreeMap::new(), &updates(&["a", "b", "c"])).unwrap();
        assert_eq!(result, known(&[("a", 100), ("b", 200), ("c", 300)]));

        // b deleted, d created: d takes the freed value
        let mut alloc = NextFreeValueFromRanges::<u32>::new(&[(100, 16_777_100)], 100).unwrap();
        let result = allocate(&mut alloc, &result, &updates(&["a", "c", "d"])).unwrap();
        assert_eq!(result, known(&[("a", 100), ("c", 300), ("d", 200)]));
    }

    #[test]
    fn test_multiple_ranges() {
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(1, 2), (5, 5), (10, 12)], 1).unwrap();
        let prior = known(&[("a", 1u16), ("b", 2), ("c", 5)]);
        let result = allocate(&mut alloc, &prior, &updates(&["a", "b", "c", "d"])).unwrap();
        assert_eq!(result, known(&[("a", 1), ("b", 2), ("c", 5), ("d", 10)]));
    }

    #[test]
    fn test_stability_when_everything_is_live() {
        let prior = known(&[("x", 7u16), ("y", 3), ("z", 11)]);
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(1, 20)], 1).unwrap();
        let result = allocate(&mut alloc, &prior, &updates(&["x", "y", "z"])).unwrap();
        assert_eq!(result, prior);

        let prior = known(&[("r1", "E1/1--E1/2".to_string()), ("r2", "E1/3--E1/4".to_string())]);
        let mut alloc = Balanced::new(["E1/1--E1/2".to_string(), "E1/3--E1/4".to_string()]);
        let result = allocate(&mut alloc, &prior, &updates(&["r1", "r2"])).unwrap();
        assert_eq!(result, prior);
    }

    #[test]
    fn test_uniqueness_and_alignment() {
        let mut alloc = NextFreeValueFromRanges::<u32>::new(&[(150, 1000), (2000, 2500)], 100).unwrap();
        let keys: Vec<String> = (0..13).map(|i| format!("k{i:02}")).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        let result = allocate(&mut alloc, &BTreeMap::new(), &updates(&keys)).unwrap();

        let values: HashSet<u32> = result.values().copied().collect();
        assert_eq!(values.len(), result.len());
        for v in result.values() {
            assert_eq!(v % 100, 0, "value {v} is not stride aligned");
            assert!((150..=1000).contains(v) || (2000..=2500).contains(v));
        }
        assert_eq!(result["k00"], 200);
        assert_eq!(result["k09"], 2000);
    }

    #[test]
    fn test_exhaustion_fails_whole_call() {
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(1, 3)], 1).unwrap();
        let result = allocate(&mut alloc, &BTreeMap::new(), &updates(&["a", "b", "c", "d"]));
        assert_eq!(result, Err(AllocatorError::Exhausted));
    }

    #[test]
    fn test_prior_value_outside_pool_fails() {
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(1, 3)], 1).unwrap();
        let result = allocate(&mut alloc, &known(&[("a", 9u16)]), &updates(&["a"]));
        assert_eq!(result, Err(AllocatorError::OutOfPool("9".to_string())));
    }

    #[test]
    fn test_dead_keys_are_dropped() {
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(1, 10)], 1).unwrap();
        let prior = known(&[("a", 1u16), ("b", 2)]);
        let mut upd = updates(&["a"]);
        upd.insert("b".to_string(), false);
        let result = allocate(&mut alloc, &prior, &upd).unwrap();
        assert_eq!(result, known(&[("a", 1)]));
    }

    #[test]
    fn test_invalid_range() {
        assert!(NextFreeValueFromRanges::<u16>::new(&[(5, 1)], 1).is_err());
        assert!(NextFreeValueFromRanges::<u16>::new(&[(1, 5)], 0).is_err());
    }

    #[test]
    fn test_u16_upper_bound() {
        let mut alloc = NextFreeValueFromRanges::<u16>::new(&[(u16::MAX - 1, u16::MAX)], 1).unwrap();
        assert_eq!(alloc.next().unwrap(), u16::MAX - 1);
        assert_eq!(alloc.next().unwrap(), u16::MAX);
        assert_eq!(alloc.next(), Err(AllocatorError::Exhausted));
    }

    #[test]
    fn test_balanced_spreads_evenly() {
        let links = ["l1".to_string(), "l2".to_string(), "l3".to_string()];
        let mut alloc = Balanced::new(links.clone());
        let keys: Vec<String> = (0..9).map(|i| format!("req{i}")).collect();
        let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
        allocate(&mut alloc, &BTreeMap::new(), &updates(&keys)).unwrap();

        let counts: Vec<usize> = links.iter().filter_map(|l| alloc.usage(l)).collect();
        let max = counts.iter().max().copied().unwrap_or(0);
        let min = counts.iter().min().copied().unwrap_or(0);
        assert!(max - min <= 1, "counts {counts:?} are not balanced");
    }

    #[test]
    fn test_balanced_allows_duplicates_and_reuses_released() {
        let mut alloc = Balanced::new(["l1".to_string(), "l2".to_string()]);
        let prior = known(&[("a", "l1".to_string()), ("b", "l1".to_string()), ("c", "l2".to_string())]);
        let mut upd = updates(&["a", "b", "d"]);
        upd.insert("c".to_string(), false);
        let result = allocate(&mut alloc, &prior, &upd).unwrap();
        assert_eq!(result["a"], "l1");
        assert_eq!(result["b"], "l1");
        assert_eq!(result["d"], "l2");
    }

    #[test]
    fn test_balanced_errors() {
        let mut empty: Balanced<String> = Balanced::new(Vec::new());
        assert_eq!(empty.next(), Err(AllocatorError::EmptyCandidateSet));
        assert!(allocate(&mut empty, &BTreeMap::new(), &BTreeMap::new()).unwrap().is_empty());

        let mut alloc = Balanced::new(["l1".to_string()]);
        assert!(alloc.add(&"l9".to_string()).is_err());
        alloc.remove(&"l1".to_string());
        assert_eq!(alloc.usage(&"l1".to_string()), Some(0));
    }
}
