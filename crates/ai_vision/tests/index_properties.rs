//! Property tests for the flat index

use ai_vision::{DistanceMetric, FlatIndex};
use proptest::prelude::*;

fn vectors(dim: usize) -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(prop::collection::vec(-100.0f32..100.0f32, dim), 1..50)
}

proptest! {
    #[test]
    fn search_returns_at_most_k_sorted(
        data in vectors(4),
        query in prop::collection::vec(-100.0f32..100.0f32, 4),
        k in 1usize..20
    ) {
        let mut index = FlatIndex::new(4, DistanceMetric::SquaredL2).unwrap();
        for v in &data {
            index.add(v).unwrap();
        }
        let hits = index.search(&query, k).unwrap();
        prop_assert_eq!(hits.len(), k.min(data.len()));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].distance <= pair[1].distance);
        }
        for hit in &hits {
            prop_assert!(hit.distance >= 0.0);
            prop_assert!(hit.position < data.len());
        }
    }

    #[test]
    fn first_hit_is_global_minimum(
        data in vectors(3),
        query in prop::collection::vec(-100.0f32..100.0f32, 3)
    ) {
        let mut index = FlatIndex::new(3, DistanceMetric::L2).unwrap();
        for v in &data {
            index.add(v).unwrap();
        }
        let all = index.search(&query, data.len()).unwrap();
        let best = index.search(&query, 1).unwrap();
        prop_assert_eq!(best[0], all[0]);
    }

    #[test]
    fn file_encoding_is_lossless(data in vectors(5)) {
        let mut index = FlatIndex::new(5, DistanceMetric::SquaredL2).unwrap();
        for v in &data {
            index.add(v).unwrap();
        }
        let mut bytes = Vec::new();
        index.write_to(&mut bytes).unwrap();
        let decoded = FlatIndex::read_from(bytes.as_slice()).unwrap();
        prop_assert_eq!(decoded, index);
    }
}
