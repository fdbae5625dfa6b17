use hnsw_graph::*;
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::collections::BTreeSet;

fn pinned(m: usize, seed: u64) -> HnswConfig {
    HnswConfig {
        m,
        ml: 0.5,
        ef_search: 20,
        seed: Some(seed),
        ..Default::default()
    }
}

fn synthetic(i: u32) -> BinaryString {
    BinaryString::from([
        ((i * 212) % 256) as u8,
        ((i * i * i * 177) % 256) as u8,
        ((i * i * 37) % 256) as u8,
        (((1 + i) * 134) % 256) as u8,
        (i % 256) as u8,
        ((256 - (i * 48) % 256) % 256) as u8,
    ])
}

fn golden_graph() -> Graph<u32, BinaryString> {
    let mut g = Graph::new("golden".to_string(), pinned(6, 0), DistanceMetric::Cosine).unwrap();
    g.add_all((0..128).map(|i| Node::new(i, synthetic(i))))
        .unwrap();
    g
}

#[test]
fn test_golden_scenario() {
    let g = golden_graph();
    assert_eq!(g.analyzer().topography(), vec![128, 67, 39, 18, 9, 6, 3]);
    assert_eq!(g.entry_point(), Some(&30));

    let query = BinaryString::from([16, 72, 244, 8, 53, 18]);
    let hits = g.search(&query, 4).unwrap();
    let keys: Vec<u32> = hits.iter().map(|h| h.key).collect();
    assert_eq!(keys, vec![116, 5, 51, 110]);
    assert!(hits.windows(2).all(|w| w[0].distance < w[1].distance));
    for hit in &hits {
        assert_eq!(g.lookup(&hit.key), Some(&hit.value));
    }

    // the pinned sequence is also the exact top 4
    let mut exact: Vec<(f32, u32)> = (0..128)
        .map(|i| (DistanceMetric::Cosine.distance(&synthetic(i), &query).unwrap(), i))
        .collect();
    exact.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
    let exact: Vec<u32> = exact.iter().take(4).map(|(_, i)| *i).collect();
    assert_eq!(keys, exact);

    // same seed, same parameters, same insertion order: same graph
    let again = golden_graph();
    assert_eq!(again.analyzer().connectivity(), g.analyzer().connectivity());
    let again: Vec<u32> = again.search(&query, 4).unwrap().iter().map(|h| h.key).collect();
    assert_eq!(again, keys);
}

#[test]
fn test_search_ties_break_by_key() {
    let mut g = Graph::new("ties".to_string(), pinned(4, 5), DistanceMetric::Euclidean).unwrap();
    for key in [10u32, 3, 7, 1] {
        g.add(Node::new(key, vec![1.0f32, 1.0])).unwrap();
    }
    let unit = [
        (8u32, [1.0f32, 0.0]),
        (2, [0.0, 1.0]),
        (6, [-1.0, 0.0]),
        (4, [0.0, -1.0]),
    ];
    for (key, v) in unit {
        g.add(Node::new(key, v.to_vec())).unwrap();
    }
    for key in 20..32u32 {
        g.add(Node::new(key, vec![key as f32, 10.0])).unwrap();
    }

    let keys = |hits: Vec<Neighbor<u32, Vec<f32>>>| {
        hits.into_iter()
            .map(|h| (h.key, h.distance))
            .collect::<Vec<_>>()
    };
    assert_eq!(
        keys(g.search(&vec![1.0, 1.0], 4).unwrap()),
        vec![(1, 0.0), (3, 0.0), (7, 0.0), (10, 0.0)]
    );
    assert_eq!(
        keys(g.search(&vec![0.0, 0.0], 4).unwrap()),
        vec![(2, 1.0), (4, 1.0), (6, 1.0), (8, 1.0)]
    );
    assert_eq!(
        keys(g.search(&vec![1.0, 1.0], 6).unwrap()),
        vec![(1, 0.0), (3, 0.0), (7, 0.0), (10, 0.0), (2, 1.0), (8, 1.0)]
    );
}

#[test]
fn test_default_cosine() {
    let mut g = Graph::with_default("cosine".to_string());
    g.add_all([
        Node::new(1, BinaryString::from([1, 1])),
        Node::new(2, BinaryString::from([0, 1])),
        Node::new(3, BinaryString::from([1, 0])),
    ])
    .unwrap();

    let hits = g.search(&BinaryString::from([1, 1]), 1).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].key, 1);
    assert_eq!(hits[0].value, BinaryString::from([1, 1]));
    assert!(hits[0].distance.abs() < 1e-6);
}

#[test]
fn test_len_tracks_distinct_keys() {
    let mut g = Graph::new("len".to_string(), pinned(4, 1), DistanceMetric::Euclidean).unwrap();
    assert_eq!(g.len(), 0);
    assert!(g.is_empty());

    for i in 0..50u32 {
        g.add(Node::new(i, vec![i as f32, (i * 7 % 13) as f32])).unwrap();
    }
    assert_eq!(g.len(), 50);

    for i in 0..10u32 {
        g.add(Node::new(i, vec![-(i as f32), 100.0])).unwrap();
    }
    assert_eq!(g.len(), 50);

    for i in 0..5u32 {
        assert!(g.delete(&i).unwrap());
        assert!(!g.delete(&i).unwrap());
    }
    assert_eq!(g.len(), 45);
    assert_eq!(g.keys().count(), 45);
    assert_eq!(g.analyzer().topography()[0], 45);
}

#[test]
fn test_delete_even_keys_keeps_level0_connected() {
    let mut g = Graph::new("delete".to_string(), pinned(6, 0), DistanceMetric::Euclidean).unwrap();
    for i in 0..128i32 {
        g.add(Node::new(i, vec![(i % 16) as f32, (i / 16) as f32]))
            .unwrap();
    }
    assert_eq!(g.len(), 128);
    let before = g.analyzer().connectivity();
    assert_eq!(before[0], vec![128]);

    for i in (0..128i32).step_by(2) {
        assert!(g.delete(&i).unwrap());
    }
    assert_eq!(g.len(), 64);

    let an = g.analyzer();
    let after = an.connectivity();
    assert_eq!(after[0].len(), before[0].len());
    assert_eq!(after[0], vec![64]);
    assert!(an.mean_degree()[0] >= 1.0);

    assert!(!g.delete(&-1).unwrap());
    assert_eq!(g.len(), 64);

    // every survivor is still reachable from the entry point
    for i in (1..128i32).step_by(2) {
        let v = g.lookup(&i).unwrap().clone();
        let hits = g.search(&v, 1).unwrap();
        assert_eq!(hits[0].distance, 0.0, "{i}");
    }
}

#[test]
fn test_search_small_graph() {
    let mut g = Graph::new("small".to_string(), pinned(4, 2), DistanceMetric::Euclidean).unwrap();
    for i in 0..10u32 {
        g.add(Node::new(i, vec![i as f32, 1.0])).unwrap();
    }

    let hits = g.search(&vec![3.2, 1.0], 25).unwrap();
    assert_eq!(hits.len(), 10);
    assert_eq!(hits[0].key, 3);
    assert_eq!(hits[1].key, 4);
    assert_eq!(
        hits.iter().map(|h| h.key).collect::<BTreeSet<_>>(),
        (0..10).collect::<BTreeSet<_>>()
    );
    assert!(hits.windows(2).all(|w| w[0].distance <= w[1].distance));
}

#[test]
fn test_self_query_recall() {
    let mut rng = StdRng::seed_from_u64(7);
    let config = HnswConfig {
        m: 8,
        ef_search: 32,
        seed: Some(7),
        ..Default::default()
    };
    let mut g = Graph::new("recall".to_string(), config, DistanceMetric::Euclidean).unwrap();
    let points: Vec<Vec<f32>> = (0..500)
        .map(|_| (0..8).map(|_| rng.random::<f32>()).collect())
        .collect();
    for (i, p) in points.iter().enumerate() {
        g.add(Node::new(i, p.clone())).unwrap();
    }

    let found = points
        .iter()
        .enumerate()
        .filter(|(i, p)| {
            let hits = g.search(p, 1).unwrap();
            hits[0].key == *i && hits[0].distance == 0.0
        })
        .count();
    assert!(found >= 480, "{found}");
}

#[test]
fn test_level_distribution() {
    let mut rng = StdRng::seed_from_u64(1);
    let mut g = Graph::new("levels".to_string(), pinned(4, 1), DistanceMetric::Euclidean).unwrap();
    for i in 0..2000u32 {
        g.add(Node::new(i, vec![rng.random::<f32>(), rng.random::<f32>()]))
            .unwrap();
    }

    let an = g.analyzer();
    let topo = an.topography();
    assert_eq!(topo[0], 2000);
    assert!((880..=1120).contains(&topo[1]), "{topo:?}");
    assert!((400..=600).contains(&topo[2]), "{topo:?}");
    assert!(topo.len() <= estimate_max_level(0.5, 2000) + 1, "{topo:?}");
    assert_eq!(an.height(), topo.len());
}

#[test]
fn test_string_keys_and_bf16() {
    use half::bf16;

    let mut g: Graph<String, Vec<bf16>> = Graph::with_default("bf16".to_string());
    let words = ["alpha", "beta", "gamma", "delta", "epsilon"];
    for (i, w) in words.iter().enumerate() {
        let v = vec![
            bf16::from_f32(1.0),
            bf16::from_f32(i as f32),
            bf16::from_f32(0.5),
        ];
        g.add(Node::new(w.to_string(), v)).unwrap();
    }
    assert_eq!(g.dims(), Some(3));

    let query = vec![bf16::from_f32(1.0), bf16::from_f32(3.0), bf16::from_f32(0.5)];
    let hits = g.search(&query, 2).unwrap();
    assert_eq!(hits[0].key, "delta");

    assert!(g.delete(&"delta".to_string()).unwrap());
    let hits = g.search(&query, 1).unwrap();
    assert_ne!(hits[0].key, "delta");
}

#[test]
fn test_errors() {
    let mut g = Graph::new("errors".to_string(), pinned(4, 3), DistanceMetric::Euclidean).unwrap();
    g.add(Node::new(1u32, vec![1.0f32, 2.0])).unwrap();

    let err = g.add(Node::new(2, vec![1.0, 2.0, 3.0])).unwrap_err();
    assert!(matches!(err, HnswError::DimensionMismatch { .. }));
    assert!(err.to_string().contains("errors"), "{err}");
    assert_eq!(g.len(), 1);

    assert!(g.search(&vec![1.0, 2.0], 0).unwrap_err().is_config());
    assert!(matches!(
        g.search(&vec![1.0], 1).unwrap_err(),
        HnswError::DimensionMismatch {
            expected: 2,
            got: 1,
            ..
        }
    ));

    let bad = HnswConfig {
        ml: 1.5,
        ..Default::default()
    };
    assert!(bad.validate("bad").is_err());
}
