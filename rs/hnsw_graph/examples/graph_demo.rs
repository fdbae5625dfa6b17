use hnsw_graph::{DistanceMetric, Graph, HnswConfig, Node};
use rand::Rng;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    structured_logger::Builder::new().init();

    const DIM: usize = 128;

    let config = HnswConfig {
        m: 16,
        ml: 0.25,
        ef_search: 64,
        ..Default::default()
    };
    let mut graph: Graph<u64, Vec<f32>> =
        Graph::new("demo".to_string(), config, DistanceMetric::Cosine)?;

    let mut rng = rand::rng();

    let mut insert_start = Instant::now();
    for i in 0..20_000u64 {
        let vector: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>()).collect();
        graph.add(Node::new(i, vector))?;

        if i % 1000 == 0 {
            println!("{} inserted 1000 vectors in {:?}", i, insert_start.elapsed());
            insert_start = Instant::now();

            let query: Vec<f32> = (0..DIM).map(|_| rng.random::<f32>()).collect();
            let query_start = Instant::now();
            let results = graph.search(&query, 10)?;
            println!(
                "{} Search returned {} results in {:?}",
                i,
                results.len(),
                query_start.elapsed()
            );
        }

        if i % 2000 == 0 && i > 0 {
            let to_remove = rng.random_range(0..i);
            let remove_start = Instant::now();
            let removed = graph.delete(&to_remove)?;
            println!(
                "{} Removed vector {} ({}) in {:?}",
                i,
                to_remove,
                removed,
                remove_start.elapsed()
            );
        }
    }

    log::info!(
        action = "build",
        graph = graph.name(),
        vectors = graph.len();
        "graph built"
    );

    let analyzer = graph.analyzer();
    println!("Graph statistics:");
    println!("- Total vectors: {}", graph.len());
    println!("- Height: {}", analyzer.height());
    println!("- Topography: {:?}", analyzer.topography());
    println!("- Mean degree: {:.2?}", analyzer.mean_degree());
    println!(
        "- Components: {:?}",
        analyzer
            .connectivity()
            .iter()
            .map(|sizes| sizes.len())
            .collect::<Vec<_>>()
    );

    // an existing vector must come back as its own nearest neighbor
    let key = rng.random_range(0..graph.len() as u64);
    if let Some(vector) = graph.lookup(&key).cloned() {
        let results = graph.search(&vector, 3)?;
        let hits: Vec<(u64, f32)> = results.iter().map(|r| (r.key, r.distance)).collect();
        println!("Self query for {}: {:?}", key, hits);
    }

    Ok(())
}
