use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lemoneval_core::data::DataMap;
use lemoneval_core::evaluator::{Evaluator, EvaluatorConfig};
use lemoneval_core::node::{AnswerOnlyTest, NodeId, TestGraph};
use lemoneval_core::traits::NoProgramRunner;

/// `width` answer tests, each shared by a running max and a total sum, plus a
/// chain over all of them.
fn wide_graph(width: usize) -> (Arc<TestGraph>, NodeId, Arc<DataMap>) {
    let mut graph = TestGraph::new();
    let mut data = DataMap::new();
    let mut leaves = Vec::with_capacity(width);
    for i in 0..width {
        let key = format!("q{i}");
        data.insert_answer(key.clone(), i % 3);
        leaves.push(graph.answer_test(AnswerOnlyTest::equals(1.0, key, (i % 2).into())));
    }

    let mut best = leaves[0];
    for leaf in &leaves[1..] {
        best = graph.max([best, *leaf]).unwrap();
    }
    let total = graph.sum(leaves.clone()).unwrap();
    let chain = graph.chains(leaves).unwrap();
    let root = graph.sum([best, total, chain]).unwrap();
    (Arc::new(graph), root, Arc::new(data))
}

fn bench_evaluate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("evaluate");

    for width in [10, 100, 1000] {
        let (graph, root, data) = wide_graph(width);
        for parallelism in [1, 8] {
            let evaluator = Evaluator::new(
                Arc::new(NoProgramRunner),
                EvaluatorConfig {
                    parallelism,
                    seed: Some(0),
                },
            );
            group.bench_function(format!("width={width},parallelism={parallelism}"), |b| {
                b.iter(|| {
                    runtime
                        .block_on(evaluator.evaluate(
                            Arc::clone(&graph),
                            black_box(root),
                            Arc::clone(&data),
                        ))
                        .unwrap()
                })
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
