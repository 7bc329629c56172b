use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use netconfd::context::{Context, ContextFlags};
use netconfd::data::{Data, DataTree, DataValidationFlags};

static MODULE: &str = r###"
module interfaces {
  namespace "urn:bench:interfaces";
  prefix bif;

  container interfaces {
    list interface {
      key name;
      leaf name { type string; }
      leaf type { type string; }
      leaf enabled { type boolean; }
    }
  }
}
"###;

fn data_generate(ctx: &Arc<Context>, interfaces: u32) -> DataTree {
    let mut dtree = DataTree::new(ctx.clone());

    for i in 1..=interfaces {
        let changes = [
            (
                format!(
                    "/interfaces:interfaces/interface[name='eth{}']/type",
                    i
                ),
                Some("ethernetCsmacd"),
            ),
            (
                format!(
                    "/interfaces:interfaces/interface[name='eth{}']/enabled",
                    i
                ),
                Some("true"),
            ),
        ];

        for (path, value) in &changes {
            dtree
                .new_path(path, *value)
                .expect("Failed to edit data tree");
        }
    }

    dtree
}

fn criterion_benchmark(c: &mut Criterion) {
    let tree_sizes = [256, 512, 1024, 2048];

    // Initialize context.
    let mut ctx = Context::new(ContextFlags::empty())
        .expect("Failed to create context");
    ctx.parse_module_string(MODULE, &[])
        .expect("Failed to load module");
    let ctx = Arc::new(ctx);

    // Prepare DataTree.diff() benchmark.
    let mut group = c.benchmark_group("DataTree.diff() / tree size");
    for size in &tree_sizes {
        // Create artificial data trees.
        let dtree = data_generate(&ctx, *size);
        let dtree_base = data_generate(&ctx, *size + 256);

        // Run benchmark.
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            size,
            |b, _| {
                b.iter(|| {
                    dtree
                        .diff(&dtree_base)
                        .expect("Failed to compare data trees");
                });
            },
        );
    }
    group.finish();

    // Prepare DataTree.find() benchmark.
    let mut group = c.benchmark_group("DataTree.find() / tree size");
    for size in &tree_sizes {
        // Create artificial data tree.
        let dtree = data_generate(&ctx, *size);

        // Run benchmark.
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            size,
            |b, _| {
                b.iter(|| {
                    dtree
                        .find_xpath(
                            "/interfaces:interfaces/interface[name='eth1']",
                        )
                        .expect("Failed to find data");
                });
            },
        );
    }
    group.finish();

    // Prepare DataTree.validate() benchmark.
    let mut group = c.benchmark_group("DataTree.validate() / tree size");
    for size in &tree_sizes {
        // Create artificial data tree.
        let dtree = data_generate(&ctx, *size);

        // Run benchmark.
        group.bench_with_input(
            BenchmarkId::from_parameter(size),
            size,
            |b, _| {
                b.iter(|| {
                    dtree
                        .validate(DataValidationFlags::NO_STATE)
                        .expect("Failed to validate data tree")
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
