use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use theme_assets::graph::TaskGraph;
use theme_assets::manifest::{BuildMode, Manifest};
use theme_assets::pipeline::compile;
use theme_assets::scheduler::Scheduler;
use theme_assets::style::optimize_css;

/// Create N themes, each with plain CSS entries and scripts
fn create_site(dir: &TempDir, themes: usize, files: usize) -> Manifest {
    let names: Vec<String> = (0..themes).map(|i| format!("theme{i}")).collect();

    for name in &names {
        let src = dir.path().join("web/themes/custom").join(name).join("assets/src");
        fs::create_dir_all(src.join("scss")).unwrap();
        fs::create_dir_all(src.join("js")).unwrap();
        for i in 0..files {
            fs::write(
                src.join(format!("scss/page{i}.css")),
                format!(".page{i} {{ margin: {i}px }}\n@media (min-width: 40em) {{ .page{i} {{ margin: 0 }} }}\n"),
            )
            .unwrap();
            fs::write(src.join(format!("js/page{i}.js")), format!("init({i});\n")).unwrap();
        }
    }

    let mut manifest =
        Manifest::parse(&format!("[project]\nthemes = {names:?}\n"), dir.path()).unwrap();
    manifest.paths.style.main = "scss/*.css".to_string();
    manifest
}

/// Benchmark pipeline derivation from the manifest
fn bench_compile_pipelines(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let manifest = create_site(&temp, 20, 0);

    c.bench_function("compile_pipelines_20_themes", |b| {
        b.iter(|| compile(black_box(&manifest), black_box(BuildMode::Development)).unwrap())
    });
}

/// Benchmark a full build with different file counts
fn bench_full_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_build");
    group.sample_size(10);
    let scheduler = Scheduler::new(num_cpus::get()).unwrap();

    for file_count in [10, 50, 100].iter() {
        let temp = TempDir::new().unwrap();
        let manifest = create_site(&temp, 4, *file_count);
        let pipelines = compile(&manifest, BuildMode::Production).unwrap();

        group.throughput(Throughput::Elements((*file_count * 4 * 2) as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| {
                b.iter(|| {
                    let report = scheduler.run(TaskGraph::build(black_box(&pipelines)).unwrap());
                    assert!(report.succeeded());
                })
            },
        );
    }

    group.finish();
}

/// Benchmark media-query grouping and minification
fn bench_optimize_css(c: &mut Criterion) {
    let css: String = (0..500)
        .map(|i| format!(".c{i} {{ color: red }}\n@media (min-width: {}em) {{ .c{i} {{ color: blue }} }}\n", i % 4 + 30))
        .collect();

    c.bench_function("optimize_css_500_rules", |b| {
        b.iter(|| optimize_css(black_box(&css), Path::new("bench.css"), None, true, true).unwrap())
    });
}

criterion_group!(
    benches,
    bench_compile_pipelines,
    bench_full_build,
    bench_optimize_css,
);
criterion_main!(benches);
