//! Benchmarks for parsing `src/source-mappings.json`.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use vmr_codeflow::filesystem::LocalFileSystem;
use vmr_codeflow::source_mapping::{strip_json_comments, SourceMappingParser};
use vmr_codeflow::vmr_info::VmrInfo;

/// Mappings file with `count` mappings, comments and trailing commas.
fn mappings_file(count: usize) -> String {
    let mut out = String::from(
        r#"{
  // Applied to every mapping without ignoreDefaults
  "defaults": {
    "defaultRef": "main",
    "exclude": [ "**/*.zip", "**/*.nupkg", ],
  },
  "thirdPartyNoticesTemplatePath": "src/THIRD-PARTY-NOTICES.template.txt",
  "mappings": [
"#,
    );
    for i in 0..count {
        out.push_str(&format!(
            r#"    {{
      "name": "repo{i}",
      "defaultRemote": "https://github.com/dotnet/repo{i}",
      /* Binaries are restored at build time */
      "exclude": [ "src/**/*.dll", "eng/common/cross/**" ],
      "ignoreDefaults": {},
    }},
"#,
            i % 5 == 0
        ));
    }
    out.push_str("  ]\n}\n");
    out
}

fn bench_strip_comments(c: &mut Criterion) {
    let content = mappings_file(50);
    c.bench_function("strip_json_comments/50", |b| {
        b.iter(|| strip_json_comments(black_box(&content)))
    });
}

fn bench_parse(c: &mut Criterion) {
    let parser = SourceMappingParser::new(
        VmrInfo::new("/vmr", "/tmp/vmr"),
        Arc::new(LocalFileSystem::new()),
    );

    let mut group = c.benchmark_group("parse_mappings");
    for count in [1, 25, 100] {
        let content = mappings_file(count);
        group.bench_with_input(BenchmarkId::from_parameter(count), &content, |b, content| {
            b.iter(|| parser.parse_mappings_from_json(black_box(content)).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_strip_comments, bench_parse);
criterion_main!(benches);
