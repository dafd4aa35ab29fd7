use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fixloop::apply::diff_lines;
use fixloop::parse::parse_code_changes;
use fixloop::prompt::{assemble_prompt, render_directory_tree, PromptContext, SourceFile};
use fixloop::signature::FileReport;

fn synthetic_module(index: usize, lines: usize) -> String {
    (0..lines)
        .map(|line| format!("def func_{index}_{line}(x):\n    return x + {line}\n"))
        .collect()
}

fn synthetic_reply(file_count: usize) -> String {
    (0..file_count)
        .map(|i| {
            format!(
                "# module_{i:03}.py\n```python\n{}```\n\n",
                synthetic_module(i, 200)
            )
        })
        .collect()
}

fn bench_parse_reply(c: &mut Criterion) {
    let reply = synthetic_reply(40);
    c.bench_function("parse_reply_40_files", |b| {
        b.iter(|| {
            let changes = parse_code_changes(black_box(&reply));
            black_box(changes.len());
        });
    });
}

fn bench_diff_lines(c: &mut Criterion) {
    let old = synthetic_module(0, 2_000);
    let new = old.replace("return x + 1", "return x - 1");
    c.bench_function("diff_lines_4k_lines", |b| {
        b.iter(|| {
            black_box(diff_lines(black_box(&old), black_box(&new)).len());
        });
    });
}

fn bench_assemble_prompt(c: &mut Criterion) {
    let temp = tempfile::tempdir().expect("tempdir");
    let sources: Vec<SourceFile> = (0..50)
        .map(|i| {
            let file = format!("module_{i:03}.py");
            let content = synthetic_module(i, 100);
            std::fs::write(temp.path().join(&file), &content).expect("write synthetic source");
            SourceFile { file, content }
        })
        .collect();
    let reports: Vec<FileReport> = sources
        .iter()
        .map(|s| FileReport::failing(s.file.as_str(), "Traceback (most recent call last):\nValueError"))
        .collect();

    c.bench_function("assemble_prompt_50_files", |b| {
        b.iter(|| {
            let tree = render_directory_tree(temp.path(), &[]);
            let prompt = assemble_prompt(&PromptContext {
                directory_tree: &tree,
                sources: &sources,
                reports: &reports,
                research: None,
            });
            black_box(prompt.len());
        });
    });
}

criterion_group!(
    perf_core,
    bench_parse_reply,
    bench_diff_lines,
    bench_assemble_prompt
);
criterion_main!(perf_core);
