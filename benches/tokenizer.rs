use criterion::{Criterion, criterion_group, criterion_main};

use tinta::{Registry, Tokenizer};

const MINI_JSON_GRAMMAR: &str = r##"{
    "name": "mini-json",
    "scopeName": "source.mini-json",
    "patterns": [{ "include": "#value" }],
    "repository": {
        "value": {
            "patterns": [
                { "include": "#string" },
                { "match": "-?\\d+(\\.\\d+)?", "name": "constant.numeric.mini-json" },
                { "match": "\\b(?:true|false|null)\\b", "name": "constant.language.mini-json" },
                { "match": "[\\[\\]{}:,]", "name": "punctuation.mini-json" }
            ]
        },
        "string": {
            "begin": "\"",
            "end": "\"",
            "name": "string.quoted.double.mini-json",
            "patterns": [
                { "match": "\\\\.", "name": "constant.character.escape.mini-json" }
            ]
        }
    }
}"##;

fn criterion_benchmark(c: &mut Criterion) {
    let input = r#"{"name": "John", "age": 30, "active": true, "score": 95.5, "tags": ["developer", "rust"], "address": null}"#;

    let mut registry = Registry::new();
    let grammar = registry.add_grammar_from_str(MINI_JSON_GRAMMAR).unwrap();

    c.bench_function("json tokenization", |b| {
        b.iter(|| {
            let mut tokenizer = Tokenizer::new(grammar.clone(), &registry);
            let result = tokenizer
                .tokenize_block(input)
                .expect("tokenization should succeed");
            std::hint::black_box(result);
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
