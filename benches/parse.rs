use criterion::{black_box, criterion_group, criterion_main, Criterion};

use pandasm::emitter::AsmEmitter;
use pandasm::lexer::Lexer;
use pandasm::parser::Parser;

fn synthetic_unit() -> String {
    let mut source = String::from(".record Math {\n  i32 state\n  f64 factor\n}\n");
    for i in 0..50 {
        source.push_str(&format!(
            ".function i32 Math.op{i}(Math a0, i32 a1) {{\n\
             entry{i}:\n\
             lda a1\n\
             addi {i}\n\
             jeqz done{i}\n\
             ldobj Math.state\n\
             done{i}: return\n\
             }}\n"
        ));
    }
    source
}

fn tokenize_unit(c: &mut Criterion) {
    let source = synthetic_unit();
    c.bench_function("tokenize_unit", |b| {
        b.iter(|| {
            let mut lexer = Lexer::new();
            for line in source.lines() {
                black_box(lexer.tokenize_string(line).unwrap());
            }
        })
    });
}

fn parse_unit(c: &mut Criterion) {
    let source = synthetic_unit();
    c.bench_function("parse_unit", |b| {
        b.iter(|| {
            let (program, warnings) = Parser::parse_source(&source, "bench.pa").unwrap();
            assert!(warnings.is_empty());
            black_box(program);
        })
    });
}

fn emit_unit(c: &mut Criterion) {
    let source = synthetic_unit();
    let (program, _) = Parser::parse_source(&source, "bench.pa").unwrap();
    c.bench_function("emit_unit", |b| {
        b.iter(|| {
            let bytes = AsmEmitter::emit_to_memory(&program, None).unwrap();
            black_box(bytes);
        })
    });
}

criterion_group!(benches, tokenize_unit, parse_unit, emit_unit);
criterion_main!(benches);
