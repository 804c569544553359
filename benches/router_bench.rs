//! Benchmarks for the request router and the calculator evaluator.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use vllm_tool_proxy::protocol::ChatMessage;
use vllm_tool_proxy::routing::{detect_primary_tool, fallback_detection, parse_routing_decision};
use vllm_tool_proxy::tools::calculator::evaluate;

const TOOLS: &[&str] = &["calculator", "time_now", "get_weather", "system_info"];

fn bench_detect_primary_tool(c: &mut Criterion) {
    // A long conversation; only the last user turn matters.
    let mut messages: Vec<ChatMessage> = (0..50)
        .flat_map(|i| {
            [
                ChatMessage::user(format!("question number {i} about something unrelated")),
                ChatMessage::assistant(format!("answer number {i}")),
            ]
        })
        .collect();
    messages.push(ChatMessage::user("서울 지금 몇 시야? what time is it"));

    c.bench_function("detect_primary_tool_100_messages", |b| {
        b.iter(|| black_box(detect_primary_tool(black_box(&messages), TOOLS)))
    });
}

fn bench_fallback_detection(c: &mut Criterion) {
    let inputs = [
        "123 곱하기 456 계산해줘",
        "지금 뉴욕은 몇 시야?",
        "시스템 메모리 상태 알려줘",
        "tell me a story about a dragon",
    ];

    c.bench_function("fallback_detection_mixed", |b| {
        b.iter(|| {
            for text in &inputs {
                black_box(fallback_detection(black_box(text), TOOLS));
            }
        })
    });
}

fn bench_parse_routing_decision(c: &mut Criterion) {
    let answer = "Sure.\n```json\n{\"use_tool\": true, \"tool_name\": \"calculator\", \"parameters\": {\"expression\": \"2+2\"}}\n```";

    c.bench_function("parse_routing_decision_fenced", |b| {
        b.iter(|| black_box(parse_routing_decision(black_box(answer))))
    });
}

fn bench_calculator(c: &mut Criterion) {
    c.bench_function("calculator_evaluate_nested", |b| {
        b.iter(|| black_box(evaluate(black_box("sqrt(16) + 2 ** 10 * (3.5 - 1) / 7 % 5"))))
    });
}

criterion_group!(
    benches,
    bench_detect_primary_tool,
    bench_fallback_detection,
    bench_parse_routing_decision,
    bench_calculator,
);
criterion_main!(benches);
