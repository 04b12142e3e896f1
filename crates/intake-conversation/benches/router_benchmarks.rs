//! Benchmarks for per-message routing.
//!
//! Routing runs on every inbound message before any store or collaborator
//! call, so it should stay well under a millisecond. The inputs mix bare
//! digits (the ambiguous case), keywords, addressed edits and free text
//! across the screens where each reading applies.

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use intake_conversation::{contexts, ConversationState, StateRegistry, StateRouter, StateType};
use intake_core::types::IdentityKey;

const INPUTS: &[&str] = &[
    "1",
    "3",
    "9",
    "atrás",
    "Renovar",
    "edit 6 azul",
    "Ana Lopez Garcia",
    "menu",
    "no entiendo",
];

fn state_at(state_type: StateType, context: &str) -> ConversationState {
    let identity = IdentityKey::parse("5215550001234").unwrap();
    ConversationState::new(identity, state_type, context)
}

fn bench_route(c: &mut Criterion) {
    let router = StateRouter::new(Arc::new(StateRegistry::standard()));
    let screens = [
        ("menu", state_at(StateType::Menu, contexts::MAIN)),
        ("form", state_at(StateType::Form, contexts::PERMIT_APPLICATION)),
        (
            "confirmation",
            state_at(StateType::Confirmation, contexts::PERMIT_APPLICATION),
        ),
        ("renewal_edit", state_at(StateType::Form, contexts::RENEWAL_EDIT)),
    ];

    let mut group = c.benchmark_group("route");
    group.sample_size(200);
    group.measurement_time(Duration::from_secs(5));

    for (name, state) in &screens {
        group.bench_function(*name, |b| {
            let mut idx = 0usize;
            b.iter(|| {
                let text = INPUTS[idx % INPUTS.len()];
                idx += 1;
                black_box(router.route(black_box(state), black_box(text)))
            });
        });
    }

    group.finish();
}

fn bench_sanitize(c: &mut Criterion) {
    let noisy = "  Ana\u{200B}  Lopez\tGarcia \u{0007} ".repeat(20);
    c.bench_function("sanitize_noisy_input", |b| {
        b.iter(|| black_box(intake_conversation::sanitize::sanitize(black_box(&noisy), 500)))
    });
}

criterion_group!(benches, bench_route, bench_sanitize);
criterion_main!(benches);
