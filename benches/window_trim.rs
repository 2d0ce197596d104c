use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use deepchat::core::message::{Conversation, Turn};
use deepchat::core::profile::Profile;
use deepchat::core::tokenizer::Cl100kEstimate;
use deepchat::core::window::{WindowLimits, WindowManager};
use std::hint::black_box;
use std::sync::Arc;

fn make_conversation(turns: usize, user: &str, bot: &str) -> Conversation {
    (0..turns).map(|_| Turn::new(user, bot)).collect()
}

fn bench_window_trim(c: &mut Criterion) {
    let ascii = "lorem ipsum dolor sit amet consectetur adipiscing elit sed do eiusmod tempor";
    let cjk = "你好，今天我们来讨论一下如何把长对话裁剪到合适的上下文窗口之内。";
    let window = WindowManager::new(Arc::new(Cl100kEstimate), WindowLimits::default());
    let profile = Profile::default();

    for &turns in &[20usize, 200usize, 2000usize] {
        let mut group = c.benchmark_group(format!("window_turns{turns}"));
        group.throughput(Throughput::Elements(turns as u64));

        for (label, text) in [("ascii", ascii), ("cjk", cjk)] {
            let conversation = make_conversation(turns, text, text);
            let budget = window.limits().max_tokens / 2;

            group.bench_function(BenchmarkId::new("trim", label), |b| {
                b.iter(|| window.trim(black_box(&conversation), budget))
            });
            group.bench_function(BenchmarkId::new("prepare_messages", label), |b| {
                b.iter(|| window.prepare_messages(black_box(&conversation), &profile, text))
            });
        }

        group.finish();
    }
}

criterion_group!(benches, bench_window_trim);
criterion_main!(benches);
