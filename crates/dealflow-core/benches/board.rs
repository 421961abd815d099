use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use dealflow_core::{Board, ItemId, Move, StageSet, apply_move, diff_boards};

const SIZES: [usize; 3] = [100, 1_000, 10_000];

fn board_with(stages: &StageSet, items: usize) -> Board {
    let lanes = stages.stages().iter().enumerate().map(|(lane, stage)| {
        let ids = (0..items)
            .filter(|i| i % stages.len() == lane)
            .map(|i| ItemId::new(format!("d{i}")))
            .collect();
        (stage.clone(), ids)
    });
    Board::from_lanes(stages, lanes).expect("bench board")
}

fn bench_board(c: &mut Criterion) {
    let stages = StageSet::default();
    let mut group = c.benchmark_group("board");

    for size in SIZES {
        let board = board_with(&stages, size);
        // d0 sits in the first lane.
        let mv = Move::new(
            "d0",
            stages.stages()[0].clone(),
            stages.stages()[stages.len() - 1].clone(),
        );
        let moved = apply_move(&board, &mv).expect("bench move");
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("apply_move", size), &board, |b, board| {
            b.iter(|| black_box(apply_move(board, &mv)));
        });

        group.bench_with_input(
            BenchmarkId::new("diff_boards", size),
            &(&board, &moved),
            |b, (before, after)| b.iter(|| black_box(diff_boards(before, after))),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_board);
criterion_main!(benches);
