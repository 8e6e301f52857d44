//! Game of Life tests: rule, toroidal wrap, oscillators and gliders.

use tessera_compute::kernels::life::life_step_reference;
use tessera_compute::pattern::{self, BLINKER, BLOCK, GLIDER, live_cells, seeded};
use tessera_compute::{Backend, ImageBuffer, KernelKind, Processor};

fn cpu() -> Processor {
    Processor::builder()
        .backend(Backend::Cpu)
        .lanes(2)
        .memory_budget_mb(64)
        .build()
        .unwrap()
}

#[test]
fn test_blinker_period_two() {
    let proc = cpu();
    let start = seeded(5, 5, 1, 1, &BLINKER);
    assert_eq!(live_cells(&start), vec![(1, 2), (2, 2), (3, 2)]);

    let one = proc.life(&start, 1).unwrap();
    assert_eq!(live_cells(&one.image), vec![(2, 1), (2, 2), (2, 3)]);

    for steps in [2, 4] {
        let out = proc.life(&start, steps).unwrap();
        assert_eq!(out.image, start, "after {steps} steps");
        assert_eq!(out.report.dispatches, steps as usize);
        assert_eq!(out.report.kernel, KernelKind::LifeStep);
    }
}

#[test]
fn test_rule_table_on_device() {
    let proc = cpu();
    let step = |cells: &[(u32, u32)]| live_cells(&proc.life(&seeded(7, 7, 0, 0, cells), 1).unwrap().image);

    // Lone cell and domino die with 0 and 1 neighbours
    assert!(step(&[(3, 3)]).is_empty());
    assert!(step(&[(2, 3), (3, 3)]).is_empty());

    // Diagonal: the middle cell survives on exactly 2
    assert_eq!(step(&[(1, 1), (2, 2), (3, 3)]), vec![(2, 2)]);

    // L tromino: the missing corner is born on exactly 3
    assert_eq!(
        step(&[(1, 1), (2, 1), (1, 2)]),
        vec![(1, 1), (2, 1), (1, 2), (2, 2)]
    );

    // Plus: the centre has 4 neighbours and dies
    let plus = step(&[(2, 1), (1, 2), (2, 2), (3, 2), (2, 3)]);
    assert!(!plus.contains(&(2, 2)));
    assert_eq!(
        plus,
        vec![(1, 1), (2, 1), (3, 1), (1, 2), (3, 2), (1, 3), (2, 3), (3, 3)]
    );
}

#[test]
fn test_block_is_still() {
    let proc = cpu();
    let start = seeded(6, 6, 2, 2, &BLOCK);
    let out = proc.life(&start, 7).unwrap();
    assert_eq!(out.image, start);
}

#[test]
fn test_glider_translates() {
    let proc = cpu();
    let start = seeded(10, 10, 2, 2, &GLIDER);
    let out = proc.life(&start, 4).unwrap();
    assert_eq!(out.image, seeded(10, 10, 3, 3, &GLIDER));
}

#[test]
fn test_glider_wraps_around_torus() {
    // 8 periods move the glider 8 cells diagonally on an 8x8 board
    let proc = cpu();
    let start = seeded(8, 8, 0, 0, &GLIDER);
    let out = proc.life(&start, 32).unwrap();
    assert_eq!(out.image, start);
}

#[test]
fn test_corner_sees_opposite_corner() {
    let proc = cpu();
    let (w, h) = (6, 6);
    // Three live neighbours of (0, 0) that are only adjacent through the wrap
    let start = seeded(w, h, 0, 0, &[(w - 1, h - 1), (w - 1, 0), (0, h - 1)]);
    let out = proc.life(&start, 1).unwrap();
    assert_eq!(out.image.get(0, 0, 0), 1.0);
}

#[test]
fn test_matches_reference_on_random_board() {
    let proc = cpu();
    let start = pattern::random_cells(37, 23, 0.35, 42);
    let mut expected = start.clone();
    for _ in 0..10 {
        expected = life_step_reference(&expected);
    }
    let out = proc.life(&start, 10).unwrap();
    assert_eq!(out.image, expected);
    assert_eq!(proc.stats().live_buffers, 0);
}

#[test]
fn test_output_encoding() {
    let proc = cpu();
    // Partial values: alive iff channel 0 >= 0.5, other channels ignored
    let mut start = ImageBuffer::new(4, 4, 4);
    for (x, y) in [(1, 1), (2, 1), (1, 2)] {
        start.set(x, y, 0, 0.5);
        start.set(x, y, 1, 0.1);
    }
    start.set(3, 3, 0, 0.49);
    let out = proc.life(&start, 1).unwrap();

    // (2, 2) is born with exactly 3 neighbours
    assert_eq!(
        &out.image.data()[out.image.index(2, 2, 0)..out.image.index(2, 2, 0) + 4],
        &[1.0, 1.0, 1.0, 1.0]
    );
    // Dead cells are (0, 0, 0, 1)
    assert_eq!(
        &out.image.data()[out.image.index(3, 3, 0)..out.image.index(3, 3, 0) + 4],
        &[0.0, 0.0, 0.0, 1.0]
    );
}

#[test]
fn test_zero_steps_returns_input() {
    let proc = cpu();
    let start = pattern::gradient(9, 7);
    let out = proc.life(&start, 0).unwrap();
    assert_eq!(out.image, start);
    assert_eq!(out.report.dispatches, 0);
}
