//! Codec throughput: both per-axis blocks, pack and unpack.
//!
//! The cyclic thread runs the codec four times per tick; this keeps an eye
//! on it staying far below the microsecond.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use antpos_core::pdo::{AxisRx, AxisTx, AXIS_RX_LEN, AXIS_TX_LEN};

fn codec(c: &mut Criterion) {
    let tx = AxisTx {
        controlword: 0x000F,
        mode_of_operation: 1,
        target_position: 524_288,
        target_velocity: -100_000,
    };
    let mut tx_buf = [0u8; AXIS_TX_LEN];
    tx.pack(&mut tx_buf);

    let rx = AxisRx {
        statusword: 0x0237,
        mode_display: 3,
        position_actual: 123_456,
        velocity_actual: -98_765,
        torque_actual: 150,
        error_code: 0,
        temperatures: [41, 38, 35],
        digital_inputs: 1,
    };
    let mut rx_buf = [0u8; AXIS_RX_LEN];
    rx.pack(&mut rx_buf);

    c.bench_function("axis_tx_pack", |b| {
        let mut buf = [0u8; AXIS_TX_LEN];
        b.iter(|| black_box(&tx).pack(black_box(&mut buf)))
    });
    c.bench_function("axis_tx_unpack", |b| {
        b.iter(|| AxisTx::unpack(black_box(&tx_buf)))
    });
    c.bench_function("axis_rx_pack", |b| {
        let mut buf = [0u8; AXIS_RX_LEN];
        b.iter(|| black_box(&rx).pack(black_box(&mut buf)))
    });
    c.bench_function("axis_rx_unpack", |b| {
        b.iter(|| AxisRx::unpack(black_box(&rx_buf)))
    });
}

criterion_group!(benches, codec);
criterion_main!(benches);
