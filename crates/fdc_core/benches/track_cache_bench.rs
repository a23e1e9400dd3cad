/*
    fdcdrv

    Copyright 2025 The fdcdrv Developers

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    --------------------------------------------------------------------------

    benches::track_cache_bench.rs

    Sequential read throughput with and without the track cache.
*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use fdc_core::{
    machine::{Machine, DEFAULT_MEMORY_KB, DEFAULT_STEP_LIMIT},
    request::DeviceId,
    DriverConfig,
};

fn read_track(config: DriverConfig) -> usize {
    let mut machine = Machine::new(config, DEFAULT_MEMORY_KB, 0).unwrap();
    machine.mount(0, 7, None).unwrap();
    let dev = DeviceId::new(0, 7);
    for block in 0..36 {
        machine.read(dev, block, 0x1000 + block * 512);
    }
    machine.run_until_idle(DEFAULT_STEP_LIMIT);
    machine.drain_completions().len()
}

pub fn track_cache_bench(c: &mut Criterion) {
    c.bench_function("sequential_reads_cached", |b| {
        b.iter(|| black_box(read_track(DriverConfig::default())));
    });

    // With no whole-track attempts every sector is a separate transfer.
    c.bench_function("sequential_reads_uncached", |b| {
        b.iter(|| {
            black_box(read_track(DriverConfig {
                track_read_max_errors: 0,
                ..Default::default()
            }))
        });
    });
}

criterion_group!(benches, track_cache_bench);
criterion_main!(benches);
