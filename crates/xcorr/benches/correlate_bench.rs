//! Benchmarks for the network correlation core.
//!
//! Measures single-channel normxcorr and the multi-channel network sum at
//! realistic sizes: 50 Hz data, 4 s templates, a 5 minute detection window.
//!
//! Run with: cargo bench -p aftershock-xcorr --bench correlate_bench

use aftershock_core::{Event, ResourceId, UtcTime};
use aftershock_waveform::{Stream, Trace};
use aftershock_xcorr::{Template, multi_channel_normxcorr, normxcorr};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

fn pseudo_noise(seed: u64, n: usize) -> Vec<f32> {
  let mut state = seed;
  (0..n)
    .map(|_| {
      state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
    })
    .collect()
}

fn build_template(name: &str, seed: u64, n_channels: usize, npts: usize) -> Template {
  let stations = ["WVZ", "JCZ", "FOZ", "RPZ", "LBZ", "EAZ", "MQZ", "ODZ", "OXZ", "THZ"];
  let traces: Vec<Trace> = (0..n_channels)
    .map(|c| {
      Trace::new(
        format!("NZ.{}.10.HHZ", stations[c % stations.len()]).parse().unwrap(),
        UtcTime::from_epoch(1000.0 + c as f64 * 0.1),
        50.0,
        pseudo_noise(seed + c as u64, npts),
      )
    })
    .collect();
  Template {
    name: name.to_string(),
    event: Event::new(ResourceId::generate()),
    stream: Stream::new(traces),
    process_length: 300.0,
    prepick: 0.15,
    lowcut: 2.0,
    highcut: 15.0,
    samp_rate: 50.0,
    filt_order: 4,
  }
}

fn build_stream(n_channels: usize, npts: usize) -> Stream {
  let stations = ["WVZ", "JCZ", "FOZ", "RPZ", "LBZ", "EAZ", "MQZ", "ODZ", "OXZ", "THZ"];
  Stream::new(
    (0..n_channels)
      .map(|c| {
        Trace::new(
          format!("NZ.{}.10.HHZ", stations[c % stations.len()]).parse().unwrap(),
          UtcTime::from_epoch(5000.0),
          50.0,
          pseudo_noise(1000 + c as u64, npts),
        )
      })
      .collect(),
  )
}

fn bench_normxcorr(c: &mut Criterion) {
  let mut group = c.benchmark_group("normxcorr");
  let template = pseudo_noise(7, 200);

  for seconds in [60usize, 300].iter() {
    let series = pseudo_noise(11, seconds * 50);
    group.throughput(Throughput::Elements((series.len() - template.len() + 1) as u64));
    group.bench_with_input(BenchmarkId::from_parameter(seconds), &series, |b, series| {
      b.iter(|| normxcorr(black_box(&template), black_box(series)));
    });
  }
  group.finish();
}

fn bench_multi_channel(c: &mut Criterion) {
  let mut group = c.benchmark_group("multi_channel_normxcorr");
  group.sample_size(20);

  let stream = build_stream(10, 300 * 50);
  for n_templates in [1usize, 4, 8].iter() {
    let templates: Vec<Template> = (0..*n_templates)
      .map(|i| build_template(&format!("t{}", i), i as u64 * 31, 10, 200))
      .collect();
    group.throughput(Throughput::Elements((n_templates * 10) as u64));
    group.bench_with_input(
      BenchmarkId::from_parameter(n_templates),
      &templates,
      |b, templates| {
        b.iter(|| multi_channel_normxcorr(black_box(templates), black_box(&stream)));
      },
    );
  }
  group.finish();
}

criterion_group!(benches, bench_normxcorr, bench_multi_channel);
criterion_main!(benches);
