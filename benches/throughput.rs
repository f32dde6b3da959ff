use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;

const OPS: u64 = 100_000;
const CLASSES: [usize; 7] = [16, 32, 64, 128, 256, 512, 1024];
const BATCH: usize = 10_000;

// =============================================================================
// Paired alloc/free
// =============================================================================

/// sharded engine alloc/free throughput.
fn sharded_alloc_free(size: usize) {
  for _ in 0..OPS {
    let ptr = tagheap::sharded::allocate(size);
    black_box(ptr);
    unsafe { tagheap::sharded::release(ptr) };
  }
}

/// global engine alloc/free throughput.
fn global_alloc_free(size: usize) {
  for _ in 0..OPS {
    let ptr = tagheap::global::allocate(size);
    black_box(ptr);
    unsafe { tagheap::global::release(ptr) };
  }
}

/// libc alloc/free throughput.
fn libc_malloc_free(size: usize) {
  for _ in 0..OPS {
    unsafe {
      let ptr = libc::malloc(size);
      black_box(ptr);
      libc::free(ptr);
    }
  }
}

fn benchmark_alloc_free(c: &mut Criterion) {
  let mut group = c.benchmark_group("alloc_free");

  for size in [16, 64, 256, 1024, 4096] {
    group.throughput(Throughput::Elements(OPS));

    group.bench_with_input(BenchmarkId::new("sharded", size), &size, |b, &size| {
      b.iter(|| sharded_alloc_free(size))
    });

    group.bench_with_input(BenchmarkId::new("global", size), &size, |b, &size| {
      b.iter(|| global_alloc_free(size))
    });

    group.bench_with_input(BenchmarkId::new("libc", size), &size, |b, &size| {
      b.iter(|| libc_malloc_free(size))
    });
  }

  group.finish();
}

// =============================================================================
// Mixed-size churn: allocate a batch cycling the size classes, then free
// it in allocation order.
// =============================================================================

fn churn(alloc: fn(usize) -> *mut u8, release: unsafe fn(*mut u8)) {
  let mut ptrs = Vec::with_capacity(BATCH);
  for i in 0..BATCH {
    let n = CLASSES[i % CLASSES.len()];
    let p = alloc(n);
    assert!(!p.is_null());
    unsafe { std::ptr::write_bytes(p, 0, n) };
    ptrs.push(p);
  }
  for p in ptrs {
    unsafe { release(p) };
  }
}

fn libc_alloc(n: usize) -> *mut u8 {
  unsafe { libc::malloc(n) as *mut u8 }
}

unsafe fn libc_release(p: *mut u8) {
  unsafe { libc::free(p as *mut libc::c_void) };
}

fn benchmark_mixed_churn(c: &mut Criterion) {
  let mut group = c.benchmark_group("mixed_churn");
  group.throughput(Throughput::Elements(BATCH as u64));

  group.bench_function("sharded", |b| {
    b.iter(|| churn(tagheap::sharded::allocate, tagheap::sharded::release))
  });
  group.bench_function("global", |b| {
    b.iter(|| churn(tagheap::global::allocate, tagheap::global::release))
  });
  group.bench_function("libc", |b| b.iter(|| churn(libc_alloc, libc_release)));

  group.finish();
}

criterion_group!(benches, benchmark_alloc_free, benchmark_mixed_churn);
criterion_main!(benches);
