use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use source_extract::detection::{label_image, LutzBuffers};
use source_extract::pixel_list::{Bare, PixelArena};
use source_extract::{extract, ExtractionConfig, Noise, SubRegion};

/// Grid of Gaussian sources, every fourth one a close pair.
fn make_field(size: usize) -> Array2<f32> {
    let mut image = Array2::zeros((size, size));
    let mut i = 0;
    for cy in (12..size - 12).step_by(24) {
        for cx in (12..size - 12).step_by(24) {
            let amp = 50.0 + (i % 7) as f32 * 20.0;
            image += &test_helpers::scenes::gaussian_blob(size, size, cx as f32, cy as f32, 1.8, amp);
            if i % 4 == 0 {
                image += &test_helpers::scenes::gaussian_blob(
                    size,
                    size,
                    cx as f32 + 4.0,
                    cy as f32 + 1.0,
                    1.8,
                    amp * 0.6,
                );
            }
            i += 1;
        }
    }
    image
}

fn bench_labeling(c: &mut Criterion) {
    let image = make_field(512);
    let region = SubRegion::full_frame(512, 512).unwrap();
    let mut buffers = LutzBuffers::new(512);
    let mut arena = PixelArena::<Bare>::with_capacity(512 * 512);

    c.bench_function("label_image_512x512", |b| {
        b.iter(|| {
            arena.clear();
            label_image(
                black_box(image.view()),
                region,
                1.0,
                5,
                &mut buffers,
                &mut arena,
            )
            .unwrap()
        })
    });
}

fn bench_extract(c: &mut Criterion) {
    let image = make_field(512);
    let parallel = ExtractionConfig::absolute(1.0);
    let serial = ExtractionConfig {
        parallel: false,
        ..ExtractionConfig::absolute(1.0)
    };
    let no_deblend = {
        let mut config = ExtractionConfig::absolute(1.0);
        config.deblend.enabled = false;
        config
    };

    let mut group = c.benchmark_group("extract_512x512");
    group.bench_function("parallel", |b| {
        b.iter(|| extract(black_box(image.view()), Noise::None, &parallel).unwrap())
    });
    group.bench_function("serial", |b| {
        b.iter(|| extract(black_box(image.view()), Noise::None, &serial).unwrap())
    });
    group.bench_function("no_deblend", |b| {
        b.iter(|| extract(black_box(image.view()), Noise::None, &no_deblend).unwrap())
    });
    group.finish();
}

criterion_group!(benches, bench_labeling, bench_extract);
criterion_main!(benches);
