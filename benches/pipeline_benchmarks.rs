use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array4;
use photo_cutout::{
    apply_alpha, composite_background, remove_background_from_bytes, utils::ImagePreprocessor,
    Image, ImageCodec, MockBackend, ModelConfig, OutputFormat, PixelFormat, Rgb,
    SegmentationEngine,
};
use tokio::runtime::Runtime;

const SIZES: [(u32, u32); 3] = [(512, 512), (1024, 768), (2048, 2048)];

fn size_label(width: u32, height: u32) -> String {
    format!("{width}x{height}")
}

fn sample_image(width: u32, height: u32) -> Image {
    let data = (0..width * height * 3).map(|i| (i % 251) as u8).collect();
    Image::new(width, height, PixelFormat::Rgb8, data).unwrap()
}

fn saliency() -> Array4<f32> {
    Array4::from_shape_fn((1, 1, 320, 320), |(_, _, y, x)| {
        let dx = x as f32 - 160.0;
        let dy = y as f32 - 160.0;
        (dx * dx + dy * dy).sqrt() * -0.05 + 6.0
    })
}

fn benchmark_preprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("preprocessing");

    for (width, height) in SIZES {
        let image = sample_image(width, height);
        group.bench_with_input(
            BenchmarkId::new("to_tensor", size_label(width, height)),
            &image,
            |b, image| {
                b.iter(|| black_box(ImagePreprocessor::preprocess_for_inference(image).unwrap()));
            },
        );
    }

    group.finish();
}

fn benchmark_mask_postprocessing(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask_postprocessing");
    let output = saliency();

    for (width, height) in SIZES {
        group.bench_with_input(
            BenchmarkId::new("output_to_mask", size_label(width, height)),
            &(width, height),
            |b, &(width, height)| {
                b.iter(|| {
                    black_box(SegmentationEngine::output_to_mask(&output, width, height).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn benchmark_compositing(c: &mut Criterion) {
    let mut group = c.benchmark_group("compositing");
    let output = saliency();

    for (width, height) in SIZES {
        let image = sample_image(width, height);
        let mask = SegmentationEngine::output_to_mask(&output, width, height).unwrap();
        let cutout = apply_alpha(&image, &mask).unwrap();
        let label = size_label(width, height);

        group.bench_with_input(BenchmarkId::new("apply_alpha", &label), &image, |b, image| {
            b.iter(|| black_box(apply_alpha(image, &mask).unwrap()));
        });
        group.bench_with_input(
            BenchmarkId::new("composite_background", &label),
            &cutout,
            |b, cutout| {
                b.iter(|| black_box(composite_background(cutout, Rgb::WHITE).unwrap()));
            },
        );
    }

    group.finish();
}

fn benchmark_end_to_end_mock(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let engine = SegmentationEngine::new(Box::new(MockBackend::new()), ModelConfig::default());
    let bytes = ImageCodec::encode(&sample_image(1024, 768), OutputFormat::Png).unwrap();

    let mut group = c.benchmark_group("end_to_end");
    group.sample_size(20);
    group.bench_function("remove_background_from_bytes_mock", |b| {
        b.iter(|| {
            rt.block_on(async {
                black_box(remove_background_from_bytes(&bytes, &engine).await.unwrap())
            })
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    benchmark_preprocessing,
    benchmark_mask_postprocessing,
    benchmark_compositing,
    benchmark_end_to_end_mock
);
criterion_main!(benches);
