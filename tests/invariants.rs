//! Contract Invariant Tests
//!
//! These tests verify the pipeline's batch-level guarantees end to end.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use tempfile::{tempdir, TempDir};

use imagebuild_core::{
    ImagePipeline, Images, PipelineConfig, PipelineError, SourceDescriptor, TransformInput,
    TransformOptions, TransformOutput, TransformRegistry,
};

struct Site {
    dir: TempDir,
    out: PathBuf,
}

impl Site {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let config = PipelineConfig::for_dist_dir(dir.path().join("dist"));
        config.ensure_output_root().unwrap();
        Self {
            out: config.output_root,
            dir,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn image(&self, rel: &str, width: u32, height: u32) -> PathBuf {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let buf = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
        });
        DynamicImage::ImageRgb8(buf).save(&path).unwrap();
        path
    }

    fn pipeline(&self, max_inline_size: u64, registry: TransformRegistry) -> ImagePipeline {
        let config = PipelineConfig::new(&self.out).with_max_inline_size(max_inline_size);
        ImagePipeline::new(config, registry).unwrap()
    }
}

fn options(value: Value) -> TransformOptions {
    match value {
        Value::Object(map) => map,
        _ => panic!("options must be an object"),
    }
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

fn decode_data_uri(uri: &str) -> DynamicImage {
    let (_, payload) = uri.split_once(";base64,").unwrap();
    let bytes = base64::engine::general_purpose::STANDARD.decode(payload).unwrap();
    image::load_from_memory(&bytes).unwrap()
}

/// Names the image after its source file so order can be checked from locators.
fn tagging_registry() -> TransformRegistry {
    let mut registry = TransformRegistry::new();
    registry
        .register("slow-first", |input: TransformInput<'_>| -> Result<TransformOutput, PipelineError> {
            // Early files finish last so arrival order differs from source order.
            let delay = match input.image.file_name_stem().as_str() {
                "a" => 300,
                "b" => 150,
                _ => 0,
            };
            std::thread::sleep(Duration::from_millis(delay));
            Ok(TransformOutput {
                image: Some(input.image),
                ..Default::default()
            })
        })
        .unwrap();
    registry
}

fn locators(images: Images) -> Vec<String> {
    images
        .into_vec()
        .into_iter()
        .map(|set| set.image.unwrap().data)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_small_copy_is_inlined() {
    let site = Site::new();
    let a = site.image("a.jpg", 64, 64);
    let mut pipeline = site.pipeline(file_size(&a), TransformRegistry::new());

    let images = pipeline
        .get(SourceDescriptor::file(&a), None, TransformOptions::new())
        .await
        .unwrap();

    let set = images.single().expect("one job returns a single set");
    let image = set.image.as_ref().unwrap();
    let expected = base64::engine::general_purpose::STANDARD.encode(fs::read(&a).unwrap());
    assert_eq!(image.data, format!("data:image/jpeg;base64,{expected}"));
    assert!(fs::read_dir(&site.out).unwrap().next().is_none(), "nothing written");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_large_copy_is_addressed_by_name() {
    let site = Site::new();
    let a = site.image("a.jpg", 64, 64);
    let mut pipeline = site.pipeline(file_size(&a) - 1, TransformRegistry::new());

    let images = pipeline
        .get(SourceDescriptor::file(&a), None, TransformOptions::new())
        .await
        .unwrap();

    assert_eq!(images.single().unwrap().image.as_ref().unwrap().data, "static/a.jpg");
    assert_eq!(fs::read(site.out.join("a.jpg")).unwrap(), fs::read(&a).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_transformed_asset_gets_hashed_name() {
    let site = Site::new();
    let a = site.image("a.jpg", 64, 64);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let first = pipeline
        .get(SourceDescriptor::file(&a), Some("builtin"), options(json!({"grayscale": true})))
        .await
        .unwrap();
    let second = pipeline
        .get(SourceDescriptor::file(&a), Some(" BUILTIN "), options(json!({"grayscale": true})))
        .await
        .unwrap();

    let locator = first.single().unwrap().image.as_ref().unwrap().data.clone();
    assert!(locator.starts_with("static/a.") && locator.ends_with(".jpg"));
    assert_ne!(locator, "static/a.jpg");
    assert_eq!(second.single().unwrap().image.as_ref().unwrap().data, locator);
    assert!(site.out.join(locator.trim_start_matches("static/")).is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_file_sources_keep_caller_order() {
    let site = Site::new();
    let a = site.image("a.jpg", 16, 16);
    let b = site.image("b.png", 16, 16);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let images = pipeline
        .get(
            vec![SourceDescriptor::file(&a), SourceDescriptor::file(&b)],
            None,
            TransformOptions::new(),
        )
        .await
        .unwrap();

    assert!(matches!(images, Images::Many(_)));
    assert_eq!(locators(images), vec!["static/a.jpg", "static/b.png"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_folder_expands_sorted_without_subdirectories() {
    let site = Site::new();
    site.image("imgs/b.png", 8, 8);
    site.image("imgs/a.jpg", 8, 8);
    site.image("imgs/subdir/c.png", 8, 8);
    fs::write(site.path("imgs/readme.txt"), b"not an image").unwrap();
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let images = pipeline
        .get(SourceDescriptor::folder(site.path("imgs")), None, TransformOptions::new())
        .await
        .unwrap();

    assert_eq!(locators(images), vec!["static/a.jpg", "static/b.png"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invariant_order_survives_out_of_order_completion() {
    let site = Site::new();
    let c = site.image("c.png", 8, 8);
    site.image("imgs/b.png", 8, 8);
    site.image("imgs/a.png", 8, 8);
    let d = site.image("d.png", 8, 8);
    // Nothing is inlined, so every locator carries its source's stem.
    let mut pipeline = site.pipeline(0, tagging_registry());
    let images = pipeline
        .get(
            vec![
                SourceDescriptor::file(&c),
                SourceDescriptor::folder(site.path("imgs")),
                SourceDescriptor::file(&d),
            ],
            Some("slow-first"),
            TransformOptions::new(),
        )
        .await
        .unwrap();
    let stems: Vec<String> = locators(images)
        .iter()
        .map(|l| l.trim_start_matches("static/").split('.').next().unwrap().to_string())
        .collect();
    assert_eq!(stems, vec!["c", "a", "b", "d"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_grayscale_carries_into_placeholder() {
    let site = Site::new();
    let a = site.image("a.png", 200, 100);
    let mut pipeline = site.pipeline(u64::MAX, TransformRegistry::new());

    let images = pipeline
        .get(
            SourceDescriptor::file(&a),
            Some("builtin"),
            options(json!({"grayscale": true, "usePlaceholder": true, "load": "lazy"})),
        )
        .await
        .unwrap();

    let set = images.single().unwrap();
    let placeholder = set.placeholder.as_ref().unwrap();
    assert_eq!((placeholder.width, placeholder.height), (Some(14), Some(7)));

    let pixels = decode_data_uri(&placeholder.data).to_rgb8();
    assert!(pixels.pixels().all(|p| p[0] == p[1] && p[1] == p[2]));
    assert_eq!(set.load, Some(imagebuild_core::LoadMode::Lazy));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_invalid_option_cancels_batch() {
    let site = Site::new();
    let a = site.image("a.jpg", 16, 16);
    let b = site.image("b.jpg", 16, 16);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let err = pipeline
        .get(
            vec![SourceDescriptor::file(&a), SourceDescriptor::file(&b)],
            Some("builtin"),
            options(json!({"quality": -1})),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::BuildCancelled));
    assert!(!pipeline.is_running(), "pool is torn down on a fatal result");

    // The pipeline recovers for the next batch.
    let images = pipeline
        .get(SourceDescriptor::file(&a), None, TransformOptions::new())
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert!(pipeline.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_abandoned_batch_does_not_leak_into_next() {
    let site = Site::new();
    let a = site.image("a.png", 8, 8);
    let c = site.image("c.png", 8, 8);
    let mut pipeline = site.pipeline(0, tagging_registry());

    // "a" takes 300ms; the caller gives up long before that.
    let abandoned = tokio::time::timeout(
        Duration::from_millis(50),
        pipeline.get(SourceDescriptor::file(&a), Some("slow-first"), TransformOptions::new()),
    )
    .await;
    assert!(abandoned.is_err());
    assert!(!pipeline.is_running(), "dropped batch takes its pool with it");

    // Let the abandoned job finish so a leaked result would be waiting.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let images = pipeline
        .get(SourceDescriptor::file(&c), Some("slow-first"), TransformOptions::new())
        .await
        .unwrap();
    let data = &images.single().unwrap().image.as_ref().unwrap().data;
    assert!(data.starts_with("static/c."), "got {data}");
    assert!(pipeline.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_one_corrupt_file_cancels_batch() {
    let site = Site::new();
    site.image("imgs/a.png", 8, 8);
    fs::write(site.path("imgs/b.png"), b"garbage").unwrap();
    site.image("imgs/c.png", 8, 8);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let result = pipeline
        .get(SourceDescriptor::folder(site.path("imgs")), Some("builtin"), TransformOptions::new())
        .await;
    assert!(matches!(result, Err(PipelineError::BuildCancelled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_invalid_source_fails_before_dispatch() {
    let site = Site::new();
    let a = site.image("a.jpg", 8, 8);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let err = pipeline
        .get(
            vec![SourceDescriptor::file(&a), SourceDescriptor::file(site.path("missing.jpg"))],
            None,
            TransformOptions::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::InvalidSource(_)));
    assert!(!pipeline.is_running());
    assert!(!site.out.join("a.jpg").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_unknown_transform_fails_before_dispatch() {
    let site = Site::new();
    let a = site.image("a.jpg", 8, 8);
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let err = pipeline
        .get(SourceDescriptor::file(&a), Some("sepia"), TransformOptions::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::TransformNotFound(_)));
    assert!(!pipeline.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_empty_folder_resolves_without_workers() {
    let site = Site::new();
    fs::create_dir_all(site.path("empty")).unwrap();
    fs::write(site.path("empty/notes.txt"), b"x").unwrap();
    let mut pipeline = site.pipeline(0, TransformRegistry::new());

    let images = pipeline
        .get(SourceDescriptor::folder(site.path("empty")), None, TransformOptions::new())
        .await
        .unwrap();

    assert!(images.is_empty());
    assert_eq!(serde_json::to_value(&images).unwrap(), json!([]));
    assert!(!pipeline.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_result_count_matches_file_count() {
    let site = Site::new();
    for i in 0..9 {
        site.image(&format!("many/{i:02}.png"), 4, 4);
    }
    let extra = site.image("extra.bmp", 4, 4);
    let mut pipeline = site.pipeline(u64::MAX, TransformRegistry::new());

    let images = pipeline
        .get(
            vec![SourceDescriptor::folder(site.path("many")), SourceDescriptor::file(&extra)],
            Some("builtin"),
            options(json!({"useResponsive": true})),
        )
        .await
        .unwrap();

    let sets = images.into_vec();
    assert_eq!(sets.len(), 10);
    assert!(sets.iter().all(|s| s.responsive.as_ref().map(Vec::len) == Some(4)));
    assert!(sets[9].image.as_ref().unwrap().data.starts_with("data:image/bmp;base64,"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invariant_hung_job_times_out_when_configured() {
    let site = Site::new();
    let a = site.image("a.png", 4, 4);
    let mut registry = TransformRegistry::new();
    registry
        .register("stall", |input: TransformInput<'_>| -> Result<TransformOutput, PipelineError> {
            std::thread::sleep(Duration::from_millis(500));
            Ok(TransformOutput {
                image: Some(input.image),
                ..Default::default()
            })
        })
        .unwrap();

    let config = PipelineConfig::new(&site.out).with_job_timeout(Duration::from_millis(50));
    let mut pipeline = ImagePipeline::new(config, registry).unwrap();

    let err = pipeline
        .get(SourceDescriptor::file(&a), Some("stall"), TransformOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::BuildCancelled));
    assert!(!pipeline.is_running());
}
