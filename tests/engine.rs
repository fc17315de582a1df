//! End-to-end tests of the task engine through the service API

use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::{Duration, Instant};

use batchresize::config::FillSpec;
use batchresize::{
    Config, Download, FileId, FillColor, IncomingFile, ResizeError, ResizePolicy, ResizeRequest,
    ResizeService, ResizeUnit, TaskStatus, UnitFailure, UnitOutput, UnitResizer,
};
use image::{DynamicImage, ImageOutputFormat, Rgba, RgbaImage};
use parking_lot::Mutex;
use tempfile::TempDir;

fn config_in(dir: &TempDir, workers: usize) -> Config {
    let mut config = Config::default();
    config.storage.upload_dir = dir.path().join("uploads");
    config.storage.output_dir = dir.path().join("outputs");
    config.processing.workers = Some(workers);
    config
}

fn source_name(unit: &ResizeUnit) -> String {
    let stored = unit.source.file_name().unwrap().to_string_lossy().to_string();
    // stored as "<file id>_<name>"
    stored.split_once('_').unwrap().1.to_string()
}

fn write_marker(unit: &ResizeUnit) -> UnitOutput {
    std::fs::write(&unit.output_path, b"png").unwrap();
    UnitOutput {
        output_id: unit.output_id,
        path: unit.output_path.clone(),
        width: unit.width,
        height: unit.height,
        file_size: 3,
        processing_time: Duration::from_millis(1),
    }
}

/// Sleeps per unit and records when each unit ran
#[derive(Default)]
struct TimingResizer {
    spans: Mutex<Vec<(String, Instant, Instant)>>,
}

impl UnitResizer for TimingResizer {
    fn resize(&self, unit: &ResizeUnit) -> Result<UnitOutput, UnitFailure> {
        let start = Instant::now();
        std::thread::sleep(Duration::from_millis(60));
        let output = write_marker(unit);
        self.spans.lock().push((source_name(unit), start, Instant::now()));
        Ok(output)
    }
}

/// Fails `bad*` sources, panics on `boom*`, records fill specs
#[derive(Default)]
struct ScriptedResizer {
    fills: Mutex<Vec<(String, FillSpec)>>,
}

impl UnitResizer for ScriptedResizer {
    fn resize(&self, unit: &ResizeUnit) -> Result<UnitOutput, UnitFailure> {
        let name = source_name(unit);
        self.fills.lock().push((name.clone(), unit.fill));
        if name.starts_with("boom") {
            panic!("decoder exploded on {}", name);
        }
        if name.starts_with("bad") {
            return Err(UnitFailure::new(&unit.source, "not an image"));
        }
        std::thread::sleep(Duration::from_millis(5));
        Ok(write_marker(unit))
    }
}

async fn upload_named(service: &ResizeService, names: &[&str]) -> Vec<FileId> {
    let files = names
        .iter()
        .map(|name| IncomingFile::new(*name, "image/png", vec![1, 2, 3]))
        .collect();
    service
        .upload(files)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect()
}

fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

#[tokio::test]
async fn test_waves_never_overlap() {
    let dir = TempDir::new().unwrap();
    let resizer = Arc::new(TimingResizer::default());
    let service = ResizeService::with_resizer(config_in(&dir, 2), resizer.clone()).unwrap();

    let ids = upload_named(&service, &["0.png", "1.png", "2.png", "3.png", "4.png"]).await;
    let handle = service.start_resize(ResizeRequest::new(ids, 10, 10)).unwrap();
    let outcome = handle.wait().await.unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!(outcome.succeeded, 5);

    let spans = resizer.spans.lock().clone();
    let span = |name: &str| spans.iter().find(|(n, _, _)| n == name).unwrap().clone();
    let wave_end = |names: &[&str]| names.iter().map(|n| span(n).2).max().unwrap();
    let wave_start = |names: &[&str]| names.iter().map(|n| span(n).1).min().unwrap();

    assert!(wave_start(&["2.png", "3.png"]) >= wave_end(&["0.png", "1.png"]));
    assert!(wave_start(&["4.png"]) >= wave_end(&["2.png", "3.png"]));
}

#[tokio::test]
async fn test_progress_never_exceeds_total() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 2), Arc::new(TimingResizer::default()))
            .unwrap();

    let ids = upload_named(&service, &["a.png", "b.png", "c.png", "d.png"]).await;
    let handle = service.start_resize(ResizeRequest::new(ids, 10, 10)).unwrap();
    let task_id = handle.id();

    let mut last_done = 0;
    loop {
        let report = service.progress(&task_id).unwrap();
        let done = report.completed + report.failed;
        assert!(done <= report.total);
        assert!(done >= last_done);
        assert!((0.0..=100.0).contains(&report.percent));
        last_done = done;
        if report.status.is_terminal() {
            assert_eq!(report.percent, 100.0);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.wait().await.unwrap();
    assert_eq!(service.metrics().snapshot().active_tasks, 0);
}

#[tokio::test]
async fn test_partial_failure_and_strict_mode() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 2), Arc::new(ScriptedResizer::default()))
            .unwrap();
    let ids = upload_named(&service, &["good.png", "bad.png"]).await;
    let outcome = service
        .start_resize(ResizeRequest::new(ids, 10, 10))
        .unwrap()
        .wait()
        .await
        .unwrap();
    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!((outcome.succeeded, outcome.failed), (1, 1));

    let strict_dir = TempDir::new().unwrap();
    let mut config = config_in(&strict_dir, 2);
    config.processing.fail_on_partial = true;
    let strict = ResizeService::with_resizer(config, Arc::new(ScriptedResizer::default())).unwrap();
    let ids = upload_named(&strict, &["good.png", "bad.png"]).await;
    let handle = strict.start_resize(ResizeRequest::new(ids, 10, 10)).unwrap();
    let task_id = handle.id();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Error);
    assert_eq!(outcome.error.as_deref(), Some("1 of 2 images failed to resize"));
    assert!(matches!(
        strict.download(&task_id).await,
        Err(ResizeError::TaskNotTerminal(_))
    ));
}

#[tokio::test]
async fn test_panicking_unit_counts_as_failure() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 4), Arc::new(ScriptedResizer::default()))
            .unwrap();
    let ids = upload_named(&service, &["good.png", "boom.png", "good2.png"]).await;

    let handle = service.start_resize(ResizeRequest::new(ids, 10, 10)).unwrap();
    let task_id = handle.id();
    let outcome = handle.wait().await.unwrap();

    assert_eq!(outcome.status, TaskStatus::Completed);
    assert_eq!((outcome.succeeded, outcome.failed), (2, 1));
    assert!(outcome.error.is_none());

    let task = service.result(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.outputs.len(), 2);
    assert!(task.outputs.iter().all(|o| o.path.exists()));
    assert!(task.error.is_none());
}

#[tokio::test]
async fn test_finished_task_reads_are_stable() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 2), Arc::new(ScriptedResizer::default()))
            .unwrap();
    let ids = upload_named(&service, &["a.png", "bad.png", "c.png"]).await;

    let handle = service.start_resize(ResizeRequest::new(ids, 12, 8)).unwrap();
    let task_id = handle.id();
    handle.wait().await.unwrap();

    let first = service.progress(&task_id).unwrap();
    let second = service.progress(&task_id).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.percent, 66.67);

    let first = service.result(&task_id).unwrap();
    let second = service.result(&task_id).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.status, second.status);
    assert_eq!(
        (first.total, first.completed, first.failed),
        (second.total, second.completed, second.failed)
    );
    assert_eq!(first.outputs, second.outputs);
    assert_eq!(first.error, second.error);
    assert_eq!(first.policy, second.policy);
    assert_eq!((first.width, first.height), (second.width, second.height));
    assert_eq!(first.created_at, second.created_at);
    assert_eq!((first.completed, first.failed), (2, 1));
}

#[tokio::test]
async fn test_fill_color_precedence() {
    let dir = TempDir::new().unwrap();
    let resizer = Arc::new(ScriptedResizer::default());
    let service = ResizeService::with_resizer(config_in(&dir, 4), resizer.clone()).unwrap();
    let ids = upload_named(&service, &["override.png", "global.png"]).await;

    let red = FillColor::new(255, 0, 0);
    let blue = FillColor::new(0, 0, 255);
    let request = ResizeRequest::new(ids.clone(), 10, 10)
        .policy(ResizePolicy::Fit)
        .fill_color(blue)
        .fill_color_for(ids[0], red);
    service.start_resize(request).unwrap().wait().await.unwrap();

    let fills = resizer.fills.lock().clone();
    let fill_of = |name: &str| fills.iter().find(|(n, _)| n == name).unwrap().1;
    assert_eq!(fill_of("override.png"), FillSpec::Explicit(red));
    assert_eq!(fill_of("global.png"), FillSpec::Explicit(blue));

    resizer.fills.lock().clear();
    let request = ResizeRequest::new(vec![ids[1]], 10, 10).policy(ResizePolicy::Fill);
    service.start_resize(request).unwrap().wait().await.unwrap();
    assert_eq!(resizer.fills.lock()[0].1, FillSpec::Dominant);

    resizer.fills.lock().clear();
    let request = ResizeRequest::new(vec![ids[1]], 10, 10).policy(ResizePolicy::Fit);
    service.start_resize(request).unwrap().wait().await.unwrap();
    assert_eq!(resizer.fills.lock()[0].1, FillSpec::Default);
}

#[tokio::test]
async fn test_rejected_requests() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 1), Arc::new(ScriptedResizer::default()))
            .unwrap();

    let unknown = ResizeRequest::new(vec![FileId::new()], 10, 10);
    assert!(matches!(service.start_resize(unknown), Err(ResizeError::EmptyBatch)));

    let ids = upload_named(&service, &["a.png"]).await;
    for (width, height) in [(0, 10), (10, 0), (10_001, 10)] {
        let err = service
            .start_resize(ResizeRequest::new(ids.clone(), width, height))
            .unwrap_err();
        assert!(err.is_client_error());
    }
    assert!(service.registry().is_empty());
}

#[tokio::test]
async fn test_cleanup_counts_missing_outputs() {
    let dir = TempDir::new().unwrap();
    let service =
        ResizeService::with_resizer(config_in(&dir, 2), Arc::new(ScriptedResizer::default()))
            .unwrap();
    let ids = upload_named(&service, &["a.png", "b.png"]).await;
    let handle = service.start_resize(ResizeRequest::new(ids, 10, 10)).unwrap();
    let task_id = handle.id();
    handle.wait().await.unwrap();

    let task = service.result(&task_id).unwrap();
    std::fs::remove_file(&task.outputs[0].path).unwrap();

    let report = service.cleanup(&task_id).await.unwrap();
    assert_eq!(report.outputs.removed, 1);
    assert_eq!(report.outputs.failed, 1);
    assert_eq!(report.failed(), 1);
    assert!(!task.outputs[1].path.exists());

    assert!(service.progress(&task_id).unwrap_err().is_not_found());
    assert!(service.cleanup(&task_id).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_pixel_geometry_end_to_end() {
    let dir = TempDir::new().unwrap();
    let service = ResizeService::new(config_in(&dir, 2)).unwrap();
    let uploaded = service
        .upload(vec![IncomingFile::new(
            "wide.png",
            "image/png",
            png_bytes(400, 300, [200, 0, 0, 255]),
        )])
        .await
        .unwrap();

    let request = ResizeRequest::new(vec![uploaded[0].id], 100, 100)
        .policy(ResizePolicy::Fit)
        .fill_color(FillColor::new(0, 0, 0));
    let handle = service.start_resize(request).unwrap();
    let task_id = handle.id();
    assert_eq!(handle.wait().await.unwrap().status, TaskStatus::Completed);

    let download = service.download(&task_id).await.unwrap();
    assert_eq!(download.filename(), "resized_wide.png");
    assert_eq!(download.content_type(), "image/png");

    let image = image::load_from_memory(download.bytes()).unwrap().to_rgba8();
    assert_eq!(image.dimensions(), (100, 100));
    assert_eq!(*image.get_pixel(0, 0), Rgba([0, 0, 0, 255]));
    assert_eq!(*image.get_pixel(50, 50), Rgba([200, 0, 0, 255]));

    for policy in [ResizePolicy::Fill, ResizePolicy::Stretch] {
        let request = ResizeRequest::new(vec![uploaded[0].id], 64, 32).policy(policy);
        let handle = service.start_resize(request).unwrap();
        let task_id = handle.id();
        handle.wait().await.unwrap();
        let download = service.download(&task_id).await.unwrap();
        let image = image::load_from_memory(download.bytes()).unwrap();
        assert_eq!((image.width(), image.height()), (64, 32));
    }
}

#[tokio::test]
async fn test_multiple_outputs_download_as_archive() {
    let dir = TempDir::new().unwrap();
    let service = ResizeService::new(config_in(&dir, 2)).unwrap();
    let uploaded = service
        .upload(vec![
            IncomingFile::new("a.png", "image/png", png_bytes(20, 10, [0, 255, 0, 255])),
            IncomingFile::new("dir/a.png", "image/png", png_bytes(10, 20, [0, 0, 255, 255])),
            IncomingFile::new("b.png", "image/png", png_bytes(10, 10, [9, 9, 9, 255])),
        ])
        .await
        .unwrap();

    let ids = uploaded.iter().map(|f| f.id).collect();
    let handle = service.start_resize(ResizeRequest::new(ids, 16, 16)).unwrap();
    let task_id = handle.id();
    handle.wait().await.unwrap();

    let download = service.download(&task_id).await.unwrap();
    assert!(matches!(download, Download::Archive { .. }));
    assert_eq!(download.filename(), "resized_images.zip");

    let mut archive = zip::ZipArchive::new(Cursor::new(download.bytes().to_vec())).unwrap();
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    assert_eq!(names, ["resized_a.png", "resized_a_2.png", "resized_b.png"]);

    let mut entry = Vec::new();
    archive.by_name("resized_b.png").unwrap().read_to_end(&mut entry).unwrap();
    let image = image::load_from_memory(&entry).unwrap();
    assert_eq!((image.width(), image.height()), (16, 16));

    let written = download.write_to(dir.path()).await.unwrap();
    assert_eq!(written, dir.path().join("resized_images.zip"));
}
