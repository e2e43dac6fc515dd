use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crossbeam_channel::Receiver;
use eframe::egui::{Pos2, Rect, Vec2};
use image::RgbImage;
use video_annotator::{
    observer::observer_channel, work_queue, AnnotationController, AnnotationStore, FrameIndex,
    InferenceError, Mask, Point, Polarity, ProcessOutcome, SegmentationOracle, SegmentationWorker,
    WorkerEvent,
};

const POLL: Duration = Duration::from_millis(50);

/// Marks the left half of the image. Fails for images which are 77 pixels wide.
#[derive(Clone, Default)]
struct ScriptedOracle {
    calls: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl ScriptedOracle {
    fn calls(&self) -> Vec<(usize, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

impl SegmentationOracle for ScriptedOracle {
    fn segment(
        &mut self,
        image: &Arc<RgbImage>,
        positive_points: &[Point],
        negative_points: &[Point],
    ) -> Result<Mask, InferenceError> {
        self.calls
            .lock()
            .unwrap()
            .push((positive_points.len(), negative_points.len()));
        if image.width() == 77 {
            return Err(InferenceError::UnexpectedOutput("scripted failure".into()));
        }
        let half = image.width() / 2;
        Ok(Mask::from_fn(image.width(), image.height(), |x, _| x < half))
    }
}

fn next_update(events: &Receiver<WorkerEvent>) -> Option<FrameIndex> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(timeout) {
            Ok(WorkerEvent::FrameUpdated(frame)) => return Some(frame),
            Ok(WorkerEvent::Status(_)) => continue,
            Err(_) => return None,
        }
    }
    None
}

// Viewport which shows a 640x480 image unscaled
fn viewport() -> Rect {
    Rect::from_min_size(Pos2::ZERO, Vec2::new(640., 480.))
}

#[test]
fn click_is_segmented_and_reported() {
    let store = AnnotationStore::default();
    let oracle = ScriptedOracle::default();
    let (sender, receiver) = work_queue();
    let (observer, events) = observer_channel();
    let worker =
        SegmentationWorker::new(store.clone(), Box::new(oracle.clone()), Arc::new(observer));
    let handle = worker.spawn(receiver, POLL).unwrap();
    let mut controller = AnnotationController::new(store.clone(), sender);
    controller.set_current_frame(5);

    let image = Arc::new(RgbImage::new(640, 480));
    controller
        .on_click(5, &image, Pos2::new(100., 100.), viewport(), Polarity::Positive, "cat")
        .unwrap();
    let record = store.get(5).unwrap().record("cat").unwrap().clone();
    assert_eq!(&[Point::new(100., 100.)], record.positive_points());

    assert_eq!(Some(5), next_update(&events));
    assert_eq!(vec![(1, 0)], oracle.calls());

    let frame = store.get(5).unwrap();
    assert_eq!(320 * 480, frame.record("cat").unwrap().segmentation().unwrap().count());
    let composite = frame.segmented_image().unwrap().clone();
    assert!(Arc::ptr_eq(&composite, &controller.on_worker_done(5).unwrap()));
    // Positive marker on top of the overlay
    assert_eq!(&image::Rgb([0, 255, 0]), composite.get_pixel(100, 100));

    handle.stop().unwrap();
}

#[test]
fn opposite_click_cancels_and_requeues() {
    let store = AnnotationStore::default();
    let (sender, receiver) = work_queue();
    let mut controller = AnnotationController::new(store.clone(), sender);
    let image = Arc::new(RgbImage::new(640, 480));

    controller
        .on_click(5, &image, Pos2::new(100., 100.), viewport(), Polarity::Positive, "cat")
        .unwrap();
    controller
        .on_click(5, &image, Pos2::new(300., 300.), viewport(), Polarity::Positive, "cat")
        .unwrap();
    controller
        .on_click(5, &image, Pos2::new(120., 90.), viewport(), Polarity::Negative, "cat")
        .unwrap();

    let frame = store.get(5).unwrap();
    let record = frame.record("cat").unwrap();
    assert_eq!(&[Point::new(300., 300.)], record.positive_points());
    assert!(record.negative_points().is_empty());
    assert!(record.is_stale());
    assert_eq!(3, receiver.len());
}

#[test]
fn cancelling_the_only_point_removes_the_frame() {
    let store = AnnotationStore::default();
    let oracle = ScriptedOracle::default();
    let (sender, receiver) = work_queue();
    let mut controller = AnnotationController::new(store.clone(), sender);
    let image = Arc::new(RgbImage::new(640, 480));

    controller
        .on_click(5, &image, Pos2::new(100., 100.), viewport(), Polarity::Positive, "cat")
        .unwrap();
    controller
        .on_click(5, &image, Pos2::new(100., 100.), viewport(), Polarity::Negative, "cat")
        .unwrap();
    assert!(store.get(5).is_none());

    let mut worker = SegmentationWorker::new(
        store.clone(),
        Box::new(oracle.clone()),
        Arc::new(observer_channel().0),
    );
    assert_eq!(2, receiver.len());
    assert_eq!(ProcessOutcome::Missing, worker.process_frame(5));
    assert!(oracle.calls().is_empty());
}

#[test]
fn add_then_cancel_restores_points() {
    let image = Arc::new(RgbImage::new(640, 480));
    let existing = [
        (Point::new(10., 10.), Polarity::Positive),
        (Point::new(500., 400.), Polarity::Negative),
        (Point::new(600., 20.), Polarity::Positive),
    ];
    let clicks = [
        (Point::new(300., 250.), Polarity::Positive, Point::new(340., 200.)),
        (Point::new(300., 250.), Polarity::Negative, Point::new(300., 250.)),
        (Point::new(320., 100.), Polarity::Negative, Point::new(250., 110.)),
    ];
    for (point, polarity, cancel_at) in clicks {
        let store = AnnotationStore::default();
        for (p, pol) in existing {
            store.add_point(0, "cat", p, pol, &image).unwrap();
        }
        let before = store.get(0).unwrap().record("cat").unwrap().clone();

        store.add_point(0, "cat", point, polarity, &image).unwrap();
        store
            .add_point(0, "cat", cancel_at, polarity.opposite(), &image)
            .unwrap();

        let after = store.get(0).unwrap().record("cat").unwrap().clone();
        assert_eq!(before.positive_points(), after.positive_points());
        assert_eq!(before.negative_points(), after.negative_points());
        assert!(after.is_stale());
    }
}

#[test]
fn oracle_failure_doesnt_stop_the_worker() {
    let store = AnnotationStore::default();
    let oracle = ScriptedOracle::default();
    let (sender, receiver) = work_queue();
    let (observer, events) = observer_channel();

    let failing = Arc::new(RgbImage::new(77, 40));
    let fine = Arc::new(RgbImage::new(80, 40));
    store
        .add_point(7, "cat", Point::new(1., 1.), Polarity::Positive, &failing)
        .unwrap();
    store
        .add_point(8, "cat", Point::new(1., 1.), Polarity::Positive, &fine)
        .unwrap();
    sender.push(7);
    sender.push(8);

    let worker =
        SegmentationWorker::new(store.clone(), Box::new(oracle.clone()), Arc::new(observer));
    let handle = worker.spawn(receiver, POLL).unwrap();
    assert_eq!(Some(7), next_update(&events));
    assert_eq!(Some(8), next_update(&events));
    handle.stop().unwrap();

    let frame = store.get(7).unwrap();
    assert!(frame.record("cat").unwrap().is_stale());
    assert!(frame.segmented_image().is_none());
    let frame = store.get(8).unwrap();
    assert!(!frame.record("cat").unwrap().is_stale());
    assert!(frame.segmented_image().is_some());
    assert_eq!(2, oracle.calls().len());
}

#[test]
fn duplicate_enqueues_are_harmless() {
    let store = AnnotationStore::default();
    let oracle = ScriptedOracle::default();
    let image = Arc::new(RgbImage::new(64, 64));
    store
        .add_point(3, "cat", Point::new(5., 5.), Polarity::Positive, &image)
        .unwrap();

    let mut worker = SegmentationWorker::new(
        store.clone(),
        Box::new(oracle.clone()),
        Arc::new(observer_channel().0),
    );
    assert_eq!(ProcessOutcome::Published, worker.process_frame(3));
    assert_eq!(ProcessOutcome::Published, worker.process_frame(3));

    assert_eq!(1, oracle.calls().len());
    let frame = store.get(3).unwrap();
    assert_eq!(1, frame.records().count());
    assert_eq!(1, frame.record("cat").unwrap().positive_points().len());
}

#[test]
fn composite_requires_every_record_to_be_segmented() {
    let store = AnnotationStore::default();
    let image = Arc::new(RgbImage::new(77, 40));
    store
        .add_point(1, "cat", Point::new(1., 1.), Polarity::Positive, &image)
        .unwrap();
    let mut worker = SegmentationWorker::new(
        store.clone(),
        Box::new(ScriptedOracle::default()),
        Arc::new(observer_channel().0),
    );
    assert_eq!(
        ProcessOutcome::Incomplete { failed: 1 },
        worker.process_frame(1)
    );
    let frame = store.get(1).unwrap();
    assert!(frame.segmented_image().is_none());
    assert!(Arc::ptr_eq(&image, frame.display_image()));
}

#[test]
fn stop_wakes_idle_worker_within_one_poll() {
    let (_sender, receiver) = work_queue();
    let handle = SegmentationWorker::new(
        AnnotationStore::default(),
        Box::new(ScriptedOracle::default()),
        Arc::new(observer_channel().0),
    )
    .spawn(receiver, video_annotator::worker::DEFAULT_POLL_INTERVAL)
    .unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let start = Instant::now();
    handle.stop().unwrap();
    // One poll interval plus scheduling slack
    assert!(start.elapsed() < Duration::from_millis(900));
}

#[test]
fn closing_the_queue_ends_the_worker() {
    let (sender, receiver) = work_queue();
    let handle = SegmentationWorker::new(
        AnnotationStore::default(),
        Box::new(ScriptedOracle::default()),
        Arc::new(observer_channel().0),
    )
    .spawn(receiver, POLL)
    .unwrap();
    drop(sender);

    let deadline = Instant::now() + Duration::from_secs(5);
    while !handle.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(handle.is_finished());
}
