use anyhow::Context;
use opencv::core::{Mat, Point, Rect, Scalar, CV_8UC3};
use opencv::{imgproc, prelude::*};
use robovision::align::align_images;
use robovision::station::{RESET_TEXT, STARTED_TEXT};
use robovision::StationContext;
use robovision_core::config::{StationConfig, TriggerConfig};
use robovision_core::device::DeviceDescriptor;
use robovision_core::error::ReadError;
use robovision_core::events::{event_channel, EventReceiver, StationEvent};
use robovision_core::frame::{Frame, PixelFormat};
use robovision_core::{FrameSource, OpenResult, SourceOpener};
use robovision_cv::{utils::ImageUtils, AlignmentInspector, Result};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Usage {
    opened: AtomicUsize,
    closed: AtomicUsize,
}

struct FakeCamera {
    descriptor: DeviceDescriptor,
    usage: Arc<Usage>,
    open: bool,
}

impl FrameSource for FakeCamera {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn read_frame(&mut self, _timeout: Duration) -> std::result::Result<Frame, ReadError> {
        thread::sleep(Duration::from_millis(2));
        Frame::new(vec![7; 2 * 2 * 3], 2, 2, PixelFormat::Bgr8)
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.usage.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.close();
    }
}

fn fake_opener(usage: Arc<Usage>) -> Arc<dyn SourceOpener> {
    Arc::new(
        move |descriptor: &DeviceDescriptor| -> OpenResult {
            usage.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeCamera {
                descriptor: descriptor.clone(),
                usage: Arc::clone(&usage),
                open: true,
            }))
        },
    )
}

fn test_config() -> StationConfig {
    let mut config = StationConfig::default();
    config.camera.read_timeout_ms = 10;
    config.camera.poll_interval_ms = 5;
    config.camera.stop_timeout_ms = 1000;
    config.trigger = TriggerConfig {
        port: 0,
        read_timeout_ms: 100,
        accept_poll_ms: 10,
        stop_timeout_ms: 1000,
        drain_timeout_ms: 20,
        ..TriggerConfig::default()
    };
    config
}

fn station() -> (StationContext, EventReceiver, Arc<Usage>) {
    let usage = Arc::new(Usage::default());
    let (tx, rx) = event_channel();
    let station = StationContext::with_opener(test_config(), tx, fake_opener(Arc::clone(&usage)));
    (station, rx, usage)
}

fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

fn drain(rx: &EventReceiver) -> Vec<StationEvent> {
    std::iter::from_fn(|| rx.try_recv()).collect()
}

fn send_and_ack(stream: &mut TcpStream, text: &str) -> Result<String> {
    stream.write_all(text.as_bytes())?;
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

#[test]
fn test_camera_connect_and_leave_page_release_device() -> Result<()> {
    let (station, _rx, usage) = station();

    station.connect_camera()?;
    assert!(wait_until(Duration::from_secs(2), || station.mailbox().latest().is_some()));
    assert!(station.is_camera_running());

    station.leave_page();
    assert!(!station.is_camera_running());
    assert!(station.mailbox().latest().is_none());
    assert_eq!(usage.opened.load(Ordering::SeqCst), 1);
    assert_eq!(usage.closed.load(Ordering::SeqCst), 1);

    // Reconnect after leaving the page
    station.connect_camera()?;
    assert!(wait_until(Duration::from_secs(2), || station.mailbox().latest().is_some()));
    station.disconnect_camera();
    assert_eq!(usage.closed.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_trigger_counts_cycles_and_reset_clears() -> Result<()> {
    let (station, rx, _usage) = station();
    station.start_trigger()?;
    assert!(station.is_trigger_running());
    let addr = station.trigger_addr().context("trigger not bound")?;

    let mut client = TcpStream::connect(addr)?;
    client.set_read_timeout(Some(Duration::from_secs(2)))?;
    for _ in 0..3 {
        assert_eq!(send_and_ack(&mut client, "finnish")?, "Server received: finnish");
    }
    let mut events = Vec::new();
    let cycles_logged = wait_until(Duration::from_secs(2), || {
        events.extend(drain(&rx));
        events
            .iter()
            .filter(|e| matches!(e, StationEvent::Log(text) if text.starts_with("Cycle complete")))
            .count()
            == 3
    });
    assert!(cycles_logged);
    assert_eq!(station.counter().get(), 3);
    assert!(events.contains(&StationEvent::Result("Count: 3".into())));

    station.reset_process();
    assert_eq!(station.counter().get(), 0);
    assert_eq!(drain(&rx), vec![StationEvent::Result(RESET_TEXT.into())]);

    station.stop_trigger();
    assert!(!station.is_trigger_running());
    assert!(station.trigger_addr().is_none());
    Ok(())
}

#[test]
fn test_bind_failure_leaves_camera_running() -> Result<()> {
    let occupied = TcpListener::bind("127.0.0.1:0")?;
    let usage = Arc::new(Usage::default());
    let (tx, rx) = event_channel();
    let mut config = test_config();
    config.trigger.port = occupied.local_addr()?.port();
    let station = StationContext::with_opener(config, tx, fake_opener(Arc::clone(&usage)));

    station.connect_camera()?;
    assert!(station.start_trigger().is_err());
    assert!(!station.is_trigger_running());
    assert!(!station.controller().is_running());

    assert!(wait_until(Duration::from_secs(2), || station.mailbox().latest().is_some()));
    assert!(station.is_camera_running());
    let events = drain(&rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, StationEvent::Status(text) if text.starts_with("Trigger error"))));
    Ok(())
}

#[test]
fn test_shutdown_is_idempotent_and_final() -> Result<()> {
    let (station, rx, usage) = station();
    station.connect_camera()?;
    station.start_trigger()?;
    station.start_process();
    assert!(drain(&rx).contains(&StationEvent::Result(STARTED_TEXT.into())));

    let started = Instant::now();
    station.shutdown();
    station.shutdown();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(!station.is_camera_running());
    assert!(!station.is_trigger_running());
    assert_eq!(usage.closed.load(Ordering::SeqCst), usage.opened.load(Ordering::SeqCst));
    assert!(station.connect_camera().is_err());
    assert!(station.start_trigger().is_err());
    Ok(())
}

const PART: (i32, i32) = (40, 30);

fn draw_part(image: &mut Mat, origin: Point, notch: bool) -> Result<()> {
    imgproc::rectangle(
        image,
        Rect::new(origin.x, origin.y, PART.0, PART.1),
        Scalar::all(230.0),
        -1,
        imgproc::LINE_8,
        0,
    )?;
    let inner = if notch {
        Rect::new(origin.x + 5, origin.y + 5, 12, 20)
    } else {
        Rect::new(origin.x + 20, origin.y + 8, 14, 8)
    };
    imgproc::rectangle(image, inner, Scalar::all(30.0), -1, imgproc::LINE_8, 0)?;
    Ok(())
}

#[test]
fn test_offline_alignment_writes_outputs() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let mut scene = Mat::new_rows_cols_with_default(240, 320, CV_8UC3, Scalar::all(90.0))?;
    draw_part(&mut scene, Point::new(40, 40), true)?;
    draw_part(&mut scene, Point::new(200, 150), false)?;
    let scene_path = dir.path().join("scene.png");
    ImageUtils::save_image(&scene, &scene_path)?;

    let pattern_a = dir.path().join("a.png");
    let pattern_b = dir.path().join("b.png");
    let crop_a = Mat::roi(&scene, Rect::new(40, 40, PART.0, PART.1))?.try_clone()?;
    let crop_b = Mat::roi(&scene, Rect::new(200, 150, PART.0, PART.1))?.try_clone()?;
    ImageUtils::save_image(&crop_a, &pattern_a)?;
    ImageUtils::save_image(&crop_b, &pattern_b)?;

    let mut config = StationConfig::default();
    config.matching.pattern_a = Some(pattern_a);
    config.matching.pattern_b = Some(pattern_b);
    let inspector = AlignmentInspector::from_config(&config.matching)?;

    let output = dir.path().join("out");
    let records = align_images(&inspector, &[scene_path], &output)?;
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.annotated, output.join("scene_match.png"));
    assert!(record.annotated.exists());
    assert!(output.join("scene_match.json").exists());

    let geometry = record.report.geometry.context("both patterns should be found")?;
    assert!((geometry.c1.x - 60.0).abs() <= 2.0 && (geometry.c1.y - 55.0).abs() <= 2.0);
    assert!((geometry.c2.x - 220.0).abs() <= 2.0 && (geometry.c2.y - 165.0).abs() <= 2.0);
    assert!(geometry.angle_deg.is_some());
    Ok(())
}
