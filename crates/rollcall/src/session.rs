//! The live capture loop.
//!
//! RUNNING until the surface reports a quit request or the frame source
//! fails; either way the loop returns and the caller drops the camera and
//! window. Everything runs on the calling thread and blocks.

use crate::ledger::{Ledger, LedgerError, MarkOutcome};
use crate::notifier::Notifier;
use chrono::NaiveDateTime;
use rollcall_core::{FaceEngine, Gallery, MatchOutcome, Matcher};
use rollcall_hw::{DisplayError, Frame, FrameSource, Overlay, Surface};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("attendance ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("display: {0}")]
    Display(#[from] DisplayError),
}

/// Source of the wall-clock time used to stamp records.
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    Quit,
    DeviceLost(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    pub recorded: usize,
    pub stop: StopReason,
}

/// What happened in one frame.
#[derive(Debug, Default)]
pub struct FrameReport {
    /// Faces the engine found.
    pub faces: usize,
    /// One overlay per resolved face, in full-frame coordinates.
    pub overlays: Vec<Overlay>,
    /// Names newly written to the ledger.
    pub recorded: Vec<String>,
}

/// Everything the loop needs, built once at startup.
pub struct AttendanceContext<N: Notifier> {
    pub gallery: Gallery,
    pub matcher: Box<dyn Matcher>,
    pub ledger: Ledger,
    pub notifier: N,
}

impl<N: Notifier> AttendanceContext<N> {
    /// Detect, resolve and record the faces of one frame.
    ///
    /// Detection runs on a copy shrunk by `downscale`; boxes are mapped back
    /// before they are returned. An engine failure is logged and yields an
    /// empty report; a ledger failure is returned.
    pub fn process_frame(
        &mut self,
        engine: &mut dyn FaceEngine,
        frame: &Frame,
        downscale: u32,
        now: NaiveDateTime,
    ) -> Result<FrameReport, LedgerError> {
        let factor = downscale.max(1);
        let small = frame.downscale(factor);

        let faces = match engine.analyze(&small.data, small.width, small.height) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "face analysis failed; skipping frame");
                return Ok(FrameReport::default());
            }
        };

        let mut report = FrameReport {
            faces: faces.len(),
            ..FrameReport::default()
        };

        for face in faces {
            let name = match self.matcher.resolve(&self.gallery, &face.embedding) {
                MatchOutcome::Matched { name, distance, .. } => {
                    tracing::debug!(%name, distance, "face matched");
                    name
                }
                MatchOutcome::Unmatched { closest_distance } => {
                    tracing::debug!(?closest_distance, "face not recognized");
                    continue;
                }
                MatchOutcome::NoCandidate => continue,
            };

            let bbox = face.bbox.scaled(factor as f32);
            report.overlays.push(Overlay {
                x: bbox.x.round() as i32,
                y: bbox.y.round() as i32,
                width: bbox.width.round() as i32,
                height: bbox.height.round() as i32,
                label: name.clone(),
            });

            if let MarkOutcome::Recorded(_) = self.ledger.mark(&name, now)? {
                self.notifier.announce(&format!("Attendance marked for {name}"));
                report.recorded.push(name);
            }
        }

        Ok(report)
    }
}

/// Run the capture loop until quit or device failure.
pub fn run<N: Notifier>(
    ctx: &mut AttendanceContext<N>,
    engine: &mut dyn FaceEngine,
    source: &mut dyn FrameSource,
    surface: &mut dyn Surface,
    clock: &dyn Clock,
    downscale: u32,
) -> Result<SessionSummary, SessionError> {
    tracing::info!(identities = ctx.gallery.len(), "capture loop started; press 'q' to quit");

    let mut frames = 0u64;
    let mut recorded = 0usize;

    let stop = loop {
        let frame = match source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "camera unavailable; stopping");
                break StopReason::DeviceLost(e.to_string());
            }
        };
        frames += 1;

        let report = ctx.process_frame(engine, &frame, downscale, clock.now())?;
        recorded += report.recorded.len();

        surface.present(&frame, &report.overlays)?;

        if surface.quit_requested() {
            tracing::info!("quit requested");
            break StopReason::Quit;
        }
    };

    tracing::info!(frames, recorded, ?stop, "capture loop stopped");
    Ok(SessionSummary {
        frames,
        recorded,
        stop,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::{GrayImage, ImageFormat, Luma};
    use rollcall_core::{BoundingBox, Embedding, EngineError, EuclideanMatcher, ObservedFace};
    use rollcall_hw::CameraError;
    use std::collections::VecDeque;

    const BOB: [f32; 3] = [1.0, 0.0, 0.0];
    const STRANGER: [f32; 3] = [0.0, 0.0, 1.0];

    /// Returns Bob's embedding for the gallery image, and whatever face is
    /// queued for live frames.
    struct ScriptedEngine {
        live: Option<Vec<f32>>,
        fail: bool,
    }

    impl FaceEngine for ScriptedEngine {
        fn analyze(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<ObservedFace>, EngineError> {
            if self.fail {
                return Err(EngineError::Detector(
                    rollcall_core::detector::DetectorError::InferenceFailed("scripted".into()),
                ));
            }
            let values = if pixels.first().copied().unwrap_or(0) > 100 {
                BOB.to_vec()
            } else {
                match &self.live {
                    Some(v) => v.clone(),
                    None => return Ok(vec![]),
                }
            };
            Ok(vec![ObservedFace {
                bbox: BoundingBox {
                    x: 1.0,
                    y: 2.0,
                    width: width as f32 / 2.0,
                    height: height as f32 / 2.0,
                    confidence: 0.9,
                    landmarks: None,
                },
                embedding: Embedding::new(values),
            }])
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Vec<String>,
    }

    impl Notifier for RecordingNotifier {
        fn announce(&mut self, text: &str) {
            self.messages.push(text.to_string());
        }
    }

    struct ScriptedSource {
        frames: VecDeque<Frame>,
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.frames
                .pop_front()
                .ok_or_else(|| CameraError::CaptureFailed("unplugged".into()))
        }
    }

    #[derive(Default)]
    struct RecordingSurface {
        presented: Vec<Vec<Overlay>>,
        quit_after: Option<usize>,
    }

    impl Surface for RecordingSurface {
        fn present(&mut self, _frame: &Frame, overlays: &[Overlay]) -> Result<(), DisplayError> {
            self.presented.push(overlays.to_vec());
            Ok(())
        }

        fn quit_requested(&self) -> bool {
            self.quit_after.is_some_and(|n| self.presented.len() >= n)
        }
    }

    struct FixedClock(NaiveDateTime);

    impl Clock for FixedClock {
        fn now(&self) -> NaiveDateTime {
            self.0
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn live_frame() -> Frame {
        Frame::new(vec![0u8; 16 * 16], 16, 16, 0)
    }

    /// Gallery with "Bob" loaded from `Bob.jpg`, plus a fresh ledger.
    fn bob_context(dir: &std::path::Path, engine: &mut ScriptedEngine) -> AttendanceContext<RecordingNotifier> {
        let faces = dir.join("known_faces");
        std::fs::create_dir(&faces).unwrap();
        GrayImage::from_pixel(16, 16, Luma([200u8]))
            .save_with_format(faces.join("Bob.jpg"), ImageFormat::Jpeg)
            .unwrap();

        let load = Gallery::load_dir(&faces, engine).unwrap();
        assert_eq!(load.gallery.names().collect::<Vec<_>>(), vec!["Bob"]);

        AttendanceContext {
            gallery: load.gallery,
            matcher: Box::new(EuclideanMatcher { tolerance: 0.6 }),
            ledger: Ledger::open(&dir.join("attendance.csv")).unwrap(),
            notifier: RecordingNotifier::default(),
        }
    }

    #[test]
    fn test_known_face_recorded_and_announced_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);

        let report = ctx.process_frame(&mut engine, &live_frame(), 4, at(9, 0)).unwrap();

        assert_eq!(report.recorded, vec!["Bob".to_string()]);
        assert_eq!(ctx.ledger.records().len(), 1);
        assert_eq!(ctx.ledger.records()[0].name, "Bob");
        assert_eq!(ctx.ledger.records()[0].date, at(9, 0).date());
        assert_eq!(ctx.notifier.messages.len(), 1);
        assert!(ctx.notifier.messages[0].contains("Bob"));

        // Detection ran on a 4×4 copy; the box is scaled back by 4.
        assert_eq!(
            report.overlays,
            vec![Overlay { x: 4, y: 8, width: 8, height: 8, label: "Bob".into() }]
        );
    }

    #[test]
    fn test_same_day_twice_keeps_one_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);

        ctx.process_frame(&mut engine, &live_frame(), 4, at(9, 0)).unwrap();
        let second = ctx.process_frame(&mut engine, &live_frame(), 4, at(14, 30)).unwrap();

        assert!(second.recorded.is_empty());
        assert_eq!(second.overlays.len(), 1, "recognized faces are still annotated");
        assert_eq!(ctx.ledger.records().len(), 1);
        assert_eq!(ctx.notifier.messages.len(), 1);
    }

    #[test]
    fn test_unknown_face_is_not_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(STRANGER.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);

        let report = ctx.process_frame(&mut engine, &live_frame(), 4, at(9, 0)).unwrap();
        assert_eq!(report.faces, 1);
        assert!(report.overlays.is_empty());
        assert!(ctx.ledger.records().is_empty());
        assert!(ctx.notifier.messages.is_empty());
    }

    #[test]
    fn test_empty_gallery_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = AttendanceContext {
            gallery: Gallery::new(),
            matcher: Box::new(EuclideanMatcher::default()),
            ledger: Ledger::open(&dir.path().join("attendance.csv")).unwrap(),
            notifier: RecordingNotifier::default(),
        };

        let report = ctx.process_frame(&mut engine, &live_frame(), 4, at(9, 0)).unwrap();
        assert_eq!(report.faces, 1);
        assert!(report.recorded.is_empty());
        assert!(ctx.ledger.records().is_empty());
    }

    #[test]
    fn test_engine_failure_skips_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);
        engine.fail = true;

        let report = ctx.process_frame(&mut engine, &live_frame(), 4, at(9, 0)).unwrap();
        assert_eq!(report.faces, 0);
        assert!(ctx.ledger.records().is_empty());
    }

    #[test]
    fn test_run_stops_on_device_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);
        let mut source = ScriptedSource {
            frames: (0..3).map(|_| live_frame()).collect(),
        };
        let mut surface = RecordingSurface::default();

        let summary = run(
            &mut ctx,
            &mut engine,
            &mut source,
            &mut surface,
            &FixedClock(at(9, 0)),
            4,
        )
        .unwrap();

        assert_eq!(summary.frames, 3);
        assert_eq!(summary.recorded, 1);
        assert!(matches!(summary.stop, StopReason::DeviceLost(_)));
        assert_eq!(surface.presented.len(), 3);
        assert_eq!(ctx.notifier.messages.len(), 1);
    }

    #[test]
    fn test_run_surfaces_ledger_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: Some(BOB.to_vec()), fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);

        // The ledger path turns into a directory after open, so appends fail.
        let ledger_path = dir.path().join("attendance.csv");
        std::fs::remove_file(&ledger_path).unwrap();
        std::fs::create_dir(&ledger_path).unwrap();

        let mut source = ScriptedSource {
            frames: (0..3).map(|_| live_frame()).collect(),
        };
        let mut surface = RecordingSurface::default();

        let result = run(
            &mut ctx,
            &mut engine,
            &mut source,
            &mut surface,
            &FixedClock(at(9, 0)),
            4,
        );

        assert!(matches!(result, Err(SessionError::Ledger(_))), "{result:?}");
        assert!(ctx.notifier.messages.is_empty());
        assert!(surface.presented.is_empty());
        assert!(!ctx.ledger.already_marked("Bob", at(9, 0).date()));
        assert_eq!(source.frames.len(), 2, "loop stops at the failing frame");
    }

    #[test]
    fn test_run_stops_on_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = ScriptedEngine { live: None, fail: false };
        let mut ctx = bob_context(dir.path(), &mut engine);
        let mut source = ScriptedSource {
            frames: (0..5).map(|_| live_frame()).collect(),
        };
        let mut surface = RecordingSurface {
            quit_after: Some(2),
            ..RecordingSurface::default()
        };

        let summary = run(
            &mut ctx,
            &mut engine,
            &mut source,
            &mut surface,
            &FixedClock(at(9, 0)),
            4,
        )
        .unwrap();

        assert_eq!(summary.stop, StopReason::Quit);
        assert_eq!(summary.frames, 2);
        assert_eq!(summary.recorded, 0);
        assert!(surface.presented.iter().all(|o| o.is_empty()));
    }
}
