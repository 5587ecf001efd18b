//! Operator views: registration, the circulation kiosk and the records listing.

use crate::config::Config;
use crate::engine::{self, CancelFlag, EngineError, EngineHandle, ScanEnd, Services};
use crate::library::{KioskError, Library};
use crate::store::PersonRecord;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shelfgate_core::{FaceDetector, KioskSession, OnnxFaceEncoder, ScanlineReader};
use shelfgate_hw::{Camera, FrameSource, StillImage};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};

/// Open the frame source and models, and start the capture engine.
pub fn open_engine(config: &Config, image: Option<&Path>) -> Result<EngineHandle> {
    let source: Box<dyn FrameSource + Send> = match image {
        Some(path) => Box::new(StillImage::open(path)?),
        None => {
            let camera = Camera::open(&config.camera_device, config.camera_width, config.camera_height)?;
            camera.warm_up(config.warmup_frames);
            Box::new(camera)
        }
    };
    let detector = FaceDetector::load(&config.detector_path())?;
    let encoder = OnnxFaceEncoder::load(detector, &config.encoder_path(), config.encoder_input_size)?;
    Ok(engine::spawn_engine(Services {
        source,
        encoder: Box::new(encoder),
        reader: Box::new(ScanlineReader::default()),
    })?)
}

/// Capture a face and register it under `name`.
pub async fn register<W: Write>(
    library: &mut Library,
    engine: &EngineHandle,
    name: &str,
    frames: usize,
    out: &mut W,
) -> Result<PersonRecord> {
    library.check_name(name)?;
    writeln!(out, "Look at the camera...")?;
    let face = match engine.enroll(frames).await {
        Ok(face) => Some(face.embedding),
        Err(EngineError::NoFaceDetected) => None,
        Err(e) => return Err(e.into()),
    };
    let record = library.register(name, face, Utc::now())?;
    writeln!(out, "Registered {} (id {})", record.name, record.id)?;
    Ok(record)
}

/// Line-oriented operator input that gives up when the cancel flag is raised.
pub struct Prompt<R> {
    lines: Lines<R>,
    cancel: CancelFlag,
}

impl<R: AsyncBufRead + Unpin> Prompt<R> {
    pub fn new(input: R, cancel: CancelFlag) -> Self {
        Self { lines: input.lines(), cancel }
    }

    /// Print `question` and read one trimmed line; `None` on end of input or cancel.
    async fn ask<W: Write>(&mut self, out: &mut W, question: &str) -> Result<Option<String>> {
        write!(out, "{question} ")?;
        out.flush()?;
        tokio::select! {
            line = self.lines.next_line() => Ok(line?.map(|l| l.trim().to_string())),
            _ = self.cancel.raised() => Ok(None),
        }
    }
}

/// What the verified person chose at the item prompt.
enum ItemChoice {
    Code(String),
    Logout,
    Quit,
}

/// Run the circulation kiosk until input ends, Ctrl-C, or the camera stops.
pub async fn kiosk<R, W>(
    library: &mut Library,
    engine: &EngineHandle,
    config: &Config,
    prompt: &mut Prompt<R>,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let cancel = prompt.cancel.clone();
    let timeout = config.scan_timeout();
    let mut session = KioskSession::new(config.session_ttl());

    loop {
        writeln!(out, "\nLook at the camera to verify (Ctrl-C to quit).")?;
        let index = library.index();
        let tolerance = library.tolerance();
        let scan = engine::run_scan(&cancel, timeout, || engine.face_step(index.clone(), tolerance)).await?;
        let entry = match scan {
            ScanEnd::Found(entry) => entry,
            ScanEnd::TimedOut => {
                writeln!(out, "No registered face recognised.")?;
                continue;
            }
            ScanEnd::Cancelled => break,
            ScanEnd::SourceEnded => {
                writeln!(out, "Camera stopped delivering frames.")?;
                break;
            }
        };

        session.begin(entry.person_id, &entry.name, Utc::now());
        writeln!(out, "Welcome, {}.", entry.name)?;
        if let Some(held) = library.person(entry.person_id)?.state.held_item() {
            writeln!(out, "You currently hold {held}.")?;
        }

        loop {
            let raw = match choose_item(engine, &cancel, timeout, prompt, out).await? {
                ItemChoice::Code(raw) => raw,
                ItemChoice::Logout => {
                    session.logout();
                    writeln!(out, "Logged out.")?;
                    break;
                }
                ItemChoice::Quit => {
                    session.logout();
                    return Ok(());
                }
            };

            match prompt.ask(out, &format!("Confirm item {raw}? [y/N]")).await? {
                Some(answer) if answer.eq_ignore_ascii_case("y") => {}
                Some(_) => {
                    writeln!(out, "Not confirmed.")?;
                    continue;
                }
                None => return Ok(()),
            }

            match library.transact(&session, &raw, Utc::now()) {
                Ok(outcome) => {
                    writeln!(out, "{}: {outcome}.", entry.name)?;
                    session.logout();
                    break;
                }
                Err(e @ KioskError::InvalidItemCode(_)) => {
                    writeln!(out, "{e}")?;
                }
                Err(
                    e @ (KioskError::MustReturnFirst { .. }
                    | KioskError::SessionExpired
                    | KioskError::NotVerified
                    | KioskError::UnknownPerson),
                ) => {
                    writeln!(out, "{e}")?;
                    session.logout();
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}

async fn choose_item<R, W>(
    engine: &EngineHandle,
    cancel: &CancelFlag,
    timeout: Option<std::time::Duration>,
    prompt: &mut Prompt<R>,
    out: &mut W,
) -> Result<ItemChoice>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    loop {
        let Some(line) = prompt
            .ask(out, "Item code (8 digits), 's' to scan a barcode, 'l' to log out:")
            .await?
        else {
            return Ok(ItemChoice::Quit);
        };
        match line.as_str() {
            "l" | "L" => return Ok(ItemChoice::Logout),
            "s" | "S" => {
                writeln!(out, "Hold the EAN-8 or Code 128 label up to the camera...")?;
                match engine::run_scan(cancel, timeout, || engine.barcode_step()).await? {
                    ScanEnd::Found(code) => {
                        writeln!(out, "Read {code}")?;
                        return Ok(ItemChoice::Code(code));
                    }
                    ScanEnd::Cancelled => return Ok(ItemChoice::Quit),
                    ScanEnd::TimedOut | ScanEnd::SourceEnded => {
                        writeln!(out, "No barcode read.")?;
                    }
                }
            }
            _ => return Ok(ItemChoice::Code(line)),
        }
    }
}

#[derive(Serialize)]
struct RecordRow<'a> {
    id: i64,
    name: &'a str,
    status: &'static str,
    held_item: Option<String>,
    registered_at: DateTime<Utc>,
}

impl<'a> From<&'a PersonRecord> for RecordRow<'a> {
    fn from(record: &'a PersonRecord) -> Self {
        Self {
            id: record.id,
            name: &record.name,
            status: record.state.status(),
            held_item: record.state.held_item().map(ToString::to_string),
            registered_at: record.registered_at,
        }
    }
}

/// Print every person with their circulation state.
pub fn records<W: Write>(library: &Library, json: bool, out: &mut W) -> Result<()> {
    let records = library.records()?;
    let rows: Vec<RecordRow<'_>> = records.iter().map(RecordRow::from).collect();

    if json {
        serde_json::to_writer_pretty(&mut *out, &rows)?;
        writeln!(out)?;
        return Ok(());
    }

    if rows.is_empty() {
        writeln!(out, "No one registered")?;
        return Ok(());
    }
    let name_width = rows.iter().map(|r| r.name.chars().count()).max().unwrap_or(0).max(4);
    writeln!(out, "{:>4}  {:<name_width$}  {:<10}  HELD ITEM", "ID", "NAME", "STATUS")?;
    for row in &rows {
        writeln!(
            out,
            "{:>4}  {:<name_width$}  {:<10}  {}",
            row.id,
            row.name,
            row.status,
            row.held_item.as_deref().unwrap_or("-"),
        )?;
    }
    Ok(())
}

/// List V4L2 capture devices.
pub fn devices<W: Write>(out: &mut W) -> Result<()> {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        writeln!(out, "No video capture devices found")?;
    }
    for dev in devices {
        writeln!(out, "{}  {} ({})", dev.path, dev.name, dev.driver)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::signature;
    use crate::store::Store;
    use shelfgate_core::scan::{BarcodeReader, FaceEncoder, VisionError};
    use shelfgate_core::{CirculationState, DetectedFace, FrameView, ItemCode};
    use shelfgate_hw::{CameraError, Frame};

    /// Endless bright frames.
    struct Endless;

    impl FrameSource for Endless {
        fn read_frame(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame::new(vec![200u8; 16], 4, 4, 0))
        }

        fn describe(&self) -> String {
            "endless".into()
        }
    }

    /// Sees the same face in every frame, or none.
    struct SameFace(Option<f64>);

    impl FaceEncoder for SameFace {
        fn encode(&mut self, _frame: FrameView<'_>) -> Result<Vec<DetectedFace>, VisionError> {
            Ok(self
                .0
                .map(|offset| DetectedFace { embedding: signature(offset), confidence: 0.9 })
                .into_iter()
                .collect())
        }
    }

    struct FixedCode(&'static str);

    impl BarcodeReader for FixedCode {
        fn decode(&self, _frame: FrameView<'_>) -> Vec<String> {
            vec![self.0.to_string()]
        }
    }

    fn engine_seeing(face: Option<f64>) -> EngineHandle {
        engine::spawn_engine(Services {
            source: Box::new(Endless),
            encoder: Box::new(SameFace(face)),
            reader: Box::new(FixedCode("96385074")),
        })
        .unwrap()
    }

    fn library() -> Library {
        Library::new(Store::open_in_memory().unwrap(), 0.4).unwrap()
    }

    fn state_of(library: &Library, name: &str) -> CirculationState {
        library.records().unwrap().into_iter().find(|r| r.name == name).unwrap().state
    }

    async fn run_kiosk(library: &mut Library, engine: &EngineHandle, input: &str) -> String {
        let mut prompt = Prompt::new(input.as_bytes(), CancelFlag::new());
        let mut out = Vec::new();
        let mut config = Config::default();
        config.scan_timeout_secs = 1;
        kiosk(library, engine, &config, &mut prompt, &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    fn code(s: &str) -> ItemCode {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_register_view() {
        let mut lib = library();
        let engine = engine_seeing(Some(0.0));
        let mut out = Vec::new();
        let record = register(&mut lib, &engine, "Alice", 3, &mut out).await.unwrap();
        assert_eq!(record.name, "Alice");
        assert!(String::from_utf8(out).unwrap().contains("Registered Alice"));

        let err = register(&mut lib, &engine, "Alicia", 3, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<KioskError>(), Some(KioskError::DuplicateFace)));
    }

    #[tokio::test]
    async fn test_register_view_name_taken_before_capture() {
        let mut lib = library();
        lib.register("Alice", Some(signature(5.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.0));
        let mut out = Vec::new();
        let err = register(&mut lib, &engine, "Alice", 3, &mut out).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<KioskError>(), Some(KioskError::NameTaken(_))));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_register_view_no_face() {
        let mut lib = library();
        let engine = engine_seeing(None);
        let err = register(&mut lib, &engine, "Alice", 3, &mut Vec::new()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<KioskError>(), Some(KioskError::NoFaceDetected)));
        assert!(lib.records().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kiosk_issue_refuse_return() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.05));

        let out = run_kiosk(&mut lib, &engine, "12345678\ny\n87654321\ny\n12345678\ny\n").await;
        assert!(out.contains("Welcome, Alice."));
        assert!(out.contains("Alice: issued 12345678."));
        assert!(out.contains("Alice must return 12345678 first"));
        assert!(out.contains("You currently hold 12345678."));
        assert!(out.contains("Alice: returned 12345678."));
        assert_eq!(state_of(&lib, "Alice"), CirculationState::NotIssued);
    }

    #[tokio::test]
    async fn test_kiosk_invalid_code_stays_verified() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.0));

        let out = run_kiosk(&mut lib, &engine, "1234567\ny\n12345678\ny\n").await;
        assert!(out.contains("invalid barcode \"1234567\" (8 digits only)"));
        assert_eq!(out.matches("Welcome, Alice.").count(), 2);
        assert_eq!(state_of(&lib, "Alice"), CirculationState::Issued(code("12345678")));
    }

    #[tokio::test]
    async fn test_kiosk_scanned_barcode_and_unconfirmed() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.0));

        let out = run_kiosk(&mut lib, &engine, "12345678\nn\ns\ny\n").await;
        assert!(out.contains("Not confirmed."));
        assert!(out.contains("Read 96385074"));
        assert_eq!(state_of(&lib, "Alice"), CirculationState::Issued(code("96385074")));
    }

    #[tokio::test]
    async fn test_kiosk_trims_typed_code() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.0));

        let out = run_kiosk(&mut lib, &engine, "  12345678\t\n y \n").await;
        assert!(out.contains("Alice: issued 12345678."));
        assert_eq!(state_of(&lib, "Alice"), CirculationState::Issued(code("12345678")));
    }

    #[tokio::test]
    async fn test_kiosk_logout() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        let engine = engine_seeing(Some(0.0));

        let out = run_kiosk(&mut lib, &engine, "l\n").await;
        assert!(out.contains("Logged out."));
        assert_eq!(state_of(&lib, "Alice"), CirculationState::NotIssued);
    }

    #[tokio::test]
    async fn test_records_views() {
        let mut lib = library();
        lib.register("Alice", Some(signature(0.0)), Utc::now()).unwrap();
        lib.register("Bob", Some(signature(2.0)), Utc::now()).unwrap();
        let mut session = KioskSession::new(chrono::Duration::seconds(120));
        session.begin(1, "Alice", Utc::now());
        lib.transact(&session, "12345678", Utc::now()).unwrap();

        let mut table = Vec::new();
        records(&lib, false, &mut table).unwrap();
        let table = String::from_utf8(table).unwrap();
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].contains("Alice") && lines[1].contains("issued") && lines[1].contains("12345678"));
        assert!(lines[2].contains("Bob") && lines[2].contains("not issued") && lines[2].ends_with('-'));

        let mut json = Vec::new();
        records(&lib, true, &mut json).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value[0]["held_item"], "12345678");
        assert_eq!(value[1]["status"], "not issued");
        assert!(value[1]["held_item"].is_null());
    }

    #[test]
    fn test_records_empty() {
        let mut out = Vec::new();
        records(&library(), false, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No one registered\n");
    }
}
