//! Demo recording and playback: an append-only log of every inbound wire
//! message, tagged with the originating slot, written verbatim so playback
//! can feed the exact same bytes back through the live dispatch path.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::net::protocol::{MAX_DATAGRAM_SIZE, MessageKind, PROTOCOL_VERSION};
use crate::settings::GameSettings;
use crate::Role;

pub const DEMO_MAGIC: u32 = 0x4652_4430;
pub const DEMO_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
#[repr(u8)]
pub enum DemoSide {
    Client = 0,
    Server = 1,
}

/// Fixed preamble written once at the head of every demo file.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct DemoHeader {
    pub protocol_version: u32,
    pub side: DemoSide,
    /// Seconds since the Unix epoch at recording start.
    pub timestamp: u64,
    pub map_name: String,
    /// The recording process's own slot.
    pub local_slot: u32,
    pub settings: GameSettings,
}

/// One logged message: who it came from and the exact bytes received.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoRecord {
    pub source_slot: u32,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DemoError {
    #[error("demo file: {0}")]
    Io(#[from] std::io::Error),
    #[error("not a demo file")]
    BadMagic,
    #[error("unsupported demo format version {0}")]
    BadVersion(u32),
    #[error("corrupt demo header")]
    BadHeader,
    #[error("corrupt demo record")]
    BadRecord,
}

/// Appends `(slot, len, bytes)` records behind a buffered writer. Opening
/// the file is fatal to the caller; a failed write aborts the recording
/// with a notice instead of crashing the session.
pub struct DemoRecorder {
    writer: BufWriter<File>,
    records: u64,
}

impl DemoRecorder {
    pub fn create(path: &Path, header: &DemoHeader) -> Result<Self, DemoError> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let header_bytes = rkyv::to_bytes::<rancor::Error>(header)
            .map_err(|_| DemoError::BadHeader)?
            .into_vec();

        writer.write_all(&DEMO_MAGIC.to_le_bytes())?;
        writer.write_all(&DEMO_FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(header_bytes.len() as u32).to_le_bytes())?;
        writer.write_all(&header_bytes)?;

        Ok(Self { writer, records: 0 })
    }

    /// Append one inbound message verbatim.
    pub fn record(&mut self, source_slot: u32, data: &[u8]) -> Result<(), DemoError> {
        self.writer.write_all(&source_slot.to_le_bytes())?;
        self.writer.write_all(&(data.len() as u32).to_le_bytes())?;
        self.writer.write_all(data)?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn finish(mut self) -> Result<(), DemoError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Record an inbound wire message if a recorder is running.
///
/// One exception from the receive path: a map-started message received in
/// the client role is skipped, because the client's own demo writer logs
/// map transitions itself and would otherwise double them on playback.
pub fn record_inbound(
    recorder: &mut DemoRecorder,
    role: Role,
    kind: MessageKind,
    source_slot: u32,
    data: &[u8],
) -> Result<(), DemoError> {
    if role == Role::Client && kind == MessageKind::MapStarted {
        return Ok(());
    }
    recorder.record(source_slot, data)
}

/// Streams records back in recorded order.
pub struct DemoReader {
    reader: BufReader<File>,
    header: DemoHeader,
}

impl DemoReader {
    pub fn open(path: &Path) -> Result<Self, DemoError> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let magic = read_u32(&mut reader)?.ok_or(DemoError::BadMagic)?;
        if magic != DEMO_MAGIC {
            return Err(DemoError::BadMagic);
        }
        let version = read_u32(&mut reader)?.ok_or(DemoError::BadHeader)?;
        if version != DEMO_FORMAT_VERSION {
            return Err(DemoError::BadVersion(version));
        }
        let header_len = read_u32(&mut reader)?.ok_or(DemoError::BadHeader)? as usize;
        if header_len > MAX_DATAGRAM_SIZE {
            return Err(DemoError::BadHeader);
        }
        let mut header_bytes = vec![0u8; header_len];
        reader.read_exact(&mut header_bytes)?;
        let header: DemoHeader = rkyv::from_bytes::<DemoHeader, rancor::Error>(&header_bytes)
            .map_err(|_| DemoError::BadHeader)?;

        if header.protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "demo was recorded under protocol {} (running {})",
                header.protocol_version,
                PROTOCOL_VERSION
            );
        }

        Ok(Self { reader, header })
    }

    pub fn header(&self) -> &DemoHeader {
        &self.header
    }

    /// Next record, or `None` at a clean end of file.
    pub fn next_record(&mut self) -> Result<Option<DemoRecord>, DemoError> {
        let Some(source_slot) = read_u32(&mut self.reader)? else {
            return Ok(None);
        };
        let len = read_u32(&mut self.reader)?.ok_or(DemoError::BadRecord)? as usize;
        if len > MAX_DATAGRAM_SIZE {
            return Err(DemoError::BadRecord);
        }
        let mut data = vec![0u8; len];
        self.reader.read_exact(&mut data)?;
        Ok(Some(DemoRecord { source_slot, data }))
    }
}

/// Little-endian u32, or `None` on a clean EOF boundary.
fn read_u32<R: Read>(reader: &mut R) -> Result<Option<u32>, DemoError> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < 4 {
        let n = reader.read(&mut bytes[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(DemoError::BadRecord);
        }
        filled += n;
    }
    Ok(Some(u32::from_le_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_path(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("fray-demo-{tag}-{}.dem", std::process::id()))
    }

    fn header(side: DemoSide) -> DemoHeader {
        DemoHeader {
            protocol_version: PROTOCOL_VERSION,
            side,
            timestamp: 1_700_000_000,
            map_name: String::from("arena02"),
            local_slot: 0,
            settings: GameSettings::default(),
        }
    }

    #[test]
    fn records_read_back_byte_exact_in_order() {
        let path = demo_path("roundtrip");
        let mut recorder = DemoRecorder::create(&path, &header(DemoSide::Server)).unwrap();

        recorder.record(3, &[1, 2, 3, 4]).unwrap();
        recorder.record(7, &[9, 9]).unwrap();
        recorder.record(0, &[]).unwrap();
        assert_eq!(recorder.records(), 3);
        recorder.finish().unwrap();

        let mut reader = DemoReader::open(&path).unwrap();
        assert_eq!(reader.header().map_name, "arena02");

        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.source_slot, 3);
        assert_eq!(first.data, vec![1, 2, 3, 4]);

        let second = reader.next_record().unwrap().unwrap();
        assert_eq!(second.source_slot, 7);
        assert_eq!(second.data, vec![9, 9]);

        let third = reader.next_record().unwrap().unwrap();
        assert_eq!(third.source_slot, 0);
        assert!(third.data.is_empty());

        assert!(reader.next_record().unwrap().is_none());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn client_role_skips_map_started_records() {
        let path = demo_path("mapstart");
        let mut recorder = DemoRecorder::create(&path, &header(DemoSide::Client)).unwrap();

        record_inbound(
            &mut recorder,
            Role::Client,
            MessageKind::MapStarted,
            0,
            &[1],
        )
        .unwrap();
        record_inbound(
            &mut recorder,
            Role::Client,
            MessageKind::TicFinished,
            0,
            &[2],
        )
        .unwrap();
        record_inbound(
            &mut recorder,
            Role::Server,
            MessageKind::MapStarted,
            2,
            &[3],
        )
        .unwrap();

        assert_eq!(recorder.records(), 2);
        recorder.finish().unwrap();
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn truncated_files_are_reported_not_panicked() {
        let path = demo_path("truncated");
        let mut recorder = DemoRecorder::create(&path, &header(DemoSide::Server)).unwrap();
        recorder.record(1, &[5, 5, 5]).unwrap();
        recorder.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 2]).unwrap();

        let mut reader = DemoReader::open(&path).unwrap();
        assert!(reader.next_record().is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn non_demo_files_are_rejected() {
        let path = demo_path("junk");
        std::fs::write(&path, b"definitely not a demo").unwrap();
        assert!(matches!(DemoReader::open(&path), Err(DemoError::BadMagic)));
        let _ = std::fs::remove_file(path);
    }
}
