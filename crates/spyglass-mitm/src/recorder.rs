//! Transcript recorder.
//!
//! Emits a stream of framed records, one per observed PDU:
//! `u8 type | u64le timestamp_ms | u32le length | payload`, with no
//! preamble. Sinks consume encoded records behind a bounded queue drained by
//! a dedicated thread per sink, so a slow sink can never stall the
//! protocol: when a queue overflows the oldest record is dropped and
//! counted, and a sink that fails to write is abandoned while the others
//! keep recording.

use std::collections::VecDeque;
use std::io::{self, Write as _};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

/// Records are dropped (oldest first) past this many queued entries.
const SINK_QUEUE_CAPACITY: usize = 1024;

/// Tag of a transcript record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Input = 0x00,
    Output = 0x01,
    Clipboard = 0x02,
    Close = 0xFF,
}

impl RecordKind {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Input),
            0x01 => Some(Self::Output),
            0x02 => Some(Self::Clipboard),
            0xFF => Some(Self::Close),
            _ => None,
        }
    }
}

/// Why the session ended, as written into the CLOSE record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    TransportClosed,
    /// Carries the offending first byte.
    UnknownHeader(u8),
    MalformedPdu,
    BadSignature,
    /// Carries the negotiation failure code.
    Negotiation(u16),
}

impl CloseReason {
    fn code(self) -> (u16, u16) {
        match self {
            Self::Normal => (0, 0),
            Self::TransportClosed => (1, 0),
            Self::UnknownHeader(byte) => (2, u16::from(byte)),
            Self::MalformedPdu => (3, 0),
            Self::BadSignature => (4, 0),
            Self::Negotiation(code) => (5, code),
        }
    }
}

/// Destination of encoded records. Implementations perform blocking writes;
/// they only ever run on their sink's worker thread.
pub trait RecorderSink: Send {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Appends records to a file.
pub struct FileSink {
    writer: io::BufWriter<std::fs::File>,
}

impl FileSink {
    pub fn new(file: std::fs::File) -> Self {
        Self {
            writer: io::BufWriter::new(file),
        }
    }
}

impl RecorderSink for FileSink {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.writer.write_all(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

/// Streams records to a live socket, for players attached in real time.
pub struct SocketSink {
    stream: std::net::TcpStream,
}

impl SocketSink {
    pub fn new(stream: std::net::TcpStream) -> Self {
        Self { stream }
    }
}

impl RecorderSink for SocketSink {
    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        self.stream.write_all(record)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[derive(Default)]
struct SinkQueue {
    records: VecDeque<Vec<u8>>,
    dropped: u64,
    closing: bool,
    dead: bool,
}

struct SinkShared {
    queue: Mutex<SinkQueue>,
    cond: Condvar,
}

struct SinkWorker {
    shared: Arc<SinkShared>,
    handle: Option<JoinHandle<()>>,
}

impl SinkWorker {
    fn spawn(mut sink: Box<dyn RecorderSink>) -> Self {
        let shared = Arc::new(SinkShared {
            queue: Mutex::new(SinkQueue::default()),
            cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = std::thread::spawn(move || {
            loop {
                let record = {
                    let mut queue = worker_shared.queue.lock().expect("recorder queue poisoned");
                    loop {
                        if let Some(record) = queue.records.pop_front() {
                            break Some(record);
                        }
                        if queue.closing {
                            break None;
                        }
                        queue = worker_shared.cond.wait(queue).expect("recorder queue poisoned");
                    }
                };

                match record {
                    Some(record) => {
                        if let Err(error) = sink.write_record(&record) {
                            warn!(%error, "Recorder sink failed, removing it");
                            worker_shared.queue.lock().expect("recorder queue poisoned").dead = true;
                            return;
                        }
                    }
                    None => {
                        if let Err(error) = sink.flush() {
                            warn!(%error, "Recorder sink flush failed");
                        }
                        return;
                    }
                }
            }
        });

        Self {
            shared,
            handle: Some(handle),
        }
    }

    /// Enqueues an encoded record, dropping the oldest entry on overflow.
    fn push(&self, record: &[u8]) {
        let mut queue = self.shared.queue.lock().expect("recorder queue poisoned");

        if queue.dead {
            return;
        }

        if queue.records.len() == SINK_QUEUE_CAPACITY {
            queue.records.pop_front();
            queue.dropped += 1;
        }

        queue.records.push_back(record.to_vec());
        self.shared.cond.notify_one();
    }

    fn dropped(&self) -> u64 {
        self.shared.queue.lock().expect("recorder queue poisoned").dropped
    }

    fn close(&mut self) {
        self.shared.queue.lock().expect("recorder queue poisoned").closing = true;
        self.shared.cond.notify_one();

        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Fans observed events out to every sink, timestamped against the session
/// start.
pub struct Recorder {
    started: Instant,
    workers: Vec<SinkWorker>,
}

impl Recorder {
    pub fn new(sinks: Vec<Box<dyn RecorderSink>>) -> Self {
        Self {
            started: Instant::now(),
            workers: sinks.into_iter().map(SinkWorker::spawn).collect(),
        }
    }

    /// Records the plaintext of one observed PDU.
    pub fn record(&mut self, kind: RecordKind, payload: &[u8]) {
        let record = encode_record(kind, self.elapsed_ms(), payload);

        for worker in &self.workers {
            worker.push(&record);
        }
    }

    /// Total records dropped across all sink queues.
    pub fn dropped_records(&self) -> u64 {
        self.workers.iter().map(SinkWorker::dropped).sum()
    }

    /// Writes the CLOSE record, flushes and detaches every sink.
    pub fn close(&mut self, reason: CloseReason) {
        let (kind, detail) = reason.code();

        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&kind.to_le_bytes());
        payload.extend_from_slice(&detail.to_le_bytes());
        payload.extend_from_slice(&(self.dropped_records() as u32).to_le_bytes());

        self.record(RecordKind::Close, &payload);

        for worker in &mut self.workers {
            worker.close();
        }
        self.workers.clear();
    }

    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        for worker in &mut self.workers {
            worker.close();
        }
    }
}

pub(crate) fn encode_record(kind: RecordKind, timestamp_ms: u64, payload: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(1 + 8 + 4 + payload.len());
    record.push(kind.as_u8());
    record.extend_from_slice(&timestamp_ms.to_le_bytes());
    record.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    record.extend_from_slice(payload);
    record
}

/// Parses one record; returns the record and the remaining bytes.
///
/// Used by tests and by transcript players.
pub fn parse_record(bytes: &[u8]) -> Option<((RecordKind, u64, &[u8]), &[u8])> {
    if bytes.len() < 13 {
        return None;
    }

    let kind = RecordKind::from_u8(bytes[0])?;
    let timestamp = u64::from_le_bytes(bytes[1..9].try_into().expect("8 bytes"));
    let length = u32::from_le_bytes(bytes[9..13].try_into().expect("4 bytes")) as usize;

    if bytes.len() < 13 + length {
        return None;
    }

    Some(((kind, timestamp, &bytes[13..13 + length]), &bytes[13 + length..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    struct ChannelSink(mpsc::Sender<Vec<u8>>);

    impl RecorderSink for ChannelSink {
        fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
            self.0
                .send(record.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver gone"))
        }
    }

    struct FailingSink;

    impl RecorderSink for FailingSink {
        fn write_record(&mut self, _: &[u8]) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "always fails"))
        }
    }

    #[test]
    fn record_layout() {
        let record = encode_record(RecordKind::Clipboard, 0x0102, b"ABC");
        assert_eq!(record[0], 0x02);
        assert_eq!(&record[1..9], &0x0102u64.to_le_bytes());
        assert_eq!(&record[9..13], &3u32.to_le_bytes());
        assert_eq!(&record[13..], b"ABC");

        let ((kind, timestamp, payload), rest) = parse_record(&record).unwrap();
        assert_eq!(kind, RecordKind::Clipboard);
        assert_eq!(timestamp, 0x0102);
        assert_eq!(payload, b"ABC");
        assert!(rest.is_empty());
    }

    #[test]
    fn records_reach_every_sink_in_order() {
        let (tx, rx) = mpsc::channel();

        let mut recorder = Recorder::new(vec![Box::new(ChannelSink(tx))]);
        recorder.record(RecordKind::Input, b"first");
        recorder.record(RecordKind::Output, b"second");
        recorder.close(CloseReason::Normal);

        let records: Vec<Vec<u8>> = rx.try_iter().collect();
        assert_eq!(records.len(), 3);

        let ((kind, t0, payload), _) = parse_record(&records[0]).unwrap();
        assert_eq!(kind, RecordKind::Input);
        assert_eq!(payload, b"first");

        let ((kind, t1, payload), _) = parse_record(&records[1]).unwrap();
        assert_eq!(kind, RecordKind::Output);
        assert_eq!(payload, b"second");
        assert!(t1 >= t0);

        let ((kind, _, payload), _) = parse_record(&records[2]).unwrap();
        assert_eq!(kind, RecordKind::Close);
        assert_eq!(&payload[..2], &0u16.to_le_bytes());
    }

    #[test]
    fn failing_sink_does_not_stop_survivors() {
        let (tx, rx) = mpsc::channel();

        let mut recorder = Recorder::new(vec![Box::new(FailingSink), Box::new(ChannelSink(tx))]);
        recorder.record(RecordKind::Input, b"payload");
        recorder.close(CloseReason::TransportClosed);

        let records: Vec<Vec<u8>> = rx.try_iter().collect();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn close_reason_reflects_unknown_header() {
        let (tx, rx) = mpsc::channel();

        let mut recorder = Recorder::new(vec![Box::new(ChannelSink(tx))]);
        recorder.close(CloseReason::UnknownHeader(0x55));

        let records: Vec<Vec<u8>> = rx.try_iter().collect();
        let ((kind, _, payload), _) = parse_record(&records[0]).unwrap();
        assert_eq!(kind, RecordKind::Close);
        assert_eq!(&payload[..2], &2u16.to_le_bytes());
        assert_eq!(&payload[2..4], &0x55u16.to_le_bytes());
    }
}
