//! Decode loop: pulls packets through the byte supply, runs them through a
//! decoding backend and publishes frames for the display.

use std::sync::Arc;
use std::thread::JoinHandle;

use super::super::errors::{DecodeError, DecoderSetupError, VideoError};
use super::super::recorder::buffer::RecordingTap;
use super::super::types::{DecodedFrame, OutputParams, StreamInfo, VideoPacket};
use super::sink::FrameSink;
use super::source::PacketSource;

/// Pull-based adapter between the packet source and the decoding backend.
///
/// Every packet handed to the backend is first offered to the recording tap,
/// so recording sees exactly what the decoder sees, in the same order.
pub struct ByteSupply {
    source: Box<dyn PacketSource>,
    tap: RecordingTap,
    packets: u64,
    bytes: u64,
    ended: bool,
}

impl ByteSupply {
    pub fn new(source: Box<dyn PacketSource>, tap: RecordingTap) -> Self {
        Self {
            source,
            tap,
            packets: 0,
            bytes: 0,
            ended: false,
        }
    }

    /// Next packet for the backend, or `None` once the source is exhausted.
    /// An empty packet also ends the stream.
    pub fn pull(&mut self) -> Option<VideoPacket> {
        if self.ended {
            return None;
        }

        let packet = match self.source.next_packet() {
            Some(packet) if !packet.is_empty() => packet,
            _ => {
                self.ended = true;
                return None;
            }
        };

        self.packets += 1;
        self.bytes += packet.len() as u64;
        self.tap.offer(&packet);
        Some(packet)
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn packets(&self) -> u64 {
        self.packets
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

/// Result of asking the backend for the next coded unit.
#[derive(Debug)]
pub enum DecodeStep {
    Frame(DecodedFrame),
    Failed(DecodeError),
    EndOfStream,
}

/// External decoding library, driven by the decoder thread.
///
/// Backends are built on the decoder thread itself (see [`BackendFactory`]),
/// so they need not be `Send`.
pub trait VideoBackend {
    /// Opens the input, locates the video stream and prepares conversion to
    /// `params`. May pull packets from `supply` to find the stream.
    fn open(
        &mut self,
        supply: &mut ByteSupply,
        params: &OutputParams,
    ) -> Result<StreamInfo, DecoderSetupError>;

    /// Decodes the next coded unit, pulling as many packets as it needs.
    fn decode_next(&mut self, supply: &mut ByteSupply) -> DecodeStep;
}

/// Counters reported when the decode loop ends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeStats {
    pub packets: u64,
    pub bytes: u64,
    pub frames: u64,
    pub failed_units: u64,
}

pub struct Decoder {
    backend: Box<dyn VideoBackend>,
    supply: ByteSupply,
    params: OutputParams,
    sink: Arc<FrameSink>,
}

impl Decoder {
    pub fn new(
        backend: Box<dyn VideoBackend>,
        supply: ByteSupply,
        params: OutputParams,
        sink: Arc<FrameSink>,
    ) -> Self {
        Self {
            backend,
            supply,
            params,
            sink,
        }
    }

    /// Runs until end-of-stream. Setup failures abort with an error; failures
    /// on individual units are logged and skipped. The sink is closed on every
    /// exit path so the display knows the feed has stopped.
    pub fn run(mut self) -> Result<DecodeStats, DecoderSetupError> {
        let result = self.run_inner();
        self.sink.close();
        result
    }

    fn run_inner(&mut self) -> Result<DecodeStats, DecoderSetupError> {
        let stream = match self.backend.open(&mut self.supply, &self.params) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!(target: "video", "[DECODER] Setup failed: {}", e);
                return Err(e);
            }
        };

        tracing::info!(target: "video",
            "[DECODER] Stream {}x{} -> {:?} {}x{}",
            stream.width, stream.height, self.params.format, self.params.width, self.params.height);

        let mut stats = DecodeStats::default();

        loop {
            match self.backend.decode_next(&mut self.supply) {
                DecodeStep::Frame(frame) => {
                    stats.frames += 1;
                    self.sink.publish(frame);
                    if stats.frames % 300 == 0 {
                        tracing::debug!(target: "video", "[DECODER] Decoded {} frames", stats.frames);
                    }
                }
                DecodeStep::Failed(e) => {
                    stats.failed_units += 1;
                    tracing::warn!(target: "video", "[DECODER] {}", e);
                }
                DecodeStep::EndOfStream => {
                    tracing::info!(target: "video", "[DECODER] End of stream, stopping feed");
                    break;
                }
            }
        }

        stats.packets = self.supply.packets();
        stats.bytes = self.supply.bytes();

        tracing::info!(target: "video",
            "[DECODER] Finished: {} packets, {} frames, {} failed units",
            stats.packets, stats.frames, stats.failed_units);

        Ok(stats)
    }
}

/// Builds the decoding backend on the decoder thread.
pub type BackendFactory =
    Box<dyn FnOnce() -> Result<Box<dyn VideoBackend>, DecoderSetupError> + Send>;

/// Starts the decoder on its own thread. A factory failure counts as a setup
/// failure: the feed is closed and the error returned from the thread.
pub fn spawn_decoder(
    factory: BackendFactory,
    supply: ByteSupply,
    params: OutputParams,
    sink: Arc<FrameSink>,
) -> Result<JoinHandle<Result<DecodeStats, DecoderSetupError>>, VideoError> {
    let handle = std::thread::Builder::new()
        .name("video-decoder".to_string())
        .spawn(move || match factory() {
            Ok(backend) => Decoder::new(backend, supply, params, sink).run(),
            Err(e) => {
                tracing::error!(target: "video", "[DECODER] Could not create decoder: {}", e);
                sink.close();
                Err(e)
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::video::recorder::buffer::RecordingBuffer;
    use crate::plugins::video::types::PixelFormat;

    struct VecSource(std::vec::IntoIter<VideoPacket>);

    impl PacketSource for VecSource {
        fn next_packet(&mut self) -> Option<VideoPacket> {
            self.0.next()
        }
    }

    fn supply_of(packets: Vec<Vec<u8>>, tap: RecordingTap) -> ByteSupply {
        let packets: Vec<VideoPacket> = packets.into_iter().map(VideoPacket::from).collect();
        ByteSupply::new(Box::new(VecSource(packets.into_iter())), tap)
    }

    /// One frame per packet; packets starting with 0xff fail to decode.
    struct ScriptedBackend {
        fail_open: Option<DecoderSetupError>,
        sequence: u64,
    }

    impl VideoBackend for ScriptedBackend {
        fn open(
            &mut self,
            _supply: &mut ByteSupply,
            _params: &OutputParams,
        ) -> Result<StreamInfo, DecoderSetupError> {
            match self.fail_open.take() {
                Some(e) => Err(e),
                None => Ok(StreamInfo { width: 2, height: 2 }),
            }
        }

        fn decode_next(&mut self, supply: &mut ByteSupply) -> DecodeStep {
            match supply.pull() {
                Some(p) if p.as_bytes()[0] == 0xff => DecodeStep::Failed(DecodeError("corrupt".into())),
                Some(p) => {
                    let frame = DecodedFrame::new(
                        vec![p.as_bytes()[0]; 16],
                        2,
                        2,
                        PixelFormat::Bgra8,
                        self.sequence,
                    );
                    self.sequence += 1;
                    DecodeStep::Frame(frame)
                }
                None => DecodeStep::EndOfStream,
            }
        }
    }

    fn params() -> OutputParams {
        OutputParams {
            format: PixelFormat::Bgra8,
            width: 2,
            height: 2,
        }
    }

    #[test]
    fn test_supply_ends_on_empty_packet() {
        let mut supply = supply_of(vec![vec![1], vec![], vec![2]], RecordingTap::new());
        assert!(supply.pull().is_some());
        assert!(supply.pull().is_none());
        assert!(supply.is_ended());
        assert!(supply.pull().is_none());
        assert_eq!(supply.packets(), 1);
    }

    #[test]
    fn test_supply_copies_packets_into_attached_buffer() {
        let tap = RecordingTap::new();
        let mut supply = supply_of(vec![vec![1], vec![2], vec![3]], tap.clone());

        supply.pull();
        let buffer = Arc::new(RecordingBuffer::with_capacity(10));
        tap.attach(buffer.clone());
        supply.pull();
        supply.pull();

        let queued: Vec<u8> = std::iter::from_fn(|| buffer.dequeue())
            .map(|p| p.as_bytes()[0])
            .collect();
        assert_eq!(queued, vec![2, 3]);
    }

    #[test]
    fn test_decode_errors_are_skipped() {
        let sink = Arc::new(FrameSink::new());
        let supply = supply_of(vec![vec![1], vec![0xff], vec![3]], RecordingTap::new());
        let backend = ScriptedBackend {
            fail_open: None,
            sequence: 0,
        };

        let stats = Decoder::new(Box::new(backend), supply, params(), sink.clone())
            .run()
            .unwrap();

        assert_eq!(stats.frames, 2);
        assert_eq!(stats.failed_units, 1);
        assert_eq!(stats.packets, 3);
        assert_eq!(sink.take_latest().map(|f| f.data()[0]), Some(3));
        assert!(sink.is_closed());
    }

    #[test]
    fn test_setup_failure_is_fatal_and_closes_feed() {
        let sink = Arc::new(FrameSink::new());
        let supply = supply_of(vec![vec![1]], RecordingTap::new());
        let backend = ScriptedBackend {
            fail_open: Some(DecoderSetupError::NoVideoStream),
            sequence: 0,
        };

        let result = Decoder::new(Box::new(backend), supply, params(), sink.clone()).run();

        assert_eq!(result, Err(DecoderSetupError::NoVideoStream));
        assert!(sink.is_closed());
        assert!(sink.take_latest().is_none());
    }
}
