//! Live feed: packet source -> decoder thread -> frame sink -> display.

pub mod convert;
pub mod decoder;
pub mod display;
#[cfg(feature = "openh264")]
pub mod h264;
pub mod nal;
pub mod sink;
pub mod source;

use std::sync::Arc;
use std::thread::JoinHandle;

use super::errors::{DecoderSetupError, VideoError};
use super::recorder::buffer::RecordingTap;
use super::types::OutputParams;
use decoder::{spawn_decoder, BackendFactory, ByteSupply, DecodeStats, VideoBackend};
use sink::FrameSink;
use source::PacketSource;

/// Factory for the H.264 backend compiled into this build.
pub fn select_backend() -> BackendFactory {
    #[cfg(feature = "openh264")]
    {
        Box::new(|| -> Result<Box<dyn VideoBackend>, DecoderSetupError> {
            Ok(Box::new(h264::OpenH264Backend::new()?))
        })
    }

    #[cfg(not(feature = "openh264"))]
    {
        Box::new(|| -> Result<Box<dyn VideoBackend>, DecoderSetupError> {
            Err(DecoderSetupError::OpenInput(
                "built without an H.264 decoder; enable the openh264 feature".to_string(),
            ))
        })
    }
}

/// A running feed: the sink the display reads from and the decoder thread.
pub struct VideoFeed {
    sink: Arc<FrameSink>,
    decoder: JoinHandle<Result<DecodeStats, DecoderSetupError>>,
}

impl VideoFeed {
    /// Starts decoding `source` on its own thread. Every packet is offered to
    /// `tap` on its way to the decoder.
    pub fn start(
        source: Box<dyn PacketSource>,
        backend: BackendFactory,
        params: OutputParams,
        tap: RecordingTap,
    ) -> Result<Self, VideoError> {
        let sink = Arc::new(FrameSink::new());
        let supply = ByteSupply::new(source, tap);
        let decoder = spawn_decoder(backend, supply, params, sink.clone())?;

        tracing::info!(target: "video",
            "[DECODER] Feed started, output {:?} {}x{}", params.format, params.width, params.height);

        Ok(Self { sink, decoder })
    }

    pub fn sink(&self) -> Arc<FrameSink> {
        self.sink.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.decoder.is_finished()
    }

    /// Waits for the decoder thread. A setup failure comes back as an error;
    /// a panicked decoder is reported as a defect.
    pub fn join(self) -> Result<DecodeStats, VideoError> {
        match self.decoder.join() {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::error!(target: "video", "[DECODER] Decoder thread panicked");
                self.sink.close();
                Err(VideoError::DecoderPanicked)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(feature = "openh264")]
    #[test]
    fn test_default_backend_decodes_and_feeds_recording() {
        use crate::plugins::video::recorder::buffer::RecordingBuffer;
        use crate::plugins::video::types::{PixelFormat, VideoPacket};
        use openh264::encoder::Encoder;
        use openh264::formats::YUVBuffer;

        let mut encoder = Encoder::new().unwrap();
        let bitstream = encoder.encode(&YUVBuffer::new(64, 48)).unwrap().to_vec();

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sent = 0;
        for chunk in bitstream.chunks(200) {
            tx.send(VideoPacket::from(chunk.to_vec())).unwrap();
            sent += 1;
        }
        drop(tx);

        let tap = RecordingTap::new();
        let buffer = Arc::new(RecordingBuffer::with_capacity(1000));
        tap.attach(buffer.clone());

        let feed = VideoFeed::start(
            Box::new(source::ChannelSource::new(rx)),
            select_backend(),
            OutputParams {
                format: PixelFormat::Bgra8,
                width: 32,
                height: 24,
            },
            tap,
        )
        .unwrap();
        let sink = feed.sink();

        let stats = feed.join().unwrap();
        assert_eq!(stats.packets, sent);
        assert_eq!(stats.frames, 1);
        assert_eq!(buffer.len() as u64, sent);
        assert!(sink.is_closed());
    }

    #[cfg(not(feature = "openh264"))]
    #[test]
    fn test_missing_backend_is_a_setup_failure() {
        let factory = select_backend();
        assert!(matches!(factory(), Err(DecoderSetupError::OpenInput(_))));
    }

    #[cfg(not(feature = "openh264"))]
    #[test]
    fn test_feed_without_backend_closes_sink() {
        use crate::plugins::video::types::{PixelFormat, VideoMode};

        let (tx, rx) = crossbeam_channel::unbounded();
        drop(tx);

        let feed = VideoFeed::start(
            Box::new(source::ChannelSource::new(rx)),
            select_backend(),
            OutputParams::for_mode(VideoMode::Normal, PixelFormat::Bgra8),
            RecordingTap::new(),
        )
        .unwrap();
        let sink = feed.sink();

        assert!(matches!(
            feed.join(),
            Err(VideoError::Setup(DecoderSetupError::OpenInput(_)))
        ));
        assert!(sink.is_closed());
    }
}
