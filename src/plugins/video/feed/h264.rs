//! H.264 decoding through Cisco's OpenH264.

use openh264::decoder::Decoder as H264Decoder;
use openh264::formats::YUVSource;

use super::super::errors::{DecodeError, DecoderSetupError};
use super::super::types::{DecodedFrame, OutputParams, StreamInfo};
use super::convert::{check_output, rgba_to_frame};
use super::decoder::{ByteSupply, DecodeStep, VideoBackend};
use super::nal::NalAssembler;

/// Packets to read while looking for the first picture before giving up on
/// the stream.
const FIRST_PICTURE_PACKET_LIMIT: u64 = 4096;

pub struct OpenH264Backend {
    decoder: H264Decoder,
    assembler: NalAssembler,
    params: Option<OutputParams>,
    /// Native size of the last decoded picture.
    stream: Option<StreamInfo>,
    /// Picture decoded while opening, handed out by the first `decode_next`.
    first_picture: Option<DecodedFrame>,
    /// Set while opening: no more packets are pulled past this count.
    pull_limit: Option<u64>,
    sequence: u64,
}

impl OpenH264Backend {
    pub fn new() -> Result<Self, DecoderSetupError> {
        let decoder = H264Decoder::new()
            .map_err(|e| DecoderSetupError::OpenInput(format!("OpenH264 init failed: {}", e)))?;
        Ok(Self {
            decoder,
            assembler: NalAssembler::new(),
            params: None,
            stream: None,
            first_picture: None,
            pull_limit: None,
            sequence: 0,
        })
    }

    fn decode_unit(&mut self, unit: &[u8]) -> Result<Option<DecodedFrame>, DecodeError> {
        let Some(params) = self.params else {
            return Err(DecodeError("decoder used before open".to_string()));
        };

        let picture = self
            .decoder
            .decode(unit)
            .map_err(|e| DecodeError(e.to_string()))?;

        let Some(yuv) = picture else {
            return Ok(None);
        };

        let (width, height) = yuv.dimensions();
        let mut rgba = vec![0u8; width * height * 4];
        yuv.write_rgba8(&mut rgba);

        let (width, height) = (width as u32, height as u32);
        self.stream = Some(StreamInfo { width, height });

        let frame = rgba_to_frame(rgba, width, height, &params, self.sequence)?;
        self.sequence += 1;
        Ok(Some(frame))
    }

    fn limit_reached(&self, supply: &ByteSupply) -> bool {
        self.pull_limit.is_some_and(|limit| supply.packets() >= limit)
    }

    /// Decodes until a picture comes out, the stream ends, or a unit fails.
    fn step(&mut self, supply: &mut ByteSupply) -> DecodeStep {
        loop {
            let unit = match self.assembler.next_unit() {
                Some(unit) => unit,
                None if self.limit_reached(supply) => {
                    return DecodeStep::Failed(DecodeError(format!(
                        "no picture within {} packets",
                        supply.packets()
                    )));
                }
                None => match supply.pull() {
                    Some(packet) => {
                        self.assembler.push(packet.as_bytes());
                        continue;
                    }
                    None => match self.assembler.flush() {
                        Some(unit) => unit,
                        None => return DecodeStep::EndOfStream,
                    },
                },
            };

            match self.decode_unit(&unit) {
                Ok(Some(frame)) => return DecodeStep::Frame(frame),
                Ok(None) => continue,
                Err(e) => return DecodeStep::Failed(e),
            }
        }
    }

    fn find_first_picture(
        &mut self,
        supply: &mut ByteSupply,
    ) -> Result<StreamInfo, DecoderSetupError> {
        loop {
            match self.step(supply) {
                DecodeStep::Frame(frame) => {
                    self.first_picture = Some(frame);
                    return self.stream.ok_or(DecoderSetupError::NoVideoStream);
                }
                DecodeStep::Failed(e) if self.limit_reached(supply) => {
                    tracing::error!(target: "video", "[DECODER] Giving up on stream: {}", e);
                    return Err(DecoderSetupError::NoVideoStream);
                }
                DecodeStep::Failed(e) => {
                    tracing::debug!(target: "video", "[DECODER] Skipped unit before first picture: {}", e);
                }
                DecodeStep::EndOfStream => {
                    tracing::error!(target: "video", "[DECODER] Stream ended before a picture");
                    return Err(DecoderSetupError::NoVideoStream);
                }
            }
        }
    }
}

impl VideoBackend for OpenH264Backend {
    fn open(
        &mut self,
        supply: &mut ByteSupply,
        params: &OutputParams,
    ) -> Result<StreamInfo, DecoderSetupError> {
        check_output(params)?;
        self.params = Some(*params);

        // Raw elementary streams carry no header; the stream is usable once
        // parameter sets and a first picture have been decoded.
        self.pull_limit = Some(FIRST_PICTURE_PACKET_LIMIT);
        let result = self.find_first_picture(supply);
        self.pull_limit = None;
        result
    }

    fn decode_next(&mut self, supply: &mut ByteSupply) -> DecodeStep {
        if let Some(frame) = self.first_picture.take() {
            return DecodeStep::Frame(frame);
        }
        self.step(supply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::video::feed::source::PacketSource;
    use crate::plugins::video::recorder::buffer::RecordingTap;
    use crate::plugins::video::types::{PixelFormat, VideoPacket};
    use openh264::encoder::Encoder;
    use openh264::formats::YUVBuffer;

    struct VecSource(std::vec::IntoIter<VideoPacket>);

    impl PacketSource for VecSource {
        fn next_packet(&mut self) -> Option<VideoPacket> {
            self.0.next()
        }
    }

    /// Never ends and never carries a start code.
    struct NoiseSource;

    impl PacketSource for NoiseSource {
        fn next_packet(&mut self) -> Option<VideoPacket> {
            Some(VideoPacket::from(vec![0xde, 0xad, 0xbe, 0xef]))
        }
    }

    fn supply(source: impl PacketSource + 'static) -> ByteSupply {
        ByteSupply::new(Box::new(source), RecordingTap::new())
    }

    fn params() -> OutputParams {
        OutputParams {
            format: PixelFormat::Bgra8,
            width: 32,
            height: 24,
        }
    }

    /// One encoded 64x48 picture, cut into small datagram-sized packets.
    fn encoded_picture() -> Vec<VideoPacket> {
        let mut encoder = Encoder::new().unwrap();
        let yuv = YUVBuffer::new(64, 48);
        let bitstream = encoder.encode(&yuv).unwrap().to_vec();
        assert!(!bitstream.is_empty());

        bitstream
            .chunks(100)
            .map(|chunk| VideoPacket::from(chunk.to_vec()))
            .collect()
    }

    #[test]
    fn test_stream_without_picture_has_no_video() {
        let packets = vec![VideoPacket::from(vec![1, 2, 3]); 10];
        let mut supply = supply(VecSource(packets.into_iter()));
        let mut backend = OpenH264Backend::new().unwrap();

        assert_eq!(
            backend.open(&mut supply, &params()),
            Err(DecoderSetupError::NoVideoStream)
        );
        assert!(supply.is_ended());
    }

    #[test]
    fn test_gives_up_without_picture_after_packet_limit() {
        let mut supply = supply(NoiseSource);
        let mut backend = OpenH264Backend::new().unwrap();

        assert_eq!(
            backend.open(&mut supply, &params()),
            Err(DecoderSetupError::NoVideoStream)
        );
        assert_eq!(supply.packets(), FIRST_PICTURE_PACKET_LIMIT);
    }

    #[test]
    fn test_zero_sized_output_is_rejected() {
        let mut supply = supply(VecSource(encoded_picture().into_iter()));
        let mut backend = OpenH264Backend::new().unwrap();
        let params = OutputParams {
            width: 0,
            ..params()
        };

        assert!(matches!(
            backend.open(&mut supply, &params),
            Err(DecoderSetupError::OpenConversion(_))
        ));
        assert_eq!(supply.packets(), 0);
    }

    #[test]
    fn test_first_picture_comes_out_first() {
        let mut supply = supply(VecSource(encoded_picture().into_iter()));
        let mut backend = OpenH264Backend::new().unwrap();

        let stream = backend.open(&mut supply, &params()).unwrap();
        assert_eq!(stream, StreamInfo { width: 64, height: 48 });

        match backend.decode_next(&mut supply) {
            DecodeStep::Frame(frame) => {
                assert_eq!(frame.sequence, 0);
                assert_eq!((frame.width, frame.height), (32, 24));
                assert!(frame.is_valid());
            }
            other => panic!("expected the first picture, got {:?}", other),
        }
        assert!(matches!(
            backend.decode_next(&mut supply),
            DecodeStep::EndOfStream
        ));
    }
}
