use base64::Engine;

/// Sample rate the realtime API expects for pcm16 input.
pub const REALTIME_API_PCM16_SAMPLE_RATE: u32 = 24_000;
/// Mono, 16-bit samples.
pub const PCM16_BYTES_PER_SAMPLE: usize = 2;

/// Encodes raw little-endian pcm16 bytes as a base64 string.
pub fn encode(pcm16: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(pcm16)
}

/// Playback length of a mono 24 kHz pcm16 buffer.
pub fn pcm16_duration_ms(byte_len: usize) -> u64 {
    let samples = (byte_len / PCM16_BYTES_PER_SAMPLE) as u64;
    samples * 1000 / REALTIME_API_PCM16_SAMPLE_RATE as u64
}
