//! Boundary tests for the Kuba codec
//!
//! Each delta-of-delta tier is exercised at both of its edges and one step
//! past them, checking the round trip and the exact number of bits written.

use kuba_tscore::compression::bit_stream::BitWriter;
use kuba_tscore::compression::kuba::{self, ReplayState};
use kuba_tscore::storage::CompressedChunk;
use kuba_tscore::Sample;

/// Bits for the second sample: raw 64-bit delta plus one unchanged-value bit
const SECOND_SAMPLE_BITS: usize = 65;

fn three_samples(first_delta: i64, dod: i64) -> CompressedChunk {
    let mut chunk = CompressedChunk::new(64);
    let t1 = first_delta;
    let t2 = t1 + first_delta + dod;
    for ts in [0, t1, t2] {
        chunk
            .add(Sample::new(ts, 1.0))
            .unwrap_or_else(|e| panic!("add failed for dod {}: {}", dod, e));
    }
    chunk
}

#[test]
fn test_delta_of_delta_tiers() {
    // (dod, bits for the third sample including its 1-bit value)
    let cases = [
        (0, 2),
        (1, 10),
        (63, 10),
        (-64, 10),
        (64, 13),
        (-65, 13),
        (255, 13),
        (-256, 13),
        (256, 17),
        (-257, 17),
        (2047, 17),
        (-2048, 17),
        (2048, 38),
        (-2049, 38),
        (i32::MAX as i64, 38),
        (i32::MAX as i64 + 1, 70),
        (1 << 40, 70),
    ];

    for (dod, bits) in cases {
        let chunk = three_samples(10_000, dod);
        assert_eq!(
            chunk.bit_len(),
            SECOND_SAMPLE_BITS + bits,
            "bit count for dod {}",
            dod
        );

        let decoded: Vec<Sample> = chunk.decoder().map(|s| s.unwrap()).collect();
        let expected_last = 10_000 + 10_000 + dod;
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].timestamp, expected_last, "round trip for dod {}", dod);
    }
}

#[test]
fn test_negative_large_dod() {
    // Shrinking a very large first delta produces a dod below i32::MIN
    let first_delta = 1i64 << 40;
    let chunk = three_samples(first_delta, -(1i64 << 39));
    let decoded: Vec<Sample> = chunk.decoder().map(|s| s.unwrap()).collect();
    assert_eq!(decoded[2].timestamp, first_delta * 2 - (1 << 39));
    assert_eq!(chunk.bit_len(), SECOND_SAMPLE_BITS + 70);
}

#[test]
fn test_extreme_timestamps_wrap() {
    let mut chunk = CompressedChunk::new(64);
    chunk.add(Sample::new(i64::MIN, 0.5)).unwrap();
    chunk.add(Sample::new(-1, 0.5)).unwrap();
    chunk.add(Sample::new(i64::MAX, 0.5)).unwrap();

    let decoded: Vec<i64> = chunk.decoder().map(|s| s.unwrap().timestamp).collect();
    assert_eq!(decoded, vec![i64::MIN, -1, i64::MAX]);
}

#[test]
fn test_value_bit_patterns() {
    let values = [
        0.0,
        -0.0,
        f64::MIN_POSITIVE,
        f64::MAX,
        f64::MIN,
        f64::INFINITY,
        f64::NEG_INFINITY,
        f64::NAN,
        1.0,
        1.0,
        f64::EPSILON,
    ];

    let mut chunk = CompressedChunk::new(512);
    for (i, &v) in values.iter().enumerate() {
        chunk.add(Sample::new(i as i64 * 1_000, v)).unwrap();
    }

    for (decoded, &v) in chunk.decoder().zip(values.iter()) {
        assert_eq!(decoded.unwrap().value.to_bits(), v.to_bits());
    }
}

#[test]
fn test_xor_window_reuse_costs_control_bits_only() {
    // 2.0 -> 3.0 -> 2.0 flips the same mantissa bit, so the third sample
    // reuses the window opened by the second
    let mut writer = BitWriter::with_capacity_bytes(64);
    let mut state = ReplayState::new(0, 2.0);
    kuba::encode(&mut writer, &mut state, 1, 10, 3.0).unwrap();
    let after_second = writer.bit_len();
    kuba::encode(&mut writer, &mut state, 2, 20, 2.0).unwrap();

    let window = 64 - state.prev_leading as usize - state.prev_trailing as usize;
    assert_eq!(writer.bit_len() - after_second, 1 + 2 + window);

    let mut reader = writer.reader();
    let mut replay = ReplayState::new(0, 2.0);
    assert_eq!(kuba::decode(&mut reader, &mut replay, 1).unwrap(), Sample::new(10, 3.0));
    assert_eq!(kuba::decode(&mut reader, &mut replay, 2).unwrap(), Sample::new(20, 2.0));
    assert_eq!(replay, state);
}

#[test]
fn test_leading_zeros_clamped() {
    // XOR with 40 leading zeros is stored with a 31-bit leading field
    let base = 1.0f64;
    let next = f64::from_bits(base.to_bits() ^ (1u64 << 23));

    let mut writer = BitWriter::with_capacity_bytes(64);
    let mut state = ReplayState::new(0, base);
    kuba::encode(&mut writer, &mut state, 1, 1, next).unwrap();
    assert_eq!(state.prev_leading, 31);
    assert_eq!(state.prev_trailing, 23);

    let mut reader = writer.reader();
    let mut replay = ReplayState::new(0, base);
    let sample = kuba::decode(&mut reader, &mut replay, 1).unwrap();
    assert_eq!(sample.value.to_bits(), next.to_bits());
}

#[test]
fn test_full_buffer_is_atomic() {
    let mut writer = BitWriter::with_capacity_bytes(8);
    let mut state = ReplayState::new(0, 1.0);
    let before = state;

    // 64-bit delta plus a value bit does not fit in 64 bits
    assert!(kuba::encode(&mut writer, &mut state, 1, 5, 1.0).is_err());
    assert_eq!(writer.bit_len(), 0);
    assert_eq!(state, before);
}
