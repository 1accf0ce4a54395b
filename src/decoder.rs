//! Heart Rate Measurement decoding
//!
//! This module decodes the standard BLE Heart Rate Measurement characteristic
//! (0x2A37) into [`HeartRateSample`]s:
//! - Byte 0: flags
//! - Heart rate: u8, or u16 little-endian when flag bit 0 is set
//! - Energy expended: u16 little-endian when flag bit 3 is set
//! - RR intervals: u16 little-endian pairs (1/1024 s) to the end of the packet
//!   when flag bit 4 is set; samples carry them in milliseconds
//!
//! Decoding is pure and touches no shared state.

use crate::error::DecodeError;
use crate::types::{rr_wire_to_ms, HeartRateSample, SensorContact};
use chrono::{DateTime, Utc};

/// Heart rate value is 16 bits wide
pub const FLAG_HR_16BIT: u8 = 0x01;
/// Sensor contact detected
pub const FLAG_CONTACT_DETECTED: u8 = 0x02;
/// Sensor contact feature supported
pub const FLAG_CONTACT_SUPPORTED: u8 = 0x04;
/// Energy expended field present
pub const FLAG_ENERGY_EXPENDED: u8 = 0x08;
/// RR interval fields present
pub const FLAG_RR_INTERVALS: u8 = 0x10;

/// Decoder for Heart Rate Measurement packets
pub struct PacketDecoder;

impl PacketDecoder {
    /// Decode a raw packet, stamping it with `received_at`
    pub fn decode(
        raw: &[u8],
        device_id: &str,
        device_name: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> Result<HeartRateSample, DecodeError> {
        let mut reader = ByteReader::new(raw);
        let flags = reader.read_u8("flags").map_err(|_| DecodeError::Empty)?;

        let wide_heart_rate = flags & FLAG_HR_16BIT != 0;
        let heart_rate = if wide_heart_rate {
            reader.read_u16_le("heart_rate")?
        } else {
            u16::from(reader.read_u8("heart_rate")?)
        };

        let energy_expended = if flags & FLAG_ENERGY_EXPENDED != 0 {
            Some(reader.read_u16_le("energy_expended")?)
        } else {
            None
        };

        let rr_intervals = if flags & FLAG_RR_INTERVALS != 0 {
            let mut intervals = Vec::with_capacity(reader.remaining() / 2);
            while reader.remaining() >= 2 {
                intervals.push(rr_wire_to_ms(reader.read_u16_le("rr_interval")?));
            }
            if reader.remaining() > 0 {
                log::debug!(
                    "{device_id}: dropping {} trailing byte(s) after RR intervals",
                    reader.remaining()
                );
            }
            Some(intervals)
        } else {
            None
        };

        Ok(HeartRateSample {
            device_id: device_id.to_string(),
            device_name: device_name.map(str::to_string),
            heart_rate,
            wide_heart_rate,
            sensor_contact: sensor_contact(flags),
            energy_expended,
            rr_intervals,
            timestamp: received_at,
        })
    }
}

fn sensor_contact(flags: u8) -> SensorContact {
    if flags & FLAG_CONTACT_SUPPORTED == 0 {
        SensorContact::NotSupported
    } else if flags & FLAG_CONTACT_DETECTED != 0 {
        SensorContact::Detected
    } else {
        SensorContact::NotDetected
    }
}

/// Encode a sample back into Heart Rate Measurement wire bytes.
///
/// The 16-bit heart rate layout is used when the sample was decoded from a
/// wide packet or the value does not fit in a byte.
pub fn encode_measurement(sample: &HeartRateSample) -> Vec<u8> {
    let wide = sample.wide_heart_rate || sample.heart_rate > u16::from(u8::MAX);

    let mut flags = 0u8;
    if wide {
        flags |= FLAG_HR_16BIT;
    }
    match sample.sensor_contact {
        SensorContact::NotSupported => {}
        SensorContact::NotDetected => flags |= FLAG_CONTACT_SUPPORTED,
        SensorContact::Detected => flags |= FLAG_CONTACT_SUPPORTED | FLAG_CONTACT_DETECTED,
    }
    if sample.energy_expended.is_some() {
        flags |= FLAG_ENERGY_EXPENDED;
    }
    if sample.rr_intervals.is_some() {
        flags |= FLAG_RR_INTERVALS;
    }

    let mut bytes = vec![flags];
    if wide {
        bytes.extend_from_slice(&sample.heart_rate.to_le_bytes());
    } else {
        bytes.push(sample.heart_rate as u8);
    }
    if let Some(energy) = sample.energy_expended {
        bytes.extend_from_slice(&energy.to_le_bytes());
    }
    for rr in sample.rr_intervals_raw() {
        bytes.extend_from_slice(&rr.to_le_bytes());
    }
    bytes
}

/// Cursor over a packet that refuses to read past the end
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn read_u16_le(&mut self, field: &'static str) -> Result<u16, DecodeError> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }
}
