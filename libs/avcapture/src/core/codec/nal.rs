// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

// H.264 NAL unit splitting and packaging
//
// Encoders hand out length-prefixed access units (AVCC style, 1-4 byte prefix),
// the MP4 container wants 4-byte prefixes, and some producers emit Annex B
// start codes. Everything here works on borrowed slices; nothing re-encodes.

use bytes::{BufMut, Bytes, BytesMut};

const START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

// ============================================================================
// NAL UNIT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    NonIdrSlice,
    IdrSlice,
    Sei,
    Sps,
    Pps,
    AccessUnitDelimiter,
    Other(u8),
}

/// Classify a NAL unit by the low five bits of its header byte.
pub fn nal_unit_type(header: u8) -> NalUnitType {
    match header & 0x1F {
        1 => NalUnitType::NonIdrSlice,
        5 => NalUnitType::IdrSlice,
        6 => NalUnitType::Sei,
        7 => NalUnitType::Sps,
        8 => NalUnitType::Pps,
        9 => NalUnitType::AccessUnitDelimiter,
        other => NalUnitType::Other(other),
    }
}

// ============================================================================
// LENGTH-PREFIXED SPLITTER
// ============================================================================

/// Lazy iterator over the NAL units of a length-prefixed buffer.
///
/// Yields unit bodies with the prefix stripped, borrowing from the source.
/// Iteration ends silently when fewer than `prefix_width + 1` bytes remain or
/// when a declared length runs past the end of the buffer.
#[derive(Debug, Clone)]
pub struct NalUnits<'a> {
    data: &'a [u8],
    prefix_width: usize,
    pos: usize,
}

impl<'a> NalUnits<'a> {
    /// `prefix_width` outside 1..=4 yields an empty iterator.
    pub fn new(data: &'a [u8], prefix_width: u8) -> Self {
        let prefix_width = prefix_width as usize;
        let pos = if (1..=4).contains(&prefix_width) {
            0
        } else {
            data.len()
        };
        Self {
            data,
            prefix_width,
            pos,
        }
    }

    /// Byte offset of the next unread length prefix.
    pub fn position(&self) -> usize {
        self.pos
    }
}

impl<'a> Iterator for NalUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = self.data.len() - self.pos;
        if remaining <= self.prefix_width {
            return None;
        }

        let prefix = &self.data[self.pos..self.pos + self.prefix_width];
        let length = prefix
            .iter()
            .fold(0usize, |acc, &byte| (acc << 8) | byte as usize);

        let start = self.pos + self.prefix_width;
        let Some(end) = start.checked_add(length).filter(|&end| end <= self.data.len()) else {
            tracing::trace!(
                offset = self.pos,
                length,
                remaining,
                "NAL unit length overruns buffer, stopping"
            );
            self.pos = self.data.len();
            return None;
        };

        self.pos = end;
        Some(&self.data[start..end])
    }
}

impl std::iter::FusedIterator for NalUnits<'_> {}

/// Split a shared buffer into zero-copy `Bytes` views of each NAL unit.
pub fn split_length_prefixed(data: &Bytes, prefix_width: u8) -> Vec<Bytes> {
    NalUnits::new(data, prefix_width)
        .map(|unit| data.slice_ref(unit))
        .collect()
}

/// True if any unit in the buffer is an IDR slice.
pub fn contains_idr(data: &[u8], prefix_width: u8) -> bool {
    NalUnits::new(data, prefix_width)
        .any(|unit| !unit.is_empty() && nal_unit_type(unit[0]) == NalUnitType::IdrSlice)
}

// ============================================================================
// ANNEX B
// ============================================================================

/// True if the buffer starts with a 3- or 4-byte start code.
pub fn is_annex_b(data: &[u8]) -> bool {
    data.starts_with(&[0x00, 0x00, 0x01]) || data.starts_with(START_CODE)
}

/// Lazy iterator over the NAL units of an Annex B byte stream.
#[derive(Debug, Clone)]
pub struct AnnexBUnits<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> AnnexBUnits<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> Iterator for AnnexBUnits<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (code_at, code_len) = find_start_code(&self.data[self.pos..])?;
            let start = self.pos + code_at + code_len;
            let end = find_start_code(&self.data[start..])
                .map(|(next, _)| start + next)
                .unwrap_or(self.data.len());
            self.pos = end;

            // Trailing zero bytes before the next start code belong to it.
            let mut unit = &self.data[start..end];
            while let [rest @ .., 0] = unit {
                unit = rest;
            }
            if !unit.is_empty() {
                return Some(unit);
            }
        }
    }
}

fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    data.windows(3)
        .position(|window| window == [0x00, 0x00, 0x01])
        .map(|at| {
            if at > 0 && data[at - 1] == 0 {
                (at - 1, 4)
            } else {
                (at, 3)
            }
        })
}

/// Convert an Annex B stream to 4-byte length-prefixed units.
pub fn annex_b_to_length_prefixed(data: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 16);
    for unit in AnnexBUnits::new(data) {
        out.put_u32(unit.len() as u32);
        out.put_slice(unit);
    }
    out.freeze()
}

/// Convert length-prefixed units to an Annex B stream with 4-byte start codes.
pub fn length_prefixed_to_annex_b(data: &[u8], prefix_width: u8) -> Bytes {
    let mut out = BytesMut::with_capacity(data.len() + 16);
    for unit in NalUnits::new(data, prefix_width) {
        out.put_slice(START_CODE);
        out.put_slice(unit);
    }
    out.freeze()
}

/// Re-prefix every unit with a 4-byte big-endian length.
///
/// Buffers that already use 4-byte prefixes are returned without copying.
pub fn to_four_byte_prefixes(data: &Bytes, prefix_width: u8) -> Bytes {
    if is_annex_b(data) {
        return annex_b_to_length_prefixed(data);
    }
    if prefix_width == 4 {
        return data.clone();
    }
    let mut out = BytesMut::with_capacity(data.len() + 16);
    for unit in NalUnits::new(data, prefix_width) {
        out.put_u32(unit.len() as u32);
        out.put_slice(unit);
    }
    out.freeze()
}
