// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! SPS/PPS extraction from encoder format descriptions.

use bytes::Bytes;

use super::nal::{nal_unit_type, NalUnitType};
use crate::core::format::{H264ParameterSetSource, AVCC_ATOM};

/// Codec configuration captured from an encoder's first successful output.
///
/// Immutable once built. See [`ParameterSets::is_valid`] for when the value is
/// usable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    nal_header_length: u8,
    avcc: Option<Bytes>,
}

impl ParameterSets {
    pub fn new(
        sps: Option<Bytes>,
        pps: Option<Bytes>,
        nal_header_length: u8,
        avcc: Option<Bytes>,
    ) -> Self {
        Self {
            sps,
            pps,
            nal_header_length,
            avcc,
        }
    }

    /// Extract parameter sets from a format description.
    ///
    /// A failed count query yields an empty (invalid) value. Individual
    /// parameter sets that cannot be fetched are skipped; anything that is not
    /// an SPS or PPS is discarded.
    pub fn from_format_description(source: &dyn H264ParameterSetSource) -> Self {
        let (count, nal_header_length) = match source.h264_parameter_set_info() {
            Ok(info) => info,
            Err(e) => {
                tracing::debug!(error = %e, "parameter set query failed");
                return Self::default();
            }
        };

        let mut sps = None;
        let mut pps = None;
        for index in 0..count {
            let data = match source.h264_parameter_set_at(index) {
                Ok(data) if !data.is_empty() => data,
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(index, error = %e, "parameter set fetch failed");
                    continue;
                }
            };
            match nal_unit_type(data[0]) {
                NalUnitType::Sps => sps = Some(Bytes::copy_from_slice(data)),
                NalUnitType::Pps => pps = Some(Bytes::copy_from_slice(data)),
                other => tracing::trace!(index, ?other, "ignoring non-parameter-set NAL"),
            }
        }

        let avcc = source.extension_atom(AVCC_ATOM);

        Self {
            sps,
            pps,
            nal_header_length,
            avcc,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.nal_header_length > 0 && (self.sps.is_some() || self.pps.is_some())
    }

    pub fn sps(&self) -> Option<&Bytes> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Bytes> {
        self.pps.as_ref()
    }

    pub fn nal_header_length(&self) -> u8 {
        self.nal_header_length
    }

    /// Prebuilt `avcC` record, when the description carried one.
    pub fn avcc(&self) -> Option<&Bytes> {
        self.avcc.as_ref()
    }
}
