use tc_core::config::{MAX_DATAGRAM_BYTES, NonFinitePolicy, OscConfig};
use tc_core::feature::{FeatureCatalog, FeatureSnapshot};

use crate::error::OscError;
use crate::message::{BUNDLE_HEADER_LEN, BUNDLE_TAG, TIME_TAG_IMMEDIATE, element_len, kind_of, write_message};

/// Smallest budget that still holds a bundle header and a short message.
pub const MIN_BUDGET: usize = 64;

/// One datagram, ready for the sink.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedPacket {
    bytes: Vec<u8>,
}

impl EncodedPacket {
    #[cfg(test)]
    pub(crate) fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Raw datagram bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Datagram size.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// `true` for a zero-byte packet (never produced by the encoder).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Packs a snapshot into size-bounded OSC bundles.
///
/// Messages follow catalog order. A bundle is closed as soon as the next
/// message would push it over the byte budget; a message that is larger than
/// the budget on its own gets a bundle to itself. Every feature therefore
/// appears in exactly one message of the tick.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use tc_core::config::NonFinitePolicy;
/// use tc_core::feature::{FeatureCatalog, FeatureSnapshot, FeatureSpec, FeatureValue};
/// use tc_osc::encoder::PacketEncoder;
///
/// let mut catalog = FeatureCatalog::default();
/// catalog.push("aubio", FeatureSpec::scalar("bpm")).unwrap();
/// let snap = FeatureSnapshot::new(0, Arc::new(catalog), vec![FeatureValue::Scalar(120.0)]);
///
/// let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
/// let packets = encoder.encode(&snap).unwrap();
/// assert_eq!(packets.len(), 1);
/// assert!(packets[0].as_bytes().starts_with(b"#bundle\0"));
/// ```
#[derive(Clone, Debug)]
pub struct PacketEncoder {
    budget: usize,
    policy: NonFinitePolicy,
}

impl PacketEncoder {
    /// Encoder packing bundles of at most `budget` bytes.
    ///
    /// # Errors
    /// Returns [`OscError::InvalidBudget`] outside `[64, 65507]`.
    pub fn new(budget: usize, policy: NonFinitePolicy) -> Result<Self, OscError> {
        if !(MIN_BUDGET..=MAX_DATAGRAM_BYTES).contains(&budget) {
            return Err(OscError::InvalidBudget(budget));
        }
        Ok(Self { budget, policy })
    }

    /// Encoder using `osc.max_packet_bytes` and `osc.non_finite`.
    ///
    /// # Errors
    /// See [`PacketEncoder::new`].
    pub fn from_config(osc: &OscConfig) -> Result<Self, OscError> {
        Self::new(osc.max_packet_bytes, osc.non_finite)
    }

    /// Byte budget of one bundle.
    #[must_use]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Non-finite value policy.
    #[must_use]
    pub fn policy(&self) -> NonFinitePolicy {
        self.policy
    }

    /// Setup check: every feature must fit in one datagram, alone if needed.
    ///
    /// # Errors
    /// Returns [`OscError::MessageTooLarge`] for the first feature that cannot.
    pub fn check_catalog(&self, catalog: &FeatureCatalog) -> Result<(), OscError> {
        for decl in catalog.iter() {
            let bytes = BUNDLE_HEADER_LEN + element_len(&decl.address, decl.kind);
            if bytes > MAX_DATAGRAM_BYTES {
                return Err(OscError::MessageTooLarge {
                    address: decl.address.clone(),
                    bytes,
                    limit: MAX_DATAGRAM_BYTES,
                });
            }
            if bytes > self.budget {
                log::warn!(
                    "{} : {bytes} octets > budget {}, envoyé seul dans son bundle",
                    decl.address,
                    self.budget
                );
            }
        }
        Ok(())
    }

    /// Encode one tick.
    ///
    /// # Errors
    /// Under [`NonFinitePolicy::Drop`], any NaN or infinite value drops the
    /// whole tick. Nothing is produced on error.
    pub fn encode(&self, snapshot: &FeatureSnapshot) -> Result<Vec<EncodedPacket>, OscError> {
        let mut packets = Vec::new();
        self.encode_into(snapshot, &mut packets)?;
        Ok(packets)
    }

    /// Same as [`PacketEncoder::encode`], reusing `out`.
    ///
    /// # Errors
    /// See [`PacketEncoder::encode`]. `out` is left empty on error.
    pub fn encode_into(&self, snapshot: &FeatureSnapshot, out: &mut Vec<EncodedPacket>) -> Result<(), OscError> {
        out.clear();
        let map: fn(f32) -> f32 = match self.policy {
            NonFinitePolicy::Drop => {
                if let Some((decl, _)) = snapshot.iter().find(|(_, v)| !v.is_finite()) {
                    return Err(OscError::NonFinite {
                        address: decl.address.clone(),
                    });
                }
                std::convert::identity
            }
            NonFinitePolicy::Sanitize => sanitize,
            NonFinitePolicy::Pass => std::convert::identity,
        };

        let mut bundle = Vec::new();
        for (decl, value) in snapshot.iter() {
            let element = element_len(&decl.address, kind_of(value));
            if BUNDLE_HEADER_LEN + element > MAX_DATAGRAM_BYTES {
                out.clear();
                return Err(OscError::MessageTooLarge {
                    address: decl.address.clone(),
                    bytes: BUNDLE_HEADER_LEN + element,
                    limit: MAX_DATAGRAM_BYTES,
                });
            }
            if bundle.len() > BUNDLE_HEADER_LEN && bundle.len() + element > self.budget {
                out.push(EncodedPacket {
                    bytes: std::mem::take(&mut bundle),
                });
            }
            if bundle.is_empty() {
                bundle.reserve(self.budget.max(BUNDLE_HEADER_LEN + element));
                bundle.extend_from_slice(BUNDLE_TAG);
                bundle.extend_from_slice(&TIME_TAG_IMMEDIATE.to_be_bytes());
            }
            let size_at = bundle.len();
            bundle.extend_from_slice(&[0; 4]);
            write_message(&mut bundle, &decl.address, value, map);
            let written = (bundle.len() - size_at - 4) as u32;
            bundle[size_at..size_at + 4].copy_from_slice(&written.to_be_bytes());
        }
        if bundle.len() > BUNDLE_HEADER_LEN {
            out.push(EncodedPacket { bytes: bundle });
        }
        Ok(())
    }
}

/// NaN -> 0, ±inf -> ±f32::MAX.
fn sanitize(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else if x.is_infinite() {
        f32::MAX.copysign(x)
    } else {
        x
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use tc_core::feature::{FeatureKind, FeatureSpec, FeatureValue};

    use super::*;
    use crate::message::decode_packet;

    /// Same shapes as the standard analyzer bank.
    fn standard_catalog() -> FeatureCatalog {
        let mut catalog = FeatureCatalog::default();
        let scalars = [
            "rms", "power", "pitchFreq", "pitchConf", "pitchSalience", "inharmonicity", "hfc",
            "specComp", "centroid", "rollOff", "oddToEven", "strongPeak", "strongDecay",
            "dissonance", "pitchFreqNorm", "hfcNorm", "specCompNorm", "centroidNorm",
            "rollOffNorm", "oddToEvenNorm", "strongPeakNorm", "strongDecayNorm",
        ];
        for name in scalars {
            catalog.push("essentia", FeatureSpec::scalar(name)).unwrap();
        }
        catalog.push("essentia", FeatureSpec::flag("isOnset")).unwrap();
        for (name, len) in [
            ("melBands", 24),
            ("mfcc", 13),
            ("tristimulus", 3),
            ("spectrum", 257),
            ("hpcp", 12),
            ("polyphonicPitch", 88),
        ] {
            catalog.push("essentia", FeatureSpec::vector(name, len)).unwrap();
        }
        for name in ["onsetNovelty", "monophonicMidiPitch", "bpm"] {
            catalog.push("aubio", FeatureSpec::scalar(name)).unwrap();
        }
        catalog
    }

    /// Deterministic, distinct values for every feature.
    fn snapshot(catalog: FeatureCatalog) -> FeatureSnapshot {
        let values = catalog
            .iter()
            .enumerate()
            .map(|(i, d)| match d.kind {
                FeatureKind::Scalar => FeatureValue::Scalar(i as f32 * 0.5 - 3.0),
                FeatureKind::Flag => FeatureValue::Flag(i % 2 == 0),
                FeatureKind::Vector(len) => {
                    FeatureValue::Vector((0..len).map(|k| (i * 1000 + k) as f32 / 7.0).collect())
                }
            })
            .collect();
        FeatureSnapshot::new(42, Arc::new(catalog), values)
    }

    fn decode_all(packets: &[EncodedPacket]) -> Vec<crate::message::OscMessage> {
        packets
            .iter()
            .flat_map(|p| decode_packet(p.as_bytes()).unwrap())
            .collect()
    }

    #[test]
    fn round_trip_restores_every_feature_once() {
        let snap = snapshot(standard_catalog());
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        let messages = decode_all(&encoder.encode(&snap).unwrap());

        assert_eq!(messages.len(), snap.len());
        for ((decl, value), message) in snap.iter().zip(&messages) {
            assert_eq!(message.address, decl.address);
            assert_eq!(message.to_value(decl.kind).as_ref(), Some(value));
        }
    }

    #[test]
    fn oversized_snapshot_is_split_under_budget() {
        let snap = snapshot(standard_catalog());
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        let packets = encoder.encode(&snap).unwrap();

        assert!(packets.len() >= 2);
        for p in &packets {
            assert!(p.len() <= 1472, "{} octets", p.len());
            assert!(p.as_bytes().starts_with(b"#bundle\0"));
            assert_eq!(&p.as_bytes()[8..16], &1u64.to_be_bytes());
        }
        let addresses: Vec<String> = decode_all(&packets).into_iter().map(|m| m.address).collect();
        let unique: HashSet<&String> = addresses.iter().collect();
        assert_eq!(unique.len(), addresses.len());
        let expected: Vec<String> = snap.catalog().iter().map(|d| d.address.clone()).collect();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn message_larger_than_budget_travels_alone() {
        let snap = snapshot(standard_catalog());
        let encoder = PacketEncoder::new(MIN_BUDGET, NonFinitePolicy::Drop).unwrap();
        let packets = encoder.encode(&snap).unwrap();

        for p in &packets {
            let messages = decode_packet(p.as_bytes()).unwrap();
            assert!(p.len() <= MIN_BUDGET || messages.len() == 1);
        }
        let spectrum = packets
            .iter()
            .find(|p| decode_packet(p.as_bytes()).unwrap()[0].address == "/essentia/spectrum")
            .unwrap();
        assert_eq!(decode_packet(spectrum.as_bytes()).unwrap().len(), 1);
        assert_eq!(decode_all(&packets).len(), snap.len());
    }

    #[test]
    fn encoding_is_deterministic() {
        let encoder = PacketEncoder::new(512, NonFinitePolicy::Drop).unwrap();
        let a = encoder.encode(&snapshot(standard_catalog())).unwrap();
        let b = encoder.encode(&snapshot(standard_catalog())).unwrap();
        assert_eq!(a, b);
    }

    fn with_bad_values() -> FeatureSnapshot {
        let mut catalog = FeatureCatalog::default();
        catalog.push("essentia", FeatureSpec::scalar("rms")).unwrap();
        catalog.push("essentia", FeatureSpec::scalar("hfc")).unwrap();
        catalog.push("essentia", FeatureSpec::vector("mfcc", 2)).unwrap();
        FeatureSnapshot::new(
            0,
            Arc::new(catalog),
            vec![
                FeatureValue::Scalar(0.5),
                FeatureValue::Scalar(f32::NAN),
                FeatureValue::Vector(vec![f32::INFINITY, f32::NEG_INFINITY]),
            ],
        )
    }

    #[test]
    fn drop_policy_rejects_the_tick() {
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        let mut out = vec![EncodedPacket { bytes: vec![1] }];
        let err = encoder.encode_into(&with_bad_values(), &mut out).unwrap_err();
        assert!(matches!(err, OscError::NonFinite { ref address } if address == "/essentia/hfc"));
        assert!(out.is_empty());
    }

    #[test]
    fn sanitize_policy_clamps() {
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Sanitize).unwrap();
        let messages = decode_all(&encoder.encode(&with_bad_values()).unwrap());
        assert_eq!(messages[0].floats(), vec![0.5]);
        assert_eq!(messages[1].floats(), vec![0.0]);
        assert_eq!(messages[2].floats(), vec![f32::MAX, -f32::MAX]);
    }

    #[test]
    fn pass_policy_sends_raw_bits() {
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Pass).unwrap();
        let messages = decode_all(&encoder.encode(&with_bad_values()).unwrap());
        assert!(messages[1].floats()[0].is_nan());
        assert_eq!(messages[2].floats(), vec![f32::INFINITY, f32::NEG_INFINITY]);
    }

    #[test]
    fn setup_rejects_undeliverable_feature() {
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        assert!(encoder.check_catalog(&standard_catalog()).is_ok());

        let mut catalog = FeatureCatalog::default();
        catalog.push("essentia", FeatureSpec::vector("huge", 20_000)).unwrap();
        assert!(matches!(
            encoder.check_catalog(&catalog),
            Err(OscError::MessageTooLarge { limit: MAX_DATAGRAM_BYTES, .. })
        ));
    }

    #[test]
    fn budget_bounds() {
        assert!(PacketEncoder::new(32, NonFinitePolicy::Drop).is_err());
        assert!(PacketEncoder::new(70_000, NonFinitePolicy::Drop).is_err());
        assert!(PacketEncoder::from_config(&OscConfig::default()).is_ok());
    }

    #[test]
    fn empty_snapshot_sends_nothing() {
        let snap = FeatureSnapshot::new(0, Arc::new(FeatureCatalog::default()), Vec::new());
        let encoder = PacketEncoder::new(1472, NonFinitePolicy::Drop).unwrap();
        assert!(encoder.encode(&snap).unwrap().is_empty());
    }
}
