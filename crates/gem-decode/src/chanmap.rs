//! APV channel map: translates a chip-internal channel index into a physical
//! strip index, and the chip position/mapping-family table (spec §3, §4.5).

use crate::geometry::Axis;
use tracing::warn;

/// The four fixed 0..127 channel-to-strip permutations a chip may use,
/// selected by the `apvmap` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApvMapFamily {
    /// INFN mapping.
    Infn,
    /// UVA mapping for X/Y-style readout.
    UvaXy,
    /// UVA mapping for U/V-style readout.
    UvaUv,
    /// Identity mapping, used for Monte Carlo generated data.
    MonteCarlo,
}

impl ApvMapFamily {
    /// Parse a config-file mapping-family tag. Unknown tags trigger
    /// `APVMappingInvalid` (spec §7): a warning is logged and the INFN
    /// family is substituted so analysis can proceed (possibly incorrectly).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "infn" | "INFN" => ApvMapFamily::Infn,
            "uva_xy" | "UVA_XY" => ApvMapFamily::UvaXy,
            "uva_uv" | "UVA_UV" => ApvMapFamily::UvaUv,
            "mc" | "MC" => ApvMapFamily::MonteCarlo,
            other => {
                warn!(tag = other, "unknown APV mapping family, defaulting to INFN");
                ApvMapFamily::Infn
            }
        }
    }
}

/// Number of channels on one APV front-end chip.
pub const APV_CHANNELS: usize = 128;

/// The fixed channel -> strip permutation for one [`ApvMapFamily`], a table
/// of 128 entries computed once and reused for every chip of that family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelToStripMap {
    table: [i32; APV_CHANNELS],
}

impl ChannelToStripMap {
    /// Build the fixed permutation table for `family`.
    pub fn build(family: ApvMapFamily) -> Self {
        let mut table = [0i32; APV_CHANNELS];
        for (i, slot) in table.iter_mut().enumerate() {
            let i = i as i32;
            *slot = match family {
                ApvMapFamily::MonteCarlo => i,
                _ => {
                    let strip1 = 32 * (i % 4) + 8 * (i / 4) - 31 * (i / 16);
                    match family {
                        ApvMapFamily::Infn => strip1,
                        _ => {
                            let strip2 = strip1 + 1 + strip1 % 4 - 5 * ((strip1 / 4) % 2);
                            match family {
                                ApvMapFamily::UvaXy => strip2,
                                ApvMapFamily::UvaUv => {
                                    if strip2 % 2 == 0 {
                                        strip2 / 2 + 32
                                    } else if strip2 < 64 {
                                        (63 - strip2) / 2
                                    } else {
                                        127 + (65 - strip2) / 2
                                    }
                                }
                                ApvMapFamily::MonteCarlo | ApvMapFamily::Infn => unreachable!(),
                            }
                        }
                    }
                }
            };
        }
        Self { table }
    }

    /// The within-chip strip index for raw channel `channel` (0..127).
    pub fn channel_to_strip(&self, channel: u32) -> i32 {
        self.table[(channel as usize) % APV_CHANNELS]
    }
}

/// One physical APV25 chip's mapping entry (spec §3: "ordered sequence of
/// entries, each carrying (crate, slot, chip id, chip position along axis,
/// channel-inversion flag, axis tag, dense chip index)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipMapEntry {
    pub crate_id: u32,
    pub slot: u32,
    pub chip_id: u32,
    /// Chip's ordinal position along its axis (multiplies by 128 to locate
    /// its channels in the strip-index space).
    pub position: u32,
    /// Channel numbering is reversed on this chip.
    pub invert: bool,
    pub axis: Axis,
    /// Contiguous dense index of this chip among all mapped chips.
    pub dense_index: usize,
}

/// Ordered table of chip map entries plus the shared channel-to-strip
/// permutation, for one mapping family.
#[derive(Debug, Clone)]
pub struct ChipMap {
    entries: Vec<ChipMapEntry>,
    family: ApvMapFamily,
    channel_map: ChannelToStripMap,
}

impl ChipMap {
    pub fn new(entries: Vec<ChipMapEntry>, family: ApvMapFamily) -> Self {
        let channel_map = ChannelToStripMap::build(family);
        Self {
            entries,
            family,
            channel_map,
        }
    }

    pub fn entries(&self) -> &[ChipMapEntry] {
        &self.entries
    }

    pub fn family(&self) -> ApvMapFamily {
        self.family
    }

    pub fn entry_for(&self, crate_id: u32, slot: u32, chip_id: u32) -> Option<&ChipMapEntry> {
        self.entries
            .iter()
            .find(|e| e.crate_id == crate_id && e.slot == slot && e.chip_id == chip_id)
    }

    /// Translate a raw channel on `entry`'s chip to its physical strip index,
    /// per `GetStripNumber` in the original readout module: permute via the
    /// family table, optionally invert about the chip's 128-channel span,
    /// then offset by the chip's position along the axis.
    pub fn strip_index(&self, entry: &ChipMapEntry, channel: u32) -> i32 {
        if self.family == ApvMapFamily::MonteCarlo {
            return channel as i32 + 128 * entry.position as i32;
        }
        let mut strip = self.channel_map.channel_to_strip(channel);
        if entry.invert {
            strip = 127 - strip;
        }
        strip + 128 * entry.position as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mc_mapping_is_identity() {
        let m = ChannelToStripMap::build(ApvMapFamily::MonteCarlo);
        for ch in 0..128u32 {
            assert_eq!(m.channel_to_strip(ch), ch as i32);
        }
    }

    #[test]
    fn family_mappings_are_permutations_of_0_127() {
        for family in [
            ApvMapFamily::Infn,
            ApvMapFamily::UvaXy,
            ApvMapFamily::UvaUv,
            ApvMapFamily::MonteCarlo,
        ] {
            let m = ChannelToStripMap::build(family);
            let mut seen: Vec<i32> = (0..128u32).map(|c| m.channel_to_strip(c)).collect();
            seen.sort_unstable();
            let expected: Vec<i32> = (0..128).collect();
            assert_eq!(seen, expected, "{family:?} is not a permutation of 0..127");
        }
    }

    #[test]
    fn unknown_family_tag_defaults_to_infn() {
        assert_eq!(ApvMapFamily::from_tag("bogus"), ApvMapFamily::Infn);
        assert_eq!(ApvMapFamily::from_tag("mc"), ApvMapFamily::MonteCarlo);
    }

    #[test]
    fn strip_index_applies_inversion_and_position() {
        let map = ChipMap::new(vec![], ApvMapFamily::Infn);
        let entry = ChipMapEntry {
            crate_id: 1,
            slot: 2,
            chip_id: 3,
            position: 2,
            invert: false,
            axis: Axis::U,
            dense_index: 0,
        };
        let base = map.strip_index(&entry, 0);
        assert_eq!(base, map.channel_map.channel_to_strip(0) + 256);

        let entry_inv = ChipMapEntry {
            invert: true,
            ..entry
        };
        let raw = map.channel_map.channel_to_strip(0);
        assert_eq!(map.strip_index(&entry_inv, 0), (127 - raw) + 256);
    }
}
