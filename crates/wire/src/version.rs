/// ProtocolVersion identifies the serialization vocabulary spoken by a peer
/// node. Nodes of mixed versions coexist during rolling upgrades, so every
/// layout change is gated on the version negotiated for the connection:
/// writers emit the oldest layout the receiver understands, and readers
/// accept every layout back to the oldest supported release.
///
/// Versions are ordered by their packed `major * 10_000 + minor * 100 +
/// patch` id, mirroring how release lines are cut.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProtocolVersion(u32);

impl ProtocolVersion {
    pub const V_4_0_0: ProtocolVersion = ProtocolVersion(4_00_00);
    pub const V_4_1_0: ProtocolVersion = ProtocolVersion(4_01_00);
    /// First release which packs request mode flags into a single bitfield.
    pub const V_4_2_0: ProtocolVersion = ProtocolVersion(4_02_00);

    pub const OLDEST: ProtocolVersion = Self::V_4_0_0;
    pub const CURRENT: ProtocolVersion = Self::V_4_2_0;

    pub const ALL: &'static [ProtocolVersion] =
        &[Self::V_4_0_0, Self::V_4_1_0, Self::V_4_2_0];

    pub fn id(&self) -> u32 {
        self.0
    }

    pub fn at_least(&self, other: ProtocolVersion) -> bool {
        *self >= other
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (major, rest) = (self.0 / 10_000, self.0 % 10_000);
        write!(f, "{major}.{}.{}", rest / 100, rest % 100)
    }
}
