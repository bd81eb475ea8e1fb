//! Mapping between the normalized 0-100 volume and device-native levels.
//!
//! The devices take a signed dB-like integer. The mapping halves the
//! normalized level with integer division, so interior values do not survive
//! a round trip exactly; callers get within ±1 of what they set. Level 0 is
//! special-cased to the model's mute floor rather than to `offset`.

/// Volume mapping for one device model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeCurve {
    /// Device level corresponding to a normalized level of 0 (before the
    /// mute-floor special case)
    pub offset: i32,
    /// Device level written when the normalized level is 0
    pub mute_floor: i32,
    /// Bump odd normalized results up to the next even value
    pub odd_parity_fix: bool,
}

impl VolumeCurve {
    /// AT-UHD-SW-52ED
    pub const UHD_SW_52ED: VolumeCurve = VolumeCurve {
        offset: -35,
        mute_floor: -80,
        odd_parity_fix: true,
    };

    /// AT-OME-PS62
    pub const OME_PS62: VolumeCurve = VolumeCurve {
        offset: -50,
        mute_floor: -90,
        odd_parity_fix: false,
    };

    /// Firmware of the 6x2 switcher predating the AT-OME-PS62 config schema
    pub const LEGACY_6X2: VolumeCurve = VolumeCurve {
        offset: -40,
        mute_floor: -90,
        odd_parity_fix: false,
    };

    /// Highest normalized level
    pub const MAX_LEVEL: u8 = 100;

    /// Convert a normalized level to the device-native level
    ///
    /// Levels above 100 are clamped to 100.
    pub fn to_device(&self, level: u8) -> i32 {
        let level = i32::from(level.min(Self::MAX_LEVEL));
        if level == 0 {
            self.mute_floor
        } else {
            self.offset + level / 2
        }
    }

    /// Convert a device-native level back to the normalized range
    pub fn from_device(&self, device_level: i32) -> u8 {
        if device_level < self.offset {
            return 0;
        }

        let mut level = 2 * (i64::from(device_level) - i64::from(self.offset));
        if self.odd_parity_fix && level % 2 != 0 {
            level += 1;
        }

        level.min(i64::from(Self::MAX_LEVEL)) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(VolumeCurve::UHD_SW_52ED)]
    #[case(VolumeCurve::OME_PS62)]
    #[case(VolumeCurve::LEGACY_6X2)]
    fn boundaries_round_trip(#[case] curve: VolumeCurve) {
        assert_eq!(curve.to_device(0), curve.mute_floor);
        assert_eq!(curve.from_device(curve.mute_floor), 0);
        assert_eq!(curve.to_device(100), curve.offset + 50);
        assert_eq!(curve.from_device(curve.to_device(100)), 100);
    }

    #[rstest]
    #[case(VolumeCurve::UHD_SW_52ED)]
    #[case(VolumeCurve::OME_PS62)]
    #[case(VolumeCurve::LEGACY_6X2)]
    fn interior_values_within_one(#[case] curve: VolumeCurve) {
        for level in 1..100u8 {
            let back = curve.from_device(curve.to_device(level));
            assert!(
                (i32::from(back) - i32::from(level)).abs() <= 1,
                "level {} came back as {}",
                level,
                back
            );
        }
    }

    #[test]
    fn odd_levels_lose_their_low_bit() {
        let curve = VolumeCurve::OME_PS62;
        assert_eq!(curve.to_device(51), -25);
        assert_eq!(curve.from_device(-25), 50);
        assert_eq!(curve.to_device(1), -50);
        assert_eq!(curve.from_device(-50), 0);
    }

    #[test]
    fn floor_region_reads_as_zero() {
        let curve = VolumeCurve::UHD_SW_52ED;
        for device_level in curve.mute_floor..curve.offset {
            assert_eq!(curve.from_device(device_level), 0);
        }
        assert_eq!(curve.from_device(-200), 0);
    }

    #[test]
    fn readings_above_range_clamp_to_max() {
        let curve = VolumeCurve::UHD_SW_52ED;
        assert_eq!(curve.from_device(10), 90);
        assert_eq!(curve.from_device(40), 100);
        assert_eq!(curve.to_device(250), curve.to_device(100));
    }
}
