use crate::{Error, Result};
use std::collections::BTreeMap;

pub const TOTAL_FIELDS_LIMIT_SETTING: &str = "index.mapping.total_fields.limit";
pub const DEPTH_LIMIT_SETTING: &str = "index.mapping.depth.limit";

const TOTAL_FIELDS_LIMIT_DEFAULT: u64 = 1000;
const DEPTH_LIMIT_DEFAULT: u64 = 20;
const DEPTH_LIMIT_MIN: u64 = 1;

/// Dynamic limits applied when a mapping update is validated.
/// Both settings may be changed on a live index; recovery-time merges are
/// exempt so that an index whose limits were since tightened still opens.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MappingLimits {
    pub total_fields_limit: u64,
    pub depth_limit: u64,
}

impl Default for MappingLimits {
    fn default() -> Self {
        Self {
            total_fields_limit: TOTAL_FIELDS_LIMIT_DEFAULT,
            depth_limit: DEPTH_LIMIT_DEFAULT,
        }
    }
}

impl MappingLimits {
    /// Parse limits out of a flat settings map, applying defaults for
    /// absent keys and rejecting out-of-range or non-integer values.
    pub fn from_settings(settings: &BTreeMap<String, String>) -> Result<Self> {
        let total_fields_limit =
            parse_setting(settings, TOTAL_FIELDS_LIMIT_SETTING, TOTAL_FIELDS_LIMIT_DEFAULT, 0)?;
        let depth_limit =
            parse_setting(settings, DEPTH_LIMIT_SETTING, DEPTH_LIMIT_DEFAULT, DEPTH_LIMIT_MIN)?;

        Ok(Self {
            total_fields_limit,
            depth_limit,
        })
    }
}

fn parse_setting(
    settings: &BTreeMap<String, String>,
    key: &str,
    default: u64,
    min: u64,
) -> Result<u64> {
    let Some(raw) = settings.get(key) else {
        return Ok(default);
    };
    let value: u64 = raw.parse().map_err(|_| Error::InvalidSetting {
        key: key.to_string(),
        message: format!("expected a non-negative integer, got '{raw}'"),
    })?;
    if value < min {
        return Err(Error::InvalidSetting {
            key: key.to_string(),
            message: format!("must be >= {min}, got {value}"),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_absent_keys() {
        let limits = MappingLimits::from_settings(&BTreeMap::new()).unwrap();
        assert_eq!(limits, MappingLimits::default());
        assert_eq!(limits.total_fields_limit, 1000);
        assert_eq!(limits.depth_limit, 20);
    }

    #[test]
    fn explicit_values_parse() {
        let mut settings = BTreeMap::new();
        settings.insert(TOTAL_FIELDS_LIMIT_SETTING.to_string(), "3".to_string());
        settings.insert(DEPTH_LIMIT_SETTING.to_string(), "5".to_string());

        let limits = MappingLimits::from_settings(&settings).unwrap();
        assert_eq!(limits.total_fields_limit, 3);
        assert_eq!(limits.depth_limit, 5);
    }

    #[test]
    fn zero_depth_is_rejected_while_zero_fields_is_not() {
        let mut settings = BTreeMap::new();
        settings.insert(TOTAL_FIELDS_LIMIT_SETTING.to_string(), "0".to_string());
        assert!(MappingLimits::from_settings(&settings).is_ok());

        settings.insert(DEPTH_LIMIT_SETTING.to_string(), "0".to_string());
        let err = MappingLimits::from_settings(&settings).unwrap_err();
        assert!(matches!(err, Error::InvalidSetting { key, .. } if key == DEPTH_LIMIT_SETTING));
    }

    #[test]
    fn garbage_values_are_rejected() {
        let mut settings = BTreeMap::new();
        settings.insert(DEPTH_LIMIT_SETTING.to_string(), "-1".to_string());
        assert!(MappingLimits::from_settings(&settings).is_err());

        settings.insert(DEPTH_LIMIT_SETTING.to_string(), "twenty".to_string());
        assert!(MappingLimits::from_settings(&settings).is_err());
    }
}
