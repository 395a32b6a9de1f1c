use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a string does not match any declared variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid {field} value: '{value}'")]
pub struct InvalidEnumValue {
    pub field: String,
    pub value: String,
}

/// Macro to generate an enum backed by one exact string table.
///
/// The table drives `as_str`, `FromStr`, and serde in both directions, so the
/// wire spelling and the prompt schema spelling can never drift apart.
/// Matching is exact and case-sensitive.
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Every variant paired with its declared string.
            pub const TABLE: &'static [(Self, &'static str)] = &[$((Self::$variant, $s)),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = InvalidEnumValue;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(InvalidEnumValue {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

str_enum!(CitizenshipStatus {
    UsCitizen => "USCitizen",
    PermanentResident => "PermanentResident",
    NonResidentAlien => "NonResidentAlien",
    Other => "Other",
});

str_enum!(HighSchoolStatus {
    Graduated => "Graduated",
    NotGraduated => "NotGraduated",
    Ged => "GED",
    Other => "Other",
});

impl CitizenshipStatus {
    /// Human-readable label for forms and chat context.
    pub fn label(&self) -> &'static str {
        match self {
            Self::UsCitizen => "U.S. citizen",
            Self::PermanentResident => "Permanent resident",
            Self::NonResidentAlien => "Non-resident alien",
            Self::Other => "Other",
        }
    }
}

impl HighSchoolStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Graduated => "High school graduate",
            Self::NotGraduated => "Did not graduate high school",
            Self::Ged => "GED",
            Self::Other => "Other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn citizenship_status_table() {
        for (variant, s) in [
            (CitizenshipStatus::UsCitizen, "USCitizen"),
            (CitizenshipStatus::PermanentResident, "PermanentResident"),
            (CitizenshipStatus::NonResidentAlien, "NonResidentAlien"),
            (CitizenshipStatus::Other, "Other"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(CitizenshipStatus::from_str(s).unwrap(), variant);
        }
        assert_eq!(CitizenshipStatus::TABLE.len(), 4);
    }

    #[test]
    fn high_school_status_table() {
        for (variant, s) in [
            (HighSchoolStatus::Graduated, "Graduated"),
            (HighSchoolStatus::NotGraduated, "NotGraduated"),
            (HighSchoolStatus::Ged, "GED"),
            (HighSchoolStatus::Other, "Other"),
        ] {
            assert_eq!(variant.as_str(), s);
            assert_eq!(HighSchoolStatus::from_str(s).unwrap(), variant);
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        assert!(CitizenshipStatus::from_str("uscitizen").is_err());
        assert!(HighSchoolStatus::from_str("Ged").is_err());
        assert!(HighSchoolStatus::from_str(" GED").is_err());
    }

    #[test]
    fn invalid_value_names_field() {
        let err = CitizenshipStatus::from_str("Martian").unwrap_err();
        assert_eq!(err.field, "CitizenshipStatus");
        assert_eq!(err.value, "Martian");
        assert!(err.to_string().contains("Martian"));
    }

    #[test]
    fn serde_uses_schema_spelling() {
        let json = serde_json::to_string(&HighSchoolStatus::Ged).unwrap();
        assert_eq!(json, "\"GED\"");
        let parsed: CitizenshipStatus = serde_json::from_str("\"NonResidentAlien\"").unwrap();
        assert_eq!(parsed, CitizenshipStatus::NonResidentAlien);
        assert!(serde_json::from_str::<CitizenshipStatus>("\"US Citizen\"").is_err());
    }
}
