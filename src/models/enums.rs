use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = DatabaseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(DatabaseError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.as_str())
            }
        }
    };
}

str_enum!(MessageRole {
    User => "user",
    Assistant => "assistant",
});

str_enum!(StudyProcessingState {
    Created => "created",
    ImagesCaptioning => "images_captioning",
    ImagesCaptioned => "images_captioned",
    Summarizing => "summarizing",
    Summarized => "summarized",
    Failed => "failed",
});

/// Confidence declared by the general provider for structured field
/// extraction. `None` means the extraction failed even if a literal value
/// was returned alongside it.
str_enum!(FieldConfidence {
    High => "high",
    Medium => "medium",
    Low => "low",
    None => "none",
});

impl FieldConfidence {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_str() {
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
        assert_eq!(
            "assistant".parse::<MessageRole>().unwrap(),
            MessageRole::Assistant
        );
        assert_eq!(
            "images_captioning".parse::<StudyProcessingState>().unwrap(),
            StudyProcessingState::ImagesCaptioning
        );
        assert_eq!(
            "none".parse::<FieldConfidence>().unwrap(),
            FieldConfidence::None
        );
    }

    #[test]
    fn unknown_value_is_invalid_enum() {
        let err = "robot".parse::<MessageRole>().unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn none_confidence_is_not_usable() {
        assert!(FieldConfidence::High.is_usable());
        assert!(FieldConfidence::Low.is_usable());
        assert!(!FieldConfidence::None.is_usable());
    }
}
