use crate::db::DatabaseError;
use serde::{Deserialize, Serialize};

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
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
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(SymptomKind {
    Vomiting => "vomiting",
    Diarrhea => "diarrhea",
    Constipation => "constipation",
    Lethargy => "lethargy",
    SuppressedAppetite => "suppressed_appetite",
    InjectionSiteReaction => "injection_site_reaction",
});

impl SymptomKind {
    /// All tracked kinds, in storage column order.
    pub const ALL: [SymptomKind; 6] = [
        SymptomKind::Vomiting,
        SymptomKind::Diarrhea,
        SymptomKind::Constipation,
        SymptomKind::Lethargy,
        SymptomKind::SuppressedAppetite,
        SymptomKind::InjectionSiteReaction,
    ];
}

str_enum!(Granularity {
    Day => "day",
    Week => "week",
    Month => "month",
});

str_enum!(WeightTrend {
    Increasing => "increasing",
    Decreasing => "decreasing",
    Stable => "stable",
});
