//! Domain enums stored as text columns
//!
//! Every enum round-trips through its canonical name (`as_str` / `FromStr`),
//! which is also its JSON representation. Parsing is case-insensitive, for
//! JSON bodies as well as query strings and CSV cells.

macro_rules! text_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($field:literal) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize)]
        #[serde(try_from = "String")]
        pub enum $name {
            $(#[serde(rename = $text)] $variant,)+
        }

        impl $name {
            /// All variants in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::validation::ValidationError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let s = s.trim();
                $(
                    if s.eq_ignore_ascii_case($text) {
                        return Ok(Self::$variant);
                    }
                )+
                Err($crate::validation::ValidationError::InvalidVariant {
                    field: $field,
                    value: s.to_owned(),
                })
            }
        }

        impl TryFrom<String> for $name {
            type Error = $crate::validation::ValidationError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                s.parse()
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use text_enum;

text_enum! {
    pub enum ImpactLevel ("impact") {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Critical => "Critical",
    }
}

text_enum! {
    pub enum LikelihoodLevel ("likelihood") {
        Unlikely => "Unlikely",
        Possible => "Possible",
        Likely => "Likely",
        AlmostCertain => "AlmostCertain",
    }
}

text_enum! {
    pub enum ExposureLevel ("exposure") {
        SlightlyExposed => "SlightlyExposed",
        Exposed => "Exposed",
        ModeratelyExposed => "ModeratelyExposed",
        HighlyExposed => "HighlyExposed",
    }
}

text_enum! {
    /// Bucketed risk level, also used as a finding's risk rating.
    pub enum RiskLevel ("risk level") {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Critical => "Critical",
    }
}

/// Findings call their bucket a rating; the scale is identical.
pub type RiskRating = RiskLevel;

text_enum! {
    pub enum FindingStatus ("finding status") {
        Open => "Open",
        Closed => "Closed",
        RiskAccepted => "RiskAccepted",
    }
}

text_enum! {
    pub enum RiskStatus ("risk status") {
        Open => "Open",
        Closed => "Closed",
        Accepted => "Accepted",
        UnderReview => "UnderReview",
    }
}

text_enum! {
    pub enum TreatmentStrategy ("treatment") {
        Mitigate => "Mitigate",
        Transfer => "Transfer",
        Accept => "Accept",
        Avoid => "Avoid",
    }
}

text_enum! {
    pub enum AssessmentStatus ("assessment status") {
        Draft => "Draft",
        InProgress => "InProgress",
        Completed => "Completed",
        Approved => "Approved",
    }
}

text_enum! {
    pub enum AssessmentType ("assessment type") {
        Fair => "FAIR",
        Qualitative => "Qualitative",
    }
}

text_enum! {
    pub enum FrameworkType ("framework type") {
        Iso27001 => "ISO27001",
        Nist => "NIST",
        Sox => "SOX",
        Custom => "Custom",
        Gdpr => "GDPR",
        Hipaa => "HIPAA",
        NistCsf => "NISTCSF",
        C2m2 => "C2M2",
    }
}

text_enum! {
    pub enum FrameworkStatus ("framework status") {
        Draft => "Draft",
        Active => "Active",
        Archived => "Archived",
        Deprecated => "Deprecated",
    }
}

text_enum! {
    pub enum ControlPriority ("priority") {
        Low => "Low",
        Medium => "Medium",
        High => "High",
        Critical => "Critical",
    }
}

text_enum! {
    pub enum OrganizationType ("organization type") {
        It => "IT",
        Ot => "OT",
        Finance => "Finance",
        Hr => "HR",
        Legal => "Legal",
        Operations => "Operations",
        Other => "Other",
    }
}

text_enum! {
    pub enum ComplianceStatus ("compliance status") {
        NonCompliant => "NonCompliant",
        PartiallyCompliant => "PartiallyCompliant",
        MajorlyCompliant => "MajorlyCompliant",
        FullyCompliant => "FullyCompliant",
        NotApplicable => "NotApplicable",
    }
}

text_enum! {
    pub enum MaturityLevel ("maturity level") {
        NotImplemented => "NotImplemented",
        Initial => "Initial",
        Developing => "Developing",
        Defined => "Defined",
        Managed => "Managed",
    }
}

text_enum! {
    pub enum TShirtSize ("t-shirt size") {
        Xs => "XS",
        S => "S",
        M => "M",
        L => "L",
        Xl => "XL",
        Xxl => "XXL",
    }
}

text_enum! {
    pub enum UserRole ("role") {
        ItUser => "ITUser",
        GrcUser => "GRCUser",
        Admin => "Admin",
    }
}

text_enum! {
    pub enum CiaTriad ("CIA triad") {
        Confidentiality => "Confidentiality",
        Integrity => "Integrity",
        Availability => "Availability",
        ConfidentialityIntegrity => "ConfidentialityIntegrity",
        ConfidentialityAvailability => "ConfidentialityAvailability",
        IntegrityAvailability => "IntegrityAvailability",
        All => "All",
    }
}

text_enum! {
    pub enum AttackChainStatus ("attack chain status") {
        Draft => "Draft",
        UnderReview => "UnderReview",
        Reviewed => "Reviewed",
        Approved => "Approved",
        Archived => "Archived",
    }
}

text_enum! {
    pub enum MatrixType ("matrix type") {
        ImpactLikelihood => "ImpactLikelihood",
        ImpactLikelihoodExposure => "ImpactLikelihoodExposure",
    }
}

text_enum! {
    pub enum LevelType ("level type") {
        Impact => "Impact",
        Likelihood => "Likelihood",
        Exposure => "Exposure",
    }
}

text_enum! {
    pub enum ReferenceCategory ("category") {
        Asset => "Asset",
        BusinessOwner => "BusinessOwner",
        BusinessUnit => "BusinessUnit",
        TechnicalControl => "TechnicalControl",
        SecurityControlName => "SecurityControlName",
    }
}

impl ImpactLevel {
    pub fn value(&self) -> u8 {
        *self as u8 + 1
    }
}

impl LikelihoodLevel {
    pub fn value(&self) -> u8 {
        *self as u8 + 1
    }
}

impl ExposureLevel {
    pub fn value(&self) -> u8 {
        *self as u8 + 1
    }

    /// Weight applied to a likelihood × impact product.
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::SlightlyExposed => 0.2,
            Self::Exposed => 0.4,
            Self::ModeratelyExposed => 0.8,
            Self::HighlyExposed => 1.0,
        }
    }
}

impl MaturityLevel {
    pub fn value(&self) -> u8 {
        *self as u8
    }

    pub fn from_value(v: u8) -> Option<Self> {
        Self::ALL.get(v as usize).copied()
    }
}

impl RiskLevel {
    /// Display color for matrices and dashboards.
    pub fn color(&self) -> &'static str {
        match self {
            Self::Low => "#28a745",
            Self::Medium => "#ffc107",
            Self::High => "#fd7e14",
            Self::Critical => "#dc3545",
        }
    }
}

impl AssessmentStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::ValidationError;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("critical".parse::<RiskLevel>().unwrap(), RiskLevel::Critical);
        assert_eq!(" GRCUSER ".parse::<UserRole>().unwrap(), UserRole::GrcUser);
        assert_eq!("fair".parse::<AssessmentType>().unwrap(), AssessmentType::Fair);
    }

    #[test]
    fn unknown_variant_is_rejected() {
        let err = "Severe".parse::<RiskLevel>().unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidVariant {
                field: "risk level",
                value: "Severe".into()
            }
        );
    }

    #[test]
    fn numeric_values() {
        assert_eq!(ImpactLevel::Low.value(), 1);
        assert_eq!(ImpactLevel::Critical.value(), 4);
        assert_eq!(LikelihoodLevel::AlmostCertain.value(), 4);
        assert_eq!(ExposureLevel::Exposed.value(), 2);
        assert_eq!(MaturityLevel::NotImplemented.value(), 0);
        assert_eq!(MaturityLevel::from_value(4), Some(MaturityLevel::Managed));
        assert_eq!(MaturityLevel::from_value(5), None);
    }

    #[test]
    fn exposure_multipliers() {
        let m: Vec<f64> = ExposureLevel::ALL.iter().map(|e| e.multiplier()).collect();
        assert_eq!(m, vec![0.2, 0.4, 0.8, 1.0]);
    }

    #[test]
    fn serde_uses_canonical_names() {
        let json = serde_json::to_string(&FrameworkType::NistCsf).unwrap();
        assert_eq!(json, "\"NISTCSF\"");
        let t: TShirtSize = serde_json::from_str("\"XXL\"").unwrap();
        assert_eq!(t, TShirtSize::Xxl);
        let s: FindingStatus = serde_json::from_str("\"riskaccepted\"").unwrap();
        assert_eq!(s, FindingStatus::RiskAccepted);
        assert!(serde_json::from_str::<RiskLevel>("\"Severe\"").is_err());
    }

    #[test]
    fn levels_are_ordered() {
        assert!(RiskLevel::Critical > RiskLevel::High);
        assert!(RiskLevel::Low < RiskLevel::Medium);
    }
}
