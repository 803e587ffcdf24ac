//! Request bodies shared by JSON handlers and CSV import
//!
//! Each request validates into the repository input it feeds.

use chrono::{DateTime, NaiveDate, Utc};
use grc_core::requests::{RequestPriority, ReviewDecision};
use grc_core::validation::{non_negative, optional, required};
use grc_core::{
    AssessmentStatus, CiaTriad, ControlPriority, ExposureLevel, FindingStatus, FrameworkStatus,
    FrameworkType, ImpactLevel, LikelihoodLevel, RiskLevel, RiskStatus, TreatmentStrategy,
    ValidationError,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::db::repos::compliance::{AssessmentHeader, ControlInput, FrameworkInput};
use crate::db::repos::findings::FindingInput;
use crate::db::repos::maturity::MaturityControlInput;
use crate::db::repos::requests::{
    AcceptanceAnalysis, AcceptanceRequestInput, AssessmentRequestInput, Assignment,
    ClosureRequestInput, CompletionInput, Review,
};
use crate::db::repos::risks::RiskInput;
use crate::http::routes::users::validate_email;

pub const TITLE_MAX: usize = 200;
pub const NAME_MAX: usize = 100;
pub const DESCRIPTION_MAX: usize = 2000;
pub const LONG_TEXT_MAX: usize = 10_000;
pub const COMMENT_MAX: usize = 1000;

/// An update body carrying the row version it was read at.
#[derive(Debug, Deserialize)]
pub struct Versioned<T> {
    pub row_version: i32,
    #[serde(flatten)]
    pub body: T,
}

/// `?row_version=N` on bodyless commands; when given, a stale version is a 409.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ExpectedVersion {
    pub row_version: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FindingRequest {
    pub title: String,
    pub details: String,
    pub impact: Option<ImpactLevel>,
    pub likelihood: Option<LikelihoodLevel>,
    pub exposure: Option<ExposureLevel>,
    pub status: Option<FindingStatus>,
    pub owner: String,
    pub domain: Option<String>,
    pub business_unit: Option<String>,
    pub business_owner: Option<String>,
    pub asset: Option<String>,
    pub technical_control: Option<String>,
    pub assigned_to: Option<String>,
    pub open_date: Option<DateTime<Utc>>,
    pub sla_date: Option<DateTime<Utc>>,
}

impl FindingRequest {
    pub fn validate(self) -> Result<FindingInput, ValidationError> {
        Ok(FindingInput {
            title: required("title", &self.title, TITLE_MAX)?,
            details: required("details", &self.details, DESCRIPTION_MAX)?,
            impact: self.impact.ok_or(ValidationError::Empty { field: "impact" })?,
            likelihood: self
                .likelihood
                .ok_or(ValidationError::Empty { field: "likelihood" })?,
            exposure: self.exposure.ok_or(ValidationError::Empty { field: "exposure" })?,
            status: self.status.unwrap_or(FindingStatus::Open),
            owner: required("owner", &self.owner, NAME_MAX)?,
            domain: optional("domain", self.domain.as_deref(), NAME_MAX)?,
            business_unit: optional("business unit", self.business_unit.as_deref(), NAME_MAX)?,
            business_owner: optional("business owner", self.business_owner.as_deref(), NAME_MAX)?,
            asset: optional("asset", self.asset.as_deref(), TITLE_MAX)?,
            technical_control: optional("technical control", self.technical_control.as_deref(), TITLE_MAX)?,
            assigned_to: optional("assigned to", self.assigned_to.as_deref(), NAME_MAX)?,
            open_date: self.open_date,
            sla_date: self.sla_date,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RiskRequest {
    pub title: String,
    pub description: Option<String>,
    pub threat_scenario: Option<String>,
    pub cia_triad: Option<CiaTriad>,
    pub business_unit: Option<String>,
    pub asset: Option<String>,
    pub owner: Option<String>,
    pub impact: Option<ImpactLevel>,
    pub likelihood: Option<LikelihoodLevel>,
    pub exposure: Option<ExposureLevel>,
    pub inherent_risk_level: Option<RiskLevel>,
    pub residual_risk_level: Option<RiskLevel>,
    pub treatment: Option<TreatmentStrategy>,
    pub treatment_plan: Option<String>,
    pub risk_assessment_reference: Option<String>,
    pub open_date: Option<DateTime<Utc>>,
    pub next_review_date: Option<DateTime<Utc>>,
    pub ale: Option<f64>,
    pub status: Option<RiskStatus>,
    pub finding_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
}

impl RiskRequest {
    /// Residual level defaults to the inherent level when omitted.
    pub fn validate(self) -> Result<RiskInput, ValidationError> {
        let inherent = self
            .inherent_risk_level
            .ok_or(ValidationError::Empty { field: "inherent risk level" })?;
        Ok(RiskInput {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            threat_scenario: optional("threat scenario", self.threat_scenario.as_deref(), DESCRIPTION_MAX)?,
            cia_triad: self.cia_triad,
            business_unit: optional("business unit", self.business_unit.as_deref(), NAME_MAX)?,
            asset: optional("asset", self.asset.as_deref(), TITLE_MAX)?,
            owner: optional("owner", self.owner.as_deref(), NAME_MAX)?,
            impact: self.impact.ok_or(ValidationError::Empty { field: "impact" })?,
            likelihood: self
                .likelihood
                .ok_or(ValidationError::Empty { field: "likelihood" })?,
            exposure: self.exposure.ok_or(ValidationError::Empty { field: "exposure" })?,
            inherent_risk_level: inherent,
            residual_risk_level: self.residual_risk_level.unwrap_or(inherent),
            treatment: self.treatment.unwrap_or(TreatmentStrategy::Mitigate),
            treatment_plan: optional("treatment plan", self.treatment_plan.as_deref(), DESCRIPTION_MAX)?,
            risk_assessment_reference: optional(
                "risk assessment reference",
                self.risk_assessment_reference.as_deref(),
                NAME_MAX,
            )?,
            open_date: self.open_date,
            next_review_date: self.next_review_date,
            ale: self.ale.map(|a| non_negative("ale", a)).transpose()?,
            status: self.status.unwrap_or(RiskStatus::Open),
            finding_id: self.finding_id,
            risk_assessment_id: self.risk_assessment_id,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlRequest {
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub priority: Option<ControlPriority>,
    pub control_text: Option<String>,
    pub supplemental_guidance: Option<String>,
    pub related_controls: Option<String>,
}

impl ControlRequest {
    pub fn validate(self) -> Result<ControlInput, ValidationError> {
        Ok(ControlInput {
            control_id: required("control id", &self.control_id, NAME_MAX)?,
            title: required("title", &self.title, 500)?,
            description: optional("description", self.description.as_deref(), LONG_TEXT_MAX)?,
            category: optional("category", self.category.as_deref(), NAME_MAX)?,
            priority: self.priority.unwrap_or(ControlPriority::Medium),
            control_text: optional("control text", self.control_text.as_deref(), LONG_TEXT_MAX)?,
            supplemental_guidance: optional(
                "supplemental guidance",
                self.supplemental_guidance.as_deref(),
                LONG_TEXT_MAX,
            )?,
            related_controls: optional("related controls", self.related_controls.as_deref(), 500)?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MaturityControlRequest {
    pub control_id: String,
    pub title: String,
    pub description: Option<String>,
    pub function: String,
    pub category: String,
    pub subcategory: Option<String>,
    pub implementation_guidance: Option<String>,
    pub priority: Option<ControlPriority>,
}

impl MaturityControlRequest {
    pub fn validate(self) -> Result<MaturityControlInput, ValidationError> {
        Ok(MaturityControlInput {
            control_id: required("control id", &self.control_id, NAME_MAX)?,
            title: required("title", &self.title, 500)?,
            description: optional("description", self.description.as_deref(), LONG_TEXT_MAX)?,
            function: required("function", &self.function, NAME_MAX)?,
            category: required("category", &self.category, NAME_MAX)?,
            subcategory: optional("subcategory", self.subcategory.as_deref(), NAME_MAX)?,
            implementation_guidance: optional(
                "implementation guidance",
                self.implementation_guidance.as_deref(),
                LONG_TEXT_MAX,
            )?,
            priority: self.priority.unwrap_or(ControlPriority::Medium),
        })
    }
}

/// Framework header for both compliance and maturity frameworks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FrameworkRequest {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub framework_type: Option<FrameworkType>,
    pub status: Option<FrameworkStatus>,
}

impl FrameworkRequest {
    pub fn validate(self) -> Result<FrameworkInput, ValidationError> {
        Ok(FrameworkInput {
            name: required("name", &self.name, TITLE_MAX)?,
            version: required("version", &self.version, 50)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            framework_type: self.framework_type.unwrap_or(FrameworkType::Custom),
            status: self.status.unwrap_or(FrameworkStatus::Draft),
        })
    }
}

/// Assessment header for both compliance and maturity assessments.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssessmentHeaderRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<AssessmentStatus>,
    pub assessor: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub sla_deadline: Option<DateTime<Utc>>,
    pub framework_id: Option<Uuid>,
    pub organization_id: Option<Uuid>,
}

impl AssessmentHeaderRequest {
    /// The assessor defaults to the caller.
    pub fn validate(self, caller: &str) -> Result<AssessmentHeader, ValidationError> {
        if let (Some(start), Some(due)) = (self.start_date, self.due_date) {
            if due < start {
                return Err(ValidationError::OutOfRange {
                    field: "due date",
                    reason: "must not be before the start date".into(),
                });
            }
        }
        Ok(AssessmentHeader {
            title: required("title", &self.title, TITLE_MAX)?,
            description: optional("description", self.description.as_deref(), DESCRIPTION_MAX)?,
            status: self.status.unwrap_or(AssessmentStatus::Draft),
            assessor: optional("assessor", self.assessor.as_deref(), NAME_MAX)?
                .unwrap_or_else(|| caller.to_owned()),
            start_date: self.start_date,
            due_date: self.due_date,
            sla_deadline: self.sla_deadline,
            framework_id: self
                .framework_id
                .ok_or(ValidationError::Empty { field: "framework" })?,
            organization_id: self
                .organization_id
                .ok_or(ValidationError::Empty { field: "organization" })?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssessmentRequestBody {
    pub department: Option<String>,
    pub contact_email: Option<String>,
    pub scope: String,
    pub justification: String,
    pub priority: Option<RequestPriority>,
    pub requested_timeline: Option<NaiveDate>,
}

impl AssessmentRequestBody {
    pub fn validate(self) -> Result<AssessmentRequestInput, ValidationError> {
        let contact_email = match self.contact_email.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(e) => Some(validate_email(e)?),
        };
        Ok(AssessmentRequestInput {
            department: optional("department", self.department.as_deref(), NAME_MAX)?,
            contact_email,
            scope: required("scope", &self.scope, DESCRIPTION_MAX)?,
            justification: required("justification", &self.justification, DESCRIPTION_MAX)?,
            priority: self.priority.unwrap_or(RequestPriority::Medium),
            requested_timeline: self.requested_timeline,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AcceptanceRequestBody {
    pub description: String,
    pub business_need: String,
    pub finding_id: Option<Uuid>,
    pub risk_id: Option<Uuid>,
    pub risk_assessment_id: Option<Uuid>,
}

impl AcceptanceRequestBody {
    /// A request names a finding or a risk, not both.
    pub fn validate(self) -> Result<AcceptanceRequestInput, ValidationError> {
        if self.finding_id.is_some() && self.risk_id.is_some() {
            return Err(ValidationError::InvalidFormat {
                field: "risk acceptance request",
                reason: "link either a finding or a risk, not both",
            });
        }
        Ok(AcceptanceRequestInput {
            description: required("description", &self.description, DESCRIPTION_MAX)?,
            business_need: required("business need", &self.business_need, DESCRIPTION_MAX)?,
            finding_id: self.finding_id,
            risk_id: self.risk_id,
            risk_assessment_id: self.risk_assessment_id,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClosureRequestBody {
    pub finding_id: Option<Uuid>,
    pub closure_justification: String,
    pub evidence_links: Option<String>,
    pub additional_notes: Option<String>,
    pub requested_closure_date: Option<NaiveDate>,
}

impl ClosureRequestBody {
    pub fn validate(self) -> Result<ClosureRequestInput, ValidationError> {
        Ok(ClosureRequestInput {
            finding_id: self.finding_id.ok_or(ValidationError::Empty { field: "finding" })?,
            closure_justification: required(
                "closure justification",
                &self.closure_justification,
                DESCRIPTION_MAX,
            )?,
            evidence_links: optional("evidence links", self.evidence_links.as_deref(), DESCRIPTION_MAX)?,
            additional_notes: optional("additional notes", self.additional_notes.as_deref(), COMMENT_MAX)?,
            requested_closure_date: self.requested_closure_date,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AssignBody {
    pub assigned_to: String,
    pub notes: Option<String>,
    pub estimated_hours: Option<f64>,
}

impl AssignBody {
    pub fn validate(self) -> Result<Assignment, ValidationError> {
        Ok(Assignment {
            assigned_to: validate_email(&self.assigned_to)?,
            notes: optional("assignment notes", self.notes.as_deref(), COMMENT_MAX)?,
            estimated_hours: self
                .estimated_hours
                .map(|h| non_negative("estimated hours", h))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CompleteBody {
    pub actual_hours: Option<f64>,
    pub notes: Option<String>,
}

impl CompleteBody {
    pub fn validate(self) -> Result<CompletionInput, ValidationError> {
        Ok(CompletionInput {
            actual_hours: self
                .actual_hours
                .map(|h| non_negative("actual hours", h))
                .transpose()?,
            notes: optional("completion notes", self.notes.as_deref(), DESCRIPTION_MAX)?,
        })
    }
}

/// Review comments; risk acceptance reviews may also carry the GRC analysis.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ReviewBody {
    pub comments: Option<String>,
    pub risk_summary: Option<String>,
    pub current_compensating_controls: Option<String>,
    pub current_risk_level_with_controls: Option<String>,
    pub treatment_plan: Option<String>,
    pub proposed_compensating_controls: Option<String>,
    pub future_risk_level_with_mitigations: Option<String>,
    pub ciso_recommendation: Option<String>,
}

impl ReviewBody {
    pub fn validate(self, decision: ReviewDecision) -> Result<Review, ValidationError> {
        let text = |field, value: &Option<String>, max| optional(field, value.as_deref(), max);
        Ok(Review {
            decision,
            comments: text("review comments", &self.comments, COMMENT_MAX)?,
            analysis: AcceptanceAnalysis {
                risk_summary: text("risk summary", &self.risk_summary, DESCRIPTION_MAX)?,
                current_compensating_controls: text(
                    "current compensating controls",
                    &self.current_compensating_controls,
                    DESCRIPTION_MAX,
                )?,
                current_risk_level_with_controls: text(
                    "current risk level with controls",
                    &self.current_risk_level_with_controls,
                    COMMENT_MAX,
                )?,
                treatment_plan: text("treatment plan", &self.treatment_plan, DESCRIPTION_MAX)?,
                proposed_compensating_controls: text(
                    "proposed compensating controls",
                    &self.proposed_compensating_controls,
                    DESCRIPTION_MAX,
                )?,
                future_risk_level_with_mitigations: text(
                    "future risk level with mitigations",
                    &self.future_risk_level_with_mitigations,
                    COMMENT_MAX,
                )?,
                ciso_recommendation: text("CISO recommendation", &self.ciso_recommendation, DESCRIPTION_MAX)?,
            },
        })
    }
}
