//! Schema migrations
//!
//! Every statement is idempotent, so `run_migrations` is safe to call on each
//! start. Tables are listed parents first; backup and restore reuse that order.

use sqlx::PgPool;

/// Tables holding application data, in foreign-key dependency order.
pub const DATA_TABLES: &[&str] = &[
    "users",
    "risk_matrices",
    "risk_matrix_levels",
    "risk_matrix_cells",
    "risk_level_settings",
    "findings",
    "risk_assessments",
    "threat_scenarios",
    "risks",
    "business_organizations",
    "compliance_frameworks",
    "compliance_controls",
    "compliance_assessments",
    "control_assessments",
    "maturity_frameworks",
    "maturity_controls",
    "maturity_assessments",
    "maturity_control_assessments",
    "threat_events",
    "loss_events",
    "attack_chains",
    "attack_chain_steps",
    "risk_backlog_entries",
    "backlog_comments",
    "backlog_activities",
    "assessment_requests",
    "risk_acceptance_requests",
    "finding_closure_requests",
    "sla_history",
    "reference_data",
];

/// Foreign keys between data tables, as (child, parent).
pub const FOREIGN_KEYS: &[(&str, &str)] = &[
    ("risk_matrix_levels", "risk_matrices"),
    ("risk_matrix_cells", "risk_matrices"),
    ("risk_assessments", "risk_matrices"),
    ("risk_assessments", "findings"),
    ("threat_scenarios", "risk_assessments"),
    ("risks", "findings"),
    ("risks", "risk_assessments"),
    ("compliance_controls", "compliance_frameworks"),
    ("compliance_assessments", "compliance_frameworks"),
    ("compliance_assessments", "business_organizations"),
    ("control_assessments", "compliance_assessments"),
    ("control_assessments", "compliance_controls"),
    ("maturity_controls", "maturity_frameworks"),
    ("maturity_assessments", "maturity_frameworks"),
    ("maturity_assessments", "business_organizations"),
    ("maturity_control_assessments", "maturity_assessments"),
    ("maturity_control_assessments", "maturity_controls"),
    ("threat_events", "threat_scenarios"),
    ("loss_events", "threat_scenarios"),
    ("attack_chains", "threat_events"),
    ("attack_chains", "loss_events"),
    ("attack_chain_steps", "attack_chains"),
    ("risk_backlog_entries", "risks"),
    ("risk_backlog_entries", "findings"),
    ("backlog_comments", "risk_backlog_entries"),
    ("backlog_activities", "risk_backlog_entries"),
    ("risk_acceptance_requests", "findings"),
    ("risk_acceptance_requests", "risks"),
    ("risk_acceptance_requests", "risk_assessments"),
    ("finding_closure_requests", "findings"),
];

/// Tables outside `tables` that reference a table inside it.
pub fn dependents_outside(tables: &[&str]) -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for (child, parent) in FOREIGN_KEYS {
        if tables.contains(parent) && !tables.contains(child) && !out.contains(child) {
            out.push(child);
        }
    }
    out
}

const MIGRATIONS: &[(&str, &str)] = &[
    (
        "users",
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            email TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            department TEXT,
            job_title TEXT,
            role TEXT NOT NULL DEFAULT 'ITUser',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            last_login_at TIMESTAMPTZ,
            password_hash TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "users_email_idx",
        "CREATE UNIQUE INDEX IF NOT EXISTS users_email_idx ON users (LOWER(email))",
    ),
    (
        "sessions",
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token_hash TEXT PRIMARY KEY,
            user_id UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            expires_at TIMESTAMPTZ NOT NULL
        )
        "#,
    ),
    (
        "risk_matrices",
        r#"
        CREATE TABLE IF NOT EXISTS risk_matrices (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL UNIQUE,
            description TEXT,
            matrix_size INTEGER NOT NULL CHECK (matrix_size IN (3, 4, 5)),
            matrix_type TEXT NOT NULL,
            is_default BOOLEAN NOT NULL DEFAULT FALSE,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            qualitative_medium DOUBLE PRECISION NOT NULL DEFAULT 4,
            qualitative_high DOUBLE PRECISION NOT NULL DEFAULT 10,
            qualitative_critical DOUBLE PRECISION NOT NULL DEFAULT 16,
            risk_appetite DOUBLE PRECISION NOT NULL DEFAULT 6,
            critical_remediation_hours INTEGER NOT NULL DEFAULT 4,
            high_remediation_hours INTEGER NOT NULL DEFAULT 24,
            medium_remediation_hours INTEGER NOT NULL DEFAULT 168,
            low_remediation_hours INTEGER NOT NULL DEFAULT 720,
            critical_review_hours INTEGER NOT NULL DEFAULT 720,
            high_review_hours INTEGER NOT NULL DEFAULT 2160,
            medium_review_hours INTEGER NOT NULL DEFAULT 4380,
            low_review_hours INTEGER NOT NULL DEFAULT 8760,
            risk_assessment_hours INTEGER NOT NULL DEFAULT 336,
            compliance_assessment_hours INTEGER NOT NULL DEFAULT 720,
            maturity_assessment_hours INTEGER NOT NULL DEFAULT 720,
            assessment_approval_hours INTEGER NOT NULL DEFAULT 72,
            risk_acceptance_approval_hours INTEGER NOT NULL DEFAULT 120,
            exception_approval_hours INTEGER NOT NULL DEFAULT 72,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "risk_matrix_levels",
        r#"
        CREATE TABLE IF NOT EXISTS risk_matrix_levels (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            matrix_id UUID NOT NULL REFERENCES risk_matrices(id) ON DELETE CASCADE,
            level_type TEXT NOT NULL,
            level_value INTEGER NOT NULL,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            color TEXT NOT NULL DEFAULT '',
            multiplier DOUBLE PRECISION,
            UNIQUE (matrix_id, level_type, level_value)
        )
        "#,
    ),
    (
        "risk_matrix_cells",
        r#"
        CREATE TABLE IF NOT EXISTS risk_matrix_cells (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            matrix_id UUID NOT NULL REFERENCES risk_matrices(id) ON DELETE CASCADE,
            impact_level INTEGER NOT NULL,
            likelihood_level INTEGER NOT NULL,
            exposure_level INTEGER,
            score DOUBLE PRECISION NOT NULL,
            resulting_level TEXT NOT NULL,
            color TEXT NOT NULL
        )
        "#,
    ),
    (
        "risk_level_settings",
        r#"
        CREATE TABLE IF NOT EXISTS risk_level_settings (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            qualitative_critical DOUBLE PRECISION NOT NULL DEFAULT 16,
            qualitative_high DOUBLE PRECISION NOT NULL DEFAULT 10,
            qualitative_medium DOUBLE PRECISION NOT NULL DEFAULT 4,
            risk_appetite DOUBLE PRECISION NOT NULL DEFAULT 6,
            fair_critical DOUBLE PRECISION NOT NULL DEFAULT 1000000,
            fair_high DOUBLE PRECISION NOT NULL DEFAULT 100000,
            fair_medium DOUBLE PRECISION NOT NULL DEFAULT 10000,
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "findings",
        r#"
        CREATE TABLE IF NOT EXISTS findings (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            finding_number TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            details TEXT NOT NULL,
            impact TEXT NOT NULL,
            likelihood TEXT NOT NULL,
            exposure TEXT NOT NULL,
            risk_rating TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Open',
            owner TEXT NOT NULL,
            domain TEXT,
            business_unit TEXT,
            business_owner TEXT,
            asset TEXT,
            technical_control TEXT,
            assigned_to TEXT,
            open_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            sla_date TIMESTAMPTZ,
            closed_date TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "risk_assessments",
        r#"
        CREATE TABLE IF NOT EXISTS risk_assessments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            asset TEXT,
            business_unit TEXT,
            business_owner TEXT,
            technical_controls_in_place TEXT,
            threat_scenario TEXT,
            cia_triad TEXT,
            risk_matrix_id UUID REFERENCES risk_matrices(id) ON DELETE SET NULL,
            status TEXT NOT NULL DEFAULT 'Draft',
            assessment_type TEXT NOT NULL DEFAULT 'Qualitative',
            assessor TEXT NOT NULL,
            date_completed TIMESTAMPTZ,
            finding_id UUID REFERENCES findings(id) ON DELETE SET NULL,
            tef_min DOUBLE PRECISION,
            tef_most_likely DOUBLE PRECISION,
            tef_max DOUBLE PRECISION,
            vulnerability DOUBLE PRECISION,
            primary_loss_magnitude DOUBLE PRECISION,
            secondary_loss_magnitude DOUBLE PRECISION,
            qualitative_likelihood TEXT,
            qualitative_impact TEXT,
            qualitative_exposure TEXT,
            qualitative_risk_score DOUBLE PRECISION,
            qualitative_risk_level TEXT,
            loss_event_frequency DOUBLE PRECISION,
            annual_loss_expectancy DOUBLE PRECISION,
            fair_risk_level TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "threat_scenarios",
        r#"
        CREATE TABLE IF NOT EXISTS threat_scenarios (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            risk_assessment_id UUID NOT NULL REFERENCES risk_assessments(id) ON DELETE CASCADE,
            description TEXT NOT NULL,
            likelihood DOUBLE PRECISION,
            impact DOUBLE PRECISION,
            exposure DOUBLE PRECISION,
            risk_score DOUBLE PRECISION,
            risk_level TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "risks",
        r#"
        CREATE TABLE IF NOT EXISTS risks (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            risk_number TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            description TEXT,
            threat_scenario TEXT,
            cia_triad TEXT,
            business_unit TEXT,
            asset TEXT,
            owner TEXT,
            impact TEXT NOT NULL,
            likelihood TEXT NOT NULL,
            exposure TEXT NOT NULL,
            inherent_risk_level TEXT NOT NULL,
            residual_risk_level TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            treatment TEXT NOT NULL DEFAULT 'Mitigate',
            treatment_plan TEXT,
            risk_assessment_reference TEXT,
            open_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            next_review_date TIMESTAMPTZ,
            ale DOUBLE PRECISION,
            status TEXT NOT NULL DEFAULT 'Open',
            finding_id UUID REFERENCES findings(id) ON DELETE SET NULL,
            risk_assessment_id UUID REFERENCES risk_assessments(id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "business_organizations",
        r#"
        CREATE TABLE IF NOT EXISTS business_organizations (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL UNIQUE,
            code TEXT,
            description TEXT,
            compliance_owner TEXT,
            organization_type TEXT NOT NULL DEFAULT 'Other',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "compliance_frameworks",
        r#"
        CREATE TABLE IF NOT EXISTS compliance_frameworks (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            description TEXT,
            framework_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Draft',
            uploaded_by TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (name, version)
        )
        "#,
    ),
    (
        "compliance_controls",
        r#"
        CREATE TABLE IF NOT EXISTS compliance_controls (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            framework_id UUID NOT NULL REFERENCES compliance_frameworks(id) ON DELETE CASCADE,
            control_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            category TEXT,
            priority TEXT NOT NULL DEFAULT 'Medium',
            control_text TEXT,
            supplemental_guidance TEXT,
            related_controls TEXT,
            UNIQUE (framework_id, control_id)
        )
        "#,
    ),
    (
        "compliance_assessments",
        r#"
        CREATE TABLE IF NOT EXISTS compliance_assessments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'Draft',
            assessor TEXT NOT NULL,
            start_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            due_date TIMESTAMPTZ,
            completed_date TIMESTAMPTZ,
            sla_deadline TIMESTAMPTZ,
            compliance_percentage DOUBLE PRECISION NOT NULL DEFAULT 0,
            framework_id UUID NOT NULL REFERENCES compliance_frameworks(id) ON DELETE RESTRICT,
            organization_id UUID NOT NULL REFERENCES business_organizations(id) ON DELETE RESTRICT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "control_assessments",
        r#"
        CREATE TABLE IF NOT EXISTS control_assessments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            compliance_assessment_id UUID NOT NULL REFERENCES compliance_assessments(id) ON DELETE CASCADE,
            control_id UUID NOT NULL REFERENCES compliance_controls(id) ON DELETE CASCADE,
            status TEXT NOT NULL DEFAULT 'NonCompliant',
            evidence TEXT,
            gap_notes TEXT,
            ownership TEXT,
            projected_compliance_date TIMESTAMPTZ,
            project_needed BOOLEAN NOT NULL DEFAULT FALSE,
            tshirt_size TEXT,
            project_number TEXT,
            assessed_by TEXT,
            assessment_date TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            row_version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (compliance_assessment_id, control_id)
        )
        "#,
    ),
    (
        "maturity_frameworks",
        r#"
        CREATE TABLE IF NOT EXISTS maturity_frameworks (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            description TEXT,
            framework_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Draft',
            uploaded_by TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (name, version)
        )
        "#,
    ),
    (
        "maturity_controls",
        r#"
        CREATE TABLE IF NOT EXISTS maturity_controls (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            framework_id UUID NOT NULL REFERENCES maturity_frameworks(id) ON DELETE CASCADE,
            control_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            function TEXT NOT NULL DEFAULT '',
            category TEXT NOT NULL DEFAULT '',
            subcategory TEXT,
            implementation_guidance TEXT,
            priority TEXT NOT NULL DEFAULT 'Medium',
            UNIQUE (framework_id, control_id)
        )
        "#,
    ),
    (
        "maturity_assessments",
        r#"
        CREATE TABLE IF NOT EXISTS maturity_assessments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'Draft',
            assessor TEXT NOT NULL,
            start_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            due_date TIMESTAMPTZ,
            completed_date TIMESTAMPTZ,
            sla_deadline TIMESTAMPTZ,
            overall_maturity_score DOUBLE PRECISION NOT NULL DEFAULT 0,
            framework_id UUID NOT NULL REFERENCES maturity_frameworks(id) ON DELETE RESTRICT,
            organization_id UUID NOT NULL REFERENCES business_organizations(id) ON DELETE RESTRICT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "maturity_control_assessments",
        r#"
        CREATE TABLE IF NOT EXISTS maturity_control_assessments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            maturity_assessment_id UUID NOT NULL REFERENCES maturity_assessments(id) ON DELETE CASCADE,
            control_id UUID NOT NULL REFERENCES maturity_controls(id) ON DELETE CASCADE,
            current_level TEXT NOT NULL DEFAULT 'NotImplemented',
            target_level TEXT NOT NULL DEFAULT 'Defined',
            evidence TEXT,
            comments TEXT,
            assessed_by TEXT,
            assessment_date TIMESTAMPTZ,
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            row_version INTEGER NOT NULL DEFAULT 1,
            UNIQUE (maturity_assessment_id, control_id)
        )
        "#,
    ),
    (
        "threat_events",
        r#"
        CREATE TABLE IF NOT EXISTS threat_events (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            tef_min DOUBLE PRECISION NOT NULL,
            tef_most_likely DOUBLE PRECISION NOT NULL,
            tef_max DOUBLE PRECISION NOT NULL,
            preventive_controls JSONB NOT NULL DEFAULT '[]'::jsonb,
            detective_controls JSONB NOT NULL DEFAULT '[]'::jsonb,
            threat_scenario_id UUID REFERENCES threat_scenarios(id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "loss_events",
        r#"
        CREATE TABLE IF NOT EXISTS loss_events (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            title TEXT NOT NULL,
            description TEXT,
            primary_loss_min DOUBLE PRECISION NOT NULL,
            primary_loss_most_likely DOUBLE PRECISION NOT NULL,
            primary_loss_max DOUBLE PRECISION NOT NULL,
            secondary_loss_min DOUBLE PRECISION,
            secondary_loss_most_likely DOUBLE PRECISION,
            secondary_loss_max DOUBLE PRECISION,
            loss_type TEXT,
            business_impact_category TEXT,
            threat_scenario_id UUID REFERENCES threat_scenarios(id) ON DELETE SET NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "attack_chains",
        r#"
        CREATE TABLE IF NOT EXISTS attack_chains (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            name TEXT NOT NULL,
            description TEXT,
            status TEXT NOT NULL DEFAULT 'Draft',
            threat_event_id UUID REFERENCES threat_events(id) ON DELETE SET NULL,
            loss_event_id UUID REFERENCES loss_events(id) ON DELETE SET NULL,
            chain_probability DOUBLE PRECISION,
            lef DOUBLE PRECISION,
            lef_min DOUBLE PRECISION,
            lef_max DOUBLE PRECISION,
            ale_min DOUBLE PRECISION,
            ale_most_likely DOUBLE PRECISION,
            ale_max DOUBLE PRECISION,
            calculated_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "attack_chain_steps",
        r#"
        CREATE TABLE IF NOT EXISTS attack_chain_steps (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            attack_chain_id UUID NOT NULL REFERENCES attack_chains(id) ON DELETE CASCADE,
            step_order INTEGER NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            vulnerability_min DOUBLE PRECISION NOT NULL,
            vulnerability_most_likely DOUBLE PRECISION NOT NULL,
            vulnerability_max DOUBLE PRECISION NOT NULL,
            step_probability DOUBLE PRECISION,
            cumulative_probability DOUBLE PRECISION,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "risk_backlog_entries",
        r#"
        CREATE TABLE IF NOT EXISTS risk_backlog_entries (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            backlog_number TEXT NOT NULL UNIQUE,
            action_type TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Unassigned',
            priority TEXT NOT NULL,
            risk_id UUID REFERENCES risks(id) ON DELETE SET NULL,
            finding_id UUID REFERENCES findings(id) ON DELETE SET NULL,
            request_description TEXT NOT NULL,
            request_justification TEXT,
            requester TEXT NOT NULL,
            assigned_to_analyst TEXT,
            assigned_to_manager TEXT,
            assigned_date TIMESTAMPTZ,
            due_date TIMESTAMPTZ,
            analyst_comments TEXT,
            manager_comments TEXT,
            rejection_reason TEXT,
            completed_date TIMESTAMPTZ,
            risk_source TEXT NOT NULL DEFAULT 'ManualImport',
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "backlog_comments",
        r#"
        CREATE TABLE IF NOT EXISTS backlog_comments (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            backlog_entry_id UUID NOT NULL REFERENCES risk_backlog_entries(id) ON DELETE CASCADE,
            comment TEXT NOT NULL,
            comment_type TEXT NOT NULL,
            is_internal BOOLEAN NOT NULL DEFAULT FALSE,
            created_by TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "backlog_activities",
        r#"
        CREATE TABLE IF NOT EXISTS backlog_activities (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            backlog_entry_id UUID NOT NULL REFERENCES risk_backlog_entries(id) ON DELETE CASCADE,
            activity_type TEXT NOT NULL,
            from_value TEXT,
            to_value TEXT,
            description TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "assessment_requests",
        r#"
        CREATE TABLE IF NOT EXISTS assessment_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            requester TEXT NOT NULL,
            department TEXT,
            contact_email TEXT,
            scope TEXT NOT NULL,
            justification TEXT NOT NULL,
            priority TEXT NOT NULL DEFAULT 'Medium',
            requested_timeline DATE,
            request_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            status TEXT NOT NULL DEFAULT 'Pending',
            assigned_to TEXT,
            assigned_by TEXT,
            assignment_date TIMESTAMPTZ,
            assignment_notes TEXT,
            started_date TIMESTAMPTZ,
            completed_date TIMESTAMPTZ,
            estimated_hours DOUBLE PRECISION,
            actual_hours DOUBLE PRECISION,
            notes TEXT,
            reviewed_by TEXT,
            review_date TIMESTAMPTZ,
            review_comments TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "risk_acceptance_requests",
        r#"
        CREATE TABLE IF NOT EXISTS risk_acceptance_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            description TEXT NOT NULL,
            business_need TEXT NOT NULL,
            requester TEXT NOT NULL,
            request_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            status TEXT NOT NULL DEFAULT 'PendingApproval',
            finding_id UUID REFERENCES findings(id) ON DELETE SET NULL,
            risk_id UUID REFERENCES risks(id) ON DELETE SET NULL,
            risk_assessment_id UUID REFERENCES risk_assessments(id) ON DELETE SET NULL,
            risk_summary TEXT,
            current_compensating_controls TEXT,
            current_risk_level_with_controls TEXT,
            treatment_plan TEXT,
            proposed_compensating_controls TEXT,
            future_risk_level_with_mitigations TEXT,
            ciso_recommendation TEXT,
            assigned_to TEXT,
            assigned_by TEXT,
            assignment_date TIMESTAMPTZ,
            assignment_notes TEXT,
            started_date TIMESTAMPTZ,
            completed_date TIMESTAMPTZ,
            reviewed_by TEXT,
            review_date TIMESTAMPTZ,
            review_comments TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "finding_closure_requests",
        r#"
        CREATE TABLE IF NOT EXISTS finding_closure_requests (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            finding_id UUID NOT NULL REFERENCES findings(id) ON DELETE CASCADE,
            requester TEXT NOT NULL,
            closure_justification TEXT NOT NULL,
            evidence_links TEXT,
            additional_notes TEXT,
            request_date TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            requested_closure_date DATE,
            status TEXT NOT NULL DEFAULT 'Pending',
            assigned_to TEXT,
            assigned_by TEXT,
            assignment_date TIMESTAMPTZ,
            assignment_notes TEXT,
            started_date TIMESTAMPTZ,
            completed_date TIMESTAMPTZ,
            reviewed_by TEXT,
            review_date TIMESTAMPTZ,
            review_comments TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "sla_history",
        r#"
        CREATE TABLE IF NOT EXISTS sla_history (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            sla_type TEXT NOT NULL,
            item_type TEXT NOT NULL,
            item_id UUID NOT NULL,
            item_description TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            assigned_to TEXT NOT NULL,
            sla_start_date TIMESTAMPTZ NOT NULL,
            sla_deadline TIMESTAMPTZ NOT NULL,
            completed_date TIMESTAMPTZ NOT NULL,
            sla_hours INTEGER NOT NULL,
            compliance_status TEXT NOT NULL,
            completion_hours DOUBLE PRECISION NOT NULL,
            variance_hours DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT NOT NULL
        )
        "#,
    ),
    (
        "sla_history_item_idx",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS sla_history_item_idx
            ON sla_history (item_type, item_id, sla_type)
        "#,
    ),
    (
        "reference_data",
        r#"
        CREATE TABLE IF NOT EXISTS reference_data (
            id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
            value TEXT NOT NULL,
            category TEXT NOT NULL,
            description TEXT,
            usage_count INTEGER NOT NULL DEFAULT 0,
            is_deleted BOOLEAN NOT NULL DEFAULT FALSE,
            deleted_at TIMESTAMPTZ,
            deleted_by TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            created_by TEXT,
            updated_by TEXT,
            row_version INTEGER NOT NULL DEFAULT 1
        )
        "#,
    ),
    (
        "reference_data_value_idx",
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS reference_data_value_idx
            ON reference_data (category, LOWER(TRIM(value)))
            WHERE NOT is_deleted
        "#,
    ),
    (
        "findings_status_idx",
        "CREATE INDEX IF NOT EXISTS findings_status_idx ON findings (status, sla_date)",
    ),
    (
        "backlog_status_idx",
        "CREATE INDEX IF NOT EXISTS backlog_status_idx ON risk_backlog_entries (status, due_date)",
    ),
];

/// Apply every migration in order.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!(count = MIGRATIONS.len(), "running migrations");

    for (name, sql) in MIGRATIONS {
        tracing::debug!(migration = name, "applying");
        sqlx::query(sql).execute(pool).await?;
    }

    tracing::info!("migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_data_table_has_a_migration() {
        for table in DATA_TABLES {
            let needle = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            assert!(
                MIGRATIONS.iter().any(|(_, sql)| sql.contains(&needle)),
                "missing migration for {}",
                table
            );
        }
    }

    #[test]
    fn parents_precede_children() {
        let pos = |t: &str| DATA_TABLES.iter().position(|x| *x == t).unwrap();
        assert!(pos("risk_matrices") < pos("risk_matrix_cells"));
        assert!(pos("findings") < pos("risks"));
        assert!(pos("risk_assessments") < pos("threat_scenarios"));
        assert!(pos("threat_scenarios") < pos("threat_events"));
        assert!(pos("risks") < pos("risk_backlog_entries"));
        assert!(pos("compliance_controls") < pos("control_assessments"));
        assert!(pos("findings") < pos("finding_closure_requests"));
        assert!(pos("risks") < pos("risk_acceptance_requests"));
    }

    fn references_in(sql: &str) -> Vec<&str> {
        sql.match_indices("REFERENCES ")
            .filter_map(|(at, m)| sql[at + m.len()..].split('(').next())
            .map(str::trim)
            .collect()
    }

    #[test]
    fn foreign_key_table_matches_ddl() {
        let mut from_ddl = Vec::new();
        for table in DATA_TABLES {
            let needle = format!("CREATE TABLE IF NOT EXISTS {} (", table);
            let (_, sql) = MIGRATIONS.iter().find(|(_, sql)| sql.contains(&needle)).unwrap();
            for parent in references_in(sql) {
                assert!(
                    FOREIGN_KEYS.contains(&(*table, parent)),
                    "{} -> {} missing from FOREIGN_KEYS",
                    table,
                    parent
                );
                from_ddl.push((*table, parent));
            }
        }
        assert_eq!(from_ddl.len(), FOREIGN_KEYS.len());
    }

    #[test]
    fn dependents_of_configuration_tables() {
        let config = ["risk_matrices", "risk_matrix_levels", "risk_matrix_cells", "compliance_frameworks"];
        let outside = dependents_outside(&config);
        assert!(outside.contains(&"risk_assessments"));
        assert!(outside.contains(&"compliance_assessments"));
        assert!(!outside.contains(&"risk_matrix_cells"));

        let everything: Vec<&str> = DATA_TABLES.to_vec();
        assert!(dependents_outside(&everything).is_empty());
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn migrations_are_idempotent() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = crate::db::create_pool(&url).await.expect("pool");
        run_migrations(&pool).await.expect("first run");
        run_migrations(&pool).await.expect("second run");
    }
}
