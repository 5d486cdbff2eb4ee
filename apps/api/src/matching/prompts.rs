//! Prompt constants and builders for the match scoring call.

use crate::models::candidate::CandidateProfileRow;
use crate::models::job::JobPostingRow;

/// System prompt for match scoring — enforces JSON-only output.
pub const SCORING_SYSTEM: &str =
    "You are an expert technical recruiter scoring how well a candidate \
    fits a job posting. You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Builds the scoring prompt for one (job, candidate) pair.
pub fn build_score_prompt(job: &JobPostingRow, candidate: &CandidateProfileRow) -> String {
    format!(
        r#"Score how well the candidate below fits the job posting, on a 0-100 scale.

Return a JSON object with this EXACT schema (no extra fields):
{{
  "score": 72,
  "strengths": ["4 years of production Rust", "led a platform migration"],
  "gaps": ["no Kubernetes exposure", "seniority below the posting's bar"]
}}

Scoring rules:
- 80-100: covers all core requirements, strong adjacent experience
- 60-79: covers most core requirements with minor gaps
- 40-59: partial overlap; would need significant ramp-up
- 0-39: little relevant overlap
- `strengths` and `gaps` must each cite concrete evidence from the
  candidate profile or requirements — no generic filler, 1-5 items each.

JOB POSTING:
Title: {title}
Description: {description}
Requirements: {requirements}

CANDIDATE PROFILE:
Headline: {headline}
Years of experience: {experience_years}
Skills: {skills}
Summary: {summary}"#,
        title = job.title,
        description = job.description,
        requirements = job.requirements,
        headline = candidate.headline,
        experience_years = candidate.experience_years,
        skills = candidate.skills.join(", "),
        summary = candidate.summary,
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::models::job::JobStatus;

    #[test]
    fn test_prompt_includes_requirements_and_skills() {
        let job = JobPostingRow {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            title: "Backend Engineer".to_string(),
            description: "Build the marketplace core.".to_string(),
            requirements: "Rust, Postgres, 3+ years".to_string(),
            status: JobStatus::Published,
            token_cost: 5,
            charged_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let candidate = CandidateProfileRow {
            id: Uuid::new_v4(),
            full_name: "Sam Doe".to_string(),
            headline: "Systems engineer".to_string(),
            skills: vec!["rust".to_string(), "tokio".to_string()],
            experience_years: 4,
            summary: "Four years of async services.".to_string(),
            status: "published".to_string(),
            updated_at: Utc::now(),
        };

        let prompt = build_score_prompt(&job, &candidate);
        assert!(prompt.contains("Rust, Postgres, 3+ years"));
        assert!(prompt.contains("rust, tokio"));
        assert!(prompt.contains("\"score\""));
    }
}
