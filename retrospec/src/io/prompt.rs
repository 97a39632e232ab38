//! Prompt rendering for the agent collaborator.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::agents::DraftRequest;

const SPEC_WRITER_TEMPLATE: &str = include_str!("prompts/spec_writer.md");
const JUDGE_TEMPLATE: &str = include_str!("prompts/judge.md");
const INTENT_GAP_TEMPLATE: &str = include_str!("prompts/intent_gap.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");

/// Patches shown to the gap summarizer are cut to this many bytes.
pub const GAP_PATCH_LIMIT_BYTES: usize = 12_000;

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("spec_writer", SPEC_WRITER_TEMPLATE)
            .expect("spec_writer template should be valid");
        env.add_template("judge", JUDGE_TEMPLATE)
            .expect("judge template should be valid");
        env.add_template("intent_gap", INTENT_GAP_TEMPLATE)
            .expect("intent_gap template should be valid");
        env.add_template("coder", CODER_TEMPLATE)
            .expect("coder template should be valid");
        Self { env }
    }

    pub fn render_spec_writer(&self, request: &DraftRequest) -> Result<String> {
        let template = self.env.get_template("spec_writer")?;
        let rendered = template.render(context! {
            style => request.style.trim(),
            max_length => request.max_length,
            max_path_refs => request.max_path_refs,
            feedback_text => request.feedback_text.as_str(),
            previous_prompt => non_blank(request.previous_prompt.as_deref()),
            previous_outcome => non_blank(request.previous_outcome.as_deref()),
            violation_reason => non_blank(request.violation_reason.as_deref()),
        })?;
        Ok(rendered)
    }

    pub fn render_judge(&self, prompt: &str) -> Result<String> {
        let template = self.env.get_template("judge")?;
        Ok(template.render(context! { prompt => prompt })?)
    }

    pub fn render_intent_gap(
        &self,
        target_patch: &str,
        produced_patch: &str,
        max_items: usize,
    ) -> Result<String> {
        let template = self.env.get_template("intent_gap")?;
        let rendered = template.render(context! {
            max_items => max_items,
            target_patch => limit_patch(target_patch),
            produced_patch => limit_patch(produced_patch),
        })?;
        Ok(rendered)
    }

    pub fn render_coder(&self, prompt: &str) -> Result<String> {
        let template = self.env.get_template("coder")?;
        Ok(template.render(context! { prompt => prompt })?)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// Trimmed patch, cut at [`GAP_PATCH_LIMIT_BYTES`] on a char boundary.
pub fn limit_patch(patch: &str) -> &str {
    let patch = patch.trim();
    if patch.len() <= GAP_PATCH_LIMIT_BYTES {
        return patch;
    }
    let mut cut = GAP_PATCH_LIMIT_BYTES;
    while !patch.is_char_boundary(cut) {
        cut -= 1;
    }
    &patch[..cut]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> DraftRequest {
        DraftRequest {
            iteration: 2,
            feedback_text: "Iteration: 1\nTarget changed files: 2".to_string(),
            max_path_refs: 3,
            max_length: 0,
            style: "acceptance-criteria-first request".to_string(),
            previous_prompt: None,
            previous_outcome: None,
            violation_reason: None,
        }
    }

    /// Verifies optional lines only appear when their inputs are present.
    #[test]
    fn spec_writer_omits_absent_context() {
        let rendered = PromptEngine::new()
            .render_spec_writer(&request())
            .expect("render");
        assert!(rendered.contains("Style focus: acceptance-criteria-first request."));
        assert!(rendered.contains("Use at most 3 natural file-path references."));
        assert!(rendered.contains("Context packet:\nIteration: 1\nTarget changed files: 2"));
        assert!(!rendered.contains("Keep prompt length"));
        assert!(!rendered.contains("Previous outcome"));
        assert!(!rendered.contains("Validation failure to fix"));
        assert!(rendered.trim_end().ends_with("Return only valid JSON."));
    }

    #[test]
    fn spec_writer_carries_retry_feedback() {
        let mut request = request();
        request.max_length = 1200;
        request.previous_prompt = Some("# Context\nold".to_string());
        request.previous_outcome = Some("tech 0.40 realism 0.70 final 0.48 test=pass".to_string());
        request.violation_reason = Some("no-code constraint violation: inline code is not allowed".to_string());

        let rendered = PromptEngine::new()
            .render_spec_writer(&request)
            .expect("render");
        assert!(rendered.contains("Keep prompt length <= 1200 characters."));
        assert!(rendered.contains("Previous candidate prompt summary: present."));
        assert!(rendered.contains("Previous outcome: tech 0.40 realism 0.70 final 0.48 test=pass"));
        assert!(rendered.contains(
            "Validation failure to fix: no-code constraint violation: inline code is not allowed"
        ));
        assert!(!rendered.contains("# Context\nold"));
    }

    #[test]
    fn intent_gap_limits_patches() {
        let big = "x".repeat(GAP_PATCH_LIMIT_BYTES + 500);
        let rendered = PromptEngine::new()
            .render_intent_gap(&big, "small", 4)
            .expect("render");
        assert!(rendered.contains("Maximum 4 items."));
        assert!(!rendered.contains(&big));
        assert!(rendered.contains(&big[..GAP_PATCH_LIMIT_BYTES]));
    }

    #[test]
    fn coder_prompt_wraps_candidate() {
        let rendered = PromptEngine::new()
            .render_coder("# Context\nbody")
            .expect("render");
        assert!(rendered.starts_with("You are implementing a design/spec request"));
        assert!(rendered.trim_end().ends_with("# Context\nbody"));
    }
}
