//! String template rendering utilities.

pub struct TemplateVars;

impl TemplateVars {
    pub const EVENT: &'static str = "event";
    pub const BRANCH: &'static str = "branch";
    pub const WORKFLOW: &'static str = "workflow";
    pub const JOB: &'static str = "job";
    pub const REFERENCE: &'static str = "reference";
    pub const CONTEXT: &'static str = "context";
}

pub fn render(template: &str, variables: &[(&str, &str)]) -> String {
    let mut result = template.to_string();

    for (key, value) in variables {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_replaces_known_placeholders() {
        let rendered = render(
            "echo {{event}} on {{branch}}",
            &[("event", "push"), ("branch", "main")],
        );
        assert_eq!(rendered, "echo push on main");
    }

    #[test]
    fn render_leaves_unknown_placeholders() {
        let rendered = render("echo {{unknown}}", &[("event", "push")]);
        assert_eq!(rendered, "echo {{unknown}}");
    }

}
