//! Interactive vs CI detection

use std::io::IsTerminal;

/// CI indicators that disable fancy output
const CI_VARS: &[&str] = &[
    "CI",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "CIRCLECI",
    "JENKINS_URL",
    "BUILDKITE",
    "TF_BUILD",
];

/// Determines how step messages are rendered
#[derive(Debug, Clone)]
pub struct UiContext {
    interactive: bool,
}

impl UiContext {
    /// Detect the current environment
    pub fn detect() -> Self {
        Self::from_env(std::io::stderr().is_terminal(), |var| {
            std::env::var_os(var).is_some()
        })
    }

    /// Plain output regardless of the terminal
    pub fn non_interactive() -> Self {
        Self { interactive: false }
    }

    fn from_env(stderr_is_terminal: bool, is_set: impl Fn(&str) -> bool) -> Self {
        let interactive = stderr_is_terminal && !CI_VARS.iter().any(|var| is_set(var));
        Self { interactive }
    }

    /// Spinners and cliclack log lines
    pub fn use_fancy_output(&self) -> bool {
        self.interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_interactive_context() {
        assert!(!UiContext::non_interactive().use_fancy_output());
    }

    #[test]
    fn ci_disables_fancy_output() {
        let ctx = UiContext::from_env(true, |var| var == "GITLAB_CI");
        assert!(!ctx.use_fancy_output());
    }

    #[test]
    fn terminal_without_ci_is_interactive() {
        assert!(UiContext::from_env(true, |_| false).use_fancy_output());
        assert!(!UiContext::from_env(false, |_| false).use_fancy_output());
    }
}
