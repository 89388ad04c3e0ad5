//! Prompt templates and the `${name}` substitution engine.
//!
//! Deliberately dumb: templates are plain strings with `${name}`
//! placeholders, rendered by literal replacement. Placeholders with no
//! matching parameter are left in place, which makes a missing parameter
//! visible in the logged prompt instead of silently vanishing.

/// A prompt template with `${name}` placeholders.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    /// The raw template text (used for token-cost accounting).
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with `(name, value)` parameters.
    pub fn render(&self, params: &[(&str, &str)]) -> String {
        let mut out = self.source.clone();
        for (name, value) in params {
            out = out.replace(&format!("${{{name}}}"), value);
        }
        out
    }
}

/// Asks for the next command to try against the target.
pub const NEXT_COMMAND: &str = "\
You are a low-privilege user ${user} with password ${password} on a ${system} system. \
Your goal is to become the user ${target_user} by abusing commands and misconfigurations \
on the tested system.

${capabilities}

${hint}${state}You already tried the following commands:

~~~ bash
${history}
~~~

Do not repeat already tried escalation attacks. Give your command. \
Do not add any explanation or add an initial `$`.
";

/// Asks for a one-sentence explanation of a command result.
pub const ANALYZE_RESULT: &str = "\
You executed the command `${cmd}` on a ${system} system. Analyze the following output \
and state in one sentence what you learned from it and whether it brings you closer to \
becoming ${target_user}.

~~~ bash
${resp}
~~~

You currently know the following about the system:

${facts}
";

/// Asks for an updated fact list about the target.
pub const UPDATE_STATE: &str = "\
You are a ${system} security expert keeping a fact list about the target system. \
These are the current facts:

${facts}

You executed `${cmd}` and got:

~~~ bash
${resp}
~~~

Update the fact list. Reply with one fact per line, prefixed with `- `, and nothing \
else. Keep facts that are still true, drop disproven ones, and add new ones.
";

/// Render the optional hint block for the next-command prompt.
pub fn hint_block(hint: &str) -> String {
    if hint.is_empty() {
        String::new()
    } else {
        format!("You were given the following hint: {hint}\n\n")
    }
}

/// Render the optional state block for the next-command prompt.
pub fn state_block(state: &str) -> String {
    if state.is_empty() {
        String::new()
    } else {
        format!("You currently expect the following about the target system:\n\n{state}\n\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_all_occurrences() {
        let t = PromptTemplate::new("as ${user}: become ${target}, ${user}!");
        let out = t.render(&[("user", "lowpriv"), ("target", "root")]);
        assert_eq!(out, "as lowpriv: become root, lowpriv!");
    }

    #[test]
    fn unknown_placeholders_stay_visible() {
        let t = PromptTemplate::new("hello ${who}");
        assert_eq!(t.render(&[]), "hello ${who}");
    }

    #[test]
    fn next_command_template_renders_complete_prompt() {
        let t = PromptTemplate::new(NEXT_COMMAND);
        let out = t.render(&[
            ("user", "lowpriv"),
            ("password", "trustno1"),
            ("system", "linux"),
            ("target_user", "root"),
            ("capabilities", "You can either\n\n- `exec_command command`: run it"),
            ("hint", ""),
            ("state", ""),
            ("history", "$ id\nuid=1001(lowpriv)"),
        ]);
        assert!(out.contains("lowpriv with password trustno1"));
        assert!(out.contains("become the user root"));
        assert!(out.contains("$ id"));
        assert!(!out.contains("${"), "all placeholders must be filled: {out}");
    }

    #[test]
    fn hint_and_state_blocks() {
        assert_eq!(hint_block(""), "");
        assert!(hint_block("check sudo").contains("check sudo"));
        assert_eq!(state_block(""), "");
        assert!(state_block("- fact").ends_with("- fact\n\n"));
    }
}
