//! The system directive sent with every prompt.

const CURRENT_PATH_PLACEHOLDER: &str = "{{currentPath}}";

pub const DEFAULT_SUPERVISOR: &str = "\
You are a careful senior engineer reviewing your own work before you answer. \
Prefer small, complete changes over sweeping rewrites. Never invent files \
you have not been shown unless you are creating them. When you change a \
file, write out its entire new content. Explain what you are about to do \
in a sentence or two before any command block.";

pub const DEFAULT_ORCHESTRATOR: &str = "\
You are an assistant working inside a connected source repository. The \
user is currently looking at: {{currentPath}}.

You can act on the repository by including command blocks in your reply. \
Anything outside a command block is shown to the user as written.

To create or overwrite a file, use exactly this block. The path is \
relative to the repository root and the body is the complete file:

```create-file
path: relative/path/to/file
commit: short commit message
---
full file content
```

To start the project, use exactly this block:

```run-project
command: npm run dev
```

Use one block per file. Blocks run in the order they appear, so write \
files before the run-project block that depends on them. Do not wrap \
command blocks in other code fences.";

/// The two instruction texts that make up the directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instructions {
    pub orchestrator: String,
    pub supervisor: String,
}

impl Default for Instructions {
    fn default() -> Self {
        Self {
            orchestrator: DEFAULT_ORCHESTRATOR.to_string(),
            supervisor: DEFAULT_SUPERVISOR.to_string(),
        }
    }
}

impl Instructions {
    /// Merge both texts into one directive for a prompt made while viewing
    /// `current_path`. An empty path means the repository root.
    pub fn merge(&self, current_path: &str) -> String {
        let location = if current_path.is_empty() { "root" } else { current_path };
        let orchestrator = self.orchestrator.replace(CURRENT_PATH_PLACEHOLDER, location);
        format!("\n{}\n\n---\n\n{}\n", self.supervisor, orchestrator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::extract;

    #[test]
    fn test_merge_layout_and_placeholder() {
        let instructions = Instructions {
            orchestrator: "at {{currentPath}} and {{currentPath}}".to_string(),
            supervisor: "review".to_string(),
        };
        assert_eq!(
            instructions.merge("src/main.rs"),
            "\nreview\n\n---\n\nat src/main.rs and src/main.rs\n"
        );
        assert_eq!(instructions.merge(""), "\nreview\n\n---\n\nat root and root\n");
    }

    #[test]
    fn test_default_examples_follow_the_grammar() {
        let extraction = extract(DEFAULT_ORCHESTRATOR);
        assert_eq!(extraction.matches.len(), 2);
        assert!(extraction.malformed.is_empty());
    }
}
