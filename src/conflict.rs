use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
    Overwrite,
    #[default]
    Skip,
    Prompt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Skip,
    /// Stop writing; this and every remaining file are skipped.
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAnswer {
    Yes,
    No,
    AlwaysYes,
    SkipAll,
    Quit,
}

impl PromptAnswer {
    /// Parse a typed reply; empty input or anything unknown means "no".
    pub fn parse(input: &str) -> Self {
        match input.trim().to_ascii_lowercase().as_str() {
            "y" | "yes" => PromptAnswer::Yes,
            "a" | "always" => PromptAnswer::AlwaysYes,
            "s" | "skip-all" => PromptAnswer::SkipAll,
            "q" | "quit" => PromptAnswer::Quit,
            _ => PromptAnswer::No,
        }
    }
}

/// Source of answers for the `Prompt` policy.
pub trait Prompter {
    /// `action` is a short verb phrase such as "overwrite" or "delete".
    fn ask(&mut self, path: &Path, action: &str) -> io::Result<PromptAnswer>;

    /// Whether a human can answer. `Prompt` degrades to `Skip` when not.
    fn is_interactive(&self) -> bool;
}

/// Prompts on stderr and reads answers from stdin.
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&mut self, path: &Path, action: &str) -> io::Result<PromptAnswer> {
        let mut stderr = io::stderr().lock();
        write!(
            stderr,
            "'{}' exists. {}? [y]es / [N]o / [a]lways / [s]kip all / [q]uit: ",
            path.display(),
            capitalize(action)
        )?;
        stderr.flush()?;

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            return Ok(PromptAnswer::Quit);
        }
        Ok(PromptAnswer::parse(&line))
    }

    fn is_interactive(&self) -> bool {
        io::stdin().is_terminal()
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Policy actually used for a run: `Prompt` without a terminal becomes `Skip`.
pub fn effective_policy(requested: OverwritePolicy, prompter: &dyn Prompter) -> OverwritePolicy {
    if requested == OverwritePolicy::Prompt && !prompter.is_interactive() {
        info!("no interactive terminal, existing files will be skipped");
        OverwritePolicy::Skip
    } else {
        requested
    }
}

/// Decide what to do with one existing destination.
///
/// Returns the decision and the policy to use for the following files.
pub fn decide(
    policy: OverwritePolicy,
    prompter: &mut dyn Prompter,
    path: &Path,
    action: &str,
) -> io::Result<(Decision, OverwritePolicy)> {
    match policy {
        OverwritePolicy::Overwrite => Ok((Decision::Proceed, policy)),
        OverwritePolicy::Skip => Ok((Decision::Skip, policy)),
        OverwritePolicy::Prompt => Ok(match prompter.ask(path, action)? {
            PromptAnswer::Yes => (Decision::Proceed, policy),
            PromptAnswer::No => (Decision::Skip, policy),
            PromptAnswer::AlwaysYes => (Decision::Proceed, OverwritePolicy::Overwrite),
            PromptAnswer::SkipAll => (Decision::Skip, OverwritePolicy::Skip),
            PromptAnswer::Quit => (Decision::Quit, policy),
        }),
    }
}
